//! zlib compression stage
//!
//! Each connection gets its own streaming compressor and decompressor.
//! Outbound data is always compressed and sync-flushed so the peer can
//! decode every write on arrival. Inbound data is decompressed only while
//! the session has inbound compression switched on.

use bytes::Bytes;
use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

use crate::error::PipelineError;
use crate::net::session::Session;
use crate::pipeline::{Middleware, StageOutcome};

/// Largest output a single inbound chunk may inflate to
pub const MAX_INFLATED_CHUNK: usize = 1 << 20;

const STAGE_NAME: &str = "compression";

/// Per-connection zlib codec
pub struct CompressionStage {
    compressor: Compress,
    decompressor: Decompress,
}

impl CompressionStage {
    /// Create a stage compressing at `level` (0-9)
    pub fn new(level: u32) -> Self {
        Self {
            compressor: Compress::new(Compression::new(level), true),
            decompressor: Decompress::new(true),
        }
    }

    fn compress(&mut self, data: &[u8]) -> Result<Vec<u8>, PipelineError> {
        let mut out = Vec::with_capacity(data.len() + 64);
        let mut input = data;

        loop {
            if out.len() == out.capacity() {
                out.reserve(out.capacity().max(64));
            }

            let before_in = self.compressor.total_in();
            self.compressor
                .compress_vec(input, &mut out, FlushCompress::Sync)
                .map_err(|e| PipelineError::StageFault {
                    stage: STAGE_NAME,
                    reason: e.to_string(),
                })?;
            let consumed = (self.compressor.total_in() - before_in) as usize;
            input = &input[consumed..];

            // Spare output capacity after consuming everything means the flush completed
            if input.is_empty() && out.len() < out.capacity() {
                return Ok(out);
            }
        }
    }

    fn decompress(&mut self, data: &[u8]) -> Result<StageOutcome, PipelineError> {
        let mut out = Vec::with_capacity((data.len() * 4).max(64));
        let mut input = data;

        loop {
            if out.len() == out.capacity() {
                out.reserve(out.capacity());
            }

            let before_in = self.decompressor.total_in();
            let before_out = self.decompressor.total_out();
            let status = match self
                .decompressor
                .decompress_vec(input, &mut out, FlushDecompress::None)
            {
                Ok(status) => status,
                Err(e) => return Ok(StageOutcome::Halt(format!("corrupt inbound stream: {}", e))),
            };
            let consumed = (self.decompressor.total_in() - before_in) as usize;
            let produced = (self.decompressor.total_out() - before_out) as usize;
            input = &input[consumed..];

            if out.len() > MAX_INFLATED_CHUNK {
                return Ok(StageOutcome::Halt(format!(
                    "inbound chunk inflates past {} bytes",
                    MAX_INFLATED_CHUNK
                )));
            }

            match status {
                Status::StreamEnd => {
                    // Peer finished one zlib stream; the next one starts with a fresh header
                    self.decompressor.reset(true);
                    if input.is_empty() {
                        break;
                    }
                }
                Status::Ok | Status::BufError => {
                    if input.is_empty() && out.len() < out.capacity() {
                        break;
                    }
                    if consumed == 0 && produced == 0 && out.len() < out.capacity() {
                        break;
                    }
                }
            }
        }

        // Empty output is legal: the chunk only carried part of a block
        Ok(StageOutcome::Continue(Bytes::from(out)))
    }
}

impl Default for CompressionStage {
    fn default() -> Self {
        Self::new(6)
    }
}

impl Middleware for CompressionStage {
    fn name(&self) -> &'static str {
        STAGE_NAME
    }

    fn process_inbound(
        &mut self,
        session: &Session,
        data: Bytes,
    ) -> Result<StageOutcome, PipelineError> {
        if !session.inbound_compression() {
            return Ok(StageOutcome::Continue(data));
        }
        self.decompress(&data)
    }

    fn process_outbound(
        &mut self,
        _session: &Session,
        data: Bytes,
    ) -> Result<StageOutcome, PipelineError> {
        Ok(StageOutcome::Continue(Bytes::from(self.compress(&data)?)))
    }
}
