//! Middleware pipeline
//!
//! An ordered list of byte transforms applied to every inbound read chunk
//! and every outbound serialized packet. Stages run in registration order
//! in both directions.
//!
//! Stage outcomes:
//! - `Continue` with a non-empty payload hands it to the next stage
//! - `Continue` with an empty payload drops it without penalty
//! - `Halt` drops it and counts a protocol violation against the session
//! - `Err(StageFault)` tears the connection down

pub mod compression;

pub use compression::CompressionStage;

use std::sync::Arc;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::PipelineError;
use crate::net::session::Session;

/// Result of a single stage invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    /// Forward the payload; an empty payload short-circuits the chain
    Continue(Bytes),
    /// Drop the payload and count a protocol violation
    Halt(String),
}

/// A bidirectional byte transform
///
/// One instance exists per connection, so implementations may keep
/// streaming state in `self`.
pub trait Middleware: Send {
    /// Stage name, for logging and faults
    fn name(&self) -> &'static str;

    /// Transform bytes read from the socket
    fn process_inbound(
        &mut self,
        session: &Session,
        data: Bytes,
    ) -> Result<StageOutcome, PipelineError>;

    /// Transform bytes about to be written to the socket
    fn process_outbound(
        &mut self,
        _session: &Session,
        data: Bytes,
    ) -> Result<StageOutcome, PipelineError> {
        Ok(StageOutcome::Continue(data))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    fn name(self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

/// Connection-scoped stage instances
#[derive(Default)]
pub struct MiddlewarePipeline {
    stages: Vec<Box<dyn Middleware>>,
}

impl MiddlewarePipeline {
    /// Create an empty (identity) pipeline
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage
    pub fn push(&mut self, stage: Box<dyn Middleware>) {
        self.stages.push(stage);
    }

    /// Number of stages
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Check if the pipeline has no stages
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Stage names in execution order
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run inbound bytes through every stage.
    ///
    /// `Ok(None)` means the payload was dropped.
    pub fn process_inbound(
        &mut self,
        session: &Session,
        data: Bytes,
        cancel: &CancellationToken,
    ) -> Result<Option<Bytes>, PipelineError> {
        self.run(Direction::Inbound, session, data, cancel)
    }

    /// Run outbound bytes through every stage.
    ///
    /// `Ok(None)` means the payload was dropped.
    pub fn process_outbound(
        &mut self,
        session: &Session,
        data: Bytes,
        cancel: &CancellationToken,
    ) -> Result<Option<Bytes>, PipelineError> {
        self.run(Direction::Outbound, session, data, cancel)
    }

    fn run(
        &mut self,
        direction: Direction,
        session: &Session,
        mut data: Bytes,
        cancel: &CancellationToken,
    ) -> Result<Option<Bytes>, PipelineError> {
        if data.is_empty() {
            return Ok(None);
        }

        for stage in self.stages.iter_mut() {
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }

            let outcome = match direction {
                Direction::Inbound => stage.process_inbound(session, data)?,
                Direction::Outbound => stage.process_outbound(session, data)?,
            };

            match outcome {
                StageOutcome::Continue(next) if next.is_empty() => {
                    trace!(
                        session_id = session.id,
                        stage = stage.name(),
                        direction = direction.name(),
                        "Stage produced empty payload, dropping"
                    );
                    return Ok(None);
                }
                StageOutcome::Continue(next) => data = next,
                StageOutcome::Halt(reason) => {
                    let over_limit = session.record_violation();
                    warn!(
                        session_id = session.id,
                        stage = stage.name(),
                        direction = direction.name(),
                        reason = %reason,
                        violations = session.violations(),
                        "Pipeline halted"
                    );
                    if over_limit {
                        session.begin_disconnect("protocol violation limit exceeded");
                    }
                    return Ok(None);
                }
            }
        }

        Ok(Some(data))
    }
}

impl std::fmt::Debug for MiddlewarePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MiddlewarePipeline")
            .field("stages", &self.stage_names())
            .finish()
    }
}

type StageFactory = Arc<dyn Fn() -> Box<dyn Middleware> + Send + Sync>;

/// Shared, read-only recipe for building per-connection pipelines
#[derive(Clone, Default)]
pub struct PipelineTemplate {
    factories: Vec<(&'static str, StageFactory)>,
}

impl PipelineTemplate {
    /// Create an empty template
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a stage; `factory` runs once per connection
    pub fn with_stage<F>(mut self, name: &'static str, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Middleware> + Send + Sync + 'static,
    {
        debug!(stage = name, position = self.factories.len(), "Pipeline stage registered");
        self.factories.push((name, Arc::new(factory)));
        self
    }

    /// Number of registered stages
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    /// Check if no stages are registered
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Build a fresh pipeline with its own stage state
    pub fn instantiate(&self) -> MiddlewarePipeline {
        MiddlewarePipeline {
            stages: self.factories.iter().map(|(_, make)| make()).collect(),
        }
    }
}

impl std::fmt::Debug for PipelineTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self.factories.iter().map(|(name, _)| *name).collect();
        f.debug_struct("PipelineTemplate")
            .field("stages", &names)
            .finish()
    }
}
