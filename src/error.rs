//! Error handling module
//!
//! Defines the error taxonomy for the gateway. Expected, high-frequency
//! per-packet outcomes (partial frames, unknown opcodes, bad payloads) are
//! reported as values by the framer; the types here cover the failures
//! that actually stop something.

use std::io;

use thiserror::Error;

/// Main error type for the gateway
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Network-related errors
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    /// Ring buffer invariant violations
    #[error("Buffer error: {0}")]
    Buffer(#[from] BufferError),

    /// Protocol-related errors
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Middleware pipeline errors
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// Packet registry configuration errors
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Network-specific errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Session not found: {0}")]
    SessionNotFound(u64),

    #[error("Pending buffer overflow: {pending} bytes buffered, {incoming} more received (capacity {capacity})")]
    PendingBufferOverflow {
        pending: usize,
        incoming: usize,
        capacity: usize,
    },

    #[error("Read error: {0}")]
    ReadError(String),

    #[error("Write error: {0}")]
    WriteError(String),
}

/// Ring buffer errors
///
/// Under correct framing discipline neither variant occurs; seeing one means
/// the framer asked for bytes it had not checked were present.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferError {
    #[error("Buffer empty: requested {requested} bytes, {available} available")]
    BufferEmpty { requested: usize, available: usize },

    #[error("Buffer index out of range: index {index}, {count} bytes buffered")]
    BufferIndexOutOfRange { index: usize, count: usize },
}

/// Protocol-specific errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Unknown opcode: 0x{0:02X}")]
    UnknownOpcode(u8),

    #[error("Invalid length for opcode 0x{opcode:02X}: expected {expected}, got {actual}")]
    InvalidLength {
        opcode: u8,
        expected: usize,
        actual: usize,
    },

    #[error("Parse failure for opcode 0x{opcode:02X}: {reason}")]
    ParseFailure { opcode: u8, reason: String },

    #[error("Protocol violation limit exceeded: {violations} violations (max {max})")]
    ProtocolViolationLimit { violations: u32, max: u32 },
}

/// Middleware pipeline errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// A stage hit an unrecoverable internal error
    #[error("Stage '{stage}' fault: {reason}")]
    StageFault { stage: &'static str, reason: String },

    /// The connection was cancelled while the payload was in flight
    #[error("Pipeline cancelled")]
    Cancelled,
}

/// Packet registry configuration errors (startup only)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Duplicate opcode registration: 0x{0:02X}")]
    DuplicateOpcode(u8),

    #[error("Invalid fixed length for opcode 0x{opcode:02X}: {length}")]
    InvalidLength { opcode: u8, length: usize },
}

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;
