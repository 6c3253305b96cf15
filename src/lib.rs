//! Rustscape Gateway Library
//!
//! This library provides the network boundary of the Rustscape game server:
//! turning raw TCP byte streams into typed packets for the game loop, and
//! typed packets back into bytes for clients.
//!
//! ## Modules
//!
//! - `config` - Gateway configuration management
//! - `error` - Error types and result definitions
//! - `metrics` - Process-wide inbound counters
//! - `net` - Receive buffering, sessions, queues, read loop, sender
//! - `pipeline` - Bidirectional middleware stages (compression)
//! - `protocol` - Packet model, opcode registry and framer
//! - `state` - Collaborators shared by every connection

pub mod config;
pub mod error;
pub mod metrics;
pub mod net;
pub mod pipeline;
pub mod protocol;
pub mod state;

// Re-export commonly used types
pub use config::ServerConfig;
pub use error::{GatewayError, Result};
pub use metrics::{MetricsSnapshot, SessionMetrics};
pub use state::{GatewayReceivers, GatewayState};

/// Gateway version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
