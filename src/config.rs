//! Gateway configuration module
//!
//! Handles loading and parsing of gateway configuration from files and environment variables.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Path to the configuration file
    #[serde(skip)]
    pub config_path: PathBuf,

    /// Address to bind the TCP listener to
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// TCP port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Per-connection receive buffer size in bytes
    #[serde(default = "default_ring_buffer_capacity")]
    pub ring_buffer_capacity: usize,

    /// Bytes requested per socket read
    #[serde(default = "default_read_chunk_size")]
    pub read_chunk_size: usize,

    /// Protocol violations tolerated before a forced disconnect
    #[serde(default = "default_max_protocol_violations")]
    pub max_protocol_violations: u32,

    /// How long teardown waits for queued writes to drain
    #[serde(default = "default_teardown_timeout")]
    pub teardown_timeout_ms: u64,

    /// Game loop tick rate in milliseconds
    #[serde(default = "default_tick_rate")]
    pub tick_rate_ms: u64,

    /// Interval between metrics snapshots in the log (0 to disable)
    #[serde(default = "default_metrics_interval")]
    pub metrics_interval_secs: u64,

    /// Compression stage configuration
    #[serde(default)]
    pub compression: CompressionConfig,

    /// Enable debug logging
    #[serde(default)]
    pub debug: bool,

    /// Emit log lines as JSON objects
    #[serde(default)]
    pub log_json: bool,
}

/// Compression stage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionConfig {
    /// Install the compression stage
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// zlib level (0-9)
    #[serde(default = "default_compression_level")]
    pub level: u32,

    /// Whether clients send compressed data from the first byte
    #[serde(default)]
    pub inbound: bool,
}

// Default value functions
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    2593
}

fn default_ring_buffer_capacity() -> usize {
    65536
}

fn default_read_chunk_size() -> usize {
    4096
}

fn default_max_protocol_violations() -> u32 {
    10
}

fn default_teardown_timeout() -> u64 {
    5000
}

fn default_tick_rate() -> u64 {
    250
}

fn default_metrics_interval() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_compression_level() -> u32 {
    6
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            level: default_compression_level(),
            inbound: false,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from("config/gateway.toml"),
            bind_address: default_bind_address(),
            port: default_port(),
            ring_buffer_capacity: default_ring_buffer_capacity(),
            read_chunk_size: default_read_chunk_size(),
            max_protocol_violations: default_max_protocol_violations(),
            teardown_timeout_ms: default_teardown_timeout(),
            tick_rate_ms: default_tick_rate(),
            metrics_interval_secs: default_metrics_interval(),
            compression: CompressionConfig::default(),
            debug: false,
            log_json: false,
        }
    }
}

impl ServerConfig {
    /// Load configuration from file and environment variables
    pub async fn load() -> Result<Self> {
        // Determine config path from environment or use default
        let config_path = env::var("RUSTSCAPE_GATEWAY_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/gateway.toml"));

        // Try to load from file
        let mut config = if config_path.exists() {
            let content = tokio::fs::read_to_string(&config_path)
                .await
                .with_context(|| {
                    format!("Failed to read config file: {}", config_path.display())
                })?;

            Self::from_toml(&content).with_context(|| {
                format!("Failed to parse config file: {}", config_path.display())
            })?
        } else {
            Self::default()
        };

        config.config_path = config_path;

        // Override with environment variables
        config.apply_env_overrides();

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("RUSTSCAPE_GATEWAY_BIND_ADDRESS") {
            self.bind_address = val;
        }
        if let Ok(val) = env::var("RUSTSCAPE_GATEWAY_PORT") {
            if let Ok(port) = val.parse() {
                self.port = port;
            }
        }
        if let Ok(val) = env::var("RUSTSCAPE_GATEWAY_RING_BUFFER_CAPACITY") {
            if let Ok(capacity) = val.parse() {
                self.ring_buffer_capacity = capacity;
            }
        }
        if let Ok(val) = env::var("RUSTSCAPE_GATEWAY_READ_CHUNK_SIZE") {
            if let Ok(size) = val.parse() {
                self.read_chunk_size = size;
            }
        }
        if let Ok(val) = env::var("RUSTSCAPE_GATEWAY_MAX_PROTOCOL_VIOLATIONS") {
            if let Ok(max) = val.parse() {
                self.max_protocol_violations = max;
            }
        }
        if let Ok(val) = env::var("RUSTSCAPE_GATEWAY_TEARDOWN_TIMEOUT_MS") {
            if let Ok(ms) = val.parse() {
                self.teardown_timeout_ms = ms;
            }
        }
        if let Ok(val) = env::var("RUSTSCAPE_GATEWAY_TICK_RATE_MS") {
            if let Ok(ms) = val.parse() {
                self.tick_rate_ms = ms;
            }
        }
        if let Ok(val) = env::var("RUSTSCAPE_GATEWAY_COMPRESSION") {
            self.compression.enabled = val.to_lowercase() == "true" || val == "1";
        }
        if let Ok(val) = env::var("RUSTSCAPE_GATEWAY_COMPRESSION_LEVEL") {
            if let Ok(level) = val.parse() {
                self.compression.level = level;
            }
        }
        if let Ok(val) = env::var("RUSTSCAPE_GATEWAY_DEBUG") {
            self.debug = val.to_lowercase() == "true" || val == "1";
        }
        if let Ok(val) = env::var("RUSTSCAPE_GATEWAY_LOG_JSON") {
            self.log_json = val.to_lowercase() == "true" || val == "1";
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.ring_buffer_capacity < 16 {
            anyhow::bail!("Ring buffer capacity must be at least 16 bytes");
        }

        // A variable-length frame carries a u16 length
        if self.ring_buffer_capacity > u16::MAX as usize + 1 {
            anyhow::bail!("Ring buffer capacity must not exceed 65536 bytes");
        }

        if self.read_chunk_size == 0 {
            anyhow::bail!("Read chunk size must be greater than zero");
        }

        if self.compression.level > 9 {
            anyhow::bail!("Compression level must be between 0 and 9");
        }

        if self.compression.inbound && !self.compression.enabled {
            anyhow::bail!("Inbound compression requires the compression stage to be enabled");
        }

        // Tick rate must be reasonable
        if self.tick_rate_ms < 10 || self.tick_rate_ms > 5000 {
            anyhow::bail!("Tick rate must be between 10ms and 5000ms");
        }

        self.socket_addr()?;

        Ok(())
    }

    /// Listener address
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.bind_address, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address: {}:{}", self.bind_address, self.port))
    }

    /// Teardown drain timeout
    pub fn teardown_timeout(&self) -> Duration {
        Duration::from_millis(self.teardown_timeout_ms)
    }

    /// Game loop tick interval
    pub fn tick_rate(&self) -> Duration {
        Duration::from_millis(self.tick_rate_ms)
    }

    /// Log filter used when `RUST_LOG` is not set
    pub fn default_log_filter(&self) -> &'static str {
        if self.debug {
            "debug,rustscape_gateway=trace"
        } else {
            "info,rustscape_gateway=debug"
        }
    }
}
