//! Gateway state module
//!
//! Contains the shared collaborators injected into every connection.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::{CompressionConfig, ServerConfig};
use crate::metrics::SessionMetrics;
use crate::net::events::EventBus;
use crate::net::queue::{InboundQueue, InboundReceiver, OutboundQueue, OutboundReceiver};
use crate::net::session::{SessionManager, SessionOptions};
use crate::pipeline::{CompressionStage, Middleware, PipelineTemplate};
use crate::protocol::registry::PacketRegistry;

/// State shared across all connections
pub struct GatewayState {
    /// Gateway configuration
    pub config: ServerConfig,
    /// Frozen opcode table
    pub registry: Arc<PacketRegistry>,
    /// Recipe for each connection's middleware
    pub pipeline: PipelineTemplate,
    /// Process-wide counters
    pub metrics: Arc<SessionMetrics>,
    /// Session manager for tracking connected clients
    pub session_manager: Arc<SessionManager>,
    /// Connection notifications
    pub events: EventBus,
    /// Producer side of the game loop's queue
    pub inbound: InboundQueue,
    /// Producer side of the sender's queue
    pub outbound: OutboundQueue,
    /// Root cancellation token; cancelled on shutdown
    pub shutdown: CancellationToken,
}

/// Consumer ends handed to the game loop and the sender task
pub struct GatewayReceivers {
    pub inbound: InboundReceiver,
    pub outbound: OutboundReceiver,
}

impl GatewayState {
    /// Create the gateway state with the pipeline described by the config
    pub fn new(config: ServerConfig, registry: PacketRegistry) -> (Self, GatewayReceivers) {
        let pipeline = Self::pipeline_from_config(&config.compression);
        Self::with_pipeline(config, registry, pipeline)
    }

    /// Create the gateway state with an explicit pipeline template
    pub fn with_pipeline(
        config: ServerConfig,
        registry: PacketRegistry,
        pipeline: PipelineTemplate,
    ) -> (Self, GatewayReceivers) {
        let metrics = Arc::new(SessionMetrics::new());
        let session_manager = Arc::new(SessionManager::new(
            metrics.clone(),
            SessionOptions {
                max_protocol_violations: config.max_protocol_violations,
                inbound_compression: config.compression.inbound,
            },
        ));
        let (inbound, inbound_rx) = InboundQueue::channel();
        let (outbound, outbound_rx) = OutboundQueue::channel(session_manager.clone());

        info!(
            packets = registry.len(),
            stages = pipeline.len(),
            "Gateway state initialized"
        );

        let state = Self {
            config,
            registry: Arc::new(registry),
            pipeline,
            metrics,
            session_manager,
            events: EventBus::default(),
            inbound,
            outbound,
            shutdown: CancellationToken::new(),
        };
        let receivers = GatewayReceivers {
            inbound: inbound_rx,
            outbound: outbound_rx,
        };
        (state, receivers)
    }

    /// Build the pipeline template for a compression configuration
    pub fn pipeline_from_config(compression: &CompressionConfig) -> PipelineTemplate {
        let template = PipelineTemplate::new();
        if !compression.enabled {
            return template;
        }

        let level = compression.level;
        template.with_stage("compression", move || {
            Box::new(CompressionStage::new(level)) as Box<dyn Middleware>
        })
    }
}

#[cfg(test)]
pub(crate) fn shared_for_tests(
    config: ServerConfig,
    registry: PacketRegistry,
) -> (Arc<GatewayState>, GatewayReceivers) {
    let (state, receivers) = GatewayState::new(config, registry);
    (Arc::new(state), receivers)
}
