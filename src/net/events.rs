//! Connection lifecycle notifications
//!
//! Published on a broadcast channel. Subscribers that fall behind lose the
//! oldest events; publishing never blocks the network path.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::broadcast;

use crate::error::GatewayError;
use crate::net::session::Session;

/// Default number of events retained for slow subscribers
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// A connection lifecycle notification
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// A connection was accepted and is now `Connected`
    ClientConnected(Arc<Session>),
    /// Teardown finished; the session is `Disconnected`
    ClientDisconnected(Arc<Session>),
    /// Bytes as read from the socket, before any middleware
    DataReceivedRaw(Arc<Session>, Bytes),
    /// A fault, with the session when known
    ExceptionRaised {
        error: Arc<GatewayError>,
        session: Option<Arc<Session>>,
    },
}

/// Broadcast hub for [`ConnectionEvent`]s
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ConnectionEvent>,
}

impl EventBus {
    /// Create a bus retaining up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to events published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.tx.subscribe()
    }

    /// Publish an event; having no subscribers is not an error
    pub fn publish(&self, event: ConnectionEvent) {
        let _ = self.tx.send(event);
    }

    /// Publish an `ExceptionRaised` event
    pub fn exception(&self, error: GatewayError, session: Option<Arc<Session>>) {
        self.publish(ConnectionEvent::ExceptionRaised {
            error: Arc::new(error),
            session,
        });
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NetworkError;

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::default();
        bus.exception(GatewayError::Network(NetworkError::ConnectionClosed), None);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_subscriber_receives_exception() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        bus.exception(GatewayError::Network(NetworkError::SessionNotFound(4)), None);

        match rx.recv().await.unwrap() {
            ConnectionEvent::ExceptionRaised { error, session } => {
                assert!(session.is_none());
                assert!(error.to_string().contains("Session not found: 4"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
