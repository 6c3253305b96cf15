//! Session management module
//!
//! Manages client sessions including:
//! - Session lifecycle (Connecting -> Connected -> Disconnecting -> Disconnected)
//! - Per-session protocol violation accounting
//! - Per-session middleware pipeline and socket writer
//! - Thread-safe session registry

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{GatewayError, NetworkError, PipelineError, Result};
use crate::metrics::SessionMetrics;
use crate::pipeline::MiddlewarePipeline;

/// Unique session identifier
pub type SessionId = u64;

/// Write half of a connection's socket
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Session state in the connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Accepted, not yet announced
    Connecting,
    /// Fully established
    Connected,
    /// Teardown in progress; pending outbound writes are draining
    Disconnecting,
    /// Terminal
    Disconnected,
}

impl SessionState {
    /// Check if the session is still active (not disconnecting/disconnected)
    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Connecting | SessionState::Connected)
    }

    /// Check if queued outbound packets may still be written
    pub fn accepts_outbound(&self) -> bool {
        matches!(self, SessionState::Connected | SessionState::Disconnecting)
    }

    /// Get a human-readable name for the state
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Connecting => "Connecting",
            SessionState::Connected => "Connected",
            SessionState::Disconnecting => "Disconnecting",
            SessionState::Disconnected => "Disconnected",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Per-session settings derived from the server configuration
#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    /// Violations tolerated before a forced disconnect
    pub max_protocol_violations: u32,
    /// Whether inbound data starts out compressed
    pub inbound_compression: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            max_protocol_violations: 10,
            inbound_compression: false,
        }
    }
}

/// A connected client session
pub struct Session {
    /// Unique session identifier
    pub id: SessionId,
    /// Remote address of the client
    pub address: SocketAddr,
    /// Current session state
    state: RwLock<SessionState>,
    /// Protocol violations so far
    violations: AtomicU32,
    /// Violation threshold
    max_violations: u32,
    /// Whether inbound bytes are currently compressed
    inbound_compression: AtomicBool,
    /// Connection-scoped middleware instance
    pipeline: Mutex<MiddlewarePipeline>,
    /// Socket write half (taken on teardown)
    writer: tokio::sync::Mutex<Option<BoxedWriter>>,
    /// Cancelled when teardown closes the writer; aborts an in-flight write
    writer_closed: CancellationToken,
    /// Outbound envelopes queued but not yet written
    pending_outbound: AtomicUsize,
    /// Signalled when `pending_outbound` reaches zero
    drained: Notify,
    /// Cancelled when teardown starts
    cancel: CancellationToken,
    /// Frames published for this session
    packets_received: AtomicU64,
    /// Shared process-wide counters
    metrics: Arc<SessionMetrics>,
    /// Time of session creation
    pub created_at: Instant,
    /// Time of last activity
    last_activity: RwLock<Instant>,
}

impl Session {
    /// Create a new session
    pub fn new(
        id: SessionId,
        address: SocketAddr,
        writer: BoxedWriter,
        pipeline: MiddlewarePipeline,
        metrics: Arc<SessionMetrics>,
        options: SessionOptions,
        cancel: CancellationToken,
    ) -> Self {
        let now = Instant::now();
        Self {
            id,
            address,
            state: RwLock::new(SessionState::Connecting),
            violations: AtomicU32::new(0),
            max_violations: options.max_protocol_violations,
            inbound_compression: AtomicBool::new(options.inbound_compression),
            pipeline: Mutex::new(pipeline),
            writer: tokio::sync::Mutex::new(Some(writer)),
            writer_closed: CancellationToken::new(),
            pending_outbound: AtomicUsize::new(0),
            drained: Notify::new(),
            cancel,
            packets_received: AtomicU64::new(0),
            metrics,
            created_at: now,
            last_activity: RwLock::new(now),
        }
    }

    // ============ Lifecycle ============

    /// Get the current session state
    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// Transition to a new state if currently in the expected state
    pub fn transition_state(&self, expected: SessionState, new_state: SessionState) -> bool {
        let mut state = self.state.write();
        if *state == expected {
            *state = new_state;
            debug!(
                session_id = self.id,
                old_state = %expected,
                new_state = %new_state,
                "Session state changed"
            );
            true
        } else {
            false
        }
    }

    /// Move from `Connecting` to `Connected`
    pub fn mark_connected(&self) -> bool {
        self.transition_state(SessionState::Connecting, SessionState::Connected)
    }

    /// Start teardown. Only the first caller wins; later and concurrent
    /// requests return `false`.
    pub fn begin_disconnect(&self, reason: &str) -> bool {
        let old = {
            let mut state = self.state.write();
            let old = *state;
            if !old.is_active() {
                return false;
            }
            *state = SessionState::Disconnecting;
            old
        };
        self.cancel.cancel();
        debug!(
            session_id = self.id,
            old_state = %old,
            reason = reason,
            "Session disconnecting"
        );
        true
    }

    /// Move from `Disconnecting` to the terminal state
    pub fn finish_disconnect(&self) -> bool {
        self.transition_state(SessionState::Disconnecting, SessionState::Disconnected)
    }

    /// Check if session is active
    pub fn is_active(&self) -> bool {
        self.state().is_active()
    }

    /// Cancellation token observed by this session's read loop and pipeline
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    // ============ Protocol state ============

    /// Record a protocol violation, returning `true` once the threshold is
    /// exceeded
    pub fn record_violation(&self) -> bool {
        self.metrics.protocol_violation();
        let violations = self.violations.fetch_add(1, Ordering::AcqRel) + 1;
        violations > self.max_violations
    }

    /// Violations recorded so far
    pub fn violations(&self) -> u32 {
        self.violations.load(Ordering::Acquire)
    }

    /// Configured violation threshold
    pub fn max_violations(&self) -> u32 {
        self.max_violations
    }

    /// Whether inbound data is currently compressed
    pub fn inbound_compression(&self) -> bool {
        self.inbound_compression.load(Ordering::Acquire)
    }

    /// Switch inbound compression on or off
    pub fn set_inbound_compression(&self, enabled: bool) {
        self.inbound_compression.store(enabled, Ordering::Release);
    }

    /// Count a frame published for this session
    pub fn packet_received(&self) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Frames published for this session
    pub fn packets_received(&self) -> u64 {
        self.packets_received.load(Ordering::Relaxed)
    }

    /// Shared process-wide counters
    pub fn metrics(&self) -> &Arc<SessionMetrics> {
        &self.metrics
    }

    // ============ Middleware ============

    /// Run inbound bytes through this session's pipeline
    pub fn process_inbound(&self, data: Bytes) -> std::result::Result<Option<Bytes>, PipelineError> {
        let mut pipeline = self.pipeline.lock();
        pipeline.process_inbound(self, data, &self.cancel)
    }

    /// Run outbound bytes through this session's pipeline.
    ///
    /// Not tied to the session token: writes queued before teardown still
    /// drain while the session is `Disconnecting`.
    pub fn process_outbound(
        &self,
        data: Bytes,
    ) -> std::result::Result<Option<Bytes>, PipelineError> {
        let mut pipeline = self.pipeline.lock();
        pipeline.process_outbound(self, data, &CancellationToken::new())
    }

    // ============ Outbound ============

    /// Count an envelope queued for this session
    pub fn outbound_queued(&self) {
        self.pending_outbound.fetch_add(1, Ordering::AcqRel);
    }

    /// Count an envelope written or dropped
    pub fn outbound_completed(&self) {
        let previous = self
            .pending_outbound
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .unwrap_or(0);
        if previous <= 1 {
            self.drained.notify_waiters();
        }
    }

    /// Envelopes queued but not yet written
    pub fn pending_outbound(&self) -> usize {
        self.pending_outbound.load(Ordering::Acquire)
    }

    /// Wait until queued writes have drained, or `timeout` elapses.
    /// Returns `true` if everything drained.
    pub async fn wait_drained(&self, timeout: Duration) -> bool {
        let drain = async {
            loop {
                let notified = self.drained.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if self.pending_outbound() == 0 {
                    break;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, drain).await.is_ok()
    }

    /// Write already-encoded bytes to the socket.
    ///
    /// A write still blocked when the writer is closed fails with
    /// `ConnectionClosed`.
    pub async fn write_bytes(&self, data: &[u8]) -> Result<()> {
        tokio::select! {
            biased;
            _ = self.writer_closed.cancelled() => {
                Err(GatewayError::Network(NetworkError::ConnectionClosed))
            }
            result = self.write_locked(data) => result,
        }
    }

    async fn write_locked(&self, data: &[u8]) -> Result<()> {
        let mut writer = self.writer.lock().await;
        let writer = writer
            .as_mut()
            .ok_or(GatewayError::Network(NetworkError::ConnectionClosed))?;
        writer
            .write_all(data)
            .await
            .map_err(|e| GatewayError::Network(NetworkError::WriteError(e.to_string())))?;
        writer
            .flush()
            .await
            .map_err(|e| GatewayError::Network(NetworkError::WriteError(e.to_string())))
    }

    /// Shut down and release the socket write half, abandoning any write
    /// still in flight
    pub async fn close_writer(&self) {
        self.writer_closed.cancel();
        if let Some(mut writer) = self.writer.lock().await.take() {
            if let Err(e) = writer.shutdown().await {
                debug!(session_id = self.id, error = %e, "Error during writer shutdown");
            }
        }
    }

    // ============ Activity ============

    /// Update the last activity timestamp
    pub fn touch(&self) {
        *self.last_activity.write() = Instant::now();
    }

    /// Get the last activity time
    pub fn last_activity(&self) -> Instant {
        *self.last_activity.read()
    }

    /// Get the duration since last activity
    pub fn idle_duration(&self) -> Duration {
        self.last_activity().elapsed()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("state", &self.state())
            .field("violations", &self.violations())
            .field("pending_outbound", &self.pending_outbound())
            .field("idle_duration", &self.idle_duration())
            .finish()
    }
}

/// Thread-safe session manager
pub struct SessionManager {
    /// Map of session ID to session
    sessions: DashMap<SessionId, Arc<Session>>,
    /// Next session ID to assign
    next_id: AtomicU64,
    /// Settings applied to new sessions
    options: SessionOptions,
    /// Shared counters handed to each session
    metrics: Arc<SessionMetrics>,
}

impl SessionManager {
    /// Create a new session manager
    pub fn new(metrics: Arc<SessionMetrics>, options: SessionOptions) -> Self {
        Self {
            sessions: DashMap::new(),
            next_id: AtomicU64::new(1),
            options,
            metrics,
        }
    }

    /// Create a new session and register it
    pub fn create_session(
        &self,
        address: SocketAddr,
        writer: BoxedWriter,
        pipeline: MiddlewarePipeline,
        parent: &CancellationToken,
    ) -> Arc<Session> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        let session = Arc::new(Session::new(
            id,
            address,
            writer,
            pipeline,
            self.metrics.clone(),
            self.options,
            parent.child_token(),
        ));

        self.sessions.insert(id, session.clone());

        info!(session_id = id, address = %address, "Session created");

        session
    }

    /// Get a session by ID
    pub fn get(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions.get(&id).map(|r| r.clone())
    }

    /// Remove a session
    pub fn remove(&self, id: SessionId) -> Option<Arc<Session>> {
        let removed = self.sessions.remove(&id).map(|(_, session)| session);
        if let Some(session) = &removed {
            info!(
                session_id = id,
                violations = session.violations(),
                packets = session.packets_received(),
                "Session removed"
            );
        }
        removed
    }

    /// Ask a session to disconnect; its read loop performs the teardown
    pub fn disconnect(&self, id: SessionId, reason: &str) -> bool {
        match self.get(id) {
            Some(session) => session.begin_disconnect(reason),
            None => {
                warn!(session_id = id, "Disconnect requested for unknown session");
                false
            }
        }
    }

    /// Disconnect all sessions
    pub fn disconnect_all(&self, reason: &str) {
        for session in self.sessions.iter() {
            session.begin_disconnect(reason);
        }
    }

    /// Get the count of tracked sessions
    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    /// Get the count of sessions per state
    pub fn count_by_state(&self) -> HashMap<SessionState, usize> {
        let mut counts = HashMap::new();
        for session in self.sessions.iter() {
            *counts.entry(session.state()).or_insert(0) += 1;
        }
        counts
    }

    /// Get list of all session IDs
    pub fn session_ids(&self) -> Vec<SessionId> {
        self.sessions.iter().map(|r| *r.key()).collect()
    }
}
