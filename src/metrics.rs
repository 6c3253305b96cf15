//! Session metrics
//!
//! Process-wide counters updated by every connection's read path. Counters
//! are monotonic atomics; external collectors read them through
//! [`SessionMetrics::snapshot`].

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Global atomic counters for the inbound path
#[derive(Debug, Default)]
pub struct SessionMetrics {
    /// Bytes belonging to successfully parsed frames
    pub received_bytes: AtomicU64,
    /// Frames parsed and published to the game loop
    pub parsed_packets: AtomicU64,
    /// Buffers discarded because the leading opcode was unregistered
    pub unknown_opcode_drops: AtomicU64,
    /// Frames dropped for a declared or fixed length mismatch
    pub invalid_length_drops: AtomicU64,
    /// Frames dropped because the payload parser rejected them
    pub parse_failures: AtomicU64,
    /// All protocol violations, whatever their cause
    pub protocol_violations: AtomicU64,
    /// Connections torn down because the receive buffer filled up
    pub pending_buffer_overflows: AtomicU64,
}

/// Point-in-time copy of [`SessionMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub received_bytes: u64,
    pub parsed_packets: u64,
    pub unknown_opcode_drops: u64,
    pub invalid_length_drops: u64,
    pub parse_failures: u64,
    pub protocol_violations: u64,
    pub pending_buffer_overflows: u64,
}

impl SessionMetrics {
    /// Create a zeroed metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a parsed frame of `byte_count` bytes
    pub fn packet_parsed(&self, byte_count: usize) {
        self.parsed_packets.fetch_add(1, Ordering::Relaxed);
        self.received_bytes
            .fetch_add(byte_count as u64, Ordering::Relaxed);
    }

    /// Record a buffer discarded for an unknown opcode
    pub fn unknown_opcode(&self) {
        self.unknown_opcode_drops.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a frame dropped for a length mismatch
    pub fn invalid_length(&self) {
        self.invalid_length_drops.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a payload parse failure
    pub fn parse_failure(&self) {
        self.parse_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a protocol violation
    pub fn protocol_violation(&self) {
        self.protocol_violations.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a receive buffer overflow
    pub fn pending_buffer_overflow(&self) {
        self.pending_buffer_overflows
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Copy all counters
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            received_bytes: self.received_bytes.load(Ordering::Relaxed),
            parsed_packets: self.parsed_packets.load(Ordering::Relaxed),
            unknown_opcode_drops: self.unknown_opcode_drops.load(Ordering::Relaxed),
            invalid_length_drops: self.invalid_length_drops.load(Ordering::Relaxed),
            parse_failures: self.parse_failures.load(Ordering::Relaxed),
            protocol_violations: self.protocol_violations.load(Ordering::Relaxed),
            pending_buffer_overflows: self.pending_buffer_overflows.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_counters() {
        let metrics = SessionMetrics::new();
        metrics.packet_parsed(7);
        metrics.packet_parsed(2);
        metrics.unknown_opcode();
        metrics.protocol_violation();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.parsed_packets, 2);
        assert_eq!(snapshot.received_bytes, 9);
        assert_eq!(snapshot.unknown_opcode_drops, 1);
        assert_eq!(snapshot.protocol_violations, 1);
        assert_eq!(snapshot.parse_failures, 0);
    }

    #[test]
    fn test_concurrent_increments() {
        let metrics = Arc::new(SessionMetrics::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let metrics = metrics.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        metrics.parse_failure();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(metrics.snapshot().parse_failures, 8000);
    }

    #[test]
    fn test_snapshot_serializes() {
        let metrics = SessionMetrics::new();
        metrics.pending_buffer_overflow();
        let json = serde_json::to_string(&metrics.snapshot()).unwrap();
        assert!(json.contains("\"pending_buffer_overflows\":1"));
    }
}
