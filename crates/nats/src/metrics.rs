//! Bridge counters.
//!
//! Lock-free atomics bumped from the kernel task, read through
//! [`BridgeMetrics::snapshot`]. All counters use `Relaxed` ordering; the
//! snapshot is for monitoring, not for synchronization.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct BridgeMetrics {
    /// Messages routed to a live subscription.
    pub messages_received: AtomicU64,
    /// Events accepted by the sink.
    pub events_pushed: AtomicU64,
    pub decode_errors: AtomicU64,
    pub sink_errors: AtomicU64,
    /// Messages carrying a subscription id from a previous epoch.
    pub stale_dropped: AtomicU64,
    /// Failed connection attempts, including sessions whose subscriptions were denied.
    pub connect_failures: AtomicU64,
    /// Successful connections after the first one.
    pub reconnects: AtomicU64,
    /// Non-terminal errors reported during a session.
    pub transport_errors: AtomicU64,
}

/// Point-in-time copy of [`BridgeMetrics`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub messages_received: u64,
    pub events_pushed: u64,
    pub decode_errors: u64,
    pub sink_errors: u64,
    pub stale_dropped: u64,
    pub connect_failures: u64,
    pub reconnects: u64,
    pub transport_errors: u64,
}

impl BridgeMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_message(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_pushed(&self) {
        self.events_pushed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sink_error(&self) {
        self.sink_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stale(&self) {
        self.stale_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connect_failure(&self) {
        self.connect_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_transport_error(&self) {
        self.transport_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_received: self.messages_received.load(Ordering::Relaxed),
            events_pushed: self.events_pushed.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            sink_errors: self.sink_errors.load(Ordering::Relaxed),
            stale_dropped: self.stale_dropped.load(Ordering::Relaxed),
            connect_failures: self.connect_failures.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            transport_errors: self.transport_errors.load(Ordering::Relaxed),
        }
    }
}
