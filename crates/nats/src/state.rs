//! Connection state and lifecycle events.
//!
//! The connection kernel publishes its current [`ConnectionState`] through a
//! `watch` channel and every transition through a `broadcast` channel of
//! [`LifecycleEvent`]s. Observers (the binary, tests, readiness probes) pick
//! whichever fits: "what is the state now" or "what happened".

use std::fmt;

/// Current state of the bus connection.
///
/// ```text
/// Disconnected -> Connecting -> Connected <-> Reconnecting
///                      \            |              |
///                       +------> Closed <----------+
/// ```
///
/// `Closed` is terminal: the kernel has exited and will not reconnect.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// Kernel built but not started.
    Disconnected,

    /// First connection attempt in progress.
    Connecting,

    /// Connected; every binding has a live subscription in the current epoch.
    Connected,

    /// Waiting before the next connection attempt.
    ///
    /// The `f64` is the number of seconds until the attempt.
    Reconnecting(f64),

    /// Permanently closed, either by `stop()` or by a fatal transport error.
    Closed,
}

impl ConnectionState {
    /// Short identifier for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
            ConnectionState::Reconnecting(_) => "Reconnecting",
            ConnectionState::Closed => "Closed",
        }
    }

    /// Extra detail for display; empty for states that carry none.
    pub fn details(&self) -> String {
        match self {
            ConnectionState::Reconnecting(seconds) => format!("in {seconds} seconds"),
            _ => String::new(),
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// True while a connection attempt is pending.
    pub fn is_connecting(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Reconnecting(_)
        )
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, ConnectionState::Closed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())?;
        let details = self.details();
        if !details.is_empty() {
            write!(f, " ({details})")?;
        }
        Ok(())
    }
}

/// Why the kernel reached `Closed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// `stop()` was requested.
    Stopped,
    /// Retries were exhausted or the transport refused us permanently.
    Fatal(String),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Stopped => write!(f, "stopped"),
            CloseReason::Fatal(reason) => write!(f, "fatal: {reason}"),
        }
    }
}

/// A transition record emitted by the connection kernel.
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    /// First connection established; `subscriptions` bindings are live.
    Connected { epoch: u64, subscriptions: usize },

    /// Connection lost; subscriptions of `epoch` are no longer valid.
    Disconnected { epoch: u64, reason: String },

    /// Connection re-established and every binding resubscribed.
    Reconnected { epoch: u64, subscriptions: usize },

    /// Transport reported an error that did not end the session.
    TransportError(String),

    /// Terminal event. Emitted exactly once.
    Closed(CloseReason),
}
