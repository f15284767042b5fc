//! The seam between the connection kernel and the message bus.
//!
//! A [`Transport`] produces single-use [`Link`]s. The kernel owns the current
//! link exclusively: it subscribes through it, pulls [`LinkEvent`]s from it,
//! and drops it when the session ends. A new session always means a new link,
//! so nothing from a previous epoch can leak into the next one.
//!
//! [`NatsTransport`](crate::nats::NatsTransport) is the production
//! implementation; tests use an in-memory bus.

use std::{fmt, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::{subscription::SubjectBinding, target::ConnectionConfig};

/// Transport-assigned handle for one live subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sid:{}", self.0)
    }
}

/// A raw message as delivered by the link, before routing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub subscription: SubscriptionId,
    pub subject: String,
    pub payload: Bytes,
}

/// A routed message: matched to a live binding of the current epoch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub subject: String,
    pub payload: Bytes,
    pub queue_group: Option<String>,
}

/// What a link reports to the kernel.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    Message(Delivery),
    /// Non-terminal problem on an otherwise live session.
    Error(TransportError),
    /// The session is over; the link must be discarded.
    Disconnected(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Connection attempt failed; worth retrying.
    #[error("Connection failed: {0}")]
    Connect(String),

    /// Server refused us for a reason retrying will not fix
    /// (authentication, authorization, TLS).
    #[error("Connection rejected: {0}")]
    Rejected(String),

    #[error("Connection attempt timed out after {0:?}")]
    Timeout(Duration),

    #[error("Subscribe to '{subject}' failed: {reason}")]
    Subscribe { subject: String, reason: String },

    #[error("Unsubscribe of {id} failed: {reason}")]
    Unsubscribe { id: SubscriptionId, reason: String },

    #[error("Server error: {0}")]
    Server(String),

    #[error("Client error: {0}")]
    Client(String),

    #[error("Slow consumer, messages dropped by the client")]
    SlowConsumer,

    #[error("Connection closed")]
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    // Reconnecting cannot help
    Fatal,
    // Worth another attempt
    Reconnect,
}

impl TransportError {
    pub fn disposition(&self) -> Disposition {
        match self {
            TransportError::Rejected(_) => Disposition::Fatal,
            _ => Disposition::Reconnect,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self.disposition(), Disposition::Fatal)
    }
}

/// Opens sessions to the bus.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Performs one connection attempt.
    ///
    /// The kernel bounds the call with the configured connection timeout and
    /// may drop the future at any point.
    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Link>, TransportError>;
}

/// One connected session.
#[async_trait]
pub trait Link: Send {
    async fn subscribe(&mut self, binding: &SubjectBinding) -> Result<SubscriptionId, TransportError>;

    async fn unsubscribe(&mut self, id: SubscriptionId) -> Result<(), TransportError>;

    /// Waits for the next message or session event.
    ///
    /// Must be cancel-safe: the kernel polls it inside `select!`.
    async fn next_event(&mut self) -> LinkEvent;

    /// Closes the session gracefully.
    async fn close(self: Box<Self>);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_rejections_are_fatal() {
        assert!(TransportError::Rejected("authorization violation".into()).is_fatal());
        assert!(!TransportError::Connect("connection refused".into()).is_fatal());
        assert!(!TransportError::Timeout(Duration::from_secs(1)).is_fatal());
        assert!(!TransportError::Closed.is_fatal());
        assert_eq!(
            TransportError::SlowConsumer.disposition(),
            Disposition::Reconnect
        );
    }

    #[test]
    fn test_subscription_id_display() {
        assert_eq!(SubscriptionId(7).to_string(), "sid:7");
    }
}
