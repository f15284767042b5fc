//! # natsbee-nats: resilient NATS subscribe-and-forward bridge
//!
//! Connects to a NATS server, subscribes to a fixed set of subjects
//! (optionally as a queue group), decodes every message into JSON events and
//! pushes them into an [`EventSink`]. Built on `async-nats`, this crate adds:
//!
//! - **A single-owner connection kernel** with bounded, paced reconnection
//! - **Exactly-once subscriptions per session**, recreated after every reconnect
//! - **Per-record error isolation**: a bad payload never blocks the next one
//! - **Bounded shutdown** with a grace period and forced close
//! - **Observable lifecycle**: a `watch` of [`ConnectionState`] and a
//!   `broadcast` of [`LifecycleEvent`]s, plus lock-free counters
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use natsbee_nats::{BridgeManager, ChannelSink, Config};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config {
//!         subjects: vec!["orders".into(), "shipping".into()],
//!         queue_group: Some("workers".into()),
//!         ..Default::default()
//!     };
//!
//!     let (sink, mut events) = ChannelSink::new(1024);
//!     let bridge = BridgeManager::from_config(config, Arc::new(sink))?.build_and_start();
//!
//!     while let Some(event) = events.recv().await {
//!         println!("{}", serde_json::to_string(&event)?);
//!     }
//!
//!     bridge.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Connection states
//!
//! ```text
//! Disconnected -> Connecting -> Connected <-> Reconnecting -> Closed
//! ```
//!
//! Consecutive failed attempts are bounded by `max_reconnect_attempts`
//! (default 10) and paced by `reconnect_time_wait` (default 2 seconds).
//! Authentication, authorization and TLS failures close the bridge at once.

pub mod backoff;
pub mod codec;
pub mod config;
pub mod connection;
pub mod decorate;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod manager;
pub mod metrics;
pub mod nats;
pub mod sink;
pub mod state;
pub mod subscription;
pub mod target;
pub mod transport;

#[cfg(test)]
mod testing;

// Re-exports: Configuration
pub use config::{CodecKind, Config, Secret};
pub use target::ConnectionConfig;
// Re-exports: Lifecycle
pub use manager::{BridgeInstance, BridgeManager};
pub use state::{CloseReason, ConnectionState, LifecycleEvent};
// Re-exports: Error handling
pub use error::BridgeError;
// Re-exports: Pipeline seams
pub use codec::{DecodeError, MessageDecoder};
pub use decorate::{Decorator, StaticDecorator};
pub use event::Event;
pub use metrics::MetricsSnapshot;
pub use sink::{ChannelSink, EventSink, SinkError};
pub use transport::{Link, Transport, TransportError};
