//! Error handling for the bridge.
//!
//! `BridgeError` is what the public surface returns. The narrower error types
//! live next to the code that produces them; the kernel folds the terminal
//! ones into `TransportFatal`:
//!
//! - [`TransportError`](crate::transport::TransportError): one connection attempt or session failed
//! - [`BackoffError`](crate::backoff::BackoffError): the reconnect budget is spent
//!
//! Per-message failures ([`DecodeError`](crate::codec::DecodeError),
//! [`SinkError`](crate::sink::SinkError)) never reach this type: the
//! dispatcher logs, counts and skips them.
//!
//! # Recoverability
//!
//! **Startup** (returned before anything connects):
//! - `Config`, `Validation`
//!
//! **Terminal** (the bridge is `Closed` afterwards):
//! - `TransportFatal`, `ShutdownTimeout`
//!
//! ```ignore
//! match instance.closed().await {
//!     Ok(()) => info!("bridge stopped"),
//!     Err(BridgeError::TransportFatal(reason)) => {
//!         error!("giving up on the bus: {reason}");
//!         std::process::exit(1);
//!     }
//!     Err(e) => warn!("bridge ended: {e}"),
//! }
//! ```

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    /// Configuration is inconsistent in a way field validation cannot express,
    /// e.g. a user without a password or a malformed URL.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Field validation failed.
    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),

    /// The bus connection is permanently lost: the server rejected us, or
    /// the reconnect budget is spent. The bridge is closed.
    #[error("Fatal transport error: {0}")]
    TransportFatal(String),

    /// In-flight work did not drain within the grace period; the close was forced.
    #[error("Shutdown did not complete within {0:?}")]
    ShutdownTimeout(Duration),
}
