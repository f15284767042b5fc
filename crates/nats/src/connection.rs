//! Connection kernel: owns the bus session and drives reconnection.
//!
//! The kernel is a single task. It connects through a [`Transport`], lets the
//! [`SubscriptionManager`] subscribe every binding, then pulls events off the
//! [`Link`] until the session ends. Because one task does all of this, state
//! transitions are serialized and the link never has a second owner.
//!
//! # Architecture
//!
//! ```text
//! BridgeInstance (stop / shutdown / observe)
//!     ↓ CancellationToken          ↑ watch<ConnectionState>, broadcast<LifecycleEvent>
//! ConnectionKernel (connect, retry, route)
//!     ↓                            ↓
//! Transport / Link             Dispatcher → EventSink
//!     ↓
//! NATS server
//! ```
//!
//! # Retry policy
//!
//! A failed attempt consumes one unit of the [`Backoff`] budget and waits
//! `reconnect_wait` (optionally growing). An attempt only succeeds once every
//! binding is subscribed, so a server that accepts the connection but denies
//! a subscription uses up the budget too. When the budget is spent, or the
//! server rejects us for a reason retrying cannot fix, the kernel closes and
//! returns [`BridgeError::TransportFatal`]. A lost session waits once before
//! the first reconnect attempt; a fully established session resets the budget.

use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::{
    backoff::Backoff,
    dispatch::Dispatcher,
    error::BridgeError,
    metrics::BridgeMetrics,
    state::{CloseReason, ConnectionState, LifecycleEvent},
    subscription::SubscriptionManager,
    target::ConnectionConfig,
    transport::{Link, LinkEvent, Transport, TransportError},
};

/// How a connected session ended.
enum SessionEnd {
    Stopped,
    Lost(String),
}

pub struct ConnectionKernel {
    config: ConnectionConfig,

    transport: Arc<dyn Transport>,

    subscriptions: SubscriptionManager,

    dispatcher: Dispatcher,

    backoff: Backoff,

    cancel: CancellationToken,

    state_tx: Arc<watch::Sender<ConnectionState>>,

    events_tx: broadcast::Sender<LifecycleEvent>,

    metrics: Arc<BridgeMetrics>,

    /// Number of sessions established so far.
    epoch: u64,
}

impl ConnectionKernel {
    pub fn new(
        config: ConnectionConfig,
        transport: Arc<dyn Transport>,
        subscriptions: SubscriptionManager,
        dispatcher: Dispatcher,
        metrics: Arc<BridgeMetrics>,
        cancel: CancellationToken,
        events_tx: broadcast::Sender<LifecycleEvent>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            backoff: config.backoff(),
            config,
            transport,
            subscriptions,
            dispatcher,
            cancel,
            state_tx: Arc::new(state_tx),
            events_tx,
            metrics,
            epoch: 0,
        }
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Handle used by the owner to force `Closed` if the kernel is aborted.
    pub fn state_sender(&self) -> Arc<watch::Sender<ConnectionState>> {
        self.state_tx.clone()
    }

    /// Runs until stopped or until the connection is permanently lost.
    ///
    /// # Errors
    /// `BridgeError::TransportFatal` when the server rejects the client or the
    /// reconnect budget is exhausted. The kernel is `Closed` either way.
    pub async fn run(mut self) -> Result<(), BridgeError> {
        info!(
            uri = %self.config.redacted_uri,
            authenticated = self.config.has_credentials,
            bindings = self.subscriptions.bindings().len(),
            "Starting connection kernel"
        );
        self.update_state(ConnectionState::Connecting);

        loop {
            let Some(mut link) = self.establish().await? else {
                self.close_stopped(None).await;
                return Ok(());
            };

            let epoch = self.epoch + 1;
            let subscribed = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                result = self.subscriptions.on_connected(link.as_mut(), epoch) => Some(result),
            };

            let end = match subscribed {
                None => SessionEnd::Stopped,
                Some(Err(e)) => {
                    self.subscriptions.on_disconnected();
                    drop(link);
                    if !self.retry_after(e).await? {
                        self.close_stopped(None).await;
                        return Ok(());
                    }
                    continue;
                }
                Some(Ok(count)) => {
                    self.epoch = epoch;
                    self.backoff.reset();
                    self.on_established(count);
                    self.drive(link.as_mut()).await
                }
            };

            match end {
                SessionEnd::Stopped => {
                    self.close_stopped(Some(link)).await;
                    return Ok(());
                }
                SessionEnd::Lost(reason) => {
                    drop(link);
                    if !self.on_lost(reason).await {
                        self.close_stopped(None).await;
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Connects, retrying per the backoff policy.
    ///
    /// Returns `Ok(None)` if cancelled while connecting or waiting.
    async fn establish(&mut self) -> Result<Option<Box<dyn Link>>, BridgeError> {
        loop {
            let attempt = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(None),
                result = tokio::time::timeout(
                    self.config.connection_timeout,
                    self.transport.connect(&self.config),
                ) => result,
            };

            let err = match attempt {
                Ok(Ok(link)) => return Ok(Some(link)),
                Ok(Err(e)) => e,
                Err(_) => TransportError::Timeout(self.config.connection_timeout),
            };

            if !self.retry_after(err).await? {
                return Ok(None);
            }
        }
    }

    /// Counts a failed attempt and waits before the next one.
    ///
    /// Returns `Ok(false)` if cancelled during the wait, and the terminal
    /// error once the failure is fatal or the budget is spent.
    async fn retry_after(&mut self, err: TransportError) -> Result<bool, BridgeError> {
        self.metrics.record_connect_failure();

        if err.is_fatal() {
            return Err(self.fail(err.to_string()));
        }

        match self.backoff.next_sleep() {
            Ok(delay) => {
                warn!(
                    attempt = self.backoff.attempt(),
                    "Connection attempt failed, retrying in {:.2} seconds: {err}",
                    delay.as_secs_f64()
                );
                self.update_state(ConnectionState::Reconnecting(delay.as_secs_f64()));
                Ok(self.pause(delay).await)
            }
            Err(exhausted) => Err(self.fail(format!("{exhausted}, last error: {err}"))),
        }
    }

    fn on_established(&mut self, subscriptions: usize) {
        self.update_state(ConnectionState::Connected);

        let event = if self.epoch == 1 {
            info!(epoch = self.epoch, subscriptions, "Connected to {}", self.config.redacted_uri);
            LifecycleEvent::Connected {
                epoch: self.epoch,
                subscriptions,
            }
        } else {
            self.metrics.record_reconnect();
            info!(epoch = self.epoch, subscriptions, "Reconnected to {}", self.config.redacted_uri);
            LifecycleEvent::Reconnected {
                epoch: self.epoch,
                subscriptions,
            }
        };
        self.emit(event);
    }

    /// Pumps the link until it disconnects or the kernel is cancelled.
    async fn drive(&mut self, link: &mut dyn Link) -> SessionEnd {
        loop {
            let event = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return SessionEnd::Stopped,
                event = link.next_event() => event,
            };

            match event {
                LinkEvent::Message(delivery) => {
                    let sid = delivery.subscription;
                    match self.subscriptions.route(delivery) {
                        Some(message) => {
                            self.dispatcher.dispatch(message).await;
                        }
                        None => {
                            self.metrics.record_stale();
                            trace!(%sid, "Dropped message for stale subscription");
                        }
                    }
                }
                LinkEvent::Error(e) => {
                    self.metrics.record_transport_error();
                    warn!(epoch = self.epoch, "Transport error: {e}");
                    self.emit(LifecycleEvent::TransportError(e.to_string()));
                }
                LinkEvent::Disconnected(reason) => return SessionEnd::Lost(reason),
            }
        }
    }

    /// Invalidates the session and waits before reconnecting.
    ///
    /// Returns `false` if cancelled during the wait.
    async fn on_lost(&mut self, reason: String) -> bool {
        self.subscriptions.on_disconnected();
        warn!(epoch = self.epoch, "Disconnected: {reason}");
        self.emit(LifecycleEvent::Disconnected {
            epoch: self.epoch,
            reason,
        });

        let delay = self.backoff.current_delay();
        self.update_state(ConnectionState::Reconnecting(delay.as_secs_f64()));
        self.pause(delay).await
    }

    async fn close_stopped(&mut self, link: Option<Box<dyn Link>>) {
        info!("Shutdown signal received, closing connection");

        if let Some(mut link) = link {
            self.subscriptions.shutdown(link.as_mut()).await;
            link.close().await;
        }

        self.update_state(ConnectionState::Closed);
        self.emit(LifecycleEvent::Closed(CloseReason::Stopped));
        info!("Connection kernel shutdown completed");
    }

    /// Terminal failure: closes, reports once, returns the error to surface.
    fn fail(&mut self, reason: String) -> BridgeError {
        error!("Closing bus connection permanently: {reason}");
        self.subscriptions.on_disconnected();
        self.update_state(ConnectionState::Closed);
        self.emit(LifecycleEvent::Closed(CloseReason::Fatal(reason.clone())));
        BridgeError::TransportFatal(reason)
    }

    /// Sleeps for `delay` unless cancelled first.
    async fn pause(&self, delay: std::time::Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    fn update_state(&self, state: ConnectionState) {
        let changed = self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state.clone();
                true
            }
        });

        if changed {
            debug!("Connection state changed to: {state}");
        }
    }

    fn emit(&self, event: LifecycleEvent) {
        // No receivers is fine
        let _ = self.events_tx.send(event);
    }
}
