//! High-level bridge lifecycle.
//!
//! [`BridgeManager`] validates configuration and wires the pieces together;
//! [`BridgeManager::build_and_start`] spawns the connection kernel and hands
//! back a [`BridgeInstance`], the cloneable control handle.
//!
//! # Shutdown
//!
//! `stop()` only requests the close. `shutdown()` requests it and then waits
//! up to the grace period for the kernel to unsubscribe and finish the message
//! it is dispatching. If the grace period runs out the kernel task is aborted,
//! the state is forced to `Closed` and `ShutdownTimeout` is returned.
//!
//! ```ignore
//! let (sink, mut events) = ChannelSink::new(1024);
//! let bridge = BridgeManager::from_config(config, Arc::new(sink))?.build_and_start();
//!
//! tokio::select! {
//!     result = bridge.closed() => result?,
//!     _ = tokio::signal::ctrl_c() => bridge.shutdown().await?,
//! }
//! ```

use std::{sync::Arc, time::Duration};

use tokio::{
    sync::{broadcast, watch},
    task::AbortHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use validator::Validate;

use crate::{
    codec::MessageDecoder,
    config::Config,
    connection::ConnectionKernel,
    decorate::{Decorator, NoopDecorator, StaticDecorator},
    dispatch::Dispatcher,
    error::BridgeError,
    metrics::{BridgeMetrics, MetricsSnapshot},
    nats::NatsTransport,
    sink::EventSink,
    state::{CloseReason, ConnectionState, LifecycleEvent},
    subscription::SubscriptionManager,
    target::ConnectionConfig,
    transport::Transport,
};

const LIFECYCLE_CAPACITY: usize = 128;

/// How the kernel task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Termination {
    Stopped,
    Fatal(String),
    Aborted,
}

pub struct BridgeManager {
    config: Config,

    connection: ConnectionConfig,

    transport: Arc<dyn Transport>,

    decoder: Arc<dyn MessageDecoder>,

    decorator: Arc<dyn Decorator>,

    sink: Arc<dyn EventSink>,

    events_tx: broadcast::Sender<LifecycleEvent>,
}

impl BridgeManager {
    /// Validates `config` and resolves the connection target.
    ///
    /// # Errors
    /// `Validation` or `Config` if the configuration cannot start a bridge.
    pub fn from_config(config: Config, sink: Arc<dyn EventSink>) -> Result<Self, BridgeError> {
        config.validate()?;
        let connection = ConnectionConfig::from_config(&config)?;

        let decorator: Arc<dyn Decorator> = {
            let decorator = StaticDecorator::from_config(&config);
            if decorator.is_empty() {
                Arc::new(NoopDecorator)
            } else {
                Arc::new(decorator)
            }
        };

        let (events_tx, _) = broadcast::channel(LIFECYCLE_CAPACITY);

        Ok(Self {
            transport: Arc::new(NatsTransport::from_config(&connection)),
            decoder: config.codec.decoder(),
            decorator,
            sink,
            connection,
            config,
            events_tx,
        })
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_decoder(mut self, decoder: Arc<dyn MessageDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn with_decorator(mut self, decorator: Arc<dyn Decorator>) -> Self {
        self.decorator = decorator;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn connection(&self) -> &ConnectionConfig {
        &self.connection
    }

    /// Lifecycle events from the start of the bridge on.
    pub fn lifecycle(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events_tx.subscribe()
    }

    /// Spawns the connection kernel. Must be called inside a tokio runtime.
    pub fn build_and_start(self) -> BridgeInstance {
        info!(
            subjects = ?self.config.subjects,
            queue_group = self.config.queue_group.as_deref().unwrap_or("-"),
            codec = %self.config.codec,
            "Starting NATS bridge"
        );

        let metrics = Arc::new(BridgeMetrics::new());
        let cancel = CancellationToken::new();

        let dispatcher = Dispatcher::new(
            self.decoder,
            self.decorator,
            self.sink,
            self.config.subject_field.clone(),
            metrics.clone(),
        );

        let kernel = ConnectionKernel::new(
            self.connection,
            self.transport,
            SubscriptionManager::new(self.config.bindings()),
            dispatcher,
            metrics.clone(),
            cancel.clone(),
            self.events_tx.clone(),
        );
        let state_tx = kernel.state_sender();
        let state_rx = kernel.subscribe_state();

        let (termination_tx, termination_rx) = watch::channel(None);
        let handle = tokio::spawn(async move {
            let outcome = match kernel.run().await {
                Ok(()) => Termination::Stopped,
                Err(BridgeError::TransportFatal(reason)) => Termination::Fatal(reason),
                Err(e) => Termination::Fatal(e.to_string()),
            };
            termination_tx.send_replace(Some(outcome));
        });

        BridgeInstance {
            cancel,
            state_tx,
            state_rx,
            events_tx: self.events_tx,
            termination: termination_rx,
            abort: Arc::new(handle.abort_handle()),
            metrics,
            grace: self.config.shutdown_grace_period(),
        }
    }
}

/// Control handle for a running bridge.
#[derive(Debug, Clone)]
pub struct BridgeInstance {
    cancel: CancellationToken,

    state_tx: Arc<watch::Sender<ConnectionState>>,

    state_rx: watch::Receiver<ConnectionState>,

    events_tx: broadcast::Sender<LifecycleEvent>,

    termination: watch::Receiver<Option<Termination>>,

    abort: Arc<AbortHandle>,

    metrics: Arc<BridgeMetrics>,

    grace: Duration,
}

impl BridgeInstance {
    pub fn state(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Lifecycle events emitted after this call.
    pub fn lifecycle(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events_tx.subscribe()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Requests the close and returns immediately. Idempotent.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Waits for the kernel to finish.
    ///
    /// # Errors
    /// `TransportFatal` if the bus connection was lost for good;
    /// `ShutdownTimeout` if the kernel had to be aborted.
    pub async fn closed(&self) -> Result<(), BridgeError> {
        let mut termination = self.termination.clone();
        let outcome = termination
            .wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|outcome| (*outcome).clone())
            .unwrap_or(Termination::Aborted);

        match outcome {
            Termination::Stopped => Ok(()),
            Termination::Fatal(reason) => Err(BridgeError::TransportFatal(reason)),
            Termination::Aborted => Err(BridgeError::ShutdownTimeout(self.grace)),
        }
    }

    /// Stops the bridge and waits up to the grace period for it to close.
    ///
    /// # Errors
    /// `ShutdownTimeout` if the close had to be forced; `TransportFatal` if
    /// the bridge had already failed.
    pub async fn shutdown(&self) -> Result<(), BridgeError> {
        self.stop();

        match tokio::time::timeout(self.grace, self.closed()).await {
            Ok(result) => result,
            Err(_) => {
                let err = BridgeError::ShutdownTimeout(self.grace);
                error!("{err}, forcing close");
                self.abort.abort();
                self.state_tx.send_replace(ConnectionState::Closed);
                let _ = self
                    .events_tx
                    .send(LifecycleEvent::Closed(CloseReason::Stopped));
                Err(err)
            }
        }
    }
}
