//! NATS transport backed by `async-nats`.
//!
//! Each [`NatsLink`] wraps one `async_nats::Client`. The client's event
//! callback only forwards into a channel owned by the link; the kernel reads
//! it through [`Link::next_event`] together with the subscriber streams. When
//! the link is dropped, late callbacks hit a closed channel and do nothing.

use std::time::Duration;

use async_nats::{ConnectErrorKind, ConnectOptions, Subscriber};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_stream::{StreamExt, StreamMap};
use tracing::{debug, trace, warn};

use crate::{
    subscription::SubjectBinding,
    target::ConnectionConfig,
    transport::{Delivery, Link, LinkEvent, SubscriptionId, Transport, TransportError},
};

const FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Default, Clone)]
pub struct NatsTransport;

impl NatsTransport {
    pub fn new() -> Self {
        Self
    }

    /// Builds the transport, warning about options the client cannot honour.
    pub fn from_config(config: &ConnectionConfig) -> Self {
        if config.verbose {
            warn!("Parameter 'verbose' is not supported by the NATS client and is ignored");
        }
        if config.pedantic {
            warn!("Parameter 'pedantic' is not supported by the NATS client and is ignored");
        }
        Self
    }

    fn options(config: &ConnectionConfig, events: mpsc::UnboundedSender<async_nats::Event>) -> ConnectOptions {
        // Reconnection belongs to the kernel; an abandoned client must not keep retrying.
        let mut options = ConnectOptions::new()
            .connection_timeout(config.connection_timeout)
            .max_reconnects(Some(1usize))
            .event_callback(move |event| {
                let events = events.clone();
                async move {
                    let _ = events.send(event);
                }
            });

        if let Some(name) = &config.client_name {
            options = options.name(name.as_str());
        }

        if config.tls.required {
            options = options.require_tls(true);
            if let Some(ca) = &config.tls.ca_file {
                options = options.add_root_certificates(ca.clone());
            }
            if let Some((cert, key)) = &config.tls.client_auth {
                options = options.add_client_certificate(cert.clone(), key.clone());
            }
        }

        options
    }
}

#[async_trait]
impl Transport for NatsTransport {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Link>, TransportError> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        debug!(uri = %config.redacted_uri, "Connecting to NATS");
        let client = Self::options(config, events_tx)
            .connect(config.uri.expose())
            .await
            .map_err(|e| classify_connect_error(e.kind(), e.to_string()))?;

        Ok(Box::new(NatsLink {
            client,
            subscribers: StreamMap::new(),
            events: events_rx,
            next_sid: 0,
        }))
    }
}

fn classify_connect_error(kind: ConnectErrorKind, message: String) -> TransportError {
    match kind {
        ConnectErrorKind::Authentication
        | ConnectErrorKind::AuthorizationViolation
        | ConnectErrorKind::Tls => TransportError::Rejected(message),

        // DNS, I/O, timeouts, parse hiccups from a restarting server
        _ => TransportError::Connect(message),
    }
}

pub struct NatsLink {
    client: async_nats::Client,
    subscribers: StreamMap<u64, Subscriber>,
    events: mpsc::UnboundedReceiver<async_nats::Event>,
    next_sid: u64,
}

#[async_trait]
impl Link for NatsLink {
    async fn subscribe(&mut self, binding: &SubjectBinding) -> Result<SubscriptionId, TransportError> {
        let result = match &binding.queue_group {
            Some(group) => {
                self.client
                    .queue_subscribe(binding.subject.clone(), group.clone())
                    .await
            }
            None => self.client.subscribe(binding.subject.clone()).await,
        };

        let subscriber = result.map_err(|e| TransportError::Subscribe {
            subject: binding.subject.clone(),
            reason: e.to_string(),
        })?;

        self.next_sid += 1;
        self.subscribers.insert(self.next_sid, subscriber);
        Ok(SubscriptionId(self.next_sid))
    }

    async fn unsubscribe(&mut self, id: SubscriptionId) -> Result<(), TransportError> {
        let Some(mut subscriber) = self.subscribers.remove(&id.0) else {
            return Ok(());
        };
        subscriber
            .unsubscribe()
            .await
            .map_err(|e| TransportError::Unsubscribe {
                id,
                reason: e.to_string(),
            })
    }

    async fn next_event(&mut self) -> LinkEvent {
        loop {
            tokio::select! {
                Some((sid, message)) = self.subscribers.next(), if !self.subscribers.is_empty() => {
                    return LinkEvent::Message(Delivery {
                        subscription: SubscriptionId(sid),
                        subject: message.subject.to_string(),
                        payload: message.payload,
                    });
                }
                event = self.events.recv() => match event {
                    Some(async_nats::Event::Disconnected) => {
                        return LinkEvent::Disconnected("disconnected from server".into());
                    }
                    Some(async_nats::Event::Closed) => {
                        return LinkEvent::Disconnected("connection closed".into());
                    }
                    Some(async_nats::Event::ServerError(e)) => {
                        return LinkEvent::Error(TransportError::Server(format!("{e:?}")));
                    }
                    Some(async_nats::Event::ClientError(e)) => {
                        return LinkEvent::Error(TransportError::Client(format!("{e:?}")));
                    }
                    Some(async_nats::Event::SlowConsumer(_)) => {
                        return LinkEvent::Error(TransportError::SlowConsumer);
                    }
                    Some(other) => trace!("NATS client event: {other:?}"),
                    None => return LinkEvent::Disconnected("client event channel closed".into()),
                },
            }
        }
    }

    async fn close(self: Box<Self>) {
        match tokio::time::timeout(FLUSH_TIMEOUT, self.client.flush()).await {
            Ok(Ok(())) => debug!("Flushed NATS connection"),
            Ok(Err(e)) => warn!("Failed to flush NATS connection: {e}"),
            Err(_) => warn!("Timed out flushing NATS connection"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn test_auth_and_tls_failures_are_fatal() {
        for kind in [
            ConnectErrorKind::Authentication,
            ConnectErrorKind::AuthorizationViolation,
            ConnectErrorKind::Tls,
        ] {
            assert!(classify_connect_error(kind, "nope".into()).is_fatal());
        }
    }

    #[test]
    fn test_network_failures_are_retryable() {
        for kind in [
            ConnectErrorKind::Io,
            ConnectErrorKind::Dns,
            ConnectErrorKind::TimedOut,
        ] {
            assert!(!classify_connect_error(kind, "nope".into()).is_fatal());
        }
    }

    #[tokio::test]
    async fn test_unreachable_server_is_retryable() {
        let config = Config {
            port: Some(1),
            connection_timeout: 0.5,
            ..Default::default()
        };
        let connection = ConnectionConfig::from_config(&config).unwrap();

        let result = NatsTransport::new().connect(&connection).await;
        match result {
            Err(e) => assert!(!e.is_fatal(), "unexpected fatal error: {e}"),
            Ok(_) => panic!("nothing should listen on port 1"),
        }
    }

    #[tokio::test]
    #[ignore = "requires a NATS server on 127.0.0.1:4222"]
    async fn test_round_trip_against_local_server() {
        let connection = ConnectionConfig::from_config(&Config::default()).unwrap();
        let mut link = NatsTransport::new().connect(&connection).await.unwrap();
        link.subscribe(&SubjectBinding::new("natsbee.test", None))
            .await
            .unwrap();

        let publisher = async_nats::connect("nats://127.0.0.1:4222").await.unwrap();
        publisher
            .publish("natsbee.test", "hello".into())
            .await
            .unwrap();
        publisher.flush().await.unwrap();

        let event = tokio::time::timeout(Duration::from_secs(2), link.next_event())
            .await
            .unwrap();
        match event {
            LinkEvent::Message(delivery) => assert_eq!(&delivery.payload[..], b"hello"),
            other => panic!("unexpected event: {other:?}"),
        }
        link.close().await;
    }
}
