//! Per-message pipeline: decode, decorate, tag with subject, push.

use std::sync::Arc;

use tracing::{trace, warn};

use crate::{
    codec::MessageDecoder, decorate::Decorator, metrics::BridgeMetrics, sink::EventSink,
    transport::InboundMessage,
};

pub struct Dispatcher {
    decoder: Arc<dyn MessageDecoder>,
    decorator: Arc<dyn Decorator>,
    sink: Arc<dyn EventSink>,
    subject_field: String,
    metrics: Arc<BridgeMetrics>,
}

impl Dispatcher {
    pub fn new(
        decoder: Arc<dyn MessageDecoder>,
        decorator: Arc<dyn Decorator>,
        sink: Arc<dyn EventSink>,
        subject_field: impl Into<String>,
        metrics: Arc<BridgeMetrics>,
    ) -> Self {
        Self {
            decoder,
            decorator,
            sink,
            subject_field: subject_field.into(),
            metrics,
        }
    }

    /// Runs one message through the pipeline and returns how many events
    /// the sink accepted. Bad records and sink refusals are logged, counted
    /// and skipped.
    pub async fn dispatch(&self, message: InboundMessage) -> usize {
        self.metrics.record_message();
        let mut pushed = 0;

        for decoded in self.decoder.decode(&message.payload) {
            let mut event = match decoded {
                Ok(event) => event,
                Err(e) => {
                    self.metrics.record_decode_error();
                    warn!(
                        subject = %message.subject,
                        codec = self.decoder.name(),
                        "Failed to decode message: {e}"
                    );
                    continue;
                }
            };

            self.decorator.decorate(&mut event);
            event.set(self.subject_field.as_str(), message.subject.as_str());

            match self.sink.push(event).await {
                Ok(()) => {
                    self.metrics.record_pushed();
                    pushed += 1;
                }
                Err(e) => {
                    self.metrics.record_sink_error();
                    warn!(subject = %message.subject, "Sink rejected event: {e}");
                }
            }
        }

        trace!(subject = %message.subject, events = pushed, "Dispatched message");
        pushed
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use bytes::Bytes;
    use serde_json::json;

    use super::*;
    use crate::{codec::JsonCodec, decorate::StaticDecorator, sink::ChannelSink};

    fn message(subject: &str, payload: &'static [u8]) -> InboundMessage {
        InboundMessage {
            subject: subject.into(),
            payload: Bytes::from_static(payload),
            queue_group: None,
        }
    }

    #[tokio::test]
    async fn test_decode_failure_does_not_block_later_messages() {
        let (sink, mut rx) = ChannelSink::new(16);
        let metrics = Arc::new(BridgeMetrics::new());
        let dispatcher = Dispatcher::new(
            Arc::new(JsonCodec),
            Arc::new(StaticDecorator::new(None, vec!["bus".into()], BTreeMap::new())),
            Arc::new(sink),
            "nats_subject",
            metrics.clone(),
        );

        assert_eq!(dispatcher.dispatch(message("orders", b"{oops")).await, 0);
        assert_eq!(dispatcher.dispatch(message("orders", br#"{"id": 2}"#)).await, 1);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.get("id"), Some(&json!(2)));
        assert_eq!(event.get("nats_subject"), Some(&json!("orders")));
        assert_eq!(event.tags(), vec!["bus"]);

        let snap = metrics.snapshot();
        assert_eq!(snap.messages_received, 2);
        assert_eq!(snap.decode_errors, 1);
        assert_eq!(snap.events_pushed, 1);
    }

    #[tokio::test]
    async fn test_subject_field_overrides_payload_value() {
        let (sink, mut rx) = ChannelSink::new(4);
        let dispatcher = Dispatcher::new(
            Arc::new(JsonCodec),
            Arc::new(crate::decorate::NoopDecorator),
            Arc::new(sink),
            "nats_subject",
            Arc::new(BridgeMetrics::new()),
        );

        dispatcher
            .dispatch(message("shipping", br#"{"nats_subject": "spoofed"}"#))
            .await;
        let event = rx.recv().await.unwrap();
        assert_eq!(event.get("nats_subject"), Some(&json!("shipping")));
    }

    #[tokio::test]
    async fn test_sink_errors_are_counted() {
        let (sink, rx) = ChannelSink::new(1);
        drop(rx);
        let metrics = Arc::new(BridgeMetrics::new());
        let dispatcher = Dispatcher::new(
            Arc::new(JsonCodec),
            Arc::new(crate::decorate::NoopDecorator),
            Arc::new(sink),
            "nats_subject",
            metrics.clone(),
        );

        assert_eq!(dispatcher.dispatch(message("orders", br#"[{}, {}]"#)).await, 0);
        assert_eq!(metrics.snapshot().sink_errors, 2);
    }
}
