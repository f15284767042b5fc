//! Downstream event queue.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::event::Event;

#[derive(Debug, Error)]
pub enum SinkError {
    /// The receiving side is gone.
    #[error("Sink is closed")]
    Closed,
}

/// Where decoded events go. Called once per event, in delivery order.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn push(&self, event: Event) -> Result<(), SinkError>;
}

/// Bounded channel sink. `push` waits while the channel is full.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<Event>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn push(&self, event: Event) -> Result<(), SinkError> {
        self.tx.send(event).await.map_err(|_| SinkError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_sink_delivers_in_order() {
        let (sink, mut rx) = ChannelSink::new(4);
        sink.push(Event::with_message("a")).await.unwrap();
        sink.push(Event::with_message("b")).await.unwrap();

        assert_eq!(rx.recv().await, Some(Event::with_message("a")));
        assert_eq!(rx.recv().await, Some(Event::with_message("b")));
    }

    #[tokio::test]
    async fn test_channel_sink_reports_closed_receiver() {
        let (sink, rx) = ChannelSink::new(1);
        drop(rx);
        assert!(matches!(
            sink.push(Event::new()).await,
            Err(SinkError::Closed)
        ));
    }
}
