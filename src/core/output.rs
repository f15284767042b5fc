//! Writes bridged events to a byte stream.
//!
//! The bridge pushes into a bounded `ChannelSink`; an [`EventWriter`] drains
//! the other end so a slow stdout backs up the channel rather than the NATS
//! client.

use std::io;

use natsbee_nats::Event;
use thiserror::Error;
use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    sync::mpsc,
};
use tracing::{debug, trace};

use crate::config::output::OutputFormat;

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("Failed to write event: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to serialize event: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub struct EventWriter<W> {
    writer: W,
    format: OutputFormat,
    written: u64,
}

impl EventWriter<tokio::io::Stdout> {
    pub fn stdout(format: OutputFormat) -> Self {
        Self::new(tokio::io::stdout(), format)
    }
}

impl<W: AsyncWrite + Unpin + Send> EventWriter<W> {
    pub fn new(writer: W, format: OutputFormat) -> Self {
        Self {
            writer,
            format,
            written: 0,
        }
    }

    /// Serializes one event followed by a newline.
    pub async fn write(&mut self, event: &Event) -> Result<(), OutputError> {
        let mut line = match self.format {
            OutputFormat::Json => serde_json::to_vec(event)?,
            OutputFormat::Pretty => serde_json::to_vec_pretty(event)?,
        };
        line.push(b'\n');

        self.writer.write_all(&line).await?;
        self.written += 1;
        trace!(written = self.written, "Event written");
        Ok(())
    }

    /// Writes events until every sender is dropped, then flushes.
    ///
    /// Returns the number of events written by this call.
    pub async fn run(&mut self, mut events: mpsc::Receiver<Event>) -> Result<u64, OutputError> {
        let start = self.written;
        while let Some(event) = events.recv().await {
            self.write(&event).await?;
            // Keep the stream line-buffered for downstream readers
            if events.is_empty() {
                self.writer.flush().await?;
            }
        }
        self.writer.flush().await?;

        let count = self.written - start;
        debug!(count, "Event channel closed, writer finished");
        Ok(count)
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[cfg(test)]
mod tests {
    use natsbee_nats::{ChannelSink, EventSink};

    use super::*;

    fn lines(bytes: Vec<u8>) -> Vec<serde_json::Value> {
        String::from_utf8(bytes)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_json_is_one_event_per_line() {
        let mut writer = EventWriter::new(Vec::new(), OutputFormat::Json);
        let mut event = Event::with_message("hello");
        event.set("nats_subject", "orders");

        writer.write(&event).await.unwrap();
        writer.write(&Event::with_message("world")).await.unwrap();

        let out = lines(writer.into_inner());
        assert_eq!(out.len(), 2);
        assert_eq!(out[0]["message"], "hello");
        assert_eq!(out[0]["nats_subject"], "orders");
        assert_eq!(out[1]["message"], "world");
    }

    #[tokio::test]
    async fn test_pretty_is_indented() {
        let mut writer = EventWriter::new(Vec::new(), OutputFormat::Pretty);
        writer.write(&Event::with_message("hi")).await.unwrap();

        let text = String::from_utf8(writer.into_inner()).unwrap();
        assert!(text.starts_with("{\n  \"message\""), "{text}");
        assert!(text.ends_with("}\n"));
    }

    #[tokio::test]
    async fn test_run_drains_until_senders_drop() {
        let (sink, rx) = ChannelSink::new(8);
        for n in 0..3 {
            sink.push(Event::with_message(format!("m{n}"))).await.unwrap();
        }
        drop(sink);

        let mut writer = EventWriter::new(Vec::new(), OutputFormat::Json);
        assert_eq!(writer.run(rx).await.unwrap(), 3);
        assert_eq!(writer.written(), 3);

        let out = lines(writer.into_inner());
        let messages: Vec<_> = out.iter().map(|v| v["message"].as_str().unwrap()).collect();
        assert_eq!(messages, vec!["m0", "m1", "m2"]);
    }
}
