//! Payload decoders.
//!
//! A [`MessageDecoder`] turns one raw payload into a finite, lazy sequence of
//! events. Each item is a `Result` so one bad record does not hide the good
//! ones next to it; the dispatcher logs and skips the errors.

use std::{iter, sync::Arc};

use serde_json::Value;
use thiserror::Error;

use crate::{config::CodecKind, event::Event};

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Valid JSON, but not something an event can be built from.
    #[error("Expected a JSON object, found {0}")]
    NotAnObject(&'static str),
}

/// Lazy sequence of decoded events for one payload.
pub type Decoded<'a> = Box<dyn Iterator<Item = Result<Event, DecodeError>> + Send + 'a>;

pub trait MessageDecoder: Send + Sync {
    /// Codec name used in logs.
    fn name(&self) -> &'static str;

    fn decode<'a>(&'a self, payload: &'a [u8]) -> Decoded<'a>;
}

impl CodecKind {
    /// Builds the decoder for this codec.
    pub fn decoder(self) -> Arc<dyn MessageDecoder> {
        match self {
            CodecKind::Json => Arc::new(JsonCodec),
            CodecKind::JsonLines => Arc::new(JsonLinesCodec),
            CodecKind::Plain => Arc::new(PlainCodec),
            CodecKind::Line => Arc::new(LineCodec),
        }
    }
}

/// One JSON object per payload, or an array of objects.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl MessageDecoder for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn decode<'a>(&'a self, payload: &'a [u8]) -> Decoded<'a> {
        if payload.iter().all(u8::is_ascii_whitespace) {
            return Box::new(iter::empty());
        }

        match serde_json::from_slice::<Value>(payload) {
            Ok(Value::Array(items)) => Box::new(items.into_iter().map(into_event)),
            Ok(value) => Box::new(iter::once(into_event(value))),
            Err(e) => Box::new(iter::once(Err(e.into()))),
        }
    }
}

/// Newline-delimited JSON objects. Blank lines are skipped.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonLinesCodec;

impl MessageDecoder for JsonLinesCodec {
    fn name(&self) -> &'static str {
        "json_lines"
    }

    fn decode<'a>(&'a self, payload: &'a [u8]) -> Decoded<'a> {
        Box::new(
            lines(payload)
                .filter(|line| !line.iter().all(u8::is_ascii_whitespace))
                .map(|line| {
                    serde_json::from_slice::<Value>(line)
                        .map_err(DecodeError::from)
                        .and_then(into_event)
                }),
        )
    }
}

/// The whole payload as `message`. Invalid UTF-8 is replaced.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainCodec;

impl MessageDecoder for PlainCodec {
    fn name(&self) -> &'static str {
        "plain"
    }

    fn decode<'a>(&'a self, payload: &'a [u8]) -> Decoded<'a> {
        Box::new(iter::once(Ok(Event::with_message(
            String::from_utf8_lossy(payload),
        ))))
    }
}

/// One `message` event per non-empty line.
#[derive(Debug, Default, Clone, Copy)]
pub struct LineCodec;

impl MessageDecoder for LineCodec {
    fn name(&self) -> &'static str {
        "line"
    }

    fn decode<'a>(&'a self, payload: &'a [u8]) -> Decoded<'a> {
        Box::new(
            lines(payload)
                .filter(|line| !line.is_empty())
                .map(|line| Ok(Event::with_message(String::from_utf8_lossy(line)))),
        )
    }
}

/// Splits on `\n`, dropping a trailing `\r`.
fn lines(payload: &[u8]) -> impl Iterator<Item = &[u8]> + Send + '_ {
    payload
        .split(|b| *b == b'\n')
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
}

fn into_event(value: Value) -> Result<Event, DecodeError> {
    match value {
        Value::Object(map) => Ok(Event::from(map)),
        Value::Array(_) => Err(DecodeError::NotAnObject("array")),
        Value::String(_) => Err(DecodeError::NotAnObject("string")),
        Value::Number(_) => Err(DecodeError::NotAnObject("number")),
        Value::Bool(_) => Err(DecodeError::NotAnObject("boolean")),
        Value::Null => Err(DecodeError::NotAnObject("null")),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn collect(decoder: &dyn MessageDecoder, payload: &[u8]) -> Vec<Result<Event, DecodeError>> {
        decoder.decode(payload).collect()
    }

    #[test]
    fn test_json_object_yields_one_event() {
        let events = collect(&JsonCodec, br#"{"id": 1, "kind": "order"}"#);
        assert_eq!(events.len(), 1);
        let event = events.into_iter().next().unwrap().unwrap();
        assert_eq!(event.get("id"), Some(&json!(1)));
    }

    #[test]
    fn test_json_array_yields_each_object() {
        let events = collect(&JsonCodec, br#"[{"id": 1}, 7, {"id": 2}]"#);
        assert_eq!(events.len(), 3);
        assert!(events[0].is_ok());
        assert!(matches!(events[1], Err(DecodeError::NotAnObject("number"))));
        assert!(events[2].is_ok());
    }

    #[test]
    fn test_json_garbage_is_one_error() {
        let events = collect(&JsonCodec, b"{not json");
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], Err(DecodeError::Json(_))));
    }

    #[test]
    fn test_json_blank_payload_yields_nothing() {
        assert!(collect(&JsonCodec, b"  \n").is_empty());
    }

    #[test]
    fn test_json_lines_isolates_bad_line() {
        let events = collect(&JsonLinesCodec, b"{\"a\":1}\r\n\n{broken\n{\"a\":2}\n");
        assert_eq!(events.len(), 3);
        assert!(events[0].is_ok());
        assert!(events[1].is_err());
        assert_eq!(
            events[2].as_ref().unwrap().get("a"),
            Some(&json!(2))
        );
    }

    #[test]
    fn test_plain_keeps_whole_payload() {
        let events = collect(&PlainCodec, b"line one\nline two");
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].as_ref().unwrap().get("message"),
            Some(&json!("line one\nline two"))
        );
    }

    #[test]
    fn test_line_splits_and_replaces_invalid_utf8() {
        let events = collect(&LineCodec, b"first\r\n\nsec\xffond\n");
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[1].as_ref().unwrap().get("message"),
            Some(&json!("sec\u{fffd}ond"))
        );
    }

    #[test]
    fn test_codec_kind_builds_matching_decoder() {
        assert_eq!(CodecKind::Json.decoder().name(), "json");
        assert_eq!(CodecKind::JsonLines.decoder().name(), "json_lines");
        assert_eq!(CodecKind::Plain.decoder().name(), "plain");
        assert_eq!(CodecKind::Line.decoder().name(), "line");
    }
}
