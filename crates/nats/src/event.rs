//! The record handed to the sink.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field used by the line-oriented codecs for the raw text.
pub const MESSAGE_FIELD: &str = "message";

/// Field holding the tag list.
pub const TAGS_FIELD: &str = "tags";

/// A decoded event: a JSON object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Event(Map<String, Value>);

impl Event {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Event with a single `message` field.
    pub fn with_message(message: impl Into<String>) -> Self {
        let mut event = Self::new();
        event.set(MESSAGE_FIELD, message.into());
        event
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Sets `key`, replacing any previous value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Appends `tag` to `tags` unless already present.
    ///
    /// A scalar `tags` value is promoted to a list first.
    pub fn add_tag(&mut self, tag: &str) {
        let tags = self
            .0
            .entry(TAGS_FIELD)
            .or_insert_with(|| Value::Array(Vec::new()));

        if !tags.is_array() {
            let previous = tags.take();
            *tags = Value::Array(vec![previous]);
        }

        if let Value::Array(list) = tags {
            if !list.iter().any(|t| t.as_str() == Some(tag)) {
                list.push(Value::String(tag.to_string()));
            }
        }
    }

    /// Current tags, ignoring non-string entries.
    pub fn tags(&self) -> Vec<&str> {
        match self.0.get(TAGS_FIELD) {
            Some(Value::Array(list)) => list.iter().filter_map(Value::as_str).collect(),
            Some(Value::String(tag)) => vec![tag.as_str()],
            _ => Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for Event {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_add_tag_deduplicates() {
        let mut event = Event::new();
        event.add_tag("bus");
        event.add_tag("bus");
        event.add_tag("orders");
        assert_eq!(event.tags(), vec!["bus", "orders"]);
    }

    #[test]
    fn test_add_tag_promotes_scalar() {
        let mut event = Event::new();
        event.set("tags", "existing");
        event.add_tag("bus");
        assert_eq!(event.get("tags"), Some(&json!(["existing", "bus"])));
    }

    #[test]
    fn test_serializes_as_plain_object() {
        let mut event = Event::with_message("hello");
        event.set("nats_subject", "orders");
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"message": "hello", "nats_subject": "orders"})
        );
    }
}
