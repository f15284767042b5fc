//! Event decoration applied before an event reaches the sink.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::{config::Config, event::Event};

/// Hook invoked on every decoded event before it is pushed.
pub trait Decorator: Send + Sync {
    fn decorate(&self, event: &mut Event);
}

/// Leaves events untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDecorator;

impl Decorator for NoopDecorator {
    fn decorate(&self, _event: &mut Event) {}
}

/// Static metadata from configuration: `type`, `tags` and `add_field`.
#[derive(Debug, Default, Clone)]
pub struct StaticDecorator {
    event_type: Option<String>,
    tags: Vec<String>,
    fields: BTreeMap<String, String>,
}

impl StaticDecorator {
    pub fn new(
        event_type: Option<String>,
        tags: Vec<String>,
        fields: BTreeMap<String, String>,
    ) -> Self {
        Self {
            event_type,
            tags,
            fields,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.event_type.clone(),
            config.tags.clone(),
            config.add_field.clone(),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.event_type.is_none() && self.tags.is_empty() && self.fields.is_empty()
    }
}

impl Decorator for StaticDecorator {
    fn decorate(&self, event: &mut Event) {
        if let Some(event_type) = &self.event_type {
            if !event.contains("type") {
                event.set("type", event_type.as_str());
            }
        }

        for (key, value) in &self.fields {
            let merged = match event.get(key) {
                None => Value::String(value.clone()),
                Some(Value::Array(existing)) => {
                    let mut list = existing.clone();
                    list.push(Value::String(value.clone()));
                    Value::Array(list)
                }
                Some(existing) if existing.as_str() == Some(value.as_str()) => continue,
                Some(existing) => Value::Array(vec![existing.clone(), Value::String(value.clone())]),
            };
            event.set(key.as_str(), merged);
        }

        for tag in &self.tags {
            event.add_tag(tag);
        }
    }
}
