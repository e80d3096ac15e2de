//! Measurement Protocol event envelope.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Wrapper the collector expects around every user property value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProperty {
    pub value: Value,
}

impl UserProperty {
    pub fn new(value: Value) -> Self {
        Self { value }
    }
}

/// The single event carried by a payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub name: String,
    #[serde(default)]
    pub params: Map<String, Value>,
}

/// Canonical envelope sent to the analytics collector.
///
/// `events` is a one-element array: every warehouse row becomes exactly one
/// event, named after the row's `event_name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    pub client_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Value>,

    /// `None` when the source timestamp matched no known format.
    pub timestamp_micros: Option<i64>,

    #[serde(rename = "nonPersonalizedAds")]
    pub non_personalized_ads: bool,

    pub events: [Event; 1],

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_properties: Option<BTreeMap<String, UserProperty>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_data: Option<Value>,

    /// Destination selector; consumed by credential resolution and never sent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_id: Option<Value>,
}

impl Payload {
    /// Envelope with one parameterless event and no optional sections.
    pub fn new(client_id: impl Into<String>, event_name: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            user_id: None,
            timestamp_micros: None,
            non_personalized_ads: false,
            events: [Event {
                name: event_name.into(),
                params: Map::new(),
            }],
            user_properties: None,
            user_data: None,
            stream_id: None,
        }
    }

    pub fn event(&self) -> &Event {
        &self.events[0]
    }

    pub fn event_name(&self) -> &str {
        &self.events[0].name
    }

    /// Detach the destination selector before the payload goes on the wire.
    pub fn take_stream_id(&mut self) -> Option<Value> {
        self.stream_id.take()
    }
}
