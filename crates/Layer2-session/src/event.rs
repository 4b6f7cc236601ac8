//! Session stream events

use serde::Deserialize;
use serde_json::{json, Value};

/// One structured event from the session event stream
///
/// Wire shape is `{"type": "...", "properties": {...}}`. Some service builds
/// wrap it as `{"directory": "...", "payload": {...}}`; both are accepted.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SessionEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub properties: Value,
}

#[derive(Deserialize)]
struct Envelope {
    payload: SessionEvent,
}

impl SessionEvent {
    pub fn new(event_type: impl Into<String>, properties: Value) -> Self {
        Self {
            event_type: event_type.into(),
            properties,
        }
    }

    /// Parse one SSE data payload
    pub fn parse(data: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(data)?;
        if value.get("type").is_none() && value.get("payload").is_some() {
            return serde_json::from_value::<Envelope>(value).map(|e| e.payload);
        }
        serde_json::from_value(value)
    }

    /// JSON form republished to observers
    pub fn to_value(&self) -> Value {
        json!({
            "type": self.event_type,
            "properties": self.properties,
        })
    }

    /// String found by walking `path` under `properties`
    pub fn property_str(&self, path: &[&str]) -> Option<&str> {
        let mut current = &self.properties;
        for key in path {
            current = current.get(key)?;
        }
        current.as_str()
    }

    /// `properties.sessionID`, when present
    pub fn session_id(&self) -> Option<&str> {
        self.property_str(&["sessionID"])
    }
}

/// What the stream reader delivers to its owner
#[derive(Debug, Clone, PartialEq)]
pub enum StreamMessage {
    Event(SessionEvent),
    /// The connection failed (bad status, network error, parse error of the framing)
    TransportError(String),
    /// The server closed the stream
    Disconnected(String),
}
