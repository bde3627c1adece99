use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ProtocolError;

/// Flat key/value record; the shape of both experiment state and inbound frames.
pub type StateMap = Map<String, Value>;

/// Frames the relay sends to the stim server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OutboundMessage {
    #[serde(rename = "LOGJSON")]
    LogJson { value: StateMap },
    #[serde(rename = "TRIGGER")]
    Trigger { value: String, start: f64, stop: f64 },
    #[serde(rename = "EVENT")]
    Event { value: String },
}

impl OutboundMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::LogJson { .. } => "LOGJSON",
            Self::Trigger { .. } => "TRIGGER",
            Self::Event { .. } => "EVENT",
        }
    }
}

/// Parses an inbound frame; anything other than a JSON object is rejected.
pub fn parse_state_frame(raw: &str) -> Result<StateMap, ProtocolError> {
    match serde_json::from_str::<Value>(raw)? {
        Value::Object(map) => Ok(map),
        _ => Err(ProtocolError::NotAnObject),
    }
}

/// A trigger or event as republished by the stim server.
///
/// `period` is `(start, stop)` in seconds relative to `timestamp`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleTrigger {
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period: Option<(f64, f64)>,
}
