//! Interpretation of frames arriving on the relay WebSocket.

use chrono::{DateTime, Utc};
use serde_json::Value;
use shared::protocol::SampleTrigger;
use tracing::{debug, warn};

use crate::app_state::AppState;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum StimFrame {
    Log(Value),
    LogJson(Value),
    Event(SampleTrigger),
    Trigger(SampleTrigger),
    UnknownType(Option<String>),
    NotAnObject,
}

/// Classifies one text frame. Only unparseable JSON is an error.
pub(crate) fn classify_frame(raw: &str, received_at: DateTime<Utc>) -> serde_json::Result<StimFrame> {
    let data: Value = serde_json::from_str(raw)?;
    let Value::Object(data) = data else {
        return Ok(StimFrame::NotAnObject);
    };

    let value = data.get("value").filter(|v| !v.is_null()).cloned();
    let frame = match data.get("type").and_then(Value::as_str) {
        Some("LOG") => StimFrame::Log(value.unwrap_or(Value::Null)),
        Some("LOGJSON") => StimFrame::LogJson(value.unwrap_or(Value::Null)),
        Some("EVENT") => StimFrame::Event(SampleTrigger {
            timestamp: received_at,
            value,
            period: None,
        }),
        Some("TRIGGER") => {
            let start = data.get("start").and_then(Value::as_f64);
            let stop = data.get("stop").and_then(Value::as_f64);
            StimFrame::Trigger(SampleTrigger {
                timestamp: received_at,
                value,
                period: start.zip(stop),
            })
        }
        other => StimFrame::UnknownType(other.map(str::to_string)),
    };
    Ok(frame)
}

/// Routes a classified frame to its output stream.
pub(crate) fn publish(state: &AppState, frame: StimFrame) {
    match frame {
        StimFrame::Log(message) => debug!(%message, "client log"),
        StimFrame::LogJson(snapshot) => debug!(%snapshot, "client state"),
        StimFrame::Event(sample) => {
            let _ = state.events.send(sample);
        }
        StimFrame::Trigger(sample) => {
            let _ = state.triggers.send(sample);
        }
        StimFrame::UnknownType(msg_type) => {
            warn!(?msg_type, "unknown message type from websocket client");
        }
        StimFrame::NotAnObject => warn!("unknown message from websocket client"),
    }
}

#[cfg(test)]
#[path = "tests/mod_tests.rs"]
mod tests;
