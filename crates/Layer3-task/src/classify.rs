//! Structural classification of session events
//!
//! Only the event type and a few well-known properties are inspected; the
//! content of the agent's output is never interpreted.

use conduit_session::SessionEvent;
use serde_json::Value;

const GENERIC_SESSION_ERROR: &str = "session error";

/// What a stream event means for the state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventClass {
    /// The session is working (busy or retrying)
    Active { session_id: Option<String> },

    /// The session went idle
    Idle { session_id: Option<String> },

    /// The session reported an error
    Error {
        session_id: Option<String>,
        message: String,
    },

    /// The agent asks for permission; both ids present
    PermissionRequest {
        permission_id: String,
        session_id: String,
    },

    /// No state change
    Passthrough,
}

pub fn classify(event: &SessionEvent) -> EventClass {
    let session_id = event.session_id().map(str::to_string);

    match event.event_type.as_str() {
        "session.status" => match event.property_str(&["status", "type"]) {
            Some("busy") | Some("retry") => EventClass::Active { session_id },
            Some("idle") => EventClass::Idle { session_id },
            Some("error") => EventClass::Error {
                session_id,
                message: status_error_message(&event.properties),
            },
            _ => EventClass::Passthrough,
        },
        "session.idle" => EventClass::Idle { session_id },
        "session.error" => EventClass::Error {
            session_id,
            message: session_error_message(&event.properties),
        },
        "permission.updated" | "permission.asked" => {
            match (event.property_str(&["id"]), session_id) {
                (Some(permission_id), Some(session_id)) => EventClass::PermissionRequest {
                    permission_id: permission_id.to_string(),
                    session_id,
                },
                _ => EventClass::Passthrough,
            }
        }
        _ => EventClass::Passthrough,
    }
}

fn status_error_message(properties: &Value) -> String {
    properties
        .pointer("/status/message")
        .and_then(Value::as_str)
        .or_else(|| properties.get("error").and_then(Value::as_str))
        .map(str::to_string)
        .unwrap_or_else(|| session_error_message(properties))
}

fn session_error_message(properties: &Value) -> String {
    ["/error/data/message", "/error/message", "/error/name"]
        .iter()
        .find_map(|pointer| properties.pointer(pointer).and_then(Value::as_str))
        .filter(|message| !message.is_empty())
        .unwrap_or(GENERIC_SESSION_ERROR)
        .to_string()
}
