use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// An event on the typed bus. Every event carries a stable opaque `id` for
/// `Last-Event-ID` reconnection semantics, and `occurred_at` for replay
/// ordering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineEvent {
    pub id: String,
    pub event_type: String,
    pub payload: Value,
    pub source_app: String,
    pub occurred_at: DateTime<Utc>,
}

/// Reserved bus event type that republishes every non-relay event for
/// downstream SSE fan-out.
pub const SSE_RELAY_CHANNEL: &str = "__sse_relay__";

impl EngineEvent {
    pub fn new(event_type: impl Into<String>, payload: Value) -> Self {
        Self::with_source(event_type, payload, "promptforge")
    }

    pub fn with_source(
        event_type: impl Into<String>,
        payload: Value,
        source_app: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            event_type: event_type.into(),
            payload,
            source_app: source_app.into(),
            occurred_at: Utc::now(),
        }
    }

    pub fn is_relay(&self) -> bool {
        self.event_type == SSE_RELAY_CHANNEL
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_event_carries_a_stable_id() {
        let event = EngineEvent::new("promptforge:optimization.started", json!({"a": 1}));
        assert!(!event.id.is_empty());
        assert_eq!(event.source_app, "promptforge");
    }

    #[test]
    fn relay_channel_is_detected() {
        let event = EngineEvent::new(SSE_RELAY_CHANNEL, json!({}));
        assert!(event.is_relay());
    }
}
