use std::collections::HashMap;
use std::sync::RwLock;

use serde_json::Value;
use tracing::warn;

/// A declared contract for one bus event type: the payload schema every
/// publish must satisfy, and an optional response schema for request/reply
/// channels.
#[derive(Debug, Clone)]
pub struct EventContract {
    pub event_type: String,
    pub source_app: String,
    pub payload_schema: Value,
    pub response_schema: Option<Value>,
}

impl EventContract {
    pub fn new(
        event_type: impl Into<String>,
        source_app: impl Into<String>,
        payload_schema: Value,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            source_app: source_app.into(),
            payload_schema,
            response_schema: None,
        }
    }

    pub fn with_response_schema(mut self, schema: Value) -> Self {
        self.response_schema = Some(schema);
        self
    }
}

/// Holds declared contracts. Later registrations for the same event type
/// overwrite earlier ones (a warning is logged, not an error — contracts
/// evolve across a running process).
#[derive(Default)]
pub struct ContractRegistry {
    contracts: RwLock<HashMap<String, EventContract>>,
}

impl ContractRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, contract: EventContract) {
        let mut contracts = self.contracts.write().unwrap();
        if contracts.contains_key(&contract.event_type) {
            warn!(event_type = %contract.event_type, "overwriting existing event contract");
        }
        contracts.insert(contract.event_type.clone(), contract);
    }

    pub fn get(&self, event_type: &str) -> Option<EventContract> {
        self.contracts.read().unwrap().get(event_type).cloned()
    }

    /// Validates `payload` against the declared contract's schema, if one
    /// exists. Returns `true` when there is no contract (nothing to
    /// validate against) or the payload satisfies it.
    pub fn validate(&self, event_type: &str, payload: &Value) -> bool {
        match self.get(event_type) {
            Some(contract) => validate_against_schema(payload, &contract.payload_schema),
            None => true,
        }
    }

    pub fn to_json(&self) -> Value {
        let contracts = self.contracts.read().unwrap();
        let entries: Vec<Value> = contracts
            .values()
            .map(|c| {
                serde_json::json!({
                    "event_type": c.event_type,
                    "source_app": c.source_app,
                    "payload_schema": c.payload_schema,
                    "response_schema": c.response_schema,
                })
            })
            .collect();
        Value::Array(entries)
    }
}

/// A minimal JSON-Schema-equivalent validator: supports `type: "object"`
/// with `properties` (checked by declared JSON type) and `required`. This
/// covers the payload contracts this engine declares; it is not a general
/// JSON Schema implementation.
fn validate_against_schema(payload: &Value, schema: &Value) -> bool {
    let Some(schema_obj) = schema.as_object() else {
        return true;
    };

    let Some(payload_obj) = payload.as_object() else {
        return false;
    };

    if let Some(required) = schema_obj.get("required").and_then(|v| v.as_array()) {
        for field in required {
            let Some(name) = field.as_str() else { continue };
            if !payload_obj.contains_key(name) {
                return false;
            }
        }
    }

    if let Some(properties) = schema_obj.get("properties").and_then(|v| v.as_object()) {
        for (name, prop_schema) in properties {
            let Some(value) = payload_obj.get(name) else { continue };
            let Some(expected_type) = prop_schema.get("type").and_then(|v| v.as_str()) else {
                continue;
            };
            if !json_type_matches(value, expected_type) {
                return false;
            }
        }
    }

    true
}

fn json_type_matches(value: &Value, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn optimization_started_contract() -> EventContract {
        EventContract::new(
            "promptforge:optimization.started",
            "promptforge",
            json!({
                "type": "object",
                "required": ["optimization_id", "raw_prompt"],
                "properties": {
                    "optimization_id": {"type": "string"},
                    "raw_prompt": {"type": "string"},
                }
            }),
        )
    }

    #[test]
    fn valid_payload_passes() {
        let registry = ContractRegistry::new();
        registry.register(optimization_started_contract());
        let payload = json!({"optimization_id": "abc", "raw_prompt": "hi"});
        assert!(registry.validate("promptforge:optimization.started", &payload));
    }

    #[test]
    fn missing_required_field_fails() {
        let registry = ContractRegistry::new();
        registry.register(optimization_started_contract());
        let payload = json!({"optimization_id": "abc"});
        assert!(!registry.validate("promptforge:optimization.started", &payload));
    }

    #[test]
    fn wrong_type_fails() {
        let registry = ContractRegistry::new();
        registry.register(optimization_started_contract());
        let payload = json!({"optimization_id": 123, "raw_prompt": "hi"});
        assert!(!registry.validate("promptforge:optimization.started", &payload));
    }

    #[test]
    fn event_type_without_contract_always_validates() {
        let registry = ContractRegistry::new();
        assert!(registry.validate("unregistered:event", &json!({})));
    }

    #[test]
    fn later_registration_overwrites_earlier() {
        let registry = ContractRegistry::new();
        registry.register(optimization_started_contract());
        registry.register(EventContract::new(
            "promptforge:optimization.started",
            "promptforge",
            json!({"type": "object", "required": []}),
        ));
        let payload = json!({});
        assert!(registry.validate("promptforge:optimization.started", &payload));
    }
}
