use serde_json::Value;

pub fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default()
}

/// Python-style truthiness coercion for a JSON value: used when absorbing a
/// loosely-typed `is_improvement` field from an LLM response.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

pub fn score_field(value: &Value, key: &str) -> f64 {
    value.get(key).and_then(Value::as_f64).unwrap_or(0.5)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn truthy_coerces_common_shapes() {
        assert!(truthy(&json!(true)));
        assert!(!truthy(&json!(false)));
        assert!(!truthy(&Value::Null));
        assert!(truthy(&json!("yes")));
        assert!(!truthy(&json!("")));
        assert!(truthy(&json!(1)));
        assert!(!truthy(&json!(0)));
    }

    #[test]
    fn score_field_defaults_to_midpoint() {
        assert_eq!(score_field(&json!({}), "clarity"), 0.5);
        assert_eq!(score_field(&json!({"clarity": 0.9}), "clarity"), 0.9);
    }
}
