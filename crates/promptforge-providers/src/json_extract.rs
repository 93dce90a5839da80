use regex::Regex;
use serde_json::Value;

/// Extracts a JSON value from an LLM completion using a four-strategy
/// fallback chain, since models frequently wrap JSON in prose or fenced code
/// blocks instead of returning it bare.
///
/// 1. Parse the trimmed text directly.
/// 2. Extract the contents of a fenced code block (` ```json ` or ` ``` `).
/// 3. Take the substring between the first `{` and the last matching `}`.
/// 4. Regex-search for the first balanced-looking `{...}` span anywhere in
///    the text.
pub fn extract_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }

    if let Some(value) = extract_fenced_block(trimmed) {
        return Some(value);
    }

    if let Some(value) = extract_outermost_braces(trimmed) {
        return Some(value);
    }

    extract_regex_object(trimmed)
}

fn extract_fenced_block(text: &str) -> Option<Value> {
    static FENCE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    let re = FENCE.get_or_init(|| {
        Regex::new(r"(?s)```(?:json)?\s*(.*?)\s*```").expect("valid fence regex")
    });
    for caps in re.captures_iter(text) {
        if let Some(body) = caps.get(1) {
            if let Ok(value) = serde_json::from_str::<Value>(body.as_str().trim()) {
                return Some(value);
            }
        }
    }
    None
}

fn extract_outermost_braces(text: &str) -> Option<Value> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<Value>(&text[start..=end]).ok()
}

fn extract_regex_object(text: &str) -> Option<Value> {
    static OBJECT: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    let re = OBJECT.get_or_init(|| Regex::new(r"(?s)\{[^{}]*(?:\{[^{}]*\}[^{}]*)*\}").expect("valid object regex"));
    for m in re.find_iter(text) {
        if let Ok(value) = serde_json::from_str::<Value>(m.as_str()) {
            return Some(value);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_bare_json() {
        let value = extract_json(r#"{"a": 1}"#).unwrap();
        assert_eq!(value, json!({"a": 1}));
    }

    #[test]
    fn extracts_fenced_json_block() {
        let text = "Here you go:\n```json\n{\"a\": 1}\n```\nThanks!";
        let value = extract_json(text).unwrap();
        assert_eq!(value, json!({"a": 1}));
    }

    #[test]
    fn extracts_from_outermost_braces_with_prose() {
        let text = "Sure, the answer is {\"a\": 1} as requested.";
        let value = extract_json(text).unwrap();
        assert_eq!(value, json!({"a": 1}));
    }

    #[test]
    fn falls_back_to_regex_object_search() {
        let text = "no braces balance here: { \"a\": 1 } trailing junk } }";
        let value = extract_json(text);
        assert!(value.is_some());
    }

    #[test]
    fn returns_none_for_unparseable_text() {
        assert!(extract_json("not json at all").is_none());
    }
}
