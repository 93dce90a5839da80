use serde::{Deserialize, Serialize};

const RENDER_BUDGET_CHARS: usize = 8_000;
const TRUNCATION_MARKER: &str = "\n... (truncated)";

/// Grounding metadata threaded through every pipeline stage. Produced by the
/// Context Resolver's three-layer merge (workspace ⊕ project ⊕ override).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodebaseContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub framework: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_framework: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conventions: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub patterns: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub code_snippets: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub documentation: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub test_patterns: Vec<String>,
}

impl CodebaseContext {
    pub fn is_empty(&self) -> bool {
        self.language.is_none()
            && self.framework.is_none()
            && self.description.is_none()
            && self.test_framework.is_none()
            && self.conventions.is_empty()
            && self.patterns.is_empty()
            && self.code_snippets.is_empty()
            && self.documentation.is_empty()
            && self.test_patterns.is_empty()
    }

    /// Merges `override_ctx` onto `base`. Scalar fields take the override's
    /// value if it is truthy (non-empty string), else the base's. List
    /// fields take the override's list if non-empty, else the base's.
    /// `merge(None, Some(x))` and `merge(Some(x), None)` return a fresh copy
    /// of `x` — never the same allocation, so mutating the result never
    /// aliases the input.
    pub fn merge(base: Option<&CodebaseContext>, override_ctx: Option<&CodebaseContext>) -> CodebaseContext {
        match (base, override_ctx) {
            (None, None) => CodebaseContext::default(),
            (Some(b), None) => b.clone(),
            (None, Some(o)) => o.clone(),
            (Some(b), Some(o)) => CodebaseContext {
                language: pick_scalar(&b.language, &o.language),
                framework: pick_scalar(&b.framework, &o.framework),
                description: pick_scalar(&b.description, &o.description),
                test_framework: pick_scalar(&b.test_framework, &o.test_framework),
                conventions: pick_list(&b.conventions, &o.conventions),
                patterns: pick_list(&b.patterns, &o.patterns),
                code_snippets: pick_list(&b.code_snippets, &o.code_snippets),
                documentation: pick_list(&b.documentation, &o.documentation),
                test_patterns: pick_list(&b.test_patterns, &o.test_patterns),
            },
        }
    }

    /// Renders a labelled, human-readable block for LLM consumption,
    /// truncated to an ~8000 character budget with an explicit marker.
    pub fn render(&self) -> String {
        if self.is_empty() {
            return "None".to_string();
        }
        let mut out = String::new();
        if let Some(language) = &self.language {
            out.push_str(&format!("Language: {language}\n"));
        }
        if let Some(framework) = &self.framework {
            out.push_str(&format!("Framework: {framework}\n"));
        }
        if let Some(description) = &self.description {
            out.push_str(&format!("Description: {description}\n"));
        }
        if let Some(test_framework) = &self.test_framework {
            out.push_str(&format!("Test framework: {test_framework}\n"));
        }
        render_bullets(&mut out, "Conventions", &self.conventions);
        render_bullets(&mut out, "Patterns", &self.patterns);
        render_bullets(&mut out, "Code snippets", &self.code_snippets);
        render_bullets(&mut out, "Documentation", &self.documentation);
        render_bullets(&mut out, "Test patterns", &self.test_patterns);

        let trimmed = out.trim_end().to_string();
        if trimmed.chars().count() > RENDER_BUDGET_CHARS {
            let truncated: String = trimmed.chars().take(RENDER_BUDGET_CHARS).collect();
            format!("{truncated}{TRUNCATION_MARKER}")
        } else {
            trimmed
        }
    }
}

fn render_bullets(out: &mut String, label: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    out.push_str(&format!("{label}:\n"));
    for item in items {
        out.push_str(&format!("\u{2022} {item}\n"));
    }
}

fn pick_scalar(base: &Option<String>, override_value: &Option<String>) -> Option<String> {
    match override_value {
        Some(v) if !v.is_empty() => Some(v.clone()),
        _ => base.clone(),
    }
}

fn pick_list(base: &[String], override_value: &[String]) -> Vec<String> {
    if override_value.is_empty() {
        base.to_vec()
    } else {
        override_value.to_vec()
    }
}

/// Coerces an untyped JSON value into a `CodebaseContext`, following the
/// explicit stringification rules in the spec: scalars are stringified
/// (`42 -> "42"`, `true -> "True"`), list fields accept either a bare string
/// (wrapped as a single-element list) or an array (items stringified,
/// `null` filtered), and dict-valued list fields yield an empty list. A
/// non-object root produces `None`.
pub fn coerce_codebase_context(value: &serde_json::Value) -> Option<CodebaseContext> {
    let obj = value.as_object()?;
    Some(CodebaseContext {
        language: coerce_scalar(obj.get("language")),
        framework: coerce_scalar(obj.get("framework")),
        description: coerce_scalar(obj.get("description")),
        test_framework: coerce_scalar(obj.get("test_framework")),
        conventions: coerce_list(obj.get("conventions")),
        patterns: coerce_list(obj.get("patterns")),
        code_snippets: coerce_list(obj.get("code_snippets")),
        documentation: coerce_list(obj.get("documentation")),
        test_patterns: coerce_list(obj.get("test_patterns")),
    })
}

fn coerce_scalar(value: Option<&serde_json::Value>) -> Option<String> {
    match value {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(s)) => Some(s.clone()),
        Some(serde_json::Value::Bool(b)) => Some(if *b { "True".to_string() } else { "False".to_string() }),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        Some(other) => Some(other.to_string()),
    }
}

fn coerce_list(value: Option<&serde_json::Value>) -> Vec<String> {
    match value {
        None | Some(serde_json::Value::Null) => Vec::new(),
        Some(serde_json::Value::String(s)) => vec![s.clone()],
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .filter(|v| !v.is_null())
            .map(|v| match v {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect(),
        Some(serde_json::Value::Object(_)) => Vec::new(),
        Some(_) => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_none_and_none_is_empty() {
        let merged = CodebaseContext::merge(None, None);
        assert!(merged.is_empty());
    }

    #[test]
    fn merge_none_x_produces_fresh_copy() {
        let ctx = CodebaseContext {
            language: Some("Rust".into()),
            ..Default::default()
        };
        let merged = CodebaseContext::merge(None, Some(&ctx));
        assert_eq!(merged, ctx);
        assert_ne!(&merged as *const _, &ctx as *const _);
    }

    #[test]
    fn merge_prefers_truthy_override_scalars() {
        let base = CodebaseContext {
            language: Some("Python".into()),
            framework: Some("FastAPI".into()),
            ..Default::default()
        };
        let over = CodebaseContext {
            framework: Some("Django".into()),
            conventions: vec!["PEP 8".into()],
            ..Default::default()
        };
        let merged = CodebaseContext::merge(Some(&base), Some(&over));
        assert_eq!(merged.language.as_deref(), Some("Python"));
        assert_eq!(merged.framework.as_deref(), Some("Django"));
        assert_eq!(merged.conventions, vec!["PEP 8".to_string()]);
    }

    #[test]
    fn merge_falls_back_to_base_when_override_empty_string() {
        let base = CodebaseContext {
            language: Some("Go".into()),
            ..Default::default()
        };
        let over = CodebaseContext {
            language: Some(String::new()),
            ..Default::default()
        };
        let merged = CodebaseContext::merge(Some(&base), Some(&over));
        assert_eq!(merged.language.as_deref(), Some("Go"));
    }

    #[test]
    fn render_empty_is_none() {
        assert_eq!(CodebaseContext::default().render(), "None");
    }

    #[test]
    fn render_truncates_with_marker() {
        let mut ctx = CodebaseContext::default();
        ctx.documentation = vec!["x".repeat(10_000)];
        let rendered = ctx.render();
        assert!(rendered.ends_with("... (truncated)"));
        assert!(rendered.chars().count() <= RENDER_BUDGET_CHARS + TRUNCATION_MARKER.len());
    }

    #[test]
    fn coerce_stringifies_scalars() {
        let ctx = coerce_codebase_context(&json!({
            "language": "Rust",
            "framework": 42,
            "description": true,
        }))
        .unwrap();
        assert_eq!(ctx.language.as_deref(), Some("Rust"));
        assert_eq!(ctx.framework.as_deref(), Some("42"));
        assert_eq!(ctx.description.as_deref(), Some("True"));
    }

    #[test]
    fn coerce_wraps_bare_string_list_and_filters_nulls() {
        let ctx = coerce_codebase_context(&json!({
            "conventions": "PEP 8",
            "patterns": ["a", null, "b"],
            "test_patterns": {"nested": true},
        }))
        .unwrap();
        assert_eq!(ctx.conventions, vec!["PEP 8".to_string()]);
        assert_eq!(ctx.patterns, vec!["a".to_string(), "b".to_string()]);
        assert!(ctx.test_patterns.is_empty());
    }

    #[test]
    fn coerce_non_object_root_is_none() {
        assert!(coerce_codebase_context(&json!([1, 2, 3])).is_none());
        assert!(coerce_codebase_context(&json!("plain string")).is_none());
    }
}
