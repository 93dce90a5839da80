use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use promptforge_types::CodebaseContext;

const DOC_CHAR_BUDGET: usize = 3_000;
const DOC_TRUNCATION_MARKER: &str = "\n... (truncated)";

const BACKEND_MARKERS: &[&str] = &["pyproject.toml", "go.mod", "Cargo.toml"];
const FRONTEND_MARKER: &str = "package.json";

/// Input snapshot of a repository, deterministic and LLM-free, grounded on
/// the shape of the teacher's `WorkspaceIndex` (`tandem-runtime/src/workspace_index.rs`)
/// but consuming an in-memory tree/content map instead of walking the live
/// filesystem with the `ignore` crate, since this engine operates on
/// request-scoped uploads rather than a resident working tree.
#[derive(Debug, Clone, Default)]
pub struct RepoSnapshot {
    pub file_tree: Vec<String>,
    pub file_contents: HashMap<String, String>,
    pub repo_metadata: Value,
}

/// Deterministically derives a [`CodebaseContext`] from a [`RepoSnapshot`].
#[derive(Debug, Default, Clone, Copy)]
pub struct WorkspaceExtractor;

impl WorkspaceExtractor {
    pub fn new() -> Self {
        Self
    }

    pub fn extract(&self, snapshot: &RepoSnapshot) -> CodebaseContext {
        CodebaseContext {
            language: detect_language(snapshot),
            framework: detect_framework(snapshot),
            description: None,
            test_framework: detect_test_framework(snapshot),
            conventions: detect_conventions(snapshot),
            patterns: detect_patterns(snapshot),
            code_snippets: Vec::new(),
            documentation: detect_documentation(snapshot),
            test_patterns: Vec::new(),
        }
    }
}

fn has_marker(snapshot: &RepoSnapshot, name: &str) -> bool {
    snapshot.file_tree.iter().any(|f| f == name || f.ends_with(&format!("/{name}")))
}

fn detect_language(snapshot: &RepoSnapshot) -> Option<String> {
    let backend = BACKEND_MARKERS.iter().find(|m| has_marker(snapshot, m));
    let frontend = has_marker(snapshot, FRONTEND_MARKER);

    if let Some(backend_marker) = backend {
        if frontend {
            let backend_lang = language_for_marker(backend_marker);
            let frontend_lang = if has_marker(snapshot, "tsconfig.json") {
                "TypeScript"
            } else {
                "JavaScript"
            };
            return Some(format!("{backend_lang} (backend) / {frontend_lang} (frontend)"));
        }
    }

    if let Some(lang) = snapshot.repo_metadata.get("language").and_then(|v| v.as_str()) {
        return Some(lang.to_string());
    }

    if let Some(marker) = BACKEND_MARKERS.iter().chain(std::iter::once(&FRONTEND_MARKER)).find(|m| has_marker(snapshot, m)) {
        return Some(language_for_marker(marker).to_string());
    }

    most_frequent_extension(snapshot)
}

fn language_for_marker(marker: &str) -> &'static str {
    match marker {
        "pyproject.toml" => "Python",
        "go.mod" => "Go",
        "Cargo.toml" => "Rust",
        "package.json" => "JavaScript",
        _ => "Unknown",
    }
}

fn most_frequent_extension(snapshot: &RepoSnapshot) -> Option<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for path in &snapshot.file_tree {
        if let Some(ext) = path.rsplit('.').next() {
            if ext != path {
                *counts.entry(ext).or_insert(0) += 1;
            }
        }
    }
    counts
        .into_iter()
        .max_by_key(|(_, count)| *count)
        .map(|(ext, _)| extension_to_language(ext).to_string())
}

fn extension_to_language(ext: &str) -> &'static str {
    match ext {
        "rs" => "Rust",
        "py" => "Python",
        "go" => "Go",
        "ts" | "tsx" => "TypeScript",
        "js" | "jsx" => "JavaScript",
        "java" => "Java",
        "rb" => "Ruby",
        _ => "Unknown",
    }
}

const JS_META_FRAMEWORKS: &[(&str, &str)] = &[("next", "Next.js"), ("svelte-kit", "SvelteKit"), ("@sveltejs/kit", "SvelteKit")];
const JS_BASE_FRAMEWORKS: &[(&str, &str)] = &[("react", "React"), ("svelte", "Svelte"), ("vue", "Vue"), ("@angular/core", "Angular")];
const PY_FRAMEWORKS: &[(&str, &str)] = &[("fastapi", "FastAPI"), ("django", "Django"), ("flask", "Flask")];

fn detect_framework(snapshot: &RepoSnapshot) -> Option<String> {
    if let Some(contents) = snapshot.file_contents.get("package.json") {
        if let Ok(parsed) = serde_json::from_str::<Value>(contents) {
            let mut deps: HashMap<String, String> = HashMap::new();
            for key in ["dependencies", "devDependencies"] {
                if let Some(obj) = parsed.get(key).and_then(|v| v.as_object()) {
                    for (name, version) in obj {
                        if let Some(v) = version.as_str() {
                            deps.insert(name.clone(), v.to_string());
                        }
                    }
                }
            }
            for (pkg, label) in JS_META_FRAMEWORKS {
                if let Some(version) = deps.get(*pkg) {
                    return Some(format_framework(label, version));
                }
            }
            for (pkg, label) in JS_BASE_FRAMEWORKS {
                if let Some(version) = deps.get(*pkg) {
                    return Some(format_framework(label, version));
                }
            }
        }
    }

    if let Some(contents) = snapshot.file_contents.get("pyproject.toml") {
        if let Some((label, version)) = detect_pyproject_framework(contents) {
            return Some(format_framework(label, &version));
        }
    }

    None
}

fn format_framework(label: &str, version: &str) -> String {
    let stripped = version.trim_start_matches(['^', '~']).trim_start_matches(">=").trim();
    if stripped.is_empty() {
        label.to_string()
    } else {
        format!("{label} {stripped}")
    }
}

static PYPROJECT_DEP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"["']([A-Za-z0-9_.-]+)["']\s*(?:=|[><=~^]{1,2})\s*["']?([A-Za-z0-9.*^~<>=, ]*)"?"#).expect("valid regex")
});

fn detect_pyproject_framework(contents: &str) -> Option<(&'static str, String)> {
    for caps in PYPROJECT_DEP.captures_iter(contents) {
        let name = caps.get(1)?.as_str().to_lowercase();
        for (pkg, label) in PY_FRAMEWORKS {
            if name == *pkg {
                let version = caps.get(2).map(|m| m.as_str().to_string()).unwrap_or_default();
                return Some((label, version));
            }
        }
    }
    None
}

fn detect_test_framework(snapshot: &RepoSnapshot) -> Option<String> {
    if let Some(contents) = snapshot.file_contents.get("package.json") {
        if let Ok(parsed) = serde_json::from_str::<Value>(contents) {
            for key in ["dependencies", "devDependencies"] {
                if let Some(obj) = parsed.get(key).and_then(|v| v.as_object()) {
                    for candidate in ["vitest", "jest", "mocha", "playwright"] {
                        if obj.contains_key(candidate) {
                            return Some(candidate.to_string());
                        }
                    }
                }
            }
        }
    }
    if let Some(contents) = snapshot.file_contents.get("pyproject.toml") {
        for candidate in ["pytest", "unittest"] {
            if contents.to_lowercase().contains(candidate) {
                return Some(candidate.to_string());
            }
        }
    }
    None
}

fn detect_conventions(snapshot: &RepoSnapshot) -> Vec<String> {
    let mut conventions = Vec::new();

    if let Some(contents) = snapshot.file_contents.get("tsconfig.json") {
        if let Ok(parsed) = serde_json::from_str::<Value>(contents) {
            let opts = parsed.get("compilerOptions");
            let strict = opts.and_then(|o| o.get("strict")).and_then(|v| v.as_bool()).unwrap_or(false);
            let target = opts.and_then(|o| o.get("target")).and_then(|v| v.as_str());
            let module = opts.and_then(|o| o.get("module")).and_then(|v| v.as_str());
            let mut parts = vec!["TypeScript".to_string()];
            if strict {
                parts.push("strict mode".to_string());
            }
            if let Some(target) = target {
                parts.push(format!("target {target}"));
            }
            if let Some(module) = module {
                parts.push(format!("module {module}"));
            }
            conventions.push(parts.join(", "));
        }
    } else if has_marker(snapshot, "tsconfig.json") {
        conventions.push("TypeScript".to_string());
    }

    if let Some(contents) = snapshot.file_contents.get("ruff.toml").or_else(|| snapshot.file_contents.get("pyproject.toml")) {
        if contents.contains("[tool.ruff]") || has_marker(snapshot, "ruff.toml") {
            let line_length = extract_toml_number(contents, "line-length");
            let target_version = extract_toml_string(contents, "target-version");
            let mut parts = vec!["Ruff".to_string()];
            if let Some(len) = line_length {
                parts.push(format!("line-length {len}"));
            }
            if let Some(target) = target_version {
                parts.push(format!("target-version {target}"));
            }
            conventions.push(parts.join(", "));
        }
    }

    if let Some(contents) = snapshot.file_contents.get(".prettierrc") {
        if let Ok(parsed) = serde_json::from_str::<Value>(contents) {
            let semi = parsed.get("semi").and_then(|v| v.as_bool());
            let single_quote = parsed.get("singleQuote").and_then(|v| v.as_bool());
            let tab_width = parsed.get("tabWidth").and_then(|v| v.as_u64());
            let mut parts = vec!["Prettier".to_string()];
            if let Some(semi) = semi {
                parts.push(if semi { "semicolons".to_string() } else { "no semicolons".to_string() });
            }
            if let Some(single_quote) = single_quote {
                parts.push(if single_quote { "single quotes".to_string() } else { "double quotes".to_string() });
            }
            if let Some(tab_width) = tab_width {
                parts.push(format!("tab width {tab_width}"));
            }
            conventions.push(parts.join(", "));
        }
    } else if has_marker(snapshot, ".prettierrc") {
        conventions.push("Prettier".to_string());
    }

    for eslint_marker in [".eslintrc", ".eslintrc.json", ".eslintrc.js", "eslint.config.js"] {
        if has_marker(snapshot, eslint_marker) {
            conventions.push("ESLint".to_string());
            break;
        }
    }

    conventions
}

fn extract_toml_number(contents: &str, key: &str) -> Option<u64> {
    let re = Regex::new(&format!(r"{key}\s*=\s*(\d+)")).ok()?;
    re.captures(contents)?.get(1)?.as_str().parse().ok()
}

fn extract_toml_string(contents: &str, key: &str) -> Option<String> {
    let re = Regex::new(&format!(r#"{key}\s*=\s*["']([^"']+)["']"#)).ok()?;
    Some(re.captures(contents)?.get(1)?.as_str().to_string())
}

const ARCHITECTURAL_DIRS: &[&str] = &["src/", "services/", "repositories/", "components/", "tests/", "test/", "__tests__/", "hooks/"];

fn detect_patterns(snapshot: &RepoSnapshot) -> Vec<String> {
    let mut patterns = Vec::new();

    for dir in ARCHITECTURAL_DIRS {
        if snapshot.file_tree.iter().any(|p| p.starts_with(dir)) {
            patterns.push(dir.trim_end_matches('/').to_string());
        }
    }

    if has_marker(snapshot, "Dockerfile") {
        patterns.push("containerized (Dockerfile)".to_string());
    }
    if has_marker(snapshot, "docker-compose.yml") || has_marker(snapshot, "docker-compose.yaml") {
        patterns.push("multi-service (docker-compose)".to_string());
    }
    if has_marker(snapshot, "pnpm-workspace.yaml") || has_marker(snapshot, "lerna.json") || has_marker(snapshot, "nx.json") {
        patterns.push("monorepo".to_string());
    }
    if snapshot
        .file_tree
        .iter()
        .any(|p| p.starts_with(".github/workflows/") && (p.ends_with(".yml") || p.ends_with(".yaml")))
    {
        patterns.push("CI workflows (.github/workflows)".to_string());
    }

    patterns
}

static HTML_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").expect("valid regex"));

fn detect_documentation(snapshot: &RepoSnapshot) -> Vec<String> {
    let Some(readme) = snapshot
        .file_contents
        .get("README.md")
        .or_else(|| snapshot.file_contents.get("readme.md"))
    else {
        return Vec::new();
    };

    let stripped = HTML_TAG.replace_all(readme, "").to_string();
    let trimmed = stripped.trim();

    if trimmed.chars().count() > DOC_CHAR_BUDGET {
        let truncated: String = trimmed.chars().take(DOC_CHAR_BUDGET).collect();
        vec![format!("{truncated}{DOC_TRUNCATION_MARKER}")]
    } else {
        vec![trimmed.to_string()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot(tree: &[&str], contents: &[(&str, &str)]) -> RepoSnapshot {
        RepoSnapshot {
            file_tree: tree.iter().map(|s| s.to_string()).collect(),
            file_contents: contents.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            repo_metadata: Value::Null,
        }
    }

    #[test]
    fn detects_combined_backend_frontend_language() {
        let snap = snapshot(&["Cargo.toml", "package.json", "tsconfig.json"], &[]);
        let ctx = WorkspaceExtractor::new().extract(&snap);
        assert_eq!(ctx.language.as_deref(), Some("Rust (backend) / TypeScript (frontend)"));
    }

    #[test]
    fn downgrades_to_javascript_without_tsconfig() {
        let snap = snapshot(&["Cargo.toml", "package.json"], &[]);
        let ctx = WorkspaceExtractor::new().extract(&snap);
        assert_eq!(ctx.language.as_deref(), Some("Rust (backend) / JavaScript (frontend)"));
    }

    #[test]
    fn falls_back_to_repo_metadata_language() {
        let snap = RepoSnapshot {
            file_tree: vec![],
            file_contents: HashMap::new(),
            repo_metadata: json!({"language": "Elixir"}),
        };
        let ctx = WorkspaceExtractor::new().extract(&snap);
        assert_eq!(ctx.language.as_deref(), Some("Elixir"));
    }

    #[test]
    fn detects_meta_framework_before_base_framework() {
        let snap = snapshot(
            &["package.json"],
            &[("package.json", r#"{"dependencies": {"next": "^14.0.0", "react": "^18.0.0"}}"#)],
        );
        let ctx = WorkspaceExtractor::new().extract(&snap);
        assert_eq!(ctx.framework.as_deref(), Some("Next.js 14.0.0"));
    }

    #[test]
    fn detects_python_framework_via_pyproject_regex() {
        let snap = snapshot(
            &["pyproject.toml"],
            &[("pyproject.toml", "dependencies = [\"fastapi>=0.100.0\"]")],
        );
        let ctx = WorkspaceExtractor::new().extract(&snap);
        assert_eq!(ctx.framework.as_deref(), Some("FastAPI 0.100.0"));
    }

    #[test]
    fn detects_prettier_conventions_from_content() {
        let snap = snapshot(
            &[".prettierrc"],
            &[(".prettierrc", r#"{"semi": false, "singleQuote": true, "tabWidth": 2}"#)],
        );
        let ctx = WorkspaceExtractor::new().extract(&snap);
        assert!(ctx.conventions.iter().any(|c| c.contains("no semicolons") && c.contains("single quotes")));
    }

    #[test]
    fn detects_architectural_and_infra_patterns() {
        let snap = snapshot(
            &["src/main.rs", "services/foo.rs", "Dockerfile", ".github/workflows/ci.yml"],
            &[],
        );
        let ctx = WorkspaceExtractor::new().extract(&snap);
        assert!(ctx.patterns.contains(&"src".to_string()));
        assert!(ctx.patterns.contains(&"services".to_string()));
        assert!(ctx.patterns.iter().any(|p| p.contains("Dockerfile")));
        assert!(ctx.patterns.iter().any(|p| p.contains("CI workflows")));
    }

    #[test]
    fn readme_strips_html_and_truncates() {
        let long_readme = format!("<h1>Title</h1>{}", "x".repeat(4_000));
        let snap = snapshot(&["README.md"], &[("README.md", &long_readme)]);
        let ctx = WorkspaceExtractor::new().extract(&snap);
        assert_eq!(ctx.documentation.len(), 1);
        assert!(!ctx.documentation[0].contains("<h1>"));
        assert!(ctx.documentation[0].ends_with("... (truncated)"));
    }
}
