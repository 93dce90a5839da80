use promptforge_types::{coerce_codebase_context, CodebaseContext, Project};
use serde_json::Value;

/// Merges the three `CodebaseContext` layers in fixed precedence order:
/// workspace (auto-extracted) ⊕ project (curated) ⊕ explicit override
/// (per-request). Grounded on the teacher's `ConfigStore::get_effective_value`
/// layered-JSON-merge idiom (`tandem-core/src/config.rs`), generalized from an
/// arbitrary-depth layer stack down to this engine's fixed three.
#[derive(Debug, Default, Clone, Copy)]
pub struct ContextResolver;

impl ContextResolver {
    pub fn new() -> Self {
        Self
    }

    pub fn resolve(
        &self,
        workspace: Option<&CodebaseContext>,
        project: Option<&Project>,
        override_value: Option<&Value>,
    ) -> CodebaseContext {
        let project_ctx = project.and_then(project_layer_context);
        let override_ctx = override_value.and_then(coerce_codebase_context);

        let merged = CodebaseContext::merge(workspace, project_ctx.as_ref());
        CodebaseContext::merge(Some(&merged), override_ctx.as_ref())
    }
}

/// Reads a project's curated `context_profile`, injecting the project's own
/// `description` as a fallback when the profile itself carries none. Always
/// returns a fresh value: the caller's stored `context_profile` is never
/// exposed by reference.
fn project_layer_context(project: &Project) -> Option<CodebaseContext> {
    let profile = project.context_profile.as_ref();
    let mut ctx = match profile {
        Some(value) => coerce_codebase_context(value).unwrap_or_default(),
        None => CodebaseContext::default(),
    };
    if ctx.description.is_none() {
        if let Some(description) = &project.description {
            ctx.description = Some(description.clone());
        }
    }
    if ctx.is_empty() && project.description.is_none() {
        None
    } else {
        Some(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn project_with_profile(description: Option<&str>, profile: Option<Value>) -> Project {
        let mut project = Project::new_root("proj");
        project.description = description.map(|s| s.to_string());
        project.context_profile = profile;
        project
    }

    #[test]
    fn resolve_with_no_layers_is_empty() {
        let resolver = ContextResolver::new();
        let resolved = resolver.resolve(None, None, None);
        assert!(resolved.is_empty());
    }

    #[test]
    fn project_description_falls_back_into_missing_profile_description() {
        let project = project_with_profile(
            Some("A demo service"),
            Some(json!({"language": "Rust"})),
        );
        let resolver = ContextResolver::new();
        let resolved = resolver.resolve(None, Some(&project), None);
        assert_eq!(resolved.language.as_deref(), Some("Rust"));
        assert_eq!(resolved.description.as_deref(), Some("A demo service"));
    }

    #[test]
    fn profile_description_is_not_overridden_by_fallback() {
        let project = project_with_profile(
            Some("project-level description"),
            Some(json!({"description": "profile description"})),
        );
        let resolver = ContextResolver::new();
        let resolved = resolver.resolve(None, Some(&project), None);
        assert_eq!(resolved.description.as_deref(), Some("profile description"));
    }

    #[test]
    fn override_takes_precedence_over_workspace_and_project() {
        let workspace = CodebaseContext {
            language: Some("Python".into()),
            ..Default::default()
        };
        let project = project_with_profile(None, Some(json!({"language": "Go"})));
        let resolver = ContextResolver::new();
        let resolved = resolver.resolve(
            Some(&workspace),
            Some(&project),
            Some(&json!({"language": "Rust"})),
        );
        assert_eq!(resolved.language.as_deref(), Some("Rust"));
    }

    #[test]
    fn mutating_resolved_context_never_touches_stored_profile() {
        let project = project_with_profile(None, Some(json!({"conventions": ["PEP 8"]})));
        let resolver = ContextResolver::new();
        let mut resolved = resolver.resolve(None, Some(&project), None);
        resolved.conventions.push("extra".to_string());
        let reread = resolver.resolve(None, Some(&project), None);
        assert_eq!(reread.conventions, vec!["PEP 8".to_string()]);
    }
}
