pub mod error;
pub mod json_extract;
pub mod mock;
pub mod retry;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

use promptforge_observability::{emit_event, ObservabilityEvent, ProcessKind};
pub use promptforge_types::TokenUsage;

pub use error::{classify_error, classify_provider_error, ProviderError};
pub use json_extract::extract_json;
pub use mock::ScriptedProvider;
pub use retry::{retry_transient, RetryPolicy};

const CONNECTION_TEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// A single LLM call: either a bare prompt completion or a chat-style
/// exchange, with an optional system prompt and model override.
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub system_prompt: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub model_override: Option<String>,
}

impl CompletionRequest {
    pub fn single_user_message(content: impl Into<String>) -> Self {
        Self {
            system_prompt: None,
            messages: vec![ChatMessage { role: "user".to_string(), content: content.into() }],
            model_override: None,
        }
    }

    pub fn with_system(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }
}

/// The result of a `complete_json` call: the parsed JSON value plus the raw
/// completion text (kept for logging/debugging when parsing degrades to a
/// fallback).
#[derive(Debug, Clone)]
pub struct JsonCompletion {
    pub parsed: Value,
    pub raw_completion: String,
    pub usage: TokenUsage,
}

/// Uniform interface over an LLM backend. Transport, auth, and wire format
/// are the provider's concern; callers only see `complete`/`complete_json`
/// plus usage accounting.
#[async_trait]
pub trait Provider: Send + Sync {
    fn id(&self) -> &str;

    async fn complete(&self, request: &CompletionRequest) -> Result<(String, TokenUsage), ProviderError>;

    /// Default implementation layers JSON extraction on top of `complete`,
    /// the same way the teacher's `Provider::stream` trait method derives a
    /// streaming response from a provider that only implements `complete`.
    async fn complete_json(&self, request: &CompletionRequest) -> Result<JsonCompletion, ProviderError> {
        let (text, usage) = self.complete(request).await?;
        let parsed = extract_json(&text).unwrap_or(Value::Null);
        Ok(JsonCompletion { parsed, raw_completion: text, usage })
    }

    async fn test_connection(&self) -> Result<(), ProviderError> {
        let request = CompletionRequest::single_user_message("ping");
        tokio::time::timeout(CONNECTION_TEST_TIMEOUT, self.complete(&request))
            .await
            .map_err(|_| ProviderError::Connection("connection test timed out".to_string()))?
            .map(|_| ())
    }
}

/// Runs `provider.complete` wrapped in the retry policy, logging every
/// attempt's outcome the way `tandem-observability::emit_event` logs engine
/// activity.
pub async fn complete_with_retry(
    provider: &dyn Provider,
    request: &CompletionRequest,
    policy: RetryPolicy,
) -> Result<(String, TokenUsage), ProviderError> {
    let provider_id = provider.id().to_string();
    let result = retry_transient(policy, || async {
        provider.complete(request).await
    })
    .await;

    match &result {
        Ok(_) => emit_event(
            tracing::Level::INFO,
            ProcessKind::Worker,
            ObservabilityEvent {
                event: "provider.complete",
                component: "provider",
                optimization_id: None,
                stage: None,
                job_id: None,
                provider_id: Some(&provider_id),
                model_id: request.model_override.as_deref(),
                status: Some("ok"),
                error_code: None,
                detail: None,
            },
        ),
        Err(err) => emit_event(
            tracing::Level::WARN,
            ProcessKind::Worker,
            ObservabilityEvent {
                event: "provider.complete",
                component: "provider",
                optimization_id: None,
                stage: None,
                job_id: None,
                provider_id: Some(&provider_id),
                model_id: request.model_override.as_deref(),
                status: Some("error"),
                error_code: Some(error_code(err)),
                detail: Some(&err.to_string()),
            },
        ),
    }
    result
}

fn error_code(err: &ProviderError) -> &'static str {
    match err {
        ProviderError::Authentication(_) => "authentication",
        ProviderError::Permission(_) => "permission",
        ProviderError::RateLimit { .. } => "rate_limit",
        ProviderError::ModelNotFound(_) => "model_not_found",
        ProviderError::Connection(_) => "connection",
        ProviderError::Other(_) => "other",
    }
}

/// Holds the configured providers and the default selection, mirroring the
/// teacher's `ProviderRegistry` (`tandem-providers/src/lib.rs`): an
/// `Arc<RwLock<..>>` of named providers plus an async `reload`.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: Arc<RwLock<HashMap<String, Arc<dyn Provider>>>>,
    default_provider: Arc<RwLock<Option<String>>>,
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderRegistryError {
    #[error("no provider registered with id '{0}'")]
    Unknown(String),
    #[error("no default provider configured")]
    NoDefault,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, provider: Arc<dyn Provider>) {
        let id = provider.id().to_string();
        let mut providers = self.providers.write().await;
        let is_first = providers.is_empty();
        providers.insert(id.clone(), provider);
        if is_first {
            *self.default_provider.write().await = Some(id);
        }
    }

    pub async fn set_default(&self, id: impl Into<String>) {
        *self.default_provider.write().await = Some(id.into());
    }

    pub async fn select(&self, id: Option<&str>) -> Result<Arc<dyn Provider>, ProviderRegistryError> {
        let providers = self.providers.read().await;
        let resolved = match id {
            Some(explicit) => explicit.to_string(),
            None => self
                .default_provider
                .read()
                .await
                .clone()
                .ok_or(ProviderRegistryError::NoDefault)?,
        };
        providers
            .get(&resolved)
            .cloned()
            .ok_or(ProviderRegistryError::Unknown(resolved))
    }

    pub async fn list_ids(&self) -> Vec<String> {
        self.providers.read().await.keys().cloned().collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProviderConfig {
    pub api_key: Option<String>,
    pub url: Option<String>,
    pub default_model: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn registry_selects_first_registered_as_default() {
        let registry = ProviderRegistry::new();
        registry.register(Arc::new(ScriptedProvider::new("primary"))).await;
        let selected = registry.select(None).await.unwrap();
        assert_eq!(selected.id(), "primary");
    }

    #[tokio::test]
    async fn registry_selects_explicit_provider_by_id() {
        let registry = ProviderRegistry::new();
        registry.register(Arc::new(ScriptedProvider::new("a"))).await;
        registry.register(Arc::new(ScriptedProvider::new("b"))).await;
        let selected = registry.select(Some("b")).await.unwrap();
        assert_eq!(selected.id(), "b");
    }

    #[tokio::test]
    async fn unknown_provider_id_errors() {
        let registry = ProviderRegistry::new();
        registry.register(Arc::new(ScriptedProvider::new("a"))).await;
        let err = registry.select(Some("missing")).await.unwrap_err();
        assert!(matches!(err, ProviderRegistryError::Unknown(_)));
    }

    #[tokio::test]
    async fn complete_json_uses_default_extraction_when_not_overridden() {
        let provider = ScriptedProvider::new("p").with_text("prose {\"a\": 1} trailing");
        let request = CompletionRequest::single_user_message("hi");
        let completion = provider.complete_json(&request).await.unwrap();
        assert_eq!(completion.parsed, json!({"a": 1}));
    }
}
