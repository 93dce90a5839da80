use std::collections::HashMap;
use std::sync::Arc;

use promptforge_types::TokenUsage;
use tokio::sync::RwLock;

/// Accumulates token usage per model across pipeline runs, the same
/// single-writer `Arc<RwLock<HashMap<..>>>` idiom as `ProviderRegistry`. The
/// orchestrator's `token_budget.record_usage(model_name, usage)` side-channel
/// writes here after every successful run.
#[derive(Clone, Default)]
pub struct TokenBudgetRecorder {
    usage_by_model: Arc<RwLock<HashMap<String, TokenUsage>>>,
}

impl TokenBudgetRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record_usage(&self, model_name: impl Into<String>, usage: TokenUsage) {
        let mut guard = self.usage_by_model.write().await;
        let entry = guard.entry(model_name.into()).or_default();
        *entry += usage;
    }

    pub async fn usage_for(&self, model_name: &str) -> TokenUsage {
        self.usage_by_model.read().await.get(model_name).copied().unwrap_or_default()
    }

    pub async fn total(&self) -> TokenUsage {
        self.usage_by_model.read().await.values().fold(TokenUsage::default(), |acc, usage| acc + *usage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_and_accumulates_per_model() {
        let recorder = TokenBudgetRecorder::new();
        recorder.record_usage("gpt", TokenUsage { input_tokens: Some(10), ..Default::default() }).await;
        recorder.record_usage("gpt", TokenUsage { input_tokens: Some(5), ..Default::default() }).await;
        assert_eq!(recorder.usage_for("gpt").await.input_tokens, Some(15));
    }

    #[tokio::test]
    async fn total_sums_across_models() {
        let recorder = TokenBudgetRecorder::new();
        recorder.record_usage("a", TokenUsage { input_tokens: Some(1), ..Default::default() }).await;
        recorder.record_usage("b", TokenUsage { input_tokens: Some(2), ..Default::default() }).await;
        assert_eq!(recorder.total().await.input_tokens, Some(3));
    }
}
