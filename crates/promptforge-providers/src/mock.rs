use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ProviderError;
use crate::{CompletionRequest, Provider, TokenUsage};

/// A test double that returns pre-scripted text responses in order, used by
/// pipeline and selector tests instead of a live LLM. Cycles back to the
/// last scripted response once exhausted rather than panicking, so a test
/// that under-specifies responses degrades gracefully instead of crashing.
/// `complete_json` is not overridden: it goes through the trait's default
/// implementation, which runs the same 4-strategy JSON extraction a real
/// provider's response would.
pub struct ScriptedProvider {
    id: String,
    responses: Mutex<Vec<String>>,
    cursor: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            responses: Mutex::new(Vec::new()),
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn with_text(self, response: impl Into<String>) -> Self {
        self.responses.lock().unwrap().push(response.into());
        self
    }

    pub fn with_json(self, response: Value) -> Self {
        self.with_text(response.to_string())
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn complete(&self, _request: &CompletionRequest) -> Result<(String, TokenUsage), ProviderError> {
        let responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            return Ok((String::new(), TokenUsage::default()));
        }
        let idx = self.cursor.fetch_add(1, Ordering::SeqCst).min(responses.len() - 1);
        Ok((
            responses[idx].clone(),
            TokenUsage {
                input_tokens: Some(10),
                output_tokens: Some(20),
                cache_creation_input_tokens: None,
                cache_read_input_tokens: None,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CompletionRequest;

    #[tokio::test]
    async fn cycles_through_scripted_responses_then_repeats_last() {
        let provider = ScriptedProvider::new("p").with_text("first").with_text("second");
        let request = CompletionRequest::single_user_message("hi");
        let (a, _) = provider.complete(&request).await.unwrap();
        let (b, _) = provider.complete(&request).await.unwrap();
        let (c, _) = provider.complete(&request).await.unwrap();
        assert_eq!(a, "first");
        assert_eq!(b, "second");
        assert_eq!(c, "second");
    }
}
