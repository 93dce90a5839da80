use std::fmt;

use promptforge_providers::ProviderError;

/// The four stages a `PipelineError` can be attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Analyze,
    Strategy,
    Optimize,
    Validate,
}

impl PipelineStage {
    pub fn as_str(self) -> &'static str {
        match self {
            PipelineStage::Analyze => "analyze",
            PipelineStage::Strategy => "strategy",
            PipelineStage::Optimize => "optimize",
            PipelineStage::Validate => "validate",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// `PipelineError(Stage, cause)`: a stage failure aborts the whole run. When
/// the underlying cause was a provider rate limit, `retry_after` is carried
/// through so the SSE error event can surface it to the caller.
#[derive(Debug, Clone, thiserror::Error)]
#[error("stage '{stage}' failed: {cause}")]
pub struct PipelineError {
    pub stage: PipelineStage,
    pub cause: String,
    pub error_type: Option<&'static str>,
    pub retry_after: Option<u64>,
}

impl PipelineError {
    pub fn new(stage: PipelineStage, cause: impl Into<String>) -> Self {
        Self { stage, cause: cause.into(), error_type: None, retry_after: None }
    }

    /// Wraps a provider failure, surfacing `rate_limit` + `retry_after` the
    /// way the SSE error event in the HTTP surface expects.
    pub fn from_provider(stage: PipelineStage, err: ProviderError) -> Self {
        match err {
            ProviderError::RateLimit { message, retry_after } => Self {
                stage,
                cause: message,
                error_type: Some("rate_limit"),
                retry_after: retry_after.map(|secs| secs.round().max(0.0) as u64),
            },
            other => Self { stage, cause: other.to_string(), error_type: None, retry_after: None },
        }
    }
}
