use std::sync::Arc;

use promptforge_providers::{Provider, TokenUsage};
use promptforge_types::{AnalysisResult, CodebaseContext, OptimizationResult, Strategy, StrategySelection, ValidationResult};

/// Mutable state threaded through the four stages of a single run. Stages
/// read their inputs from here and write their outputs back; nothing may be
/// read from ambient state outside this struct.
pub struct PipelineContext {
    pub raw_prompt: String,
    /// The prompt the optimizer should rewrite next: the original raw prompt
    /// on the first pass, the previous iteration's optimized prompt on every
    /// subsequent pass.
    pub current_prompt: String,
    pub provider: Arc<dyn Provider>,
    pub codebase_context: Option<CodebaseContext>,
    pub strategy_override: Option<Strategy>,
    pub secondary_override: Vec<Strategy>,

    pub analysis: Option<AnalysisResult>,
    pub selection: Option<StrategySelection>,
    pub optimization: Option<OptimizationResult>,
    pub validation: Option<ValidationResult>,

    pub model_used: Option<String>,
    pub total_usage: TokenUsage,
}

impl PipelineContext {
    pub fn new(raw_prompt: impl Into<String>, provider: Arc<dyn Provider>) -> Self {
        let raw_prompt = raw_prompt.into();
        Self {
            current_prompt: raw_prompt.clone(),
            raw_prompt,
            provider,
            codebase_context: None,
            strategy_override: None,
            secondary_override: Vec::new(),
            analysis: None,
            selection: None,
            optimization: None,
            validation: None,
            model_used: None,
            total_usage: TokenUsage::default(),
        }
    }

    pub fn with_codebase_context(mut self, ctx: Option<CodebaseContext>) -> Self {
        self.codebase_context = ctx;
        self
    }

    pub fn with_strategy_override(mut self, strategy: Option<Strategy>, secondaries: Vec<Strategy>) -> Self {
        self.strategy_override = strategy;
        self.secondary_override = secondaries;
        self
    }

    pub fn prompt_len(&self) -> usize {
        self.raw_prompt.chars().count()
    }
}
