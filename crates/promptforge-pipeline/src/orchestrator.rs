use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use async_stream::stream;
use futures::Stream;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use promptforge_core::TokenBudgetRecorder;
use promptforge_providers::{Provider, TokenUsage};
use promptforge_types::{AnalysisResult, CodebaseContext, OptimizationResult, Strategy, StrategySelection, ValidationResult};

use crate::analyzer::AnalyzerStage;
use crate::context::PipelineContext;
use crate::error::{PipelineError, PipelineStage};
use crate::optimizer::OptimizerStage;
use crate::stage::Stage;
use crate::strategy_selector::StrategySelectorStage;
use crate::validator::ValidatorStage;

/// The orchestrator's default four-stage order, per the stage registry.
pub const DEFAULT_STAGE_ORDER: [&str; 4] = ["analyze", "strategy", "optimize", "validate"];

/// Per-request knobs threaded into [`PipelineOrchestrator::run`] and
/// [`PipelineOrchestrator::run_streaming`].
#[derive(Clone)]
pub struct PipelineRunOptions {
    pub strategy_override: Option<Strategy>,
    pub secondary_frameworks_override: Vec<Strategy>,
    pub codebase_context: Option<CodebaseContext>,
    pub max_iterations: u32,
    pub score_threshold: f64,
    pub stages: Vec<&'static str>,
}

impl Default for PipelineRunOptions {
    fn default() -> Self {
        Self {
            strategy_override: None,
            secondary_frameworks_override: Vec::new(),
            codebase_context: None,
            max_iterations: 1,
            score_threshold: 1.0,
            stages: DEFAULT_STAGE_ORDER.to_vec(),
        }
    }
}

/// The aggregated outcome of a completed (possibly partial) run.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineResult {
    pub analysis: Option<AnalysisResult>,
    pub selection: Option<StrategySelection>,
    pub optimization: Option<OptimizationResult>,
    pub validation: Option<ValidationResult>,
    pub model_used: Option<String>,
    pub total_usage: TokenUsage,
    pub duration_ms: u64,
}

/// Caller-supplied partial context for a single-stage invocation outside the
/// full pipeline (the `/orchestrate/{stage}` surface): whichever upstream
/// stage outputs the target stage depends on.
#[derive(Clone, Default)]
pub struct SingleStageInput {
    pub current_prompt: Option<String>,
    pub codebase_context: Option<CodebaseContext>,
    pub analysis: Option<AnalysisResult>,
    pub selection: Option<StrategySelection>,
    pub optimization: Option<OptimizationResult>,
    pub strategy_override: Option<Strategy>,
    pub secondary_override: Vec<Strategy>,
}

/// The result of a single-stage invocation: the stage's own output payload
/// plus the usage/model bookkeeping a caller stitching stages together needs.
#[derive(Debug, Clone, Serialize)]
pub struct SingleStageOutput {
    pub payload: Value,
    pub total_usage: TokenUsage,
    pub model_used: Option<String>,
}

/// Lifecycle events emitted by the streaming variant. Serialized by the HTTP
/// layer into `event: <name>\ndata: <json>\n\n` SSE frames.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    StageStart { stage: String, label: String, message: String },
    StepProgress { stage: String, message: String, progress: f64 },
    StageResult { stage: String, sse_event_type: String, payload: Value, step_duration_ms: u64 },
    Iteration { iteration: u32, max_iterations: u32 },
    Complete { data: Value },
    Error { error: String, error_type: Option<String>, retry_after: Option<u64> },
}

/// Composes the four pipeline stages over a mutable [`PipelineContext`],
/// grounded on the teacher's `EngineLoop` run-loop (cancellation-token-carrying,
/// per-step event emission) and `MissionReducer`-shaped stage dispatch.
pub struct PipelineOrchestrator {
    stages: HashMap<&'static str, Arc<dyn Stage>>,
    token_budget: Option<TokenBudgetRecorder>,
}

impl Default for PipelineOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineOrchestrator {
    pub fn new() -> Self {
        let mut stages: HashMap<&'static str, Arc<dyn Stage>> = HashMap::new();
        stages.insert("analyze", Arc::new(AnalyzerStage));
        stages.insert("strategy", Arc::new(StrategySelectorStage));
        stages.insert("optimize", Arc::new(OptimizerStage));
        stages.insert("validate", Arc::new(ValidatorStage));
        Self { stages, token_budget: None }
    }

    pub fn with_token_budget(mut self, recorder: TokenBudgetRecorder) -> Self {
        self.token_budget = Some(recorder);
        self
    }

    /// Registers a stage under a new name, or replaces one of the defaults.
    /// Supports the extension-variant half of the dispatch-table design: a
    /// fixed set of built-in stage kinds plus user-registered ones.
    pub fn register_stage(&mut self, name: &'static str, stage: Arc<dyn Stage>) {
        self.stages.insert(name, stage);
    }

    /// Runs every requested stage to completion and returns the aggregated
    /// result. Fails fast with `PipelineError(Stage, cause)` on the first
    /// stage failure.
    pub async fn run(
        &self,
        raw_prompt: impl Into<String>,
        provider: Arc<dyn Provider>,
        options: PipelineRunOptions,
    ) -> Result<PipelineResult, PipelineError> {
        let start = Instant::now();
        let mut ctx = PipelineContext::new(raw_prompt, provider)
            .with_codebase_context(options.codebase_context.clone())
            .with_strategy_override(options.strategy_override, options.secondary_frameworks_override.clone());

        let mut queue: VecDeque<&str> = options.stages.iter().copied().collect();
        let mut iterations_done = 1u32;
        let has_refinement_stages = options.stages.contains(&"optimize") && options.stages.contains(&"validate");

        while let Some(stage_name) = queue.pop_front() {
            self.run_one_stage(stage_name, &mut ctx).await?;

            if stage_name == "validate" && has_refinement_stages {
                let score = ctx.validation.as_ref().map(|v| v.overall_score).unwrap_or(0.0);
                if iterations_done < options.max_iterations && score < options.score_threshold {
                    iterations_done += 1;
                    queue.push_back("optimize");
                    queue.push_back("validate");
                }
            }
        }

        if let Some(recorder) = &self.token_budget {
            let model = ctx.model_used.clone().unwrap_or_else(|| "unknown".to_string());
            recorder.record_usage(model, ctx.total_usage).await;
        }

        Ok(finalize(&ctx, start.elapsed().as_millis() as u64))
    }

    async fn run_one_stage(&self, stage_name: &str, ctx: &mut PipelineContext) -> Result<(), PipelineError> {
        if stage_name == "strategy" {
            if let Some(selection) = self.override_selection(ctx)? {
                ctx.selection = Some(selection);
                return Ok(());
            }
        }
        let stage = self
            .stages
            .get(stage_name)
            .cloned()
            .ok_or_else(|| PipelineError::new(stage_kind(stage_name), format!("no stage registered for '{stage_name}'")))?;
        stage.execute(ctx).await.map(|_| ())
    }

    fn override_selection(&self, ctx: &PipelineContext) -> Result<Option<StrategySelection>, PipelineError> {
        let Some(strategy) = ctx.strategy_override else { return Ok(None) };
        let task_type = ctx.analysis.as_ref().map(|a| a.task_type_key()).unwrap_or_else(|| "general".to_string());
        let reasoning = format!("Strategy override: {strategy}.");
        StrategySelection::new(strategy, reasoning, 1.0, task_type, true, ctx.secondary_override.clone())
            .map(Some)
            .map_err(|err| PipelineError::new(PipelineStage::Strategy, err.to_string()))
    }

    /// Runs exactly one named stage against caller-supplied partial context,
    /// bypassing the queue and iterative-refinement logic entirely. Backs
    /// programmatic single-stage invocation outside the full pipeline: the
    /// caller is responsible for supplying whatever upstream stage output the
    /// target stage depends on (e.g. `analysis` for `strategy`).
    pub async fn run_single_stage(
        &self,
        stage_name: &str,
        provider: Arc<dyn Provider>,
        raw_prompt: impl Into<String>,
        input: SingleStageInput,
    ) -> Result<SingleStageOutput, PipelineError> {
        let mut ctx = PipelineContext::new(raw_prompt, provider)
            .with_codebase_context(input.codebase_context)
            .with_strategy_override(input.strategy_override, input.secondary_override);
        if let Some(current_prompt) = input.current_prompt {
            ctx.current_prompt = current_prompt;
        }
        ctx.analysis = input.analysis;
        ctx.selection = input.selection;
        ctx.optimization = input.optimization;

        self.run_one_stage(stage_name, &mut ctx).await?;

        let payload = match stage_name {
            "analyze" => serde_json::to_value(&ctx.analysis),
            "strategy" => serde_json::to_value(&ctx.selection),
            "optimize" => serde_json::to_value(&ctx.optimization),
            "validate" => serde_json::to_value(&ctx.validation),
            _ => Ok(Value::Null),
        }
        .unwrap_or(Value::Null);

        Ok(SingleStageOutput { payload, total_usage: ctx.total_usage, model_used: ctx.model_used })
    }

    /// Streams lifecycle events as each stage runs, re-entering the same
    /// stage queue used by `run` so the iterative-refinement loop and the
    /// strategy-override short-circuit behave identically between the two
    /// entry points.
    pub fn run_streaming(
        self: Arc<Self>,
        raw_prompt: String,
        provider: Arc<dyn Provider>,
        options: PipelineRunOptions,
        cancel: CancellationToken,
    ) -> impl Stream<Item = PipelineEvent> {
        stream! {
            let start = Instant::now();
            let mut ctx = PipelineContext::new(raw_prompt, provider)
                .with_codebase_context(options.codebase_context.clone())
                .with_strategy_override(options.strategy_override, options.secondary_frameworks_override.clone());

            let mut queue: VecDeque<&str> = options.stages.iter().copied().collect();
            let mut iterations_done = 1u32;
            let has_refinement_stages = options.stages.contains(&"optimize") && options.stages.contains(&"validate");

            while let Some(stage_name) = queue.pop_front() {
                if cancel.is_cancelled() {
                    return;
                }

                if stage_name == "strategy" {
                    match self.override_selection(&ctx) {
                        Ok(Some(selection)) => {
                            let payload = serde_json::to_value(&selection).unwrap_or(Value::Null);
                            ctx.selection = Some(selection);
                            yield PipelineEvent::StageResult {
                                stage: "strategy".to_string(),
                                sse_event_type: "strategy".to_string(),
                                payload,
                                step_duration_ms: 0,
                            };
                            continue;
                        }
                        Ok(None) => {}
                        Err(err) => {
                            yield PipelineEvent::Error {
                                error: err.cause,
                                error_type: err.error_type.map(str::to_string),
                                retry_after: err.retry_after,
                            };
                            return;
                        }
                    }
                }

                let Some(stage) = self.stages.get(stage_name).cloned() else {
                    yield PipelineEvent::Error {
                        error: format!("no stage registered for '{stage_name}'"),
                        error_type: None,
                        retry_after: None,
                    };
                    return;
                };
                let cfg = stage.config();

                yield PipelineEvent::StageStart {
                    stage: stage_name.to_string(),
                    label: cfg.label.to_string(),
                    message: cfg.label.to_string(),
                };

                let message_count = cfg.initial_messages.len();
                for (i, message) in cfg.initial_messages.iter().enumerate() {
                    yield PipelineEvent::StepProgress {
                        stage: stage_name.to_string(),
                        message: message.to_string(),
                        progress: (i as f64 + 1.0) / (message_count as f64 + 1.0),
                    };
                }

                let stage_start = Instant::now();
                let exec = stage.execute(&mut ctx);
                tokio::pin!(exec);
                let mut ticker = tokio::time::interval(cfg.progress_interval);
                ticker.tick().await;
                let mut cycle = 0usize;

                let outcome = loop {
                    tokio::select! {
                        result = &mut exec => break result,
                        _ = ticker.tick() => {
                            if !cfg.progress_messages.is_empty() {
                                let message = cfg.progress_messages[cycle % cfg.progress_messages.len()];
                                cycle += 1;
                                yield PipelineEvent::StepProgress {
                                    stage: stage_name.to_string(),
                                    message: message.to_string(),
                                    progress: 0.5,
                                };
                            }
                        }
                        _ = cancel.cancelled() => {
                            return;
                        }
                    }
                };

                match outcome {
                    Ok(payload) => {
                        yield PipelineEvent::StageResult {
                            stage: stage_name.to_string(),
                            sse_event_type: cfg.sse_event_type.to_string(),
                            payload,
                            step_duration_ms: stage_start.elapsed().as_millis() as u64,
                        };
                    }
                    Err(err) => {
                        yield PipelineEvent::Error {
                            error: err.cause,
                            error_type: err.error_type.map(str::to_string),
                            retry_after: err.retry_after,
                        };
                        return;
                    }
                }

                if stage_name == "validate" && has_refinement_stages {
                    let score = ctx.validation.as_ref().map(|v| v.overall_score).unwrap_or(0.0);
                    if iterations_done < options.max_iterations && score < options.score_threshold {
                        iterations_done += 1;
                        yield PipelineEvent::Iteration { iteration: iterations_done, max_iterations: options.max_iterations };
                        queue.push_back("optimize");
                        queue.push_back("validate");
                    }
                }
            }

            if let Some(recorder) = &self.token_budget {
                let model = ctx.model_used.clone().unwrap_or_else(|| "unknown".to_string());
                recorder.record_usage(model, ctx.total_usage).await;
            }

            let result = finalize(&ctx, start.elapsed().as_millis() as u64);
            yield PipelineEvent::Complete { data: serde_json::to_value(&result).unwrap_or(Value::Null) };
        }
    }
}

fn finalize(ctx: &PipelineContext, duration_ms: u64) -> PipelineResult {
    PipelineResult {
        analysis: ctx.analysis.clone(),
        selection: ctx.selection.clone(),
        optimization: ctx.optimization.clone(),
        validation: ctx.validation.clone(),
        model_used: ctx.model_used.clone(),
        total_usage: ctx.total_usage,
        duration_ms,
    }
}

fn stage_kind(name: &str) -> PipelineStage {
    match name {
        "strategy" => PipelineStage::Strategy,
        "optimize" => PipelineStage::Optimize,
        "validate" => PipelineStage::Validate,
        _ => PipelineStage::Analyze,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use promptforge_providers::ScriptedProvider;

    fn scripted(responses: Vec<&str>) -> Arc<dyn Provider> {
        let mut provider = ScriptedProvider::new("test-model");
        for response in responses {
            provider = provider.with_text(response);
        }
        Arc::new(provider)
    }

    #[tokio::test]
    async fn happy_path_runs_all_four_stages() {
        let provider = scripted(vec![
            r#"{"task_type": "coding", "complexity": "medium", "weaknesses": [], "strengths": []}"#,
            r#"{"strategy": "structured-output", "confidence": 0.8, "reasoning": "fits", "secondary_frameworks": []}"#,
            r#"{"optimized_prompt": "Write a well-documented function.", "changes_made": ["added docs"], "optimization_notes": "n/a"}"#,
            r#"{"clarity": 0.9, "specificity": 0.8, "structure": 0.9, "faithfulness": 0.9, "is_improvement": true, "verdict": "Improved."}"#,
        ]);
        let orchestrator = PipelineOrchestrator::new();
        let result = orchestrator.run("write a function", provider, PipelineRunOptions::default()).await.unwrap();
        assert!(result.analysis.is_some());
        assert!(result.selection.is_some());
        assert!(result.optimization.is_some());
        let validation = result.validation.unwrap();
        assert!(validation.overall_score >= 0.0 && validation.overall_score <= 1.0);
        assert!(result.model_used.is_some());
    }

    #[tokio::test]
    async fn strategy_override_bypasses_the_selector() {
        let provider = scripted(vec![
            r#"{"task_type": "coding", "complexity": "medium", "weaknesses": [], "strengths": []}"#,
            r#"{"optimized_prompt": "rewritten", "changes_made": [], "optimization_notes": ""}"#,
            r#"{"clarity": 0.9, "specificity": 0.9, "structure": 0.9, "faithfulness": 0.9, "is_improvement": true, "verdict": "good"}"#,
        ]);
        let mut options = PipelineRunOptions::default();
        options.strategy_override = Some(Strategy::ChainOfThought);
        let orchestrator = PipelineOrchestrator::new();
        let result = orchestrator.run("write a function", provider, options).await.unwrap();
        let selection = result.selection.unwrap();
        assert_eq!(selection.strategy, Strategy::ChainOfThought);
        assert_eq!(selection.confidence(), 1.0);
        assert!(selection.is_override);
    }

    #[tokio::test]
    async fn iterative_refinement_runs_extra_optimizer_validator_cycles() {
        let provider = scripted(vec![
            r#"{"task_type": "coding", "complexity": "medium", "weaknesses": [], "strengths": []}"#,
            r#"{"strategy": "structured-output", "confidence": 0.8, "reasoning": "fits", "secondary_frameworks": []}"#,
            r#"{"optimized_prompt": "v1", "changes_made": [], "optimization_notes": ""}"#,
            r#"{"clarity": 0.7, "specificity": 0.7, "structure": 0.7, "faithfulness": 0.7, "is_improvement": true, "verdict": "ok"}"#,
            r#"{"optimized_prompt": "v2", "changes_made": [], "optimization_notes": ""}"#,
            r#"{"clarity": 0.7, "specificity": 0.7, "structure": 0.7, "faithfulness": 0.7, "is_improvement": true, "verdict": "ok"}"#,
            r#"{"optimized_prompt": "v3", "changes_made": [], "optimization_notes": ""}"#,
            r#"{"clarity": 0.7, "specificity": 0.7, "structure": 0.7, "faithfulness": 0.7, "is_improvement": true, "verdict": "ok"}"#,
        ]);
        let mut options = PipelineRunOptions::default();
        options.max_iterations = 3;
        options.score_threshold = 0.9;
        let orchestrator = PipelineOrchestrator::new();
        let result = orchestrator.run("write a function", provider, options).await.unwrap();
        assert_eq!(result.optimization.unwrap().optimized_prompt, "v3");
        assert_eq!(result.validation.unwrap().overall_score, 0.7);
    }

    #[tokio::test]
    async fn missing_stage_input_fails_fast() {
        let provider = scripted(vec![r#"{"optimized_prompt": "x"}"#]);
        let mut options = PipelineRunOptions::default();
        options.stages = vec!["optimize"];
        let orchestrator = PipelineOrchestrator::new();
        let err = orchestrator.run("x", provider, options).await.unwrap_err();
        assert_eq!(err.stage, PipelineStage::Optimize);
    }

    #[tokio::test]
    async fn streaming_emits_complete_event_last() {
        let provider = scripted(vec![
            r#"{"task_type": "coding", "complexity": "medium", "weaknesses": [], "strengths": []}"#,
            r#"{"strategy": "structured-output", "confidence": 0.8, "reasoning": "fits", "secondary_frameworks": []}"#,
            r#"{"optimized_prompt": "v1", "changes_made": [], "optimization_notes": ""}"#,
            r#"{"clarity": 0.9, "specificity": 0.9, "structure": 0.9, "faithfulness": 0.9, "is_improvement": true, "verdict": "ok"}"#,
        ]);
        let orchestrator = Arc::new(PipelineOrchestrator::new());
        let cancel = CancellationToken::new();
        let stream = orchestrator.run_streaming("write a function".to_string(), provider, PipelineRunOptions::default(), cancel);
        futures::pin_mut!(stream);
        use futures::StreamExt;
        let mut events = Vec::new();
        while let Some(event) = stream.next().await {
            events.push(event);
        }
        assert!(matches!(events.last(), Some(PipelineEvent::Complete { .. })));
        assert!(events.iter().any(|e| matches!(e, PipelineEvent::StageStart { stage, .. } if stage == "analyze")));
    }
}
