use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use promptforge_pipeline::PipelineResult;
use promptforge_types::{AnalysisResult, Complexity, Optimization, OptimizationResult, OptimizationStatus, Strategy, StrategySelection};

fn complexity_str(complexity: Complexity) -> &'static str {
    match complexity {
        Complexity::Low => "low",
        Complexity::Medium => "medium",
        Complexity::High => "high",
    }
}

/// `POST /optimize` request body.
#[derive(Debug, Deserialize)]
pub struct OptimizeRequest {
    pub prompt: String,
    #[serde(default)]
    pub project: Option<Uuid>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub strategy: Option<String>,
    #[serde(default)]
    pub secondary_frameworks: Vec<String>,
    #[serde(default)]
    pub prompt_id: Option<Uuid>,
    #[serde(default)]
    pub version: Option<u32>,
    #[serde(default)]
    pub codebase_context: Option<Value>,
    #[serde(default)]
    pub max_iterations: Option<u32>,
    #[serde(default)]
    pub score_threshold: Option<f64>,
    #[serde(default)]
    pub provider: Option<String>,
}

/// `POST /optimize/{id}/retry` request body.
#[derive(Debug, Deserialize, Default)]
pub struct RetryRequest {
    #[serde(default)]
    pub strategy: Option<String>,
    #[serde(default)]
    pub secondary_frameworks: Vec<String>,
    #[serde(default)]
    pub codebase_context: Option<Value>,
}

/// One item of a `POST /optimize/batch` request body.
#[derive(Debug, Deserialize)]
pub struct BatchItem {
    pub prompt: String,
    #[serde(default)]
    pub project: Option<Uuid>,
    #[serde(default)]
    pub strategy: Option<String>,
    #[serde(default)]
    pub secondary_frameworks: Vec<String>,
    #[serde(default)]
    pub codebase_context: Option<Value>,
    #[serde(default)]
    pub provider: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    pub prompts: Vec<BatchItem>,
}

#[derive(Debug, Serialize)]
pub struct BatchResultItem {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub optimization: Option<OptimizationResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BatchResponse {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub results: Vec<BatchResultItem>,
}

/// `POST /orchestrate/{stage}` request body: whichever upstream stage
/// output the target stage needs, plus the usual override knobs.
#[derive(Debug, Deserialize)]
pub struct OrchestrateRequest {
    pub raw_prompt: String,
    #[serde(default)]
    pub current_prompt: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub codebase_context: Option<Value>,
    #[serde(default)]
    pub strategy: Option<String>,
    #[serde(default)]
    pub secondary_frameworks: Vec<String>,
    #[serde(default)]
    pub analysis: Option<AnalysisResult>,
    #[serde(default)]
    pub selection: Option<StrategySelection>,
    #[serde(default)]
    pub optimization: Option<OptimizationResult>,
}

/// `POST /internal/mcp-event` webhook body. Fields beyond `event_type` are
/// passed through to the bus untouched.
#[derive(Debug, Deserialize)]
pub struct McpEventRequest {
    pub event_type: String,
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub call_id: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ErrorEnvelope {
    pub fn new(detail: impl Into<String>) -> Self {
        Self { detail: detail.into(), code: None }
    }

    pub fn with_code(detail: impl Into<String>, code: impl Into<String>) -> Self {
        Self { detail: detail.into(), code: Some(code.into()) }
    }
}

/// The GET/POST-completion wire shape of an [`Optimization`] record, per the
/// spec's flattened `token_usage` fields and optional `score_deltas`.
#[derive(Debug, Clone, Serialize)]
pub struct OptimizationResponse {
    pub id: Uuid,
    pub raw_prompt: String,
    pub optimized_prompt: Option<String>,
    pub task_type: Option<String>,
    pub complexity: Option<String>,
    pub weaknesses: Vec<String>,
    pub strengths: Vec<String>,
    pub framework_applied: Option<String>,
    pub changes_made: Vec<String>,
    pub optimization_notes: Option<String>,
    pub clarity_score: Option<f64>,
    pub specificity_score: Option<f64>,
    pub structure_score: Option<f64>,
    pub faithfulness_score: Option<f64>,
    pub overall_score: Option<f64>,
    pub is_improvement: Option<bool>,
    pub verdict: Option<String>,
    pub duration_ms: Option<u64>,
    pub model_used: Option<String>,
    pub strategy: Option<Strategy>,
    pub strategy_reasoning: Option<String>,
    pub strategy_confidence: Option<f64>,
    pub secondary_frameworks: Vec<Strategy>,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub cache_creation_input_tokens: Option<u64>,
    pub cache_read_input_tokens: Option<u64>,
    pub status: OptimizationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score_deltas: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&Optimization> for OptimizationResponse {
    fn from(o: &Optimization) -> Self {
        Self {
            id: o.id,
            raw_prompt: o.raw_prompt.clone(),
            optimized_prompt: o.optimized_prompt.clone(),
            task_type: o.task_type.clone(),
            complexity: o.complexity.clone(),
            weaknesses: o.weaknesses.clone(),
            strengths: o.strengths.clone(),
            framework_applied: o.framework_applied.clone(),
            changes_made: o.changes_made.clone(),
            optimization_notes: o.optimization_notes.clone(),
            clarity_score: o.clarity_score,
            specificity_score: o.specificity_score,
            structure_score: o.structure_score,
            faithfulness_score: o.faithfulness_score,
            overall_score: o.overall_score,
            is_improvement: o.is_improvement,
            verdict: o.verdict.clone(),
            duration_ms: o.duration_ms,
            model_used: o.model_used.clone(),
            strategy: o.strategy,
            strategy_reasoning: o.strategy_reasoning.clone(),
            strategy_confidence: o.strategy_confidence,
            secondary_frameworks: o.secondary_frameworks.clone(),
            input_tokens: o.token_usage.input_tokens,
            output_tokens: o.token_usage.output_tokens,
            cache_creation_input_tokens: o.token_usage.cache_creation_input_tokens,
            cache_read_input_tokens: o.token_usage.cache_read_input_tokens,
            status: o.status,
            score_deltas: None,
            error: o.error.clone(),
        }
    }
}

impl OptimizationResponse {
    pub fn with_score_deltas(mut self, deltas: Value) -> Self {
        self.score_deltas = Some(deltas);
        self
    }
}

/// Copies a completed [`PipelineResult`] onto the persisted [`Optimization`]
/// record, the seam between the orchestrator's run-scoped output and the
/// store's durable (in-memory) shape.
pub fn apply_pipeline_result(optimization: &mut Optimization, result: &PipelineResult) {
    if let Some(analysis) = &result.analysis {
        optimization.task_type = Some(analysis.task_type.clone());
        optimization.complexity = Some(complexity_str(analysis.complexity).to_string());
        optimization.weaknesses = analysis.weaknesses.clone();
        optimization.strengths = analysis.strengths.clone();
    }
    if let Some(selection) = &result.selection {
        optimization.strategy = Some(selection.strategy);
        optimization.strategy_reasoning = Some(selection.reasoning.clone());
        optimization.strategy_confidence = Some(selection.confidence());
        optimization.secondary_frameworks = selection.secondary_frameworks.clone();
    }
    if let Some(optimization_result) = &result.optimization {
        optimization.optimized_prompt = Some(optimization_result.optimized_prompt.clone());
        optimization.framework_applied = Some(optimization_result.framework_applied.clone());
        optimization.changes_made = optimization_result.changes_made.clone();
        optimization.optimization_notes = Some(optimization_result.optimization_notes.clone());
    }
    if let Some(validation) = &result.validation {
        optimization.clarity_score = Some(validation.clarity);
        optimization.specificity_score = Some(validation.specificity);
        optimization.structure_score = Some(validation.structure);
        optimization.faithfulness_score = Some(validation.faithfulness);
        optimization.overall_score = Some(validation.overall_score);
        optimization.is_improvement = Some(validation.is_improvement);
        optimization.verdict = Some(validation.verdict.clone());
    }
    optimization.model_used = result.model_used.clone();
    optimization.duration_ms = Some(result.duration_ms);
    optimization.token_usage = result.total_usage;
}

/// Computes the per-axis score deltas surfaced in a retry's final `complete`
/// event: `new - original` for every axis both records report.
pub fn score_deltas(original: &Optimization, retried: &Optimization) -> Value {
    fn delta(a: Option<f64>, b: Option<f64>) -> Option<f64> {
        match (a, b) {
            (Some(a), Some(b)) => Some(((b - a) * 10_000.0).round() / 10_000.0),
            _ => None,
        }
    }
    serde_json::json!({
        "clarity": delta(original.clarity_score, retried.clarity_score),
        "specificity": delta(original.specificity_score, retried.specificity_score),
        "structure": delta(original.structure_score, retried.structure_score),
        "faithfulness": delta(original.faithfulness_score, retried.faithfulness_score),
        "overall": delta(original.overall_score, retried.overall_score),
    })
}

/// `Cache-Control` header value for a GET response, per the spec's
/// completed-vs-in-flight split.
pub fn cache_control_for(status: OptimizationStatus) -> &'static str {
    match status {
        OptimizationStatus::Completed => "max-age=3600, immutable",
        _ => "no-cache",
    }
}
