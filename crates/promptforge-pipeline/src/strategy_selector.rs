use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use promptforge_providers::{CompletionRequest, Provider, TokenUsage};
use promptforge_types::{
    combo_for_task_type, default_combo, p2_exempt, count_specificity_weaknesses, AnalysisResult, CodebaseContext,
    Complexity, Strategy, StrategySelection,
};

use crate::context::PipelineContext;
use crate::error::{PipelineError, PipelineStage};
use crate::stage::{Stage, StageConfig};

const SYSTEM_PROMPT: &str = "You are the strategy-selection stage of a prompt-optimization pipeline. \
Choose the single best prompt-engineering strategy for the given task from this closed list: \
chain-of-thought, few-shot-scaffolding, persona-assignment, risen, constraint-injection, structured-output, \
step-by-step, self-consistency, socratic-questioning, tree-of-thought. \
Respond with a single JSON object: {\"strategy\": string, \"confidence\": number 0-1, \"reasoning\": string, \
\"secondary_frameworks\": [string] (at most two)}. No prose outside the JSON object.";

pub struct StrategySelectorStage;

#[async_trait]
impl Stage for StrategySelectorStage {
    fn name(&self) -> &'static str {
        "strategy"
    }

    fn config(&self) -> StageConfig {
        StageConfig {
            label: "Selecting a strategy",
            initial_messages: &["Matching the prompt to a framework"],
            progress_messages: &["Weighing candidate strategies...", "Checking for redundant signal..."],
            progress_interval: Duration::from_secs(2),
            sse_event_type: "strategy",
        }
    }

    async fn execute(&self, ctx: &mut PipelineContext) -> Result<Value, PipelineError> {
        let analysis = ctx.analysis.clone().ok_or_else(|| {
            PipelineError::new(PipelineStage::Strategy, "strategy stage requires the analyze stage to have run first")
        })?;

        let selection = select_strategy(
            ctx.provider.as_ref(),
            &ctx.raw_prompt,
            &analysis,
            ctx.codebase_context.as_ref(),
            &mut ctx.total_usage,
        )
        .await;

        ctx.selection = Some(selection.clone());
        Ok(serde_json::to_value(&selection).unwrap_or(Value::Null))
    }
}

/// Runs the LLM-backed primary path, falling through to the deterministic
/// heuristic chain on any provider error, parse failure, or invariant
/// violation in the response.
pub async fn select_strategy(
    provider: &dyn Provider,
    raw_prompt: &str,
    analysis: &AnalysisResult,
    codebase: Option<&CodebaseContext>,
    total_usage: &mut TokenUsage,
) -> StrategySelection {
    match llm_select(provider, raw_prompt, analysis, codebase).await {
        Some((selection, usage)) => {
            *total_usage += usage;
            selection
        }
        None => select_heuristic(analysis, raw_prompt.chars().count(), codebase),
    }
}

async fn llm_select(
    provider: &dyn Provider,
    raw_prompt: &str,
    analysis: &AnalysisResult,
    codebase: Option<&CodebaseContext>,
) -> Option<(StrategySelection, TokenUsage)> {
    let payload = json!({
        "raw_prompt": raw_prompt,
        "analysis": analysis,
        "available_strategies": Strategy::ALL.map(Strategy::as_str),
        "codebase_context": codebase.map(|c| c.render()),
    });
    let request = CompletionRequest::single_user_message(payload.to_string()).with_system(SYSTEM_PROMPT);
    let completion = provider.complete_json(&request).await.ok()?;
    let obj = completion.parsed.as_object()?;

    let raw_strategy = obj.get("strategy")?.as_str()?;
    let normalized = Strategy::normalize_alias(raw_strategy);
    let strategy = match Strategy::parse(&normalized) {
        Some(strategy) => strategy,
        None => {
            tracing::warn!(raw_strategy, "strategy selector returned an unrecognized strategy; using task-type default");
            combo_for_task_type(&analysis.task_type_key()).unwrap_or_else(default_combo).primary
        }
    };

    let confidence = obj.get("confidence").and_then(Value::as_f64).unwrap_or(0.75).clamp(0.0, 1.0);

    let mut reasoning = obj.get("reasoning").and_then(Value::as_str).unwrap_or("").trim().to_string();
    if reasoning.is_empty() {
        reasoning = format!("Selected {} for {} task.", strategy.as_str(), analysis.task_type_key());
    }

    let secondaries: Vec<Strategy> = obj
        .get("secondary_frameworks")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(Strategy::normalize_alias)
                .filter_map(|s| Strategy::parse(&s))
                .filter(|s| *s != strategy)
                .take(2)
                .collect()
        })
        .unwrap_or_default();

    let selection =
        StrategySelection::new(strategy, reasoning, confidence, analysis.task_type_key(), false, secondaries).ok()?;
    Some((selection, completion.usage))
}

/// The deterministic three-priority fallback chain from the strategy
/// selector's design: P1 (high-complexity CoT-natural override), P2
/// (specificity-weakness override), P3 (task-type default with a
/// redundancy-aware fallback).
pub fn select_heuristic(analysis: &AnalysisResult, prompt_len: usize, codebase: Option<&CodebaseContext>) -> StrategySelection {
    let task_type = analysis.task_type_key();
    let known_combo = combo_for_task_type(&task_type);
    let combo = known_combo.unwrap_or_else(default_combo);
    let natural_strategy = combo.primary;

    if analysis.complexity == Complexity::High && matches!(task_type.as_str(), "reasoning" | "analysis" | "math") {
        return p1_selection(&combo, analysis, &task_type, prompt_len, codebase);
    }

    let specificity_count = count_specificity_weaknesses(&analysis.weaknesses);
    if specificity_count >= 1 && !p2_exempt(natural_strategy) {
        return p2_selection(&combo, specificity_count, &task_type, prompt_len, codebase);
    }

    p3_selection(&combo, natural_strategy, known_combo.is_some(), analysis, &task_type, prompt_len, codebase)
}

fn p1_selection(
    combo: &promptforge_types::StrategyCombo,
    analysis: &AnalysisResult,
    task_type: &str,
    prompt_len: usize,
    codebase: Option<&CodebaseContext>,
) -> StrategySelection {
    let (strategy, confidence) = if Strategy::ChainOfThought.matches_any_strength(&analysis.strengths) {
        (combo.first_secondary().unwrap_or(Strategy::ChainOfThought), 0.85)
    } else {
        (Strategy::ChainOfThought, 0.95)
    };
    let reasoning = format!(
        "High-complexity {task_type} task calls for explicit reasoning; selected {strategy} {}",
        strategy.reasoning_suffix()
    );
    let secondaries: Vec<Strategy> = combo.secondaries().into_iter().filter(|s| *s != strategy).take(2).collect();
    finalize(strategy, reasoning, confidence, task_type, secondaries, prompt_len, codebase, false)
}

fn p2_selection(
    combo: &promptforge_types::StrategyCombo,
    specificity_count: usize,
    task_type: &str,
    prompt_len: usize,
    codebase: Option<&CodebaseContext>,
) -> StrategySelection {
    let strategy = Strategy::ConstraintInjection;
    let confidence = match specificity_count {
        1 => 0.80,
        2 => 0.85,
        _ => 0.90,
    };
    let plural = if specificity_count == 1 { "weakness" } else { "weaknesses" };
    let reasoning = format!(
        "Prompt shows {specificity_count} specificity {plural}; constraint-injection removes the ambiguity."
    );
    let secondaries: Vec<Strategy> = combo.secondaries().into_iter().filter(|s| *s != strategy).take(2).collect();
    finalize(strategy, reasoning, confidence, task_type, secondaries, prompt_len, codebase, false)
}

fn p3_selection(
    combo: &promptforge_types::StrategyCombo,
    natural_strategy: Strategy,
    known_task_type: bool,
    analysis: &AnalysisResult,
    task_type: &str,
    prompt_len: usize,
    codebase: Option<&CodebaseContext>,
) -> StrategySelection {
    if natural_strategy.matches_any_strength(&analysis.strengths) {
        return match combo.first_secondary() {
            Some(fallback) => {
                let confidence = if fallback.matches_any_strength(&analysis.strengths) { 0.60 } else { 0.70 };
                let reasoning = format!(
                    "{natural_strategy} is already reflected in the prompt's strengths; falling back to {fallback} for {task_type}."
                );
                let secondaries: Vec<Strategy> =
                    combo.secondaries().into_iter().filter(|s| *s != fallback).take(2).collect();
                finalize(fallback, reasoning, confidence, task_type, secondaries, prompt_len, codebase, true)
            }
            None => {
                let reasoning = format!("{natural_strategy} is already reflected in the prompt's strengths.");
                finalize(natural_strategy, reasoning, 0.60, task_type, Vec::new(), prompt_len, codebase, true)
            }
        };
    }

    let mut confidence = if known_task_type { 0.75 } else { 0.50 };
    if analysis.complexity == Complexity::High {
        confidence = (confidence + 0.10_f64).min(0.95);
    }
    let reasoning = format!(
        "{natural_strategy} is the natural fit for {task_type} tasks, {}",
        natural_strategy.reasoning_suffix()
    );
    let secondaries: Vec<Strategy> = combo.secondaries().into_iter().take(2).collect();
    finalize(natural_strategy, reasoning, confidence, task_type, secondaries, prompt_len, codebase, false)
}

/// Applies the context-sensitive boost and the short-prompt penalty, then
/// constructs the final [`StrategySelection`]. `boost_eligible` is false on
/// the P3 redundancy-fallback branch, where the spec scopes the boost to the
/// non-redundant default path.
#[allow(clippy::too_many_arguments)]
fn finalize(
    strategy: Strategy,
    reasoning: String,
    mut confidence: f64,
    task_type: &str,
    secondaries: Vec<Strategy>,
    prompt_len: usize,
    codebase: Option<&CodebaseContext>,
    skip_boost: bool,
) -> StrategySelection {
    if !skip_boost && context_signals_favor(strategy, codebase) {
        confidence = (confidence + 0.05_f64).min(0.95);
    }
    if prompt_len < 50 {
        confidence = (confidence - 0.05_f64).max(0.0);
    }
    StrategySelection::new(strategy, reasoning, confidence, task_type, false, secondaries)
        .expect("heuristic selection always respects the selection invariants")
}

fn context_signals_favor(strategy: Strategy, codebase: Option<&CodebaseContext>) -> bool {
    let Some(ctx) = codebase else { return false };
    let language = ctx.language.as_deref().unwrap_or("").to_lowercase();
    let strict_type_system = matches!(language.as_str(), "rust" | "go")
        || ctx.conventions.iter().any(|c| c.to_lowercase().contains("strict"));
    let domain_signal = [ctx.framework.as_deref(), ctx.description.as_deref()]
        .into_iter()
        .flatten()
        .any(|s| {
            let lower = s.to_lowercase();
            lower.contains("medical") || lower.contains("legal")
        });
    let multi_layer = ctx
        .patterns
        .iter()
        .any(|p| p.to_lowercase().contains("multi-layer") || p.to_lowercase().contains("layered"));
    let rich_conventions = ctx.conventions.len() >= 3;

    match strategy {
        Strategy::StructuredOutput => strict_type_system,
        Strategy::PersonaAssignment => domain_signal,
        Strategy::StepByStep => multi_layer,
        Strategy::ConstraintInjection => rich_conventions,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn p2_override_fires_for_coding_with_specificity_weakness() {
        let analysis = AnalysisResult {
            task_type: "coding".to_string(),
            complexity: Complexity::Medium,
            weaknesses: vec!["Lacks specific details".to_string()],
            strengths: Vec::new(),
        };
        let selection = select_heuristic(&analysis, 100, None);
        assert_eq!(selection.strategy, Strategy::ConstraintInjection);
        assert_eq!(selection.confidence(), 0.80);
        assert!(selection.reasoning.to_lowercase().contains("specificity"));
    }

    #[test]
    fn p1_is_skipped_for_writing_even_at_high_complexity() {
        let analysis = AnalysisResult {
            task_type: "writing".to_string(),
            complexity: Complexity::High,
            weaknesses: Vec::new(),
            strengths: Vec::new(),
        };
        let selection = select_heuristic(&analysis, 100, None);
        assert_eq!(selection.strategy, Strategy::PersonaAssignment);
        assert_eq!(selection.confidence(), 0.85);
    }

    #[test]
    fn p1_redirects_to_secondary_when_cot_is_redundant() {
        let analysis = AnalysisResult {
            task_type: "reasoning".to_string(),
            complexity: Complexity::High,
            weaknesses: Vec::new(),
            strengths: vec!["The reasoning is already clear".to_string()],
        };
        let selection = select_heuristic(&analysis, 100, None);
        assert_eq!(selection.strategy, Strategy::TreeOfThought);
        assert_eq!(selection.confidence(), 0.85);
    }

    #[test]
    fn p1_chooses_chain_of_thought_for_high_complexity_reasoning() {
        let analysis = AnalysisResult {
            task_type: "reasoning".to_string(),
            complexity: Complexity::High,
            weaknesses: Vec::new(),
            strengths: Vec::new(),
        };
        let selection = select_heuristic(&analysis, 100, None);
        assert_eq!(selection.strategy, Strategy::ChainOfThought);
        assert_eq!(selection.confidence(), 0.95);
    }

    #[test]
    fn p3_redundancy_fallback_to_also_redundant_secondary_caps_at_sixty() {
        let analysis = AnalysisResult {
            task_type: "coding".to_string(),
            complexity: Complexity::Medium,
            weaknesses: Vec::new(),
            strengths: vec!["Output format is defined".to_string(), "Has clear constraints".to_string()],
        };
        let selection = select_heuristic(&analysis, 100, None);
        assert_eq!(selection.strategy, Strategy::ConstraintInjection);
        assert_eq!(selection.confidence(), 0.60);
    }

    #[test]
    fn short_prompt_penalty_applies_after_selection() {
        let analysis = AnalysisResult {
            task_type: "summarization".to_string(),
            complexity: Complexity::Medium,
            weaknesses: Vec::new(),
            strengths: Vec::new(),
        };
        let selection = select_heuristic(&analysis, 10, None);
        assert_eq!(selection.confidence(), 0.70);
    }

    #[test]
    fn unknown_task_type_falls_back_to_default_combo_at_half_confidence() {
        let analysis = AnalysisResult {
            task_type: "translation".to_string(),
            complexity: Complexity::Low,
            weaknesses: Vec::new(),
            strengths: Vec::new(),
        };
        let selection = select_heuristic(&analysis, 100, None);
        assert_eq!(selection.strategy, Strategy::StructuredOutput);
        assert_eq!(selection.confidence(), 0.50);
    }
}
