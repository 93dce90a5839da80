use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use promptforge_providers::Provider;
use promptforge_types::OptimizationResult;

use crate::context::PipelineContext;
use crate::error::{PipelineError, PipelineStage};
use crate::stage::{Stage, StageConfig};
use crate::util::string_list;

const SYSTEM_PROMPT: &str = "You are the optimizer stage of a prompt-optimization pipeline. \
Rewrite the given prompt by applying the named strategy and secondary frameworks. \
Respond with a single JSON object: {\"optimized_prompt\": string, \"changes_made\": [string], \
\"optimization_notes\": string}. No prose outside the JSON object.";

pub struct OptimizerStage;

#[async_trait]
impl Stage for OptimizerStage {
    fn name(&self) -> &'static str {
        "optimize"
    }

    fn config(&self) -> StageConfig {
        StageConfig {
            label: "Rewriting the prompt",
            initial_messages: &["Applying the chosen strategy"],
            progress_messages: &["Drafting the rewritten prompt...", "Polishing phrasing..."],
            progress_interval: Duration::from_secs(2),
            sse_event_type: "optimization",
        }
    }

    async fn execute(&self, ctx: &mut PipelineContext) -> Result<Value, PipelineError> {
        let selection = ctx.selection.clone().ok_or_else(|| {
            PipelineError::new(PipelineStage::Optimize, "optimize stage requires a strategy selection")
        })?;

        let payload = json!({
            "prompt": ctx.current_prompt,
            "strategy": selection.strategy.as_str(),
            "secondary_frameworks": selection.secondary_frameworks.iter().map(|s| s.as_str()).collect::<Vec<_>>(),
            "task_type": selection.task_type,
            "codebase_context": ctx.codebase_context.as_ref().map(|c| c.render()),
        });
        let request = promptforge_providers::CompletionRequest::single_user_message(payload.to_string())
            .with_system(SYSTEM_PROMPT);

        let completion = ctx
            .provider
            .complete_json(&request)
            .await
            .map_err(|err| PipelineError::from_provider(PipelineStage::Optimize, err))?;
        ctx.total_usage += completion.usage;

        let result = parse_optimization(&completion.parsed, &ctx.current_prompt, selection.strategy.as_str());
        ctx.current_prompt = result.optimized_prompt.clone();
        ctx.optimization = Some(result.clone());
        Ok(serde_json::to_value(&result).unwrap_or(Value::Null))
    }
}

fn parse_optimization(value: &Value, fallback_prompt: &str, strategy: &str) -> OptimizationResult {
    let optimized_prompt = value
        .get("optimized_prompt")
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string);

    match optimized_prompt {
        Some(optimized_prompt) => OptimizationResult {
            optimized_prompt,
            framework_applied: strategy.to_string(),
            changes_made: string_list(value.get("changes_made")),
            optimization_notes: value.get("optimization_notes").and_then(Value::as_str).unwrap_or_default().to_string(),
        },
        None => OptimizationResult {
            optimized_prompt: fallback_prompt.to_string(),
            framework_applied: strategy.to_string(),
            changes_made: Vec::new(),
            optimization_notes: "Optimizer response could not be parsed; returning the input prompt unchanged.".to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_optimization_falls_back_to_input_prompt_on_missing_field() {
        let result = parse_optimization(&json!({}), "original prompt", "chain-of-thought");
        assert_eq!(result.optimized_prompt, "original prompt");
        assert!(!result.optimization_notes.is_empty());
    }

    #[test]
    fn parse_optimization_reads_changes_made() {
        let result = parse_optimization(
            &json!({"optimized_prompt": "better", "changes_made": ["added steps"]}),
            "original",
            "step-by-step",
        );
        assert_eq!(result.optimized_prompt, "better");
        assert_eq!(result.changes_made, vec!["added steps".to_string()]);
    }
}
