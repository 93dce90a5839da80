use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use promptforge_providers::Provider;
use promptforge_types::ValidationResult;

use crate::context::PipelineContext;
use crate::error::{PipelineError, PipelineStage};
use crate::stage::{Stage, StageConfig};
use crate::util::{score_field, truthy};

const SYSTEM_PROMPT: &str = "You are the validator stage of a prompt-optimization pipeline. \
Score the optimized prompt against the original on five axes. \
Respond with a single JSON object: {\"clarity\": number 0-1, \"specificity\": number 0-1, \
\"structure\": number 0-1, \"faithfulness\": number 0-1, \"framework_adherence\": number 0-1 (optional), \
\"is_improvement\": boolean, \"verdict\": string}. No prose outside the JSON object.";

pub struct ValidatorStage;

#[async_trait]
impl Stage for ValidatorStage {
    fn name(&self) -> &'static str {
        "validate"
    }

    fn config(&self) -> StageConfig {
        StageConfig {
            label: "Validating the optimization",
            initial_messages: &["Scoring clarity, specificity, and structure"],
            progress_messages: &["Still scoring the optimization...", "Cross-checking faithfulness to the original..."],
            progress_interval: Duration::from_secs(2),
            sse_event_type: "validation",
        }
    }

    async fn execute(&self, ctx: &mut PipelineContext) -> Result<Value, PipelineError> {
        let optimization = ctx.optimization.clone().ok_or_else(|| {
            PipelineError::new(PipelineStage::Validate, "validate stage requires an optimization result")
        })?;

        let payload = json!({
            "raw_prompt": ctx.raw_prompt,
            "optimized_prompt": optimization.optimized_prompt,
            "strategy": optimization.framework_applied,
        });
        let request = promptforge_providers::CompletionRequest::single_user_message(payload.to_string())
            .with_system(SYSTEM_PROMPT);

        let completion = ctx
            .provider
            .complete_json(&request)
            .await
            .map_err(|err| PipelineError::from_provider(PipelineStage::Validate, err))?;
        ctx.total_usage += completion.usage;

        let result = parse_validation(&completion.parsed);
        ctx.validation = Some(result.clone());
        Ok(serde_json::to_value(&result).unwrap_or(Value::Null))
    }
}

fn parse_validation(value: &Value) -> ValidationResult {
    if !value.is_object() {
        return ValidationResult::fallback(true);
    }

    let framework_adherence = value.get("framework_adherence").and_then(Value::as_f64);
    let is_improvement_raw = value.get("is_improvement").map(truthy).unwrap_or(true);
    let verdict = value
        .get("verdict")
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .unwrap_or("No verdict available.");

    ValidationResult::new(
        score_field(value, "clarity"),
        score_field(value, "specificity"),
        score_field(value, "structure"),
        score_field(value, "faithfulness"),
        framework_adherence,
        is_improvement_raw,
        verdict,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_validation_defaults_every_axis_on_empty_object() {
        let result = parse_validation(&json!({}));
        assert_eq!(result.clarity, 0.5);
        assert_eq!(result.verdict, "No verdict available.");
    }

    #[test]
    fn parse_validation_uses_fallback_on_non_object_response() {
        let result = parse_validation(&Value::Null);
        assert_eq!(result.verdict, "No verdict available.");
        assert_eq!(result.clarity, 0.5);
    }

    #[test]
    fn parse_validation_reads_declared_scores() {
        let result = parse_validation(&json!({
            "clarity": 0.9, "specificity": 0.8, "structure": 0.9, "faithfulness": 0.95,
            "is_improvement": true, "verdict": "Clear improvement."
        }));
        assert!(result.overall_score > 0.7);
        assert!(result.is_improvement);
    }
}
