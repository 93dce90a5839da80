use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use promptforge_providers::Provider;
use promptforge_types::{AnalysisResult, Complexity};

use crate::context::PipelineContext;
use crate::error::{PipelineError, PipelineStage};
use crate::stage::{Stage, StageConfig};
use crate::util::string_list;

const SYSTEM_PROMPT: &str = "You are the analysis stage of a prompt-optimization pipeline. \
Classify the user's raw prompt. Respond with a single JSON object: \
{\"task_type\": one of coding|writing|reasoning|analysis|math|creative|conversation|summarization|classification|planning, \
\"complexity\": low|medium|high, \"weaknesses\": [string], \"strengths\": [string]}. \
No prose outside the JSON object.";

pub struct AnalyzerStage;

#[async_trait]
impl Stage for AnalyzerStage {
    fn name(&self) -> &'static str {
        "analyze"
    }

    fn config(&self) -> StageConfig {
        StageConfig {
            label: "Analyzing prompt",
            initial_messages: &["Reading the raw prompt", "Identifying task type and complexity"],
            progress_messages: &["Still analyzing the prompt...", "Scanning for strengths and weaknesses..."],
            progress_interval: Duration::from_secs(2),
            sse_event_type: "analysis",
        }
    }

    async fn execute(&self, ctx: &mut PipelineContext) -> Result<Value, PipelineError> {
        let payload = json!({
            "raw_prompt": ctx.raw_prompt,
            "codebase_context": ctx.codebase_context.as_ref().map(|c| c.render()),
        });
        let request = promptforge_providers::CompletionRequest::single_user_message(payload.to_string())
            .with_system(SYSTEM_PROMPT);

        let completion = ctx
            .provider
            .complete_json(&request)
            .await
            .map_err(|err| PipelineError::from_provider(PipelineStage::Analyze, err))?;

        ctx.total_usage += completion.usage;
        ctx.model_used.get_or_insert_with(|| ctx.provider.id().to_string());

        let analysis = parse_analysis(&completion.parsed);
        ctx.analysis = Some(analysis.clone());
        Ok(serde_json::to_value(&analysis).unwrap_or(Value::Null))
    }
}

fn parse_analysis(value: &Value) -> AnalysisResult {
    let task_type = value
        .get("task_type")
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .unwrap_or("general");
    let complexity = value
        .get("complexity")
        .and_then(Value::as_str)
        .map(Complexity::parse)
        .unwrap_or(Complexity::Medium);

    let mut analysis = AnalysisResult::new(task_type, complexity);
    analysis.weaknesses = string_list(value.get("weaknesses"));
    analysis.strengths = string_list(value.get("strengths"));
    analysis
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_analysis_defaults_unknown_task_type_to_general() {
        let analysis = parse_analysis(&json!({"complexity": "high"}));
        assert_eq!(analysis.task_type, "general");
        assert_eq!(analysis.complexity, Complexity::High);
    }

    #[test]
    fn parse_analysis_lowercases_task_type() {
        let analysis = parse_analysis(&json!({"task_type": "Coding", "complexity": "low"}));
        assert_eq!(analysis.task_type, "coding");
    }

    #[test]
    fn parse_analysis_reads_weaknesses_and_strengths() {
        let analysis = parse_analysis(&json!({
            "task_type": "writing",
            "complexity": "medium",
            "weaknesses": ["Lacks specific details"],
            "strengths": ["Already includes examples"],
        }));
        assert_eq!(analysis.weaknesses, vec!["Lacks specific details".to_string()]);
        assert_eq!(analysis.strengths, vec!["Already includes examples".to_string()]);
    }
}
