use std::ops::Add;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::strategy::Strategy;

/// Per-stage token accounting. All fields are optional; addition treats a
/// missing field as zero, and the sum is `None` only when both operands were
/// `None`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_creation_input_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_read_input_tokens: Option<u64>,
}

fn add_optional(a: Option<u64>, b: Option<u64>) -> Option<u64> {
    match (a, b) {
        (None, None) => None,
        (a, b) => Some(a.unwrap_or(0) + b.unwrap_or(0)),
    }
}

impl Add for TokenUsage {
    type Output = TokenUsage;

    fn add(self, rhs: TokenUsage) -> TokenUsage {
        TokenUsage {
            input_tokens: add_optional(self.input_tokens, rhs.input_tokens),
            output_tokens: add_optional(self.output_tokens, rhs.output_tokens),
            cache_creation_input_tokens: add_optional(
                self.cache_creation_input_tokens,
                rhs.cache_creation_input_tokens,
            ),
            cache_read_input_tokens: add_optional(
                self.cache_read_input_tokens,
                rhs.cache_read_input_tokens,
            ),
        }
    }
}

impl std::ops::AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: TokenUsage) {
        *self = *self + rhs;
    }
}

/// Produced by the Optimizer stage: the rewritten prompt plus provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub optimized_prompt: String,
    pub framework_applied: String,
    #[serde(default)]
    pub changes_made: Vec<String>,
    #[serde(default)]
    pub optimization_notes: String,
}

/// Five-axis score produced by the Validator stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub clarity: f64,
    pub specificity: f64,
    pub structure: f64,
    pub faithfulness: f64,
    #[serde(default)]
    pub framework_adherence: Option<f64>,
    pub overall_score: f64,
    pub is_improvement: bool,
    pub verdict: String,
}

const CLARITY_WEIGHT: f64 = 0.25;
const SPECIFICITY_WEIGHT: f64 = 0.25;
const STRUCTURE_WEIGHT: f64 = 0.20;
const FAITHFULNESS_WEIGHT: f64 = 0.30;
const FRAMEWORK_ADHERENCE_WEIGHT: f64 = 0.0;

impl ValidationResult {
    /// Builds a validation result from raw (possibly out-of-range) axis
    /// scores, clamping each to `[0, 1]`, computing the weighted
    /// `overall_score`, and applying the §7 cross-check that overrides the
    /// caller-supplied `is_improvement` at the extremes.
    pub fn new(
        clarity: f64,
        specificity: f64,
        structure: f64,
        faithfulness: f64,
        framework_adherence: Option<f64>,
        is_improvement: bool,
        verdict: impl Into<String>,
    ) -> Self {
        let clarity = clarity.clamp(0.0, 1.0);
        let specificity = specificity.clamp(0.0, 1.0);
        let structure = structure.clamp(0.0, 1.0);
        let faithfulness = faithfulness.clamp(0.0, 1.0);
        let framework_adherence = framework_adherence.map(|v| v.clamp(0.0, 1.0));

        let overall_score = round4(
            clarity * CLARITY_WEIGHT
                + specificity * SPECIFICITY_WEIGHT
                + structure * STRUCTURE_WEIGHT
                + faithfulness * FAITHFULNESS_WEIGHT
                + framework_adherence.unwrap_or(0.0) * FRAMEWORK_ADHERENCE_WEIGHT,
        );

        let is_improvement = if overall_score < 0.4 {
            false
        } else if overall_score > 0.7 {
            true
        } else {
            is_improvement
        };

        Self {
            clarity,
            specificity,
            structure,
            faithfulness,
            framework_adherence,
            overall_score,
            is_improvement,
            verdict: verdict.into(),
        }
    }

    /// A safe-default validation result used when the LLM response is
    /// unparseable: mid-scale scores, a neutral verdict, `is_improvement`
    /// from the boolean coercion of whatever the caller passed.
    pub fn fallback(is_improvement_raw: bool) -> Self {
        Self::new(0.5, 0.5, 0.5, 0.5, None, is_improvement_raw, "No verdict available.")
    }

    /// Projects `overall_score` (stored in `[0, 1]`) onto a 1-10 integer
    /// display scale for external CLIs, using round-half-up.
    pub fn display_scale(&self) -> u8 {
        let scaled = self.overall_score * 9.0 + 1.0;
        (scaled + 0.5).floor() as u8
    }
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// Lifecycle state of a persisted optimization record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizationStatus {
    Pending,
    Running,
    Completed,
    Error,
    Cancelled,
}

/// The persisted artifact representing one end-to-end pipeline invocation.
/// Mutated exactly twice (final result, or error) and thereafter immutable
/// except for cosmetic fields (title, tags, project assignment).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Optimization {
    pub id: Uuid,
    pub raw_prompt: String,
    pub status: OptimizationStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub task_type: Option<String>,
    #[serde(default)]
    pub complexity: Option<String>,
    #[serde(default)]
    pub weaknesses: Vec<String>,
    #[serde(default)]
    pub strengths: Vec<String>,

    #[serde(default)]
    pub optimized_prompt: Option<String>,
    #[serde(default)]
    pub framework_applied: Option<String>,
    #[serde(default)]
    pub changes_made: Vec<String>,
    #[serde(default)]
    pub optimization_notes: Option<String>,

    #[serde(default)]
    pub clarity_score: Option<f64>,
    #[serde(default)]
    pub specificity_score: Option<f64>,
    #[serde(default)]
    pub structure_score: Option<f64>,
    #[serde(default)]
    pub faithfulness_score: Option<f64>,
    #[serde(default)]
    pub overall_score: Option<f64>,
    #[serde(default)]
    pub is_improvement: Option<bool>,
    #[serde(default)]
    pub verdict: Option<String>,

    #[serde(default)]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub model_used: Option<String>,

    #[serde(default)]
    pub strategy: Option<Strategy>,
    #[serde(default)]
    pub strategy_reasoning: Option<String>,
    #[serde(default)]
    pub strategy_confidence: Option<f64>,
    #[serde(default)]
    pub secondary_frameworks: Vec<Strategy>,

    #[serde(default)]
    pub token_usage: TokenUsage,

    #[serde(default)]
    pub project_id: Option<Uuid>,
    #[serde(default)]
    pub prompt_id: Option<Uuid>,
    #[serde(default)]
    pub codebase_context: Option<Value>,
    #[serde(default)]
    pub retry_of: Option<Uuid>,

    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default)]
    pub error: Option<String>,
}

impl Optimization {
    pub fn new(raw_prompt: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            raw_prompt: raw_prompt.into(),
            status: OptimizationStatus::Running,
            created_at: Utc::now(),
            completed_at: None,
            task_type: None,
            complexity: None,
            weaknesses: Vec::new(),
            strengths: Vec::new(),
            optimized_prompt: None,
            framework_applied: None,
            changes_made: Vec::new(),
            optimization_notes: None,
            clarity_score: None,
            specificity_score: None,
            structure_score: None,
            faithfulness_score: None,
            overall_score: None,
            is_improvement: None,
            verdict: None,
            duration_ms: None,
            model_used: None,
            strategy: None,
            strategy_reasoning: None,
            strategy_confidence: None,
            secondary_frameworks: Vec::new(),
            token_usage: TokenUsage::default(),
            project_id: None,
            prompt_id: None,
            codebase_context: None,
            retry_of: None,
            title: None,
            tags: Vec::new(),
            error: None,
        }
    }

    pub fn mark_completed(&mut self) {
        self.status = OptimizationStatus::Completed;
        self.completed_at = Some(Utc::now());
    }

    pub fn mark_error(&mut self, message: impl Into<String>) {
        self.status = OptimizationStatus::Error;
        self.completed_at = Some(Utc::now());
        self.error = Some(message.into());
    }

    pub fn mark_cancelled(&mut self) {
        self.status = OptimizationStatus::Cancelled;
        self.completed_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_usage_add_treats_missing_as_zero() {
        let a = TokenUsage { input_tokens: Some(10), ..Default::default() };
        let b = TokenUsage { input_tokens: None, output_tokens: Some(5), ..Default::default() };
        let sum = a + b;
        assert_eq!(sum.input_tokens, Some(10));
        assert_eq!(sum.output_tokens, Some(5));
    }

    #[test]
    fn token_usage_sum_is_none_only_when_both_none() {
        let a = TokenUsage::default();
        let b = TokenUsage::default();
        assert_eq!((a + b).input_tokens, None);
    }

    #[test]
    fn overall_score_is_weighted_average_rounded() {
        let v = ValidationResult::new(0.8, 0.6, 0.9, 0.7, None, true, "good");
        let expected = round4(0.8 * 0.25 + 0.6 * 0.25 + 0.9 * 0.20 + 0.7 * 0.30);
        assert_eq!(v.overall_score, expected);
    }

    #[test]
    fn cross_check_forces_false_below_threshold() {
        let v = ValidationResult::new(0.1, 0.1, 0.1, 0.1, None, true, "bad");
        assert!(v.overall_score < 0.4);
        assert!(!v.is_improvement);
    }

    #[test]
    fn cross_check_forces_true_above_threshold() {
        let v = ValidationResult::new(0.9, 0.9, 0.9, 0.9, None, false, "great");
        assert!(v.overall_score > 0.7);
        assert!(v.is_improvement);
    }

    #[test]
    fn scores_are_clamped() {
        let v = ValidationResult::new(1.5, -0.5, 0.5, 0.5, None, true, "x");
        assert_eq!(v.clarity, 1.0);
        assert_eq!(v.specificity, 0.0);
    }

    #[test]
    fn display_scale_round_half_up() {
        let v = ValidationResult::new(1.0, 1.0, 1.0, 1.0, None, true, "x");
        assert_eq!(v.display_scale(), 10);
        let v2 = ValidationResult::new(0.0, 0.0, 0.0, 0.0, None, false, "x");
        assert_eq!(v2.display_scale(), 1);
    }
}
