use serde::{Deserialize, Serialize};

use crate::strategy::Strategy;

/// The strategy selector's decision: a primary strategy with up to two
/// secondaries and a confidence score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategySelection {
    pub strategy: Strategy,
    pub reasoning: String,
    confidence: f64,
    pub task_type: String,
    pub is_override: bool,
    pub secondary_frameworks: Vec<Strategy>,
}

#[derive(Debug, thiserror::Error)]
pub enum StrategySelectionError {
    #[error("too many secondary frameworks: {0} (max 2)")]
    TooManySecondaries(usize),
    #[error("primary strategy {0} cannot also be a secondary")]
    PrimaryInSecondaries(Strategy),
}

impl StrategySelection {
    /// Constructs a selection, enforcing the confidence, secondary-count, and
    /// primary/secondary disjointness invariants. `confidence` is clamped to
    /// `[0.0, 1.0]` rather than rejected — callers that need strict
    /// validation should clamp before calling and compare.
    pub fn new(
        strategy: Strategy,
        reasoning: impl Into<String>,
        confidence: f64,
        task_type: impl Into<String>,
        is_override: bool,
        mut secondary_frameworks: Vec<Strategy>,
    ) -> Result<Self, StrategySelectionError> {
        secondary_frameworks.retain(|s| *s != strategy);
        if secondary_frameworks.len() > 2 {
            return Err(StrategySelectionError::TooManySecondaries(
                secondary_frameworks.len(),
            ));
        }
        Ok(Self {
            strategy,
            reasoning: reasoning.into(),
            confidence: confidence.clamp(0.0, 1.0),
            task_type: task_type.into(),
            is_override,
            secondary_frameworks,
        })
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn set_confidence(&mut self, value: f64) {
        self.confidence = value.clamp(0.0, 1.0);
    }

    pub fn adjust_confidence(&mut self, delta: f64) {
        self.set_confidence(self.confidence + delta);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_is_clamped_on_construction() {
        let sel = StrategySelection::new(
            Strategy::ChainOfThought,
            "test",
            1.5,
            "reasoning",
            false,
            vec![],
        )
        .unwrap();
        assert_eq!(sel.confidence(), 1.0);
    }

    #[test]
    fn primary_is_dropped_from_secondaries() {
        let sel = StrategySelection::new(
            Strategy::ChainOfThought,
            "test",
            0.8,
            "reasoning",
            false,
            vec![Strategy::ChainOfThought, Strategy::StepByStep],
        )
        .unwrap();
        assert_eq!(sel.secondary_frameworks, vec![Strategy::StepByStep]);
    }

    #[test]
    fn more_than_two_secondaries_is_rejected() {
        let err = StrategySelection::new(
            Strategy::ChainOfThought,
            "test",
            0.8,
            "reasoning",
            false,
            vec![
                Strategy::StepByStep,
                Strategy::TreeOfThought,
                Strategy::SelfConsistency,
            ],
        )
        .unwrap_err();
        assert!(matches!(err, StrategySelectionError::TooManySecondaries(3)));
    }
}
