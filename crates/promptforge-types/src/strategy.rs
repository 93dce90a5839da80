use std::collections::HashMap;
use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// One of the ten named prompt-rewriting frameworks the selector can choose
/// between. Closed enumeration: callers never construct a strategy from an
/// arbitrary string without going through [`Strategy::parse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    ChainOfThought,
    FewShotScaffolding,
    PersonaAssignment,
    Risen,
    ConstraintInjection,
    StructuredOutput,
    StepByStep,
    SelfConsistency,
    SocraticQuestioning,
    TreeOfThought,
}

impl Strategy {
    pub const ALL: [Strategy; 10] = [
        Strategy::ChainOfThought,
        Strategy::FewShotScaffolding,
        Strategy::PersonaAssignment,
        Strategy::Risen,
        Strategy::ConstraintInjection,
        Strategy::StructuredOutput,
        Strategy::StepByStep,
        Strategy::SelfConsistency,
        Strategy::SocraticQuestioning,
        Strategy::TreeOfThought,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Strategy::ChainOfThought => "chain-of-thought",
            Strategy::FewShotScaffolding => "few-shot-scaffolding",
            Strategy::PersonaAssignment => "persona-assignment",
            Strategy::Risen => "risen",
            Strategy::ConstraintInjection => "constraint-injection",
            Strategy::StructuredOutput => "structured-output",
            Strategy::StepByStep => "step-by-step",
            Strategy::SelfConsistency => "self-consistency",
            Strategy::SocraticQuestioning => "socratic-questioning",
            Strategy::TreeOfThought => "tree-of-thought",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Strategy::ChainOfThought => {
                "Asks the model to reason step by step before answering"
            }
            Strategy::FewShotScaffolding => {
                "Adds worked examples that demonstrate the desired input/output shape"
            }
            Strategy::PersonaAssignment => {
                "Assigns the model an expert persona suited to the task domain"
            }
            Strategy::Risen => "Structures the prompt as Role, Instructions, Steps, End goal, Narrowing",
            Strategy::ConstraintInjection => {
                "Adds explicit constraints that remove ambiguity from a vague request"
            }
            Strategy::StructuredOutput => {
                "Specifies an exact output schema or format for the response"
            }
            Strategy::StepByStep => "Breaks the task into an explicit ordered sequence of steps",
            Strategy::SelfConsistency => {
                "Asks for multiple independent approaches to cross-check the answer"
            }
            Strategy::SocraticQuestioning => {
                "Has the model surface clarifying questions before committing to an answer"
            }
            Strategy::TreeOfThought => {
                "Explores multiple reasoning branches before converging on an answer"
            }
        }
    }

    pub fn reasoning_suffix(self) -> &'static str {
        match self {
            Strategy::ChainOfThought => "because the task benefits from explicit reasoning",
            Strategy::FewShotScaffolding => "because worked examples will anchor the output shape",
            Strategy::PersonaAssignment => "because framing an expert persona sharpens tone and scope",
            Strategy::Risen => "because the task needs a role, steps, and an end goal spelled out",
            Strategy::ConstraintInjection => "because the prompt is underspecified",
            Strategy::StructuredOutput => "because downstream consumers need a predictable shape",
            Strategy::StepByStep => "because the task decomposes into a clear sequence",
            Strategy::SelfConsistency => "because cross-checking multiple approaches reduces error",
            Strategy::SocraticQuestioning => "because clarifying the request first avoids wrong assumptions",
            Strategy::TreeOfThought => "because the task has several plausible solution paths",
        }
    }

    /// Case-insensitive, word-boundary regex patterns that, if present in a
    /// strength string, indicate the prompt already exhibits what this
    /// strategy would add.
    pub fn redundancy_patterns(self) -> &'static [&'static str] {
        match self {
            Strategy::ChainOfThought => &[
                r"\bstep[- ]by[- ]step\b",
                r"\breasoning is (already )?clear\b",
                r"\balready shows reasoning\b",
            ],
            Strategy::FewShotScaffolding => &[
                r"\bincludes examples\b",
                r"\bhas examples\b",
                r"\bexample[- ]driven\b",
            ],
            Strategy::PersonaAssignment => &[
                r"\bdefines a role\b",
                r"\brole is (already )?defined\b",
                r"\bpersona is clear\b",
            ],
            Strategy::Risen => &[
                r"\bdefines role and steps\b",
                r"\bend goal is clear\b",
            ],
            Strategy::ConstraintInjection => &[
                r"\bwell[- ]constrained\b",
                r"\bhas clear constraints\b",
                r"\bspecific constraints\b",
            ],
            Strategy::StructuredOutput => &[
                r"\bstructured output\b",
                r"\boutput format is defined\b",
                r"\bspecifies (a |the )?format\b",
            ],
            Strategy::StepByStep => &[
                r"\bstep[- ]by[- ]step\b",
                r"\bsequential steps already\b",
            ],
            Strategy::SelfConsistency => &[
                r"\bmultiple approaches\b",
                r"\bcross[- ]validated\b",
            ],
            Strategy::SocraticQuestioning => &[r"\basks clarifying questions\b"],
            Strategy::TreeOfThought => &[
                r"\bexplores alternatives\b",
                r"\bbranches considered\b",
            ],
        }
    }

    pub fn redundancy_regexes(self) -> &'static [Regex] {
        static CACHE: Lazy<HashMap<&'static str, Vec<Regex>>> = Lazy::new(|| {
            let mut map = HashMap::new();
            for strategy in Strategy::ALL {
                let compiled: Vec<Regex> = strategy
                    .redundancy_patterns()
                    .iter()
                    .map(|p| Regex::new(&format!("(?i){p}")).expect("valid redundancy pattern"))
                    .collect();
                map.insert(strategy.as_str(), compiled);
            }
            map
        });
        CACHE.get(self.as_str()).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn matches_any_strength(self, strengths: &[String]) -> bool {
        let patterns = self.redundancy_regexes();
        strengths
            .iter()
            .any(|strength| patterns.iter().any(|re| re.is_match(strength)))
    }

    /// Rewrites historical strategy names to their canonical form. Applied on
    /// all ingress: LLM output, HTTP overrides, persisted records.
    pub fn normalize_alias(raw: &str) -> String {
        let key = raw.trim().to_lowercase();
        LEGACY_ALIASES.get(key.as_str()).copied().unwrap_or(key.as_str()).to_string()
    }

    /// Parses a normalized (post-alias) string into a closed `Strategy`.
    pub fn parse(raw: &str) -> Option<Strategy> {
        let normalized = Strategy::normalize_alias(raw);
        Strategy::ALL.into_iter().find(|s| s.as_str() == normalized)
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

static LEGACY_ALIASES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    let mut m = HashMap::new();
    m.insert("cot", "chain-of-thought");
    m.insert("chain_of_thought", "chain-of-thought");
    m.insert("few-shot", "few-shot-scaffolding");
    m.insert("few_shot", "few-shot-scaffolding");
    m.insert("fewshot", "few-shot-scaffolding");
    m.insert("persona", "persona-assignment");
    m.insert("role-play", "persona-assignment");
    m.insert("risen-framework", "risen");
    m.insert("constraints", "constraint-injection");
    m.insert("constraint", "constraint-injection");
    m.insert("structured", "structured-output");
    m.insert("output-schema", "structured-output");
    m.insert("steps", "step-by-step");
    m.insert("step_by_step", "step-by-step");
    m.insert("self-consistent", "self-consistency");
    m.insert("self_consistency", "self-consistency");
    m.insert("socratic", "socratic-questioning");
    m.insert("tot", "tree-of-thought");
    m.insert("tree_of_thought", "tree-of-thought");
    m
});

/// A primary strategy plus up to two secondaries chosen together for a task
/// type.
#[derive(Debug, Clone, Copy)]
pub struct StrategyCombo {
    pub primary: Strategy,
    pub secondary: [Option<Strategy>; 2],
}

impl StrategyCombo {
    pub fn secondaries(&self) -> Vec<Strategy> {
        self.secondary.iter().filter_map(|s| *s).collect()
    }

    pub fn first_secondary(&self) -> Option<Strategy> {
        self.secondary[0]
    }
}

/// Canonical task-type key (lower-cased) to its natural strategy combo.
pub fn combo_for_task_type(task_type: &str) -> Option<StrategyCombo> {
    TASK_TYPE_COMBOS.get(task_type.to_lowercase().as_str()).copied()
}

static TASK_TYPE_COMBOS: Lazy<HashMap<&'static str, StrategyCombo>> = Lazy::new(|| {
    use Strategy::*;
    let mut m = HashMap::new();
    m.insert(
        "coding",
        StrategyCombo { primary: StructuredOutput, secondary: [Some(ConstraintInjection), Some(StepByStep)] },
    );
    m.insert(
        "writing",
        StrategyCombo { primary: PersonaAssignment, secondary: [Some(FewShotScaffolding), Some(ConstraintInjection)] },
    );
    m.insert(
        "reasoning",
        StrategyCombo { primary: ChainOfThought, secondary: [Some(TreeOfThought), Some(SelfConsistency)] },
    );
    m.insert(
        "analysis",
        StrategyCombo { primary: ChainOfThought, secondary: [Some(StructuredOutput), Some(StepByStep)] },
    );
    m.insert(
        "math",
        StrategyCombo { primary: ChainOfThought, secondary: [Some(SelfConsistency), Some(StepByStep)] },
    );
    m.insert(
        "creative",
        StrategyCombo { primary: PersonaAssignment, secondary: [Some(FewShotScaffolding), None] },
    );
    m.insert(
        "conversation",
        StrategyCombo { primary: SocraticQuestioning, secondary: [Some(PersonaAssignment), None] },
    );
    m.insert(
        "summarization",
        StrategyCombo { primary: StructuredOutput, secondary: [Some(ConstraintInjection), None] },
    );
    m.insert(
        "classification",
        StrategyCombo { primary: StructuredOutput, secondary: [Some(FewShotScaffolding), None] },
    );
    m.insert(
        "planning",
        StrategyCombo { primary: Risen, secondary: [Some(StepByStep), Some(StructuredOutput)] },
    );
    m
});

/// Fallback combo for task types absent from the table.
pub fn default_combo() -> StrategyCombo {
    StrategyCombo {
        primary: Strategy::StructuredOutput,
        secondary: [Some(Strategy::StepByStep), None],
    }
}

/// Task types exempt from the P2 specificity-weakness override because their
/// natural strategy already addresses ambiguity in its own way.
pub fn p2_exempt(strategy: Strategy) -> bool {
    matches!(
        strategy,
        Strategy::ChainOfThought
            | Strategy::PersonaAssignment
            | Strategy::FewShotScaffolding
            | Strategy::Risen
    )
}

/// Word-boundary, case-insensitive patterns indicating a specificity
/// weakness in the analyzer's `weaknesses` list.
pub static SPECIFICITY_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"\bvague\b",
        r"\bunclear\b",
        r"\blacks specific\b",
        r"\bnot specific\b",
        r"\bambiguous\b",
        r"\blacks detail\b",
        r"\btoo broad\b",
        r"\blacks context\b",
    ]
    .iter()
    .map(|p| Regex::new(&format!("(?i){p}")).expect("valid specificity pattern"))
    .collect()
});

pub fn count_specificity_weaknesses(weaknesses: &[String]) -> usize {
    weaknesses
        .iter()
        .filter(|w| SPECIFICITY_PATTERNS.iter().any(|re| re.is_match(w)))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_alias_rewrites_legacy_names() {
        assert_eq!(Strategy::normalize_alias("CoT"), "chain-of-thought");
        assert_eq!(Strategy::normalize_alias(" Few-Shot "), "few-shot-scaffolding");
        assert_eq!(Strategy::normalize_alias("chain-of-thought"), "chain-of-thought");
    }

    #[test]
    fn parse_rejects_unknown_strategy() {
        assert!(Strategy::parse("quantum-prompting").is_none());
        assert_eq!(Strategy::parse("cot"), Some(Strategy::ChainOfThought));
    }

    #[test]
    fn redundancy_pattern_matches_word_boundary() {
        let strengths = vec!["Already includes examples for clarity".to_string()];
        assert!(Strategy::FewShotScaffolding.matches_any_strength(&strengths));
        assert!(!Strategy::ChainOfThought.matches_any_strength(&strengths));
    }

    #[test]
    fn specificity_weakness_count() {
        let weaknesses = vec![
            "Prompt is vague about inputs".to_string(),
            "Lacks specific output format".to_string(),
            "Good otherwise".to_string(),
        ];
        assert_eq!(count_specificity_weaknesses(&weaknesses), 2);
    }

    #[test]
    fn coding_combo_is_not_p2_exempt() {
        let combo = combo_for_task_type("coding").unwrap();
        assert!(!p2_exempt(combo.primary));
    }
}
