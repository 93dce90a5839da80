use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

impl Complexity {
    pub fn parse(raw: &str) -> Complexity {
        match raw.trim().to_lowercase().as_str() {
            "high" => Complexity::High,
            "low" => Complexity::Low,
            _ => Complexity::Medium,
        }
    }
}

/// Produced by the Analyzer stage: classification of the raw prompt's task
/// type and complexity, plus enumerated weaknesses/strengths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub task_type: String,
    pub complexity: Complexity,
    #[serde(default)]
    pub weaknesses: Vec<String>,
    #[serde(default)]
    pub strengths: Vec<String>,
}

impl AnalysisResult {
    pub fn new(task_type: impl Into<String>, complexity: Complexity) -> Self {
        Self {
            task_type: task_type.into().to_lowercase(),
            complexity,
            weaknesses: Vec::new(),
            strengths: Vec::new(),
        }
    }

    pub fn task_type_key(&self) -> String {
        self.task_type.to_lowercase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complexity_parse_defaults_to_medium() {
        assert_eq!(Complexity::parse("HIGH"), Complexity::High);
        assert_eq!(Complexity::parse("nonsense"), Complexity::Medium);
    }

    #[test]
    fn task_type_is_lower_cased() {
        let analysis = AnalysisResult::new("Reasoning", Complexity::High);
        assert_eq!(analysis.task_type, "reasoning");
    }
}
