use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Pipeline-wide defaults, reusing the teacher's layered-JSON-merge idiom
/// (`tandem-core/src/config.rs::ConfigStore`) scoped down to the handful of
/// knobs this engine's orchestrator needs, instead of the teacher's full
/// provider/secret configuration surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f64,
    #[serde(default)]
    pub default_provider: Option<String>,
    #[serde(default = "default_progress_interval_secs")]
    pub progress_interval_secs: f64,
}

/// `max_iterations = 1` joint with `score_threshold = 1.0` means the
/// orchestrator never iterates by default in practice, even though in
/// isolation `score_threshold = 1.0` reads as "always iterate to the cap."
fn default_max_iterations() -> u32 {
    1
}

fn default_score_threshold() -> f64 {
    1.0
}

fn default_progress_interval_secs() -> f64 {
    2.0
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            score_threshold: default_score_threshold(),
            default_provider: None,
            progress_interval_secs: default_progress_interval_secs(),
        }
    }
}

impl PipelineConfig {
    /// Deep-merges a patch (typically per-request overrides) onto the
    /// defaults, the same shape as `ConfigStore::patch_runtime` layering a
    /// single patch onto a base value.
    pub fn merged_with(&self, patch: &Value) -> PipelineConfig {
        let mut base = serde_json::to_value(self).unwrap_or_else(|_| serde_json::json!({}));
        deep_merge(&mut base, patch);
        serde_json::from_value(base).unwrap_or_else(|_| self.clone())
    }
}

fn deep_merge(base: &mut Value, patch: &Value) {
    match (base, patch) {
        (Value::Object(base_map), Value::Object(patch_map)) => {
            for (key, patch_value) in patch_map {
                deep_merge(base_map.entry(key.clone()).or_insert(Value::Null), patch_value);
            }
        }
        (base_slot, patch_value) => {
            *base_slot = patch_value.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_never_iterate_in_practice() {
        let config = PipelineConfig::default();
        assert_eq!(config.max_iterations, 1);
        assert_eq!(config.score_threshold, 1.0);
    }

    #[test]
    fn patch_overrides_only_named_fields() {
        let config = PipelineConfig::default();
        let merged = config.merged_with(&json!({"max_iterations": 3}));
        assert_eq!(merged.max_iterations, 3);
        assert_eq!(merged.score_threshold, 1.0);
    }
}
