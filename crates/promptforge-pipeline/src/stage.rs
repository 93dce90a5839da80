use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::context::PipelineContext;
use crate::error::PipelineError;

/// Static per-stage metadata: what to say while the stage runs, and which SSE
/// event type its result is framed under. Grounded on the teacher's
/// `MissionReducer` shape (a small trait plus an external driver) rather than
/// a deep inheritance hierarchy, per the dispatch-table design note.
#[derive(Debug, Clone)]
pub struct StageConfig {
    pub label: &'static str,
    pub initial_messages: &'static [&'static str],
    pub progress_messages: &'static [&'static str],
    pub progress_interval: Duration,
    pub sse_event_type: &'static str,
}

/// A single pipeline step. Implementations read their inputs from
/// [`PipelineContext`] and write their outputs back into it; the orchestrator
/// is the only caller and owns sequencing, timing, and event emission.
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;
    fn config(&self) -> StageConfig;
    async fn execute(&self, ctx: &mut PipelineContext) -> Result<Value, PipelineError>;
}
