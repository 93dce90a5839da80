use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use promptforge_pipeline::PipelineEvent;

/// Maps an ordinary (non-terminal) [`PipelineEvent`] to the `(event name,
/// payload)` pair written onto the SSE stream. `Complete` and `Error` are
/// deliberately NOT handled here: the producer task special-cases them so it
/// can fold the pipeline's internal result shape into the public
/// `OptimizationResponse`/error envelope before emitting.
pub fn frame_for_event(event: &PipelineEvent) -> Option<(&'static str, Value)> {
    match event {
        PipelineEvent::StageStart { stage, label, message } => {
            Some(("stage", json!({ "stage": stage, "label": label, "message": message, "status": "started" })))
        }
        PipelineEvent::StepProgress { stage, message, progress } => {
            Some(("step_progress", json!({ "stage": stage, "message": message, "progress": progress })))
        }
        PipelineEvent::StageResult { stage, sse_event_type, payload, step_duration_ms } => {
            let name: &'static str = match sse_event_type.as_str() {
                "analysis" => "analysis",
                "strategy" => "strategy",
                "optimization" => "optimization",
                "validation" => "validation",
                _ => "stage",
            };
            let mut body = payload.clone();
            if let Value::Object(map) = &mut body {
                map.insert("stage".to_string(), json!(stage));
                map.insert("step_duration_ms".to_string(), json!(step_duration_ms));
            }
            Some((name, body))
        }
        PipelineEvent::Iteration { iteration, max_iterations } => {
            Some(("iteration", json!({ "iteration": iteration, "max_iterations": max_iterations })))
        }
        PipelineEvent::Complete { .. } | PipelineEvent::Error { .. } => None,
    }
}

/// Cancels the wrapped token when dropped, firing when the `async-stream`
/// generator holding it is dropped — which happens when the client
/// disconnects from a live `POST /optimize` SSE response body. Passive
/// `GET /optimize/{id}` reconnection viewers never hold one of these, so
/// they cannot cancel a run just by disconnecting.
pub struct CancelOnDrop(pub CancellationToken);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}
