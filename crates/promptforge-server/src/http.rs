use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use async_stream::stream;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use promptforge_pipeline::{PipelineEvent, PipelineRunOptions, SingleStageInput};
use promptforge_types::{coerce_codebase_context, Optimization, OptimizationStatus, Strategy};

use crate::sse::{frame_for_event, CancelOnDrop};
use crate::state::{AppState, SseFrame};
use crate::wire::{
    apply_pipeline_result, cache_control_for, score_deltas, BatchRequest, BatchResponse, BatchResultItem,
    ErrorEnvelope, McpEventRequest, OptimizationResponse, OptimizeRequest, OrchestrateRequest, RetryRequest,
};

const MAX_BATCH_SIZE: usize = 20;

pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let app = app_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn app_router(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/optimize", post(start_optimize))
        .route("/optimize/batch", post(optimize_batch))
        .route("/optimize/{id}", get(get_optimize))
        .route("/optimize/{id}/retry", post(retry_optimize))
        .route("/optimize/{id}/cancel", post(cancel_optimize))
        .route("/orchestrate/{stage}", post(orchestrate_stage))
        .route("/internal/mcp-event", post(mcp_event))
        .layer(cors)
        .with_state(state)
}

fn error_response(status: StatusCode, detail: impl Into<String>) -> Response {
    (status, Json(ErrorEnvelope::new(detail))).into_response()
}

async fn resolve_provider(
    state: &AppState,
    requested: Option<&str>,
) -> Result<std::sync::Arc<dyn promptforge_providers::Provider>, Response> {
    state
        .providers
        .select(requested)
        .await
        .map_err(|err| error_response(StatusCode::BAD_REQUEST, err.to_string()))
}

fn parse_strategy_fields(
    strategy: &Option<String>,
    secondary_frameworks: &[String],
) -> Result<(Option<Strategy>, Vec<Strategy>), Response> {
    let primary = match strategy {
        Some(raw) => Some(
            Strategy::parse(raw)
                .ok_or_else(|| error_response(StatusCode::BAD_REQUEST, format!("unknown strategy '{raw}'")))?,
        ),
        None => None,
    };
    let mut secondary = Vec::new();
    for raw in secondary_frameworks {
        let parsed = Strategy::parse(raw)
            .ok_or_else(|| error_response(StatusCode::BAD_REQUEST, format!("unknown strategy '{raw}'")))?;
        secondary.push(parsed);
    }
    Ok((primary, secondary))
}

/// `POST /optimize`: synchronously records an [`Optimization`] (and, when a
/// `project` is given with no explicit `prompt_id`, idempotently links a
/// [`Prompt`](promptforge_types::Prompt)), then streams the run's progress as
/// named SSE events. Dropping the response body (client disconnect) cancels
/// the run via the `CancelOnDrop` guard carried inside the stream.
async fn start_optimize(State(state): State<AppState>, Json(req): Json<OptimizeRequest>) -> Response {
    let (strategy_override, secondary_override) = match parse_strategy_fields(&req.strategy, &req.secondary_frameworks) {
        Ok(pair) => pair,
        Err(resp) => return resp,
    };
    let provider = match resolve_provider(&state, req.provider.as_deref()).await {
        Ok(p) => p,
        Err(resp) => return resp,
    };

    let mut optimization = Optimization::new(req.prompt.clone());
    optimization.project_id = req.project;
    optimization.title = req.title.clone();
    optimization.tags = req.tags.clone();

    if let Some(project_id) = req.project {
        let prompt_id = match req.prompt_id {
            Some(id) => id,
            None => state.prompts.ensure_in_project(project_id, req.prompt.clone()).await.id,
        };
        optimization.prompt_id = Some(prompt_id);
    } else if let Some(prompt_id) = req.prompt_id {
        optimization.prompt_id = Some(prompt_id);
    }

    let project = match req.project {
        Some(id) => state.projects.get(id).await,
        None => None,
    };
    let codebase_context = state.context_resolver.resolve(None, project.as_ref(), req.codebase_context.as_ref());
    optimization.codebase_context = req.codebase_context.clone();

    let run_id = optimization.id;
    state.optimizations.insert(optimization.clone()).await;
    state
        .event_bus
        .publish("promptforge:optimization.started", json!({ "id": run_id, "raw_prompt": req.prompt }), "promptforge-server")
        .await;

    let cancel = CancellationToken::new();
    let channel = state.register_run(run_id, cancel.clone()).await;

    let mut options = PipelineRunOptions { strategy_override, secondary_frameworks_override: secondary_override, codebase_context: Some(codebase_context), ..Default::default() };
    if let Some(max_iterations) = req.max_iterations {
        options.max_iterations = max_iterations;
    } else {
        options.max_iterations = state.config.max_iterations;
    }
    options.score_threshold = req.score_threshold.unwrap_or(state.config.score_threshold);

    let orchestrator = state.orchestrator.clone();
    let raw_prompt = req.prompt.clone();
    let run_state = state.clone();
    let producer_channel = channel.clone();
    tokio::spawn(async move {
        drive_run(run_state, run_id, orchestrator, raw_prompt, provider, options, cancel, producer_channel, None).await;
    });

    sse_response(state, run_id, channel, true).await
}

/// Drives a pipeline run to completion, writing every produced frame onto
/// the run's channel and folding the terminal `Complete`/`Error` event into
/// the persisted [`Optimization`] record.
#[allow(clippy::too_many_arguments)]
async fn drive_run(
    state: AppState,
    run_id: Uuid,
    orchestrator: std::sync::Arc<promptforge_pipeline::PipelineOrchestrator>,
    raw_prompt: String,
    provider: std::sync::Arc<dyn promptforge_providers::Provider>,
    options: PipelineRunOptions,
    cancel: CancellationToken,
    channel: std::sync::Arc<crate::state::RunChannel>,
    retry_of: Option<Optimization>,
) {
    let mut stream = Box::pin(orchestrator.run_streaming(raw_prompt, provider, options, cancel));
    while let Some(event) = stream.next().await {
        match event {
            PipelineEvent::Complete { data } => {
                let result: Result<promptforge_pipeline::PipelineResult, _> = serde_json::from_value(data);
                if let Some(mut optimization) = state.optimizations.get(run_id).await {
                    match result {
                        Ok(result) => {
                            apply_pipeline_result(&mut optimization, &result);
                            optimization.status = OptimizationStatus::Completed;
                            optimization.completed_at = Some(chrono::Utc::now());
                            state.optimizations.update(optimization.clone()).await;
                            state
                                .event_bus
                                .publish("promptforge:optimization.completed", json!({ "id": run_id }), "promptforge-server")
                                .await;
                            let mut response = OptimizationResponse::from(&optimization);
                            if let Some(original) = &retry_of {
                                response = response.with_score_deltas(score_deltas(original, &optimization));
                            }
                            let payload = serde_json::to_value(&response).unwrap_or(Value::Null);
                            channel.push("complete", payload).await;
                        }
                        Err(err) => {
                            optimization.status = OptimizationStatus::Error;
                            optimization.error = Some(format!("failed to persist result: {err}"));
                            state.optimizations.update(optimization).await;
                            channel
                                .push(
                                    "error",
                                    json!({ "status": "error", "error": "Failed to save result", "persisted": false, "id": run_id }),
                                )
                                .await;
                        }
                    }
                }
            }
            PipelineEvent::Error { error, error_type, retry_after } => {
                if let Some(mut optimization) = state.optimizations.get(run_id).await {
                    optimization.status = OptimizationStatus::Error;
                    optimization.error = Some(error.clone());
                    state.optimizations.update(optimization).await;
                }
                let mut payload = json!({ "status": "error", "error": error });
                if let Some(error_type) = error_type {
                    payload["error_type"] = json!(error_type);
                }
                if let Some(retry_after) = retry_after {
                    payload["retry_after"] = json!(retry_after);
                }
                channel.push("error", payload).await;
            }
            other => {
                if let Some((name, payload)) = frame_for_event(&other) {
                    channel.push(name, payload).await;
                }
            }
        }
    }
    state.finish_run(run_id).await;
}

/// `GET /optimize/{id}`: reconnects to a live run's SSE stream (replaying
/// history after `Last-Event-ID` when given) while it is still running,
/// otherwise serves the persisted [`OptimizationResponse`] as plain JSON.
async fn get_optimize(State(state): State<AppState>, Path(id): Path<Uuid>, headers: HeaderMap) -> Response {
    let Some(optimization) = state.optimizations.get(id).await else {
        return error_response(StatusCode::NOT_FOUND, "optimization not found");
    };

    if optimization.status == OptimizationStatus::Running {
        let channel = state.run_channels.read().await.get(&id).cloned();
        if let Some(channel) = channel {
            let last_event_id = headers
                .get("last-event-id")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            return build_sse(state, id, channel, false, last_event_id).await;
        }
    }

    let response = OptimizationResponse::from(&optimization);
    let mut headers = HeaderMap::new();
    headers.insert("cache-control", cache_control_for(optimization.status).parse().unwrap());
    (headers, Json(response)).into_response()
}

/// `POST /optimize/{id}/retry`: starts a brand new run seeded from the
/// original prompt (optionally overriding strategy/context), recording
/// `retry_of` and surfacing `score_deltas` against the original on
/// completion.
async fn retry_optimize(State(state): State<AppState>, Path(id): Path<Uuid>, Json(req): Json<RetryRequest>) -> Response {
    let Some(original) = state.optimizations.get(id).await else {
        return error_response(StatusCode::NOT_FOUND, "optimization not found");
    };
    let (strategy_override, secondary_override) = match parse_strategy_fields(&req.strategy, &req.secondary_frameworks) {
        Ok(pair) => pair,
        Err(resp) => return resp,
    };
    let provider = match resolve_provider(&state, None).await {
        Ok(p) => p,
        Err(resp) => return resp,
    };

    let project = match original.project_id {
        Some(pid) => state.projects.get(pid).await,
        None => None,
    };
    let context_override = req.codebase_context.as_ref().or(original.codebase_context.as_ref());
    let codebase_context = state.context_resolver.resolve(None, project.as_ref(), context_override);

    let mut retried = Optimization::new(original.raw_prompt.clone());
    retried.project_id = original.project_id;
    retried.prompt_id = original.prompt_id;
    retried.title = original.title.clone();
    retried.tags = original.tags.clone();
    retried.retry_of = Some(id);
    let run_id = retried.id;
    state.optimizations.insert(retried).await;

    let cancel = CancellationToken::new();
    let channel = state.register_run(run_id, cancel.clone()).await;

    let options = PipelineRunOptions {
        strategy_override,
        secondary_frameworks_override: secondary_override,
        codebase_context: Some(codebase_context),
        max_iterations: state.config.max_iterations,
        score_threshold: state.config.score_threshold,
        ..Default::default()
    };

    let orchestrator = state.orchestrator.clone();
    let raw_prompt = original.raw_prompt.clone();
    let run_state = state.clone();
    let producer_channel = channel.clone();
    tokio::spawn(async move {
        drive_run(run_state, run_id, orchestrator, raw_prompt, provider, options, cancel, producer_channel, Some(original)).await;
    });

    sse_response(state, run_id, channel, true).await
}

/// `POST /optimize/{id}/cancel`: signals the run's cancellation token.
/// Returns 409 if the optimization isn't currently running.
async fn cancel_optimize(State(state): State<AppState>, Path(id): Path<Uuid>) -> Response {
    let Some(optimization) = state.optimizations.get(id).await else {
        return error_response(StatusCode::NOT_FOUND, "optimization not found");
    };
    if optimization.status != OptimizationStatus::Running {
        return error_response(StatusCode::CONFLICT, "optimization is not running");
    }
    let Some(token) = state.cancellations.read().await.get(&id).cloned() else {
        return error_response(StatusCode::CONFLICT, "optimization is not running");
    };
    token.cancel();
    StatusCode::ACCEPTED.into_response()
}

/// `POST /optimize/batch`: runs 1–20 prompts sequentially through the
/// non-streaming orchestrator, aggregating per-item success/failure.
async fn optimize_batch(State(state): State<AppState>, Json(req): Json<BatchRequest>) -> Response {
    if req.prompts.is_empty() || req.prompts.len() > MAX_BATCH_SIZE {
        return error_response(StatusCode::BAD_REQUEST, format!("batch size must be between 1 and {MAX_BATCH_SIZE}"));
    }

    let mut results = Vec::with_capacity(req.prompts.len());
    let mut completed = 0usize;
    let mut failed = 0usize;

    for item in req.prompts {
        let (strategy_override, secondary_override) = match parse_strategy_fields(&item.strategy, &item.secondary_frameworks) {
            Ok(pair) => pair,
            Err(_) => {
                failed += 1;
                results.push(BatchResultItem { optimization: None, error: Some("unknown strategy".to_string()) });
                continue;
            }
        };
        let provider = match state.providers.select(item.provider.as_deref()).await {
            Ok(p) => p,
            Err(err) => {
                failed += 1;
                results.push(BatchResultItem { optimization: None, error: Some(err.to_string()) });
                continue;
            }
        };

        let project = match item.project {
            Some(pid) => state.projects.get(pid).await,
            None => None,
        };
        let codebase_context = state.context_resolver.resolve(None, project.as_ref(), item.codebase_context.as_ref());

        let mut optimization = Optimization::new(item.prompt.clone());
        optimization.project_id = item.project;
        optimization.codebase_context = item.codebase_context.clone();

        let options = PipelineRunOptions {
            strategy_override,
            secondary_frameworks_override: secondary_override,
            codebase_context: Some(codebase_context),
            max_iterations: state.config.max_iterations,
            score_threshold: state.config.score_threshold,
            ..Default::default()
        };

        match state.orchestrator.run(item.prompt.clone(), provider, options).await {
            Ok(result) => {
                apply_pipeline_result(&mut optimization, &result);
                optimization.status = OptimizationStatus::Completed;
                optimization.completed_at = Some(chrono::Utc::now());
                state.optimizations.insert(optimization.clone()).await;
                completed += 1;
                results.push(BatchResultItem { optimization: Some(OptimizationResponse::from(&optimization)), error: None });
            }
            Err(err) => {
                optimization.status = OptimizationStatus::Error;
                optimization.error = Some(err.cause.clone());
                state.optimizations.insert(optimization).await;
                failed += 1;
                results.push(BatchResultItem { optimization: None, error: Some(err.to_string()) });
            }
        }
    }

    Json(BatchResponse { total: results.len(), completed, failed, results }).into_response()
}

/// `POST /orchestrate/{stage}`: runs exactly one named stage against
/// caller-supplied partial context, bypassing the queue entirely.
async fn orchestrate_stage(State(state): State<AppState>, Path(stage): Path<String>, Json(req): Json<OrchestrateRequest>) -> Response {
    if !["analyze", "strategy", "optimize", "validate"].contains(&stage.as_str()) {
        return error_response(StatusCode::NOT_FOUND, format!("unknown stage '{stage}'"));
    }
    let (strategy_override, secondary_override) = match parse_strategy_fields(&req.strategy, &req.secondary_frameworks) {
        Ok(pair) => pair,
        Err(resp) => return resp,
    };
    let provider = match resolve_provider(&state, req.provider.as_deref()).await {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let codebase_context = req.codebase_context.as_ref().and_then(coerce_codebase_context);

    let input = SingleStageInput {
        current_prompt: req.current_prompt.clone(),
        codebase_context,
        analysis: req.analysis.clone(),
        selection: req.selection.clone(),
        optimization: req.optimization.clone(),
        strategy_override,
        secondary_override,
    };

    match state.orchestrator.run_single_stage(&stage, provider, req.raw_prompt.clone(), input).await {
        Ok(output) => Json(json!({
            "stage": stage,
            "payload": output.payload,
            "model_used": output.model_used,
            "token_usage": output.total_usage,
        }))
        .into_response(),
        Err(err) => error_response(StatusCode::BAD_GATEWAY, err.to_string()),
    }
}

/// `POST /internal/mcp-event`: a webhook relaying MCP tool-call lifecycle
/// events onto the bus. An empty configured secret disables auth entirely
/// (local/dev mode); otherwise a mismatched or missing `X-Webhook-Secret`
/// is rejected.
async fn mcp_event(State(state): State<AppState>, headers: HeaderMap, Json(req): Json<McpEventRequest>) -> Response {
    let configured_secret = state.webhook_secret.read().await.clone();
    if !configured_secret.is_empty() {
        let provided = headers.get("x-webhook-secret").and_then(|v| v.to_str().ok()).unwrap_or_default();
        if provided != configured_secret {
            return StatusCode::FORBIDDEN.into_response();
        }
    }

    let mut payload = Value::Object(req.extra.clone());
    if let Some(tool_name) = &req.tool_name {
        payload["tool_name"] = json!(tool_name);
    }
    if let Some(call_id) = &req.call_id {
        payload["call_id"] = json!(call_id);
    }
    state.event_bus.publish(format!("promptforge:mcp.{}", req.event_type), payload, "mcp").await;
    StatusCode::NO_CONTENT.into_response()
}

/// Builds the live or reconnecting SSE response for a run. An `is_live`
/// originator stream holds a [`CancelOnDrop`] guard so abandoning the
/// response cancels the run; passive reconnect viewers never cancel.
async fn sse_response(state: AppState, run_id: Uuid, channel: std::sync::Arc<crate::state::RunChannel>, is_live: bool) -> Response {
    build_sse(state, run_id, channel, is_live, None).await
}

async fn build_sse(
    state: AppState,
    run_id: Uuid,
    channel: std::sync::Arc<crate::state::RunChannel>,
    is_live: bool,
    last_event_id: Option<u64>,
) -> Response {
    let cancel_guard = if is_live { state.cancellations.read().await.get(&run_id).cloned() } else { None };

    let stream = stream! {
        let _guard = cancel_guard.map(CancelOnDrop);

        let rx = channel.tx.subscribe();
        let mut live = BroadcastStream::new(rx);

        let history: Vec<SseFrame> = {
            let snapshot = channel.history.read().await;
            snapshot
                .iter()
                .filter(|frame| last_event_id.map(|since| frame.seq > since).unwrap_or(true))
                .cloned()
                .collect()
        };
        let max_replayed = history.last().map(|f| f.seq).unwrap_or(last_event_id.unwrap_or(0));

        for frame in history {
            yield Ok::<_, std::convert::Infallible>(frame_to_sse_event(&frame));
        }

        while let Some(msg) = live.next().await {
            if let Ok(frame) = msg {
                if frame.seq > max_replayed {
                    yield Ok(frame_to_sse_event(&frame));
                }
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(10))).into_response()
}

fn frame_to_sse_event(frame: &SseFrame) -> Event {
    Event::default()
        .id(frame.seq.to_string())
        .event(frame.event.clone())
        .data(serde_json::to_string(&frame.data).unwrap_or_default())
}
