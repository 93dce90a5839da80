use std::net::SocketAddr;
use std::sync::Arc;

use promptforge_core::PipelineConfig;
use promptforge_observability::{canonical_logs_dir_from_root, emit_event, init_process_logging, ObservabilityEvent, ProcessKind};
use promptforge_providers::{ProviderRegistry, ScriptedProvider};
use promptforge_server::{serve, AppState};

fn bind_addr() -> SocketAddr {
    std::env::var("PROMPTFORGE_ADDR")
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 8787)))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let root = std::env::current_dir()?;
    let logs_dir = canonical_logs_dir_from_root(&root);
    let retention_days: u64 = std::env::var("PROMPTFORGE_LOG_RETENTION_DAYS")
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(14);
    let (_log_guard, _log_info) = init_process_logging(ProcessKind::Server, &logs_dir, retention_days)?;
    emit_event(
        tracing::Level::INFO,
        ProcessKind::Server,
        ObservabilityEvent {
            event: "logging.initialized",
            component: "server.main",
            optimization_id: None,
            stage: None,
            job_id: None,
            provider_id: None,
            model_id: None,
            status: None,
            error_code: None,
            detail: None,
        },
    );

    let providers = Arc::new(ProviderRegistry::new());
    // Real LLM backends are wired by the embedding application; this default
    // keeps the server usable standalone until one is registered.
    providers.register(Arc::new(ScriptedProvider::new("default"))).await;

    let config = PipelineConfig::default();
    let webhook_secret = std::env::var("PROMPTFORGE_WEBHOOK_SECRET").unwrap_or_default();
    let state = AppState::new(providers, config, webhook_secret);

    let addr = bind_addr();
    emit_event(
        tracing::Level::INFO,
        ProcessKind::Server,
        ObservabilityEvent {
            event: "server.listening",
            component: "server.main",
            optimization_id: None,
            stage: None,
            job_id: None,
            provider_id: None,
            model_id: None,
            status: Some(addr.to_string().as_str()),
            error_code: None,
            detail: None,
        },
    );

    serve(addr, state).await
}
