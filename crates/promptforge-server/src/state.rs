use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use promptforge_core::{ContextResolver, EventBus, OptimizationStore, PipelineConfig, ProjectStore, PromptStore};
use promptforge_pipeline::PipelineOrchestrator;
use promptforge_providers::ProviderRegistry;

/// An SSE frame queued onto a run's channel: the monotonic `seq` is the
/// value serialized as the `id:` field, enabling `Last-Event-ID`
/// reconnection.
#[derive(Debug, Clone)]
pub struct SseFrame {
    pub seq: u64,
    pub event: String,
    pub data: Value,
}

/// How many frames of history a single run retains for reconnecting clients.
/// The spec requires at least 100; this keeps comfortable headroom above
/// that floor for runs with many `step_progress` events.
pub const RUN_HISTORY_CAPACITY: usize = 256;

/// Per-run broadcast channel plus a bounded replay buffer, grounded on the
/// teacher's `sse_stream` (`tandem-server/src/http.rs`) but extended with
/// named event types and history replay, which the teacher's data-only
/// relay events don't need.
pub struct RunChannel {
    pub tx: broadcast::Sender<SseFrame>,
    pub history: RwLock<VecDeque<SseFrame>>,
    pub next_seq: std::sync::atomic::AtomicU64,
}

impl RunChannel {
    pub fn new() -> Arc<Self> {
        let (tx, _rx) = broadcast::channel(RUN_HISTORY_CAPACITY);
        Arc::new(Self { tx, history: RwLock::new(VecDeque::with_capacity(RUN_HISTORY_CAPACITY)), next_seq: std::sync::atomic::AtomicU64::new(1) })
    }

    /// Assigns the next sequence number, records the frame in the bounded
    /// history ring, and broadcasts it to any live subscribers. Broadcast
    /// send errors (no receivers) are expected and ignored.
    pub async fn push(&self, event: impl Into<String>, data: Value) -> SseFrame {
        let seq = self.next_seq.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let frame = SseFrame { seq, event: event.into(), data };
        {
            let mut history = self.history.write().await;
            if history.len() >= RUN_HISTORY_CAPACITY {
                history.pop_front();
            }
            history.push_back(frame.clone());
        }
        let _ = self.tx.send(frame.clone());
        frame
    }
}

/// Shared server state, grounded on the teacher's flat `AppState`
/// (`tandem-server/src/lib.rs`) of `Arc`-wrapped registries, scoped down to
/// what the optimization HTTP surface actually touches.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<PipelineOrchestrator>,
    pub providers: Arc<ProviderRegistry>,
    pub event_bus: Arc<EventBus>,
    pub optimizations: OptimizationStore,
    pub projects: ProjectStore,
    pub prompts: PromptStore,
    pub context_resolver: Arc<ContextResolver>,
    pub config: PipelineConfig,
    pub webhook_secret: Arc<RwLock<String>>,
    pub run_channels: Arc<RwLock<HashMap<Uuid, Arc<RunChannel>>>>,
    pub cancellations: Arc<RwLock<HashMap<Uuid, CancellationToken>>>,
}

impl AppState {
    pub fn new(providers: Arc<ProviderRegistry>, config: PipelineConfig, webhook_secret: String) -> Self {
        Self {
            orchestrator: Arc::new(PipelineOrchestrator::new()),
            providers,
            event_bus: Arc::new(EventBus::new()),
            optimizations: OptimizationStore::new(),
            projects: ProjectStore::new(),
            prompts: PromptStore::new(),
            context_resolver: Arc::new(ContextResolver::new()),
            config,
            webhook_secret: Arc::new(RwLock::new(webhook_secret)),
            run_channels: Arc::new(RwLock::new(HashMap::new())),
            cancellations: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn register_run(&self, id: Uuid, cancel: CancellationToken) -> Arc<RunChannel> {
        let channel = RunChannel::new();
        self.run_channels.write().await.insert(id, channel.clone());
        self.cancellations.write().await.insert(id, cancel);
        channel
    }

    pub async fn finish_run(&self, id: Uuid) {
        self.run_channels.write().await.remove(&id);
        self.cancellations.write().await.remove(&id);
    }
}
