use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::{broadcast, RwLock};
use tracing::warn;
use uuid::Uuid;

use promptforge_types::{EngineEvent, SSE_RELAY_CHANNEL};

use crate::contracts::ContractRegistry;

pub type HandlerFuture = Pin<Box<dyn Future<Output = anyhow::Result<Value>> + Send>>;
pub type Handler = Arc<dyn Fn(Value, String) -> HandlerFuture + Send + Sync>;

const RELAY_CAPACITY: usize = 2048;

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("no handler registered for event type '{0}'")]
    NoHandler(String),
    #[error("handler for '{0}' did not reply within the timeout")]
    Timeout(String),
}

#[derive(Debug, Clone)]
pub struct SubscriptionInfo {
    pub subscription_id: String,
    pub event_type: String,
    pub app_id: Option<String>,
}

struct Subscription {
    subscription_id: String,
    app_id: Option<String>,
    handler: Handler,
}

/// In-process typed publish/subscribe and request/reply fabric. Fan-out for
/// plain subscribers is backed by a `tokio::sync::broadcast` channel
/// (grounded on the teacher's `EventBus` in `tandem-core/src/event_bus.rs`),
/// generalized here with a contract-validated `publish`, a handler table for
/// `subscribe`/`request`, and a reserved relay channel for SSE fan-out.
#[derive(Clone)]
pub struct EventBus {
    relay_tx: broadcast::Sender<EngineEvent>,
    subscriptions: Arc<RwLock<HashMap<String, Vec<Subscription>>>>,
    contracts: Arc<Option<Arc<ContractRegistry>>>,
    subscription_seq: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new() -> Self {
        let (relay_tx, _) = broadcast::channel(RELAY_CAPACITY);
        Self {
            relay_tx,
            subscriptions: Arc::new(RwLock::new(HashMap::new())),
            contracts: Arc::new(None),
            subscription_seq: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn with_contracts(contracts: Arc<ContractRegistry>) -> Self {
        let mut bus = Self::new();
        bus.contracts = Arc::new(Some(contracts));
        bus
    }

    /// SSE (or any other external) consumers subscribe to the raw broadcast
    /// stream directly rather than through the handler table.
    pub fn subscribe_relay(&self) -> broadcast::Receiver<EngineEvent> {
        self.relay_tx.subscribe()
    }

    pub async fn publish(&self, event_type: impl Into<String>, data: Value, source_app: impl Into<String>) {
        let event_type = event_type.into();
        let source_app = source_app.into();

        if let Some(registry) = self.contracts.as_ref() {
            if !registry.validate(&event_type, &data) {
                warn!(event_type = %event_type, "publish dropped: payload failed contract validation");
                return;
            }
        }

        let event = EngineEvent::with_source(event_type.clone(), data.clone(), source_app.clone());
        self.dispatch_to_subscribers(&event_type, data.clone(), source_app.clone());
        self.relay(event);
    }

    fn dispatch_to_subscribers(&self, event_type: &str, data: Value, source_app: String) {
        let subscriptions = self.subscriptions.clone();
        let event_type = event_type.to_string();
        tokio::spawn(async move {
            let handlers: Vec<Handler> = {
                let guard = subscriptions.read().await;
                guard
                    .get(&event_type)
                    .map(|subs| subs.iter().map(|s| s.handler.clone()).collect())
                    .unwrap_or_default()
            };
            for handler in handlers {
                let data = data.clone();
                let source_app = source_app.clone();
                let event_type = event_type.clone();
                tokio::spawn(async move {
                    if let Err(err) = handler(data, source_app).await {
                        warn!(event_type = %event_type, error = %err, "subscriber handler failed");
                    }
                });
            }
        });
    }

    /// Re-publishes `event` to the reserved relay channel. Relaying the
    /// relay channel itself must not recurse.
    fn relay(&self, event: EngineEvent) {
        if event.is_relay() {
            return;
        }
        let wrapped = json!({
            "event_type": event.event_type,
            "source_app": event.source_app,
        });
        let mut payload = wrapped;
        if let (Some(obj), Some(data_obj)) = (payload.as_object_mut(), event.payload.as_object()) {
            for (k, v) in data_obj {
                obj.insert(k.clone(), v.clone());
            }
        }
        let relay_event = EngineEvent::with_source(SSE_RELAY_CHANNEL, payload, event.source_app.clone());
        let _ = self.relay_tx.send(relay_event);
        let _ = self.relay_tx.send(event);
    }

    pub async fn subscribe(
        &self,
        event_type: impl Into<String>,
        handler: Handler,
        app_id: Option<String>,
    ) -> String {
        let event_type = event_type.into();
        let subscription_id = format!(
            "sub-{}-{}",
            self.subscription_seq.fetch_add(1, Ordering::SeqCst),
            Uuid::new_v4()
        );
        let mut subscriptions = self.subscriptions.write().await;
        subscriptions.entry(event_type).or_default().push(Subscription {
            subscription_id: subscription_id.clone(),
            app_id,
            handler,
        });
        subscription_id
    }

    pub async fn unsubscribe(&self, subscription_id: &str) -> bool {
        let mut subscriptions = self.subscriptions.write().await;
        let mut removed = false;
        for subs in subscriptions.values_mut() {
            let before = subs.len();
            subs.retain(|s| s.subscription_id != subscription_id);
            removed |= subs.len() != before;
        }
        removed
    }

    pub async fn list_subscriptions(&self) -> Vec<SubscriptionInfo> {
        let subscriptions = self.subscriptions.read().await;
        let mut out = Vec::new();
        for (event_type, subs) in subscriptions.iter() {
            for sub in subs {
                out.push(SubscriptionInfo {
                    subscription_id: sub.subscription_id.clone(),
                    event_type: event_type.clone(),
                    app_id: sub.app_id.clone(),
                });
            }
        }
        out
    }

    /// Invokes the first registered handler for `event_type` and awaits its
    /// reply with a timeout. Non-object returns are wrapped as
    /// `{"result": value}`.
    pub async fn request(
        &self,
        event_type: &str,
        data: Value,
        source_app: impl Into<String>,
        timeout: Duration,
    ) -> Result<Value, BusError> {
        let handler = {
            let subscriptions = self.subscriptions.read().await;
            subscriptions
                .get(event_type)
                .and_then(|subs| subs.first())
                .map(|s| s.handler.clone())
        };
        let Some(handler) = handler else {
            return Err(BusError::NoHandler(event_type.to_string()));
        };

        let source_app = source_app.into();
        let fut = handler(data, source_app);
        match tokio::time::timeout(timeout, fut).await {
            Ok(Ok(value)) => Ok(wrap_non_object(value)),
            Ok(Err(_)) => Err(BusError::NoHandler(event_type.to_string())),
            Err(_) => Err(BusError::Timeout(event_type.to_string())),
        }
    }
}

fn wrap_non_object(value: Value) -> Value {
    if value.is_object() {
        value
    } else {
        json!({"result": value})
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering as AOrdering};
    use std::sync::Arc as StdArc;

    fn handler_from(f: impl Fn(Value, String) -> HandlerFuture + Send + Sync + 'static) -> Handler {
        Arc::new(f)
    }

    #[tokio::test]
    async fn publish_delivers_to_subscribers() {
        let bus = EventBus::new();
        let received = StdArc::new(AtomicBool::new(false));
        let received_clone = received.clone();
        bus.subscribe(
            "test:event",
            handler_from(move |_data, _source| {
                let received_clone = received_clone.clone();
                Box::pin(async move {
                    received_clone.store(true, AOrdering::SeqCst);
                    Ok(Value::Null)
                })
            }),
            None,
        )
        .await;

        bus.publish("test:event", json!({"a": 1}), "promptforge").await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(received.load(AOrdering::SeqCst));
    }

    #[tokio::test]
    async fn contract_violation_drops_publish_silently() {
        let registry = Arc::new(ContractRegistry::new());
        registry.register(crate::contracts::EventContract::new(
            "test:typed",
            "promptforge",
            json!({"type": "object", "required": ["name"]}),
        ));
        let bus = EventBus::with_contracts(registry);
        let mut relay = bus.subscribe_relay();
        bus.publish("test:typed", json!({}), "promptforge").await;
        let result = tokio::time::timeout(Duration::from_millis(50), relay.recv()).await;
        assert!(result.is_err(), "no event should have been relayed");
    }

    #[tokio::test]
    async fn relay_never_recurses_on_relay_channel() {
        let bus = EventBus::new();
        let mut relay = bus.subscribe_relay();
        bus.publish("normal:event", json!({"x": 1}), "promptforge").await;
        let first = relay.recv().await.unwrap();
        let second = relay.recv().await.unwrap();
        assert!(first.event_type == SSE_RELAY_CHANNEL || second.event_type == SSE_RELAY_CHANNEL);
        let result = tokio::time::timeout(Duration::from_millis(30), relay.recv()).await;
        assert!(result.is_err(), "only two events expected, no recursive relay");
    }

    #[tokio::test]
    async fn request_wraps_non_object_return() {
        let bus = EventBus::new();
        bus.subscribe(
            "test:request",
            handler_from(|_data, _source| Box::pin(async { Ok(json!(42)) })),
            None,
        )
        .await;
        let reply = bus
            .request("test:request", json!({}), "caller", Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(reply, json!({"result": 42}));
    }

    #[tokio::test]
    async fn request_without_handler_errors() {
        let bus = EventBus::new();
        let err = bus
            .request("nope", json!({}), "caller", Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::NoHandler(_)));
    }

    #[tokio::test]
    async fn request_times_out_when_handler_hangs() {
        let bus = EventBus::new();
        bus.subscribe(
            "test:slow",
            handler_from(|_data, _source| {
                Box::pin(async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(Value::Null)
                })
            }),
            None,
        )
        .await;
        let err = bus
            .request("test:slow", json!({}), "caller", Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::Timeout(_)));
    }

    #[tokio::test]
    async fn unsubscribe_removes_handler() {
        let bus = EventBus::new();
        let id = bus
            .subscribe("test:event", handler_from(|_, _| Box::pin(async { Ok(Value::Null) })), None)
            .await;
        assert!(bus.unsubscribe(&id).await);
        assert!(bus.list_subscriptions().await.is_empty());
    }
}
