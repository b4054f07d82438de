//! C3: typed event bus with per-event-kind handler chains dispatched
//! into named worker pools, with error isolation.

mod event;
mod pool;

pub use event::{Event, EventKind, PoolId};
pub use pool::WorkerPool;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{error, warn};

/// A handler registered against one event kind.
///
/// Returns zero or more follow-up events; a single-value return is a
/// degenerate one-element case. Errors are caught by the bus at the
/// call site — handlers that want bus-visible failure should log and
/// return no follow-up events rather than panic.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn handle(&self, event: Event) -> Vec<Event>;
}

/// Blanket impl so a plain async closure can be registered directly.
#[async_trait]
impl<F, Fut> Handler for F
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Vec<Event>> + Send + 'static,
{
    async fn handle(&self, event: Event) -> Vec<Event> {
        (self)(event).await
    }
}

struct Registration {
    handler: Arc<dyn Handler>,
    pool: Option<PoolId>,
}

/// Bus construction parameters. Defaults match spec.md §4.3 exactly.
#[derive(Debug, Clone, Copy)]
pub struct BusConfig {
    pub pool1_size: usize,
    pub pool2_size: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            pool1_size: 5,
            pool2_size: 3,
        }
    }
}

/// The event bus: a single unbounded ingress queue drained serially by a
/// dedicated dispatcher, fanning out to per-kind handler chains.
pub struct EventBus {
    ingress_tx: mpsc::UnboundedSender<Event>,
    handlers: RwLock<HashMap<EventKind, Vec<Registration>>>,
    pool1: Arc<WorkerPool>,
    pool2: Arc<WorkerPool>,
    dispatcher: parking_lot::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl EventBus {
    /// Construct the bus and start its dispatcher task immediately.
    pub fn new(config: BusConfig) -> Arc<Self> {
        let (ingress_tx, ingress_rx) = mpsc::unbounded_channel();
        let bus = Arc::new(Self {
            ingress_tx,
            handlers: RwLock::new(HashMap::new()),
            pool1: Arc::new(WorkerPool::new(PoolId::Pool1, config.pool1_size)),
            pool2: Arc::new(WorkerPool::new(PoolId::Pool2, config.pool2_size)),
            dispatcher: parking_lot::Mutex::new(None),
        });
        let dispatcher_bus = bus.clone();
        let handle = tokio::spawn(async move { dispatcher_bus.run_dispatcher(ingress_rx).await });
        *bus.dispatcher.lock() = Some(handle);
        bus
    }

    /// Register a handler against an event kind, inline on the
    /// dispatcher thread (no pool tag).
    pub fn on(&self, kind: EventKind, handler: impl Handler) {
        self.register(kind, Arc::new(handler), None);
    }

    /// Register a handler against an event kind, to be submitted to the
    /// named pool rather than run inline.
    pub fn on_pooled(&self, kind: EventKind, pool: PoolId, handler: impl Handler) {
        self.register(kind, Arc::new(handler), Some(pool));
    }

    fn register(&self, kind: EventKind, handler: Arc<dyn Handler>, pool: Option<PoolId>) {
        self.handlers
            .write()
            .entry(kind)
            .or_default()
            .push(Registration { handler, pool });
    }

    /// Publish an event. Non-blocking: enqueues on the ingress queue.
    pub fn publish(&self, event: Event) {
        if self.ingress_tx.send(event).is_err() {
            warn!("event bus ingress queue closed, event dropped");
        }
    }

    fn pool_for(&self, id: PoolId) -> Arc<WorkerPool> {
        match id {
            PoolId::Pool1 => self.pool1.clone(),
            PoolId::Pool2 => self.pool2.clone(),
        }
    }

    async fn run_dispatcher(self: Arc<Self>, mut ingress_rx: mpsc::UnboundedReceiver<Event>) {
        while let Some(event) = ingress_rx.recv().await {
            self.dispatch_one(event).await;
        }
    }

    async fn dispatch_one(self: &Arc<Self>, event: Event) {
        let kind = event.kind();
        let registrations: Vec<(Arc<dyn Handler>, Option<PoolId>)> = {
            let handlers = self.handlers.read();
            match handlers.get(&kind) {
                Some(regs) => regs
                    .iter()
                    .map(|r| (r.handler.clone(), r.pool))
                    .collect(),
                None => Vec::new(),
            }
        };

        for (handler, pool_tag) in registrations {
            match pool_tag {
                None => {
                    // Inline on the dispatcher thread; a handler panic
                    // is isolated via catch_unwind so sibling handlers
                    // and the dispatcher itself are unaffected.
                    let event = event.clone();
                    let bus = self.clone();
                    let outcome = std::panic::AssertUnwindSafe(handler.handle(event))
                        .catch_unwind()
                        .await;
                    match outcome {
                        Ok(follow_ups) => {
                            for follow_up in follow_ups {
                                bus.publish(follow_up);
                            }
                        }
                        Err(_) => {
                            error!(%kind, "inline handler panicked; isolated");
                        }
                    }
                }
                Some(pool_id) => {
                    let pool = self.pool_for(pool_id);
                    let bus = self.clone();
                    let event = event.clone();
                    pool.submit(move || async move {
                        let outcome = std::panic::AssertUnwindSafe(handler.handle(event))
                            .catch_unwind()
                            .await;
                        match outcome {
                            Ok(follow_ups) => {
                                for follow_up in follow_ups {
                                    bus.publish(follow_up);
                                }
                            }
                            Err(_) => {
                                error!(pool = ?pool_id, "pooled handler panicked; isolated");
                            }
                        }
                    })
                    .await;
                }
            }
        }
    }

    /// Drain in-flight handlers with a bounded wait, then close pools.
    pub async fn shutdown(&self, timeout: Duration) {
        self.pool1.shutdown(timeout).await;
        self.pool2.shutdown(timeout).await;
        if let Some(handle) = self.dispatcher.lock().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration as StdDuration;

    #[tokio::test]
    async fn handlers_run_in_registration_order() {
        let bus = EventBus::new(BusConfig::default());
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let o1 = order.clone();
        bus.on(EventKind::PreDownload, move |_e: Event| {
            let o1 = o1.clone();
            async move {
                o1.lock().push(1);
                vec![]
            }
        });
        let o2 = order.clone();
        bus.on(EventKind::PreDownload, move |_e: Event| {
            let o2 = o2.clone();
            async move {
                o2.lock().push(2);
                vec![]
            }
        });

        bus.publish(Event::PreDownload {
            streamer_key: "alice".into(),
            url: "u".into(),
        });

        tokio::time::sleep(StdDuration::from_millis(30)).await;
        assert_eq!(*order.lock(), vec![1, 2]);
    }

    #[tokio::test]
    async fn follow_up_events_are_republished() {
        let bus = EventBus::new(BusConfig::default());
        let downloads_seen = Arc::new(AtomicUsize::new(0));

        bus.on(EventKind::PreDownload, |e: Event| async move {
            match e {
                Event::PreDownload { streamer_key, url } => {
                    vec![Event::Download { streamer_key, url }]
                }
                _ => vec![],
            }
        });

        let seen = downloads_seen.clone();
        bus.on(EventKind::Download, move |_e: Event| {
            let seen = seen.clone();
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                vec![]
            }
        });

        bus.publish(Event::PreDownload {
            streamer_key: "alice".into(),
            url: "u".into(),
        });

        tokio::time::sleep(StdDuration::from_millis(30)).await;
        assert_eq!(downloads_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn panicking_handler_does_not_affect_siblings() {
        let bus = EventBus::new(BusConfig::default());
        let sibling_ran = Arc::new(AtomicUsize::new(0));

        bus.on(EventKind::Upload, |_e: Event| async move {
            panic!("boom");
        });

        let sibling = sibling_ran.clone();
        bus.on(EventKind::Upload, move |_e: Event| {
            let sibling = sibling.clone();
            async move {
                sibling.fetch_add(1, Ordering::SeqCst);
                vec![]
            }
        });

        bus.publish(Event::Upload(crate::domain::StreamInfo {
            streamer_key: "alice".into(),
            url: "u".into(),
            title: String::new(),
            start_time: chrono::Utc::now(),
            end_time: chrono::Utc::now(),
            cover_path: None,
            is_download_mode: false,
            recording_id: 1,
        }));

        tokio::time::sleep(StdDuration::from_millis(30)).await;
        assert_eq!(sibling_ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn pooled_handler_runs() {
        let bus = EventBus::new(BusConfig::default());
        let ran = Arc::new(AtomicUsize::new(0));
        let r = ran.clone();
        bus.on_pooled(EventKind::Upload, PoolId::Pool2, move |_e: Event| {
            let r = r.clone();
            async move {
                r.fetch_add(1, Ordering::SeqCst);
                vec![]
            }
        });

        bus.publish(Event::Upload(crate::domain::StreamInfo {
            streamer_key: "alice".into(),
            url: "u".into(),
            title: String::new(),
            start_time: chrono::Utc::now(),
            end_time: chrono::Utc::now(),
            cover_path: None,
            is_download_mode: false,
            recording_id: 1,
        }));

        tokio::time::sleep(StdDuration::from_millis(50)).await;
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }
}
