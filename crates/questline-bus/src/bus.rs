//! Typed publish/subscribe bus.
//!
//! Handlers subscribe to an [`EventKind`] and receive every emitted event of
//! that kind. [`EventBus::emit`] invokes them in subscription order and
//! awaits each one before starting the next, so a single emit is
//! deterministic. Separate emits are not atomic with respect to each other:
//! a handler that awaits may let another emit run in between.
//!
//! A handler that returns an error or panics is logged and skipped; the
//! remaining handlers still run and the caller never sees the failure.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use futures::FutureExt;
use futures::future::BoxFuture;
use questline_types::{EventKind, WorldEvent};
use tracing::{debug, error, warn};

use crate::analytics::{AnalyticsQueue, FlushOutcome};

/// Result type returned by handlers.
pub type HandlerResult = anyhow::Result<()>;

/// Future returned by handlers.
pub type HandlerFuture = BoxFuture<'static, HandlerResult>;

/// A type-erased handler.
type Handler = Arc<dyn Fn(Arc<WorldEvent>) -> HandlerFuture + Send + Sync>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Registration {
    id: u64,
    handler: Handler,
    once: bool,
}

struct BusInner {
    handlers: Mutex<HashMap<EventKind, Vec<Registration>>>,
    next_id: AtomicU64,
    analytics: Arc<AnalyticsQueue>,
}

/// Outcome of delivering one event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Handlers that completed successfully.
    pub delivered: usize,
    /// Handlers that returned an error or panicked.
    pub failed: usize,
}

/// Cheaply cloneable handle onto a shared bus.
///
/// Every engine receives a clone at construction; there is no global bus.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Create a bus that appends every emitted event to `analytics`.
    pub fn new(analytics: Arc<AnalyticsQueue>) -> Self {
        Self {
            inner: Arc::new(BusInner {
                handlers: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                analytics,
            }),
        }
    }

    /// Create a bus with analytics export disabled.
    pub fn without_analytics() -> Self {
        Self::new(Arc::new(AnalyticsQueue::disabled()))
    }

    /// Subscribe `handler` to every event of `kind`.
    ///
    /// The returned [`Subscription`] removes the handler when
    /// [`Subscription::unsubscribe`] is called; dropping it does not.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(Arc<WorldEvent>) -> HandlerFuture + Send + Sync + 'static,
    {
        self.register(kind, Arc::new(handler), false)
    }

    /// Subscribe `handler` to the next event of `kind` only.
    ///
    /// The handler is removed before it runs, so it is gone whether or not
    /// it succeeds.
    pub fn once<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(Arc<WorldEvent>) -> HandlerFuture + Send + Sync + 'static,
    {
        self.register(kind, Arc::new(handler), true)
    }

    fn register(&self, kind: EventKind, handler: Handler, once: bool) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.inner.handlers)
            .entry(kind)
            .or_default()
            .push(Registration { id, handler, once });
        debug!(kind = %kind, id, once, "handler subscribed");
        Subscription {
            id,
            kind,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Remove every handler for `kind`.
    pub fn off(&self, kind: EventKind) {
        lock(&self.inner.handlers).remove(&kind);
    }

    /// Number of handlers currently subscribed to `kind`.
    pub fn handler_count(&self, kind: EventKind) -> usize {
        lock(&self.inner.handlers).get(&kind).map_or(0, Vec::len)
    }

    /// Publish an event.
    ///
    /// The event is queued for analytics, then every handler subscribed to
    /// its kind at the moment of the call runs in subscription order. Handler
    /// failures are logged and counted in the returned report.
    pub async fn emit(&self, event: WorldEvent) -> DeliveryReport {
        let kind = event.kind();
        let event = Arc::new(event);
        self.inner.analytics.enqueue(Arc::clone(&event));

        let targets: Vec<Handler> = {
            let mut handlers = lock(&self.inner.handlers);
            match handlers.get_mut(&kind) {
                Some(list) => {
                    let targets = list.iter().map(|r| Arc::clone(&r.handler)).collect();
                    list.retain(|r| !r.once);
                    targets
                }
                None => Vec::new(),
            }
        };

        let mut report = DeliveryReport::default();
        for handler in targets {
            let outcome = match std::panic::catch_unwind(AssertUnwindSafe(|| {
                handler(Arc::clone(&event))
            })) {
                Ok(future) => AssertUnwindSafe(future).catch_unwind().await,
                Err(panic) => Err(panic),
            };
            match outcome {
                Ok(Ok(())) => {
                    report.delivered = report.delivered.saturating_add(1);
                }
                Ok(Err(e)) => {
                    warn!(kind = %kind, event_id = %event.id, error = %e, "event handler failed");
                    report.failed = report.failed.saturating_add(1);
                }
                Err(_) => {
                    error!(kind = %kind, event_id = %event.id, "event handler panicked");
                    report.failed = report.failed.saturating_add(1);
                }
            }
        }
        report
    }

    /// The analytics queue every emitted event is appended to.
    pub fn analytics(&self) -> &Arc<AnalyticsQueue> {
        &self.inner.analytics
    }

    /// Flush buffered analytics now, waiting out a timer flush that is
    /// already in flight.
    pub async fn flush_analytics(&self) -> FlushOutcome {
        self.inner.analytics.flush_pending().await
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::without_analytics()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handlers: usize = lock(&self.inner.handlers).values().map(Vec::len).sum();
        f.debug_struct("EventBus")
            .field("handlers", &handlers)
            .field("analytics_queued", &self.inner.analytics.len())
            .finish()
    }
}

/// Handle returned by [`EventBus::on`] and [`EventBus::once`].
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    kind: EventKind,
    bus: Weak<BusInner>,
}

impl Subscription {
    /// The kind this subscription listens to.
    pub const fn kind(&self) -> EventKind {
        self.kind
    }

    /// Remove the handler. Returns `false` if it was already gone (a `once`
    /// handler that fired, a cleared kind, or a dropped bus).
    pub fn unsubscribe(self) -> bool {
        let Some(inner) = self.bus.upgrade() else {
            return false;
        };
        let mut handlers = lock(&inner.handlers);
        let Some(list) = handlers.get_mut(&self.kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|r| r.id != self.id);
        let removed = list.len() < before;
        if list.is_empty() {
            handlers.remove(&self.kind);
        }
        removed
    }
}

impl std::fmt::Debug for BusInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusInner").finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic, clippy::arithmetic_side_effects)]
mod tests {
    use chrono::Utc;
    use questline_types::{EventPayload, GameplayTick};

    use super::*;
    use crate::analytics::{AnalyticsSink, MemorySink};

    type Log = Arc<Mutex<Vec<&'static str>>>;

    fn event(payload: EventPayload) -> WorldEvent {
        WorldEvent::new(payload, Utc::now())
    }

    fn explode() -> HandlerResult {
        panic!("handler exploded while running")
    }

    fn recorder(
        log: &Log,
        label: &'static str,
    ) -> impl Fn(Arc<WorldEvent>) -> HandlerFuture + Send + Sync + 'static {
        let log = Arc::clone(log);
        move |_event| {
            let log = Arc::clone(&log);
            async move {
                lock(&log).push(label);
                Ok(())
            }
            .boxed()
        }
    }

    #[tokio::test]
    async fn handlers_run_in_subscription_order() {
        let bus = EventBus::default();
        let log: Log = Arc::default();
        bus.on(EventKind::WorldLoaded, recorder(&log, "first"));
        bus.on(EventKind::WorldLoaded, recorder(&log, "second"));
        bus.on(EventKind::GameplayStarted, recorder(&log, "other"));

        let report = bus.emit(event(EventPayload::WorldLoaded)).await;
        assert_eq!(report.delivered, 2);
        assert_eq!(*lock(&log), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn interleaved_emits_keep_per_emit_order() {
        let bus = EventBus::default();
        let log: Arc<Mutex<Vec<(u64, &'static str)>>> = Arc::default();
        let labels = ["a", "b", "c"];
        for label in labels {
            let log = Arc::clone(&log);
            bus.on(EventKind::GameplayTick, move |event| {
                let log = Arc::clone(&log);
                async move {
                    let n = match &event.payload {
                        EventPayload::GameplayTick(t) => t.elapsed_ms,
                        _ => u64::MAX,
                    };
                    // Give the other in-flight emits a chance to run.
                    for _ in 0..n % 3 {
                        tokio::task::yield_now().await;
                    }
                    lock(&log).push((n, label));
                    Ok(())
                }
                .boxed()
            });
        }

        for round in 0..5_u64 {
            let emits = (0..20_u64).map(|i| {
                bus.emit(event(EventPayload::GameplayTick(GameplayTick {
                    elapsed_ms: round * 100 + i,
                })))
            });
            let reports = futures::future::join_all(emits).await;
            assert!(reports.iter().all(|r| r.delivered == 3 && r.failed == 0));
        }

        let log = lock(&log).clone();
        assert_eq!(log.len(), 5 * 20 * 3);
        for round in 0..5_u64 {
            for i in 0..20_u64 {
                let n = round * 100 + i;
                let order: Vec<&str> = log
                    .iter()
                    .filter(|(seen, _)| *seen == n)
                    .map(|(_, label)| *label)
                    .collect();
                assert_eq!(order, labels, "emit {n}");
            }
        }
    }

    #[tokio::test]
    async fn failing_handler_does_not_stop_delivery() {
        let bus = EventBus::default();
        let log: Log = Arc::default();
        bus.on(EventKind::WorldLoaded, |_e| {
            async { Err::<(), _>(anyhow::anyhow!("boom")) }.boxed()
        });
        bus.on(EventKind::WorldLoaded, |_e| -> HandlerFuture {
            panic!("handler exploded before returning a future")
        });
        bus.on(EventKind::WorldLoaded, |_e| {
            async { explode() }.boxed()
        });
        bus.on(EventKind::WorldLoaded, recorder(&log, "survivor"));

        let report = bus.emit(event(EventPayload::WorldLoaded)).await;
        assert_eq!(report.failed, 3);
        assert_eq!(report.delivered, 1);
        assert_eq!(*lock(&log), vec!["survivor"]);
    }

    #[tokio::test]
    async fn once_handlers_are_removed_even_on_failure() {
        let bus = EventBus::default();
        let calls = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&calls);
        bus.once(EventKind::WorldLoaded, move |_e| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(anyhow::anyhow!("first call fails")) }.boxed()
        });

        bus.emit(event(EventPayload::WorldLoaded)).await;
        bus.emit(event(EventPayload::WorldLoaded)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(bus.handler_count(EventKind::WorldLoaded), 0);
    }

    #[tokio::test]
    async fn unsubscribe_and_off_remove_handlers() {
        let bus = EventBus::default();
        let log: Log = Arc::default();
        let sub = bus.on(EventKind::WorldLoaded, recorder(&log, "a"));
        bus.on(EventKind::WorldLoaded, recorder(&log, "b"));

        assert!(sub.unsubscribe());
        bus.emit(event(EventPayload::WorldLoaded)).await;
        assert_eq!(*lock(&log), vec!["b"]);

        bus.off(EventKind::WorldLoaded);
        bus.emit(event(EventPayload::WorldLoaded)).await;
        assert_eq!(*lock(&log), vec!["b"]);
        assert_eq!(bus.handler_count(EventKind::WorldLoaded), 0);
    }

    #[tokio::test]
    async fn handlers_may_emit_reentrantly() {
        let bus = EventBus::default();
        let log: Log = Arc::default();
        let inner_bus = bus.clone();
        bus.on(EventKind::WorldLoaded, move |_e| {
            let bus = inner_bus.clone();
            async move {
                bus.emit(WorldEvent::new(EventPayload::GameplayStarted, Utc::now()))
                    .await;
                Ok(())
            }
            .boxed()
        });
        bus.on(EventKind::GameplayStarted, recorder(&log, "nested"));

        bus.emit(event(EventPayload::WorldLoaded)).await;
        assert_eq!(*lock(&log), vec!["nested"]);
    }

    #[tokio::test]
    async fn every_emit_is_queued_for_analytics() {
        let sink = MemorySink::new();
        let queue = Arc::new(AnalyticsQueue::new(
            AnalyticsSink::Memory(sink.clone()),
            100,
            std::time::Duration::from_secs(5),
        ));
        let bus = EventBus::new(queue);

        bus.emit(event(EventPayload::WorldLoaded)).await;
        bus.emit(event(EventPayload::GameplayStarted)).await;
        assert_eq!(bus.analytics().len(), 2);

        assert_eq!(bus.flush_analytics().await, FlushOutcome::Sent(2));
        assert_eq!(sink.event_count(), 2);
    }
}
