//! Batched analytics export.
//!
//! Every event emitted on the bus is appended to an [`AnalyticsQueue`]. A
//! timer drains the queue every few seconds and ships the batch to an
//! [`AnalyticsSink`] as `{ "events": [...] }`. When the sink fails the batch
//! goes back to the front of the queue; the queue never grows beyond
//! `max_queue` entries, dropping the oldest first. None of this is ever fatal
//! to gameplay.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use questline_types::WorldEvent;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::AnalyticsError;

/// Default batch window.
const DEFAULT_FLUSH_INTERVAL_MS: u64 = 5_000;

/// Default queue bound.
const DEFAULT_MAX_QUEUE: usize = 1_000;

/// Lock a mutex, recovering the data if a previous holder panicked.
///
/// Every critical section here is a single queue operation, so a poisoned
/// lock still guards consistent data.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Analytics export settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AnalyticsConfig {
    /// Master switch; when `false` nothing is queued.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// POST target. Without one the queue is disabled.
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Milliseconds between flushes.
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,

    /// Maximum number of buffered events.
    #[serde(default = "default_max_queue")]
    pub max_queue: usize,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            endpoint: None,
            flush_interval_ms: default_flush_interval_ms(),
            max_queue: default_max_queue(),
        }
    }
}

impl AnalyticsConfig {
    /// Override the endpoint from `QUESTLINE_ANALYTICS_URL`, if set.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("QUESTLINE_ANALYTICS_URL") {
            if !url.is_empty() {
                self.endpoint = Some(url);
            }
        }
    }
}

const fn default_enabled() -> bool {
    true
}

const fn default_flush_interval_ms() -> u64 {
    DEFAULT_FLUSH_INTERVAL_MS
}

const fn default_max_queue() -> usize {
    DEFAULT_MAX_QUEUE
}

// ---------------------------------------------------------------------------
// Sinks
// ---------------------------------------------------------------------------

/// Where analytics batches go.
///
/// Enum dispatch rather than a trait object, since the `send` method is
/// async.
#[derive(Debug)]
pub enum AnalyticsSink {
    /// POST to an HTTP endpoint.
    Http(HttpSink),
    /// Keep batches in memory (replays, tests).
    Memory(MemorySink),
    /// Drop everything without queueing.
    Disabled,
}

impl AnalyticsSink {
    /// Ship one batch.
    ///
    /// # Errors
    ///
    /// Returns [`AnalyticsError`] if the batch was not accepted; the caller
    /// requeues it.
    pub async fn send(&self, batch: &[Arc<WorldEvent>]) -> Result<(), AnalyticsError> {
        match self {
            Self::Http(sink) => sink.send(batch).await,
            Self::Memory(sink) => sink.send(batch),
            Self::Disabled => Ok(()),
        }
    }

    /// Human-readable name for logging.
    pub const fn name(&self) -> &str {
        match self {
            Self::Http(_) => "http",
            Self::Memory(_) => "memory",
            Self::Disabled => "disabled",
        }
    }

    const fn is_disabled(&self) -> bool {
        matches!(self, Self::Disabled)
    }
}

/// Request body of an analytics POST.
#[derive(Serialize)]
struct BatchBody<'a> {
    events: Vec<&'a WorldEvent>,
}

/// Sink that POSTs `{ "events": [...] }` to a configured endpoint.
#[derive(Debug, Clone)]
pub struct HttpSink {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpSink {
    /// Create a sink for the given endpoint URL.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }

    /// The configured endpoint.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn send(&self, batch: &[Arc<WorldEvent>]) -> Result<(), AnalyticsError> {
        let body = BatchBody {
            events: batch.iter().map(AsRef::as_ref).collect(),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unable to read error body".to_owned());
            return Err(AnalyticsError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

/// Sink that records batches in memory.
///
/// Cloning yields another handle onto the same recording, so a caller can
/// keep one clone for inspection after handing the other to the queue.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    batches: Arc<Mutex<Vec<Vec<WorldEvent>>>>,
    failing: Arc<AtomicBool>,
}

impl MemorySink {
    /// Create an empty recording sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent sends fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Release);
    }

    /// All batches accepted so far.
    pub fn batches(&self) -> Vec<Vec<WorldEvent>> {
        lock(&self.batches).clone()
    }

    /// Total number of events accepted so far.
    pub fn event_count(&self) -> usize {
        lock(&self.batches).iter().map(Vec::len).sum()
    }

    fn send(&self, batch: &[Arc<WorldEvent>]) -> Result<(), AnalyticsError> {
        if self.failing.load(Ordering::Acquire) {
            return Err(AnalyticsError::Unavailable);
        }
        let owned = batch.iter().map(|e| WorldEvent::clone(e)).collect();
        lock(&self.batches).push(owned);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

/// What a single flush did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was buffered.
    Empty,
    /// Another flush is still in flight.
    InFlight,
    /// The batch of this many events was accepted.
    Sent(usize),
    /// The sink failed; this many events went back on the queue.
    Requeued(usize),
}

/// Bounded buffer of events awaiting export.
#[derive(Debug)]
pub struct AnalyticsQueue {
    sink: AnalyticsSink,
    queue: Mutex<VecDeque<Arc<WorldEvent>>>,
    max_queue: usize,
    flush_interval: Duration,
    flushing: AtomicBool,
    flush_done: Notify,
    dropped: AtomicU64,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl AnalyticsQueue {
    /// Create a queue over an explicit sink.
    pub fn new(sink: AnalyticsSink, max_queue: usize, flush_interval: Duration) -> Self {
        Self {
            sink,
            queue: Mutex::new(VecDeque::new()),
            max_queue: max_queue.max(1),
            flush_interval,
            flushing: AtomicBool::new(false),
            flush_done: Notify::new(),
            dropped: AtomicU64::new(0),
            timer: Mutex::new(None),
        }
    }

    /// Build a queue from configuration. A disabled config or a missing
    /// endpoint yields a queue that ignores every event.
    pub fn from_config(config: &AnalyticsConfig) -> Self {
        let sink = match (&config.endpoint, config.enabled) {
            (Some(endpoint), true) => AnalyticsSink::Http(HttpSink::new(endpoint.clone())),
            _ => AnalyticsSink::Disabled,
        };
        info!(sink = sink.name(), max_queue = config.max_queue, "analytics queue configured");
        Self::new(
            sink,
            config.max_queue,
            Duration::from_millis(config.flush_interval_ms),
        )
    }

    /// A queue that ignores every event.
    pub fn disabled() -> Self {
        Self::new(
            AnalyticsSink::Disabled,
            DEFAULT_MAX_QUEUE,
            Duration::from_millis(DEFAULT_FLUSH_INTERVAL_MS),
        )
    }

    /// Append an event, evicting the oldest entries beyond the bound.
    pub fn enqueue(&self, event: Arc<WorldEvent>) {
        if self.sink.is_disabled() {
            return;
        }
        let mut queue = lock(&self.queue);
        queue.push_back(event);
        self.enforce_bound(&mut queue);
    }

    /// Number of buffered events.
    pub fn len(&self) -> usize {
        lock(&self.queue).len()
    }

    /// Whether nothing is buffered.
    pub fn is_empty(&self) -> bool {
        lock(&self.queue).is_empty()
    }

    /// Events evicted because the bound was exceeded.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// The sink batches are shipped to.
    pub const fn sink(&self) -> &AnalyticsSink {
        &self.sink
    }

    /// Drain the queue and ship it as one batch.
    ///
    /// On failure the batch is put back at the front of the queue, ahead of
    /// anything enqueued while the request was in flight, and the bound is
    /// re-applied.
    pub async fn flush(&self) -> FlushOutcome {
        if self.flushing.swap(true, Ordering::AcqRel) {
            return FlushOutcome::InFlight;
        }

        let batch: Vec<Arc<WorldEvent>> = lock(&self.queue).drain(..).collect();
        if batch.is_empty() {
            self.finish_flush();
            return FlushOutcome::Empty;
        }

        let count = batch.len();
        let outcome = match self.sink.send(&batch).await {
            Ok(()) => {
                debug!(count, sink = self.sink.name(), "analytics batch sent");
                FlushOutcome::Sent(count)
            }
            Err(e) => {
                warn!(count, sink = self.sink.name(), error = %e, "analytics flush failed, requeueing");
                let mut queue = lock(&self.queue);
                for event in batch.into_iter().rev() {
                    queue.push_front(event);
                }
                self.enforce_bound(&mut queue);
                FlushOutcome::Requeued(count)
            }
        };

        self.finish_flush();
        outcome
    }

    /// Flush, first waiting out any flush already in flight.
    ///
    /// Unlike [`flush`](Self::flush) this never returns
    /// [`FlushOutcome::InFlight`]: everything enqueued before the call has
    /// been offered to the sink once it returns.
    pub async fn flush_pending(&self) -> FlushOutcome {
        loop {
            let finished = self.flush_done.notified();
            let mut finished = std::pin::pin!(finished);
            // Registered before the in-flight check so a flush finishing in
            // between still wakes us.
            finished.as_mut().enable();
            match self.flush().await {
                FlushOutcome::InFlight => {
                    debug!("analytics flush in flight, waiting");
                    finished.await;
                }
                outcome => return outcome,
            }
        }
    }

    fn finish_flush(&self) {
        self.flushing.store(false, Ordering::Release);
        self.flush_done.notify_waiters();
    }

    /// Start the periodic flush timer. Calling it twice restarts the timer.
    ///
    /// Each flush runs as its own task, so stopping the timer never cancels
    /// a request already in flight.
    pub fn start_timer(self: &Arc<Self>) {
        if self.sink.is_disabled() {
            return;
        }
        let weak = Arc::downgrade(self);
        let period = self.flush_interval;
        let handle = tokio::spawn(async move {
            let mut interval =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                interval.tick().await;
                let Some(queue) = weak.upgrade() else {
                    break;
                };
                tokio::spawn(async move {
                    queue.flush().await;
                });
            }
        });
        if let Some(previous) = lock(&self.timer).replace(handle) {
            previous.abort();
        }
    }

    /// Stop the periodic flush timer.
    pub fn stop_timer(&self) {
        if let Some(handle) = lock(&self.timer).take() {
            handle.abort();
        }
    }

    fn enforce_bound(&self, queue: &mut VecDeque<Arc<WorldEvent>>) {
        let mut evicted: u64 = 0;
        while queue.len() > self.max_queue {
            queue.pop_front();
            evicted = evicted.saturating_add(1);
        }
        if evicted > 0 {
            self.dropped.fetch_add(evicted, Ordering::Relaxed);
        }
    }
}

impl Drop for AnalyticsQueue {
    fn drop(&mut self) {
        self.stop_timer();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Utc;
    use questline_types::{EventPayload, GameplayTick};

    use super::*;

    fn tick(n: u64) -> Arc<WorldEvent> {
        Arc::new(WorldEvent::new(
            EventPayload::GameplayTick(GameplayTick { elapsed_ms: n }),
            Utc::now(),
        ))
    }

    fn elapsed(event: &WorldEvent) -> u64 {
        match &event.payload {
            EventPayload::GameplayTick(t) => t.elapsed_ms,
            _ => u64::MAX,
        }
    }

    fn memory_queue(max_queue: usize) -> (AnalyticsQueue, MemorySink) {
        let sink = MemorySink::new();
        let queue = AnalyticsQueue::new(
            AnalyticsSink::Memory(sink.clone()),
            max_queue,
            Duration::from_secs(5),
        );
        (queue, sink)
    }

    #[tokio::test]
    async fn flush_ships_events_in_order() {
        let (queue, sink) = memory_queue(10);
        for n in 0..3 {
            queue.enqueue(tick(n));
        }
        assert_eq!(queue.flush().await, FlushOutcome::Sent(3));
        assert!(queue.is_empty());

        let batches = sink.batches();
        assert_eq!(batches.len(), 1);
        let order: Vec<u64> = batches[0].iter().map(elapsed).collect();
        assert_eq!(order, vec![0, 1, 2]);

        assert_eq!(queue.flush().await, FlushOutcome::Empty);
    }

    #[tokio::test]
    async fn failed_flush_requeues_ahead_of_new_events() {
        let (queue, sink) = memory_queue(10);
        queue.enqueue(tick(1));
        queue.enqueue(tick(2));

        sink.set_failing(true);
        assert_eq!(queue.flush().await, FlushOutcome::Requeued(2));
        assert_eq!(queue.len(), 2);

        queue.enqueue(tick(3));
        sink.set_failing(false);
        assert_eq!(queue.flush().await, FlushOutcome::Sent(3));

        let order: Vec<u64> = sink.batches()[0].iter().map(elapsed).collect();
        assert_eq!(order, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn queue_is_bounded_and_drops_oldest() {
        let (queue, sink) = memory_queue(3);
        for n in 0..5 {
            queue.enqueue(tick(n));
        }
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.dropped(), 2);

        sink.set_failing(true);
        queue.flush().await;
        queue.enqueue(tick(5));
        // Requeued [2, 3, 4] plus 5 exceeds the bound; 2 is evicted.
        assert_eq!(queue.len(), 3);

        sink.set_failing(false);
        queue.flush().await;
        let order: Vec<u64> = sink.batches()[0].iter().map(elapsed).collect();
        assert_eq!(order, vec![3, 4, 5]);
    }

    #[tokio::test]
    async fn pending_flush_waits_for_the_flush_in_flight() {
        let (queue, sink) = memory_queue(10);
        let queue = Arc::new(queue);
        queue.enqueue(tick(1));

        // Another flush holds the flag but has not shipped anything yet.
        queue.flushing.store(true, Ordering::Release);
        assert_eq!(queue.flush().await, FlushOutcome::InFlight);

        let waiter = tokio::spawn({
            let queue = Arc::clone(&queue);
            async move { queue.flush_pending().await }
        });
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        queue.enqueue(tick(2));
        queue.finish_flush();

        assert_eq!(waiter.await.unwrap(), FlushOutcome::Sent(2));
        assert!(queue.is_empty());
        let order: Vec<u64> = sink.batches()[0].iter().map(elapsed).collect();
        assert_eq!(order, vec![1, 2]);
    }

    #[tokio::test]
    async fn pending_flush_without_contention_is_a_plain_flush() {
        let (queue, sink) = memory_queue(10);
        assert_eq!(queue.flush_pending().await, FlushOutcome::Empty);
        queue.enqueue(tick(7));
        assert_eq!(queue.flush_pending().await, FlushOutcome::Sent(1));
        assert_eq!(sink.event_count(), 1);
    }

    #[test]
    fn disabled_queue_ignores_events() {
        let queue = AnalyticsQueue::disabled();
        queue.enqueue(tick(0));
        assert!(queue.is_empty());
    }

    #[test]
    fn config_without_endpoint_is_disabled() {
        let queue = AnalyticsQueue::from_config(&AnalyticsConfig::default());
        assert_eq!(queue.sink().name(), "disabled");

        let config = AnalyticsConfig {
            endpoint: Some("http://127.0.0.1:9/events".to_owned()),
            ..AnalyticsConfig::default()
        };
        assert_eq!(AnalyticsQueue::from_config(&config).sink().name(), "http");
    }

    #[tokio::test(start_paused = true)]
    async fn timer_flushes_periodically() {
        let (queue, sink) = memory_queue(10);
        let queue = Arc::new(queue);
        queue.start_timer();
        queue.enqueue(tick(7));

        tokio::time::sleep(Duration::from_millis(5_100)).await;
        // Let the spawned flush task run.
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        assert_eq!(sink.event_count(), 1);
        queue.stop_timer();
    }
}
