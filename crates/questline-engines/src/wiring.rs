//! Bus subscription helpers shared by the engines.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use futures::FutureExt;
use questline_bus::{EventBus, HandlerResult, Subscription};
use questline_types::{EventKind, WorldEvent};

/// Subscribe `handler` to `kind`, holding `target` only weakly.
///
/// Engines own clones of the bus, so a strong reference from the bus back
/// to an engine would keep both alive forever. Once `target` is dropped the
/// handler becomes a no-op.
pub(crate) fn subscribe<T, F, Fut>(
    bus: &EventBus,
    kind: EventKind,
    target: &Arc<T>,
    handler: F,
) -> Subscription
where
    T: Send + Sync + 'static,
    F: Fn(Arc<T>, Arc<WorldEvent>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    let weak = Arc::downgrade(target);
    bus.on(kind, move |event| {
        let pending = weak.upgrade().map(|target| handler(target, event));
        async move {
            match pending {
                Some(future) => future.await,
                None => Ok(()),
            }
        }
        .boxed()
    })
}

/// Subscriptions owned by one engine, released together on stop.
#[derive(Debug, Default)]
pub(crate) struct Subscriptions(Mutex<Vec<Subscription>>);

impl Subscriptions {
    pub(crate) fn push(&self, subscription: Subscription) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(subscription);
    }

    /// Unsubscribe everything. Returns how many handlers were removed.
    pub(crate) fn release(&self) -> usize {
        let drained: Vec<Subscription> = self
            .0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        drained
            .into_iter()
            .map(Subscription::unsubscribe)
            .filter(|removed| *removed)
            .count()
    }
}
