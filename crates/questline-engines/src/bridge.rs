//! Translates raw movement and session events into store mutations.
//!
//! The bridge is the first subscriber on the bus, so by the time the
//! engines see a `PARCEL_ENTERED` the store already contains the visit.
//! First-visit detection is not the bridge's job: the movement system's
//! `is_first_visit` flag is trusted as-is.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use questline_bus::{EventBus, HandlerResult};
use questline_state::PlayerStateStore;
use questline_types::{
    AreaDiscovered, DiscoveredArea, EventKind, EventPayload, ParcelCoord, WorldEvent,
};
use tracing::{debug, info};

use crate::clock::Clock;
use crate::rules::XpConfig;
use crate::wiring::{Subscriptions, subscribe};

const BRIDGED_KINDS: [EventKind; 5] = [
    EventKind::PlayerMoved,
    EventKind::ParcelEntered,
    EventKind::DistrictEntered,
    EventKind::SessionStarted,
    EventKind::SessionEnded,
];

/// Keeps the [`PlayerStateStore`] in sync with upstream events.
#[derive(Debug)]
pub struct EventStateBridge {
    store: Arc<PlayerStateStore>,
    bus: EventBus,
    rules: Arc<XpConfig>,
    clock: Arc<dyn Clock>,
    running: AtomicBool,
    subscriptions: Subscriptions,
}

impl EventStateBridge {
    /// Create a stopped bridge. `rules` supplies the `xp_hint` carried by
    /// `AREA_DISCOVERED`.
    pub fn new(
        store: Arc<PlayerStateStore>,
        bus: EventBus,
        rules: Arc<XpConfig>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            bus,
            rules,
            clock,
            running: AtomicBool::new(false),
            subscriptions: Subscriptions::default(),
        }
    }

    /// Whether the bridge is subscribed.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Subscribe to the bus. Starting twice is a no-op.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::AcqRel) {
            return;
        }
        for kind in BRIDGED_KINDS {
            self.subscriptions.push(subscribe(
                &self.bus,
                kind,
                self,
                |bridge, event| async move { bridge.on_event(&event).await },
            ));
        }
        info!("event state bridge started");
    }

    /// Unsubscribe from the bus.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::AcqRel) {
            self.subscriptions.release();
            info!("event state bridge stopped");
        }
    }

    async fn on_event(&self, event: &WorldEvent) -> HandlerResult {
        let now = self.clock.now();
        match &event.payload {
            EventPayload::PlayerMoved(moved) => {
                self.store.update_position(moved.position, now);
            }
            EventPayload::ParcelEntered(entered) => {
                let coord = ParcelCoord::new(entered.x, entered.z);
                let visit = self.store.enter_parcel(coord, now);
                debug!(
                    x = coord.x,
                    z = coord.z,
                    visit_count = visit.visit_count,
                    "parcel entered"
                );
                if entered.is_first_visit {
                    self.discover(
                        event,
                        DiscoveredArea::Parcel { x: coord.x, z: coord.z },
                        now,
                    )
                    .await;
                }
            }
            EventPayload::DistrictEntered(entered) => {
                let visit = self.store.enter_district(
                    &entered.district_id,
                    entered.district_name.as_deref(),
                    now,
                );
                debug!(
                    district_id = %visit.district_id,
                    visit_count = visit.visit_count,
                    "district entered"
                );
                if entered.is_first_visit {
                    self.discover(
                        event,
                        DiscoveredArea::District {
                            id: entered.district_id.clone(),
                        },
                        now,
                    )
                    .await;
                }
            }
            EventPayload::SessionStarted(started) => {
                let wallet = event
                    .wallet_address
                    .clone()
                    .or_else(|| self.store.wallet())
                    .ok_or_else(|| {
                        anyhow!("session {} started without a wallet", started.session_id)
                    })?;
                self.store.start_session(started.session_id, wallet, now);
            }
            EventPayload::SessionEnded(ended) => {
                if let Some(session) = self.store.end_session(now) {
                    debug!(
                        session_id = %session.session_id,
                        reason = ?ended.reason,
                        "session closed in store"
                    );
                }
            }
            _ => {}
        }
        Ok(())
    }

    async fn discover(
        &self,
        source: &WorldEvent,
        area: DiscoveredArea,
        now: DateTime<Utc>,
    ) {
        let xp_hint = self.rules.first_visit_amount(&area);
        let wallet = source.wallet_address.clone().or_else(|| self.store.wallet());
        let session_id = source
            .session_id
            .or_else(|| self.store.active_session().map(|s| s.session_id));
        self.bus
            .emit(
                WorldEvent::new(
                    EventPayload::AreaDiscovered(AreaDiscovered { area, xp_hint }),
                    now,
                )
                .with_wallet(wallet)
                .with_session(session_id),
            )
            .await;
    }
}
