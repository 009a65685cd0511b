//! Timed rotation of excess sources through the rotating slots

use futures_util::future::join_all;
use shared::{camera_info, camera_warn, SourceDescriptor};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::core::rotation::{RotationSchedule, SlotSwap};
use crate::services::registry::SupervisorRegistry;
use crate::types::{Placement, PlacementTable, UnitPlan};

pub type LayoutSender = Arc<watch::Sender<Arc<PlacementTable>>>;

pub struct RotationScheduler {
    registry: Arc<SupervisorRegistry>,
    schedule: RotationSchedule,
    descriptors: HashMap<String, SourceDescriptor>,
    layout: LayoutSender,
    interval: Duration,
}

impl RotationScheduler {
    pub fn new(
        registry: Arc<SupervisorRegistry>,
        schedule: RotationSchedule,
        descriptors: impl IntoIterator<Item = SourceDescriptor>,
        layout: LayoutSender,
        interval: Duration,
    ) -> Self {
        Self {
            registry,
            schedule,
            descriptors: descriptors.into_iter().map(|d| (d.name.clone(), d)).collect(),
            layout,
            interval,
        }
    }

    pub fn schedule(&self) -> &RotationSchedule {
        &self.schedule
    }

    /// Advance one step. Every outgoing unit is fully stopped before any
    /// incoming unit starts, so no slot ever has two workers.
    pub async fn rotate_once(&mut self) -> Vec<SlotSwap> {
        let swaps = self.schedule.advance();
        if swaps.is_empty() {
            return swaps;
        }

        let stops = swaps.iter().map(|swap| self.registry.stop(&swap.outgoing));
        for (swap, outcome) in swaps.iter().zip(join_all(stops).await) {
            debug!(camera = %swap.outgoing, slot = swap.slot, outcome = ?outcome, "Rotated out");
        }

        let mut table = (**self.layout.borrow()).clone();
        for swap in &swaps {
            let Some(rect) = table.occupant(swap.slot).map(|p| p.rect) else {
                camera_warn!(swap.incoming, "⚠️ Slot {} missing from layout, skipping", swap.slot);
                continue;
            };
            let Some(descriptor) = self.descriptors.get(&swap.incoming).cloned() else {
                camera_warn!(swap.incoming, "⚠️ Unknown source in rotation pool");
                continue;
            };

            table = table.with_occupant(swap.slot, &swap.incoming);
            let placement = Placement {
                source: swap.incoming.clone(),
                rect,
                slot: swap.slot,
            };
            self.registry.start(UnitPlan::source(descriptor, placement)).await;
            camera_info!(swap.incoming, "🔁 Rotated into slot {} (replacing {})", swap.slot, swap.outgoing);
        }

        self.layout.send_replace(Arc::new(table));
        swaps
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            slots = self.schedule.rotating_slots().len(),
            pool = self.schedule.pool().len(),
            "🔁 Rotation every {:?}",
            self.interval
        );

        let start = tokio::time::Instant::now() + self.interval;
        let mut ticker = tokio::time::interval_at(start, self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.rotate_once().await;
                }
            }
        }
        debug!("Rotation scheduler stopped");
    }
}
