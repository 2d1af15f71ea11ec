//! Partial-update routing between the transport boundary and the trackers.
//!
//! The reconciler owns both trackers (handed their dependencies at
//! construction, no ambient lookup) and keeps no per-tile state of its own:
//! it classifies each incoming field bag once, forwards the pieces, decides
//! whether the renderer needs a refresh for fields neither tracker owns, and
//! re-broadcasts a single unified `TileChanged` after both trackers have
//! finished, so observers never see a half-applied update.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::clock::SharedClock;
use crate::config::GrowthConfig;
use crate::coord::TileCoord;
use crate::events::{EngineEvent, EventSender};
use crate::growth::{CropUpdate, GrowthTracker};
use crate::protocol::{self, CropAction};
use crate::rent::RentTracker;

pub struct TileReconciler {
    rent: RentTracker,
    growth: GrowthTracker,
    events: EventSender,
}

impl TileReconciler {
    pub fn new(clock: SharedClock, growth_config: GrowthConfig, events: EventSender) -> Self {
        Self {
            rent: RentTracker::new(clock.clone(), events.clone()),
            growth: GrowthTracker::new(clock, events.clone(), growth_config),
            events,
        }
    }

    /// Fan the authority's full snapshot into both trackers. Each tracker
    /// applies its batch atomically and broadcasts once.
    pub fn apply_initial_snapshot(&mut self, tiles: &HashMap<String, Value>) {
        let (rent_entries, crop_entries) = protocol::parse_snapshot(tiles);
        info!(
            tiles = tiles.len(),
            leases = rent_entries.len(),
            crops = crop_entries.len(),
            "applying initial snapshot"
        );
        self.rent.load(rent_entries);
        self.growth.load(crop_entries);
    }

    /// Route one partial update message.
    pub fn apply_update(&mut self, coord: TileCoord, fields: Value) {
        let classified = protocol::classify(&fields);

        let rent_touched = classified.rent.is_some();
        if let Some(due_at) = classified.rent {
            self.rent.add_or_update(coord, due_at);
        }

        let crop_touched = match classified.crop {
            Some(CropAction::Remove) => {
                self.growth.remove(coord);
                true
            }
            Some(CropAction::Replant {
                crop_type,
                level,
                planted_at,
            }) => self.growth.update_from_authority(
                coord,
                CropUpdate::Replant {
                    crop_type,
                    level,
                    planted_at,
                },
            ),
            Some(CropAction::Nudge { planted_at }) => self
                .growth
                .update_from_authority(coord, CropUpdate::Nudge { planted_at }),
            Some(CropAction::Unrecognized) => {
                warn!(%coord, "unrecognized crop update shape, ignoring");
                false
            }
            None => false,
        };

        // A crop that reached its final stage must not stay silently "ready"
        // just because an unrelated rent update got here first.
        if rent_touched && !crop_touched {
            self.growth.renotify_if_final(coord);
        }

        // Rent- and crop-driven changes already imply their own visual paths;
        // only a terrain change neither tracker accounted for needs an
        // explicit refresh.
        let needs_visual_refresh = classified.terrain_touched && !crop_touched && !rent_touched;
        if needs_visual_refresh {
            debug!(%coord, "terrain change needs visual refresh");
        }

        let _ = self.events.send(EngineEvent::TileChanged {
            coord,
            fields: Arc::new(fields),
            needs_visual_refresh,
        });
    }

    /// Earliest pending wake-up across both trackers.
    pub fn next_deadline(&mut self) -> Option<DateTime<Utc>> {
        match (self.rent.next_deadline(), self.growth.next_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Drive every due timer on both trackers.
    pub fn fire_due(&mut self, now: DateTime<Utc>) {
        self.rent.fire_due(now);
        self.growth.fire_due(now);
    }

    /// Cancels everything and emits one final empty snapshot per tracker.
    pub fn shutdown(&mut self) {
        self.rent.shutdown();
        self.growth.shutdown();
    }

    pub fn rent(&self) -> &RentTracker {
        &self.rent
    }

    pub fn growth(&self) -> &GrowthTracker {
        &self.growth
    }

    pub fn events(&self) -> &EventSender {
        &self.events
    }
}
