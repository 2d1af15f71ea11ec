//! Per-tile crop growth tracking.
//!
//! Stage and next-boundary time are derived from `(crop_type, level,
//! planted_at, now)` through the injected growth curves, never stored as
//! independently mutable fields, so local stage can't drift away from the
//! timestamps the authority asserts. Stage transitions chain through repeated
//! single-shot timers; each fire recomputes from the current clock instead of
//! trusting the stage captured at schedule time.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use crate::clock::SharedClock;
use crate::config::{GrowthConfig, StageCurve};
use crate::coord::TileCoord;
use crate::events::{CropEntry, CropSnapshot, EngineEvent, EventSender};
use crate::protocol::{CropLoadEntry, TimeInput};
use crate::timer::{TimerHandle, TimerRegistry};

/// Derived growth position of one crop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageInfo {
    pub stage: u32,
    pub next_stage_at: Option<DateTime<Utc>>,
}

impl StageInfo {
    pub fn is_final(&self) -> bool {
        self.next_stage_at.is_none()
    }
}

/// Pure stage computation. Monotonic in `now` for a fixed curve and
/// `planted_at`; negative elapsed time (clock skew, future-dated planting)
/// clamps to stage 0. Callable on demand, independent of any timer.
pub fn compute_stage(curve: &StageCurve, planted_at: DateTime<Utc>, now: DateTime<Utc>) -> StageInfo {
    let stage_count = i64::from(curve.stage_count.max(1));
    let stage_ms = (curve.total_growth_ms / stage_count).max(1);
    let elapsed = (now - planted_at).num_milliseconds().max(0);
    let stage = (elapsed / stage_ms).min(stage_count - 1);
    let next_stage_at = if stage + 1 >= stage_count {
        None
    } else {
        Some(planted_at + Duration::milliseconds((stage + 1) * stage_ms))
    };
    StageInfo {
        stage: stage as u32,
        next_stage_at,
    }
}

/// Authority-driven mutation of an existing or fresh crop, already resolved
/// by the transport boundary.
#[derive(Debug, Clone)]
pub enum CropUpdate {
    /// Full replace: identical to a fresh plant.
    Replant {
        crop_type: String,
        level: u32,
        planted_at: TimeInput,
    },
    /// Re-timestamp only (growth acceleration): identity is kept, derived
    /// state is recomputed from the new planted-at.
    Nudge { planted_at: TimeInput },
}

#[derive(Debug)]
struct CropState {
    crop_type: String,
    level: u32,
    planted_at: DateTime<Utc>,
    stage: u32,
    next_stage_at: Option<DateTime<Utc>>,
    timer: Option<TimerHandle>,
}

pub struct GrowthTracker {
    clock: SharedClock,
    events: EventSender,
    config: GrowthConfig,
    timers: TimerRegistry<TileCoord>,
    tiles: HashMap<TileCoord, CropState>,
}

impl GrowthTracker {
    pub fn new(clock: SharedClock, events: EventSender, config: GrowthConfig) -> Self {
        Self {
            clock,
            events,
            config,
            timers: TimerRegistry::new(),
            tiles: HashMap::new(),
        }
    }

    /// Atomic bulk replace with a single snapshot broadcast. Entries with an
    /// unparseable planted-at are logged and skipped; the rest of the batch
    /// still lands.
    pub fn load(&mut self, entries: Vec<CropLoadEntry>) {
        self.timers.cancel_all();
        self.tiles.clear();
        for entry in entries {
            let Some(planted_at) = entry.planted_at.resolve() else {
                warn!(coord = %entry.coord, "crop record has no usable planted_at, skipping");
                continue;
            };
            self.install(entry.coord, entry.crop_type, entry.level, planted_at);
        }
        self.broadcast_snapshot();
    }

    /// Install fresh crop state, compute its stage and schedule the next
    /// boundary wake-up unless it is already final.
    pub fn plant(&mut self, coord: TileCoord, crop_type: &str, planted_at: DateTime<Utc>, level: u32) {
        self.install(coord, crop_type.to_string(), level, planted_at);
        self.broadcast_snapshot();
    }

    /// Apply an authority update. Returns whether any state changed, so the
    /// reconciler can tell a no-op from an applied mutation.
    pub fn update_from_authority(&mut self, coord: TileCoord, update: CropUpdate) -> bool {
        match update {
            CropUpdate::Replant {
                crop_type,
                level,
                planted_at,
            } => {
                let Some(planted_at) = planted_at.resolve() else {
                    warn!(%coord, "replant with unusable planted_at, ignoring");
                    return false;
                };
                self.install(coord, crop_type, level, planted_at);
                self.broadcast_snapshot();
                true
            }
            CropUpdate::Nudge { planted_at } => {
                let Some(planted_at) = planted_at.resolve() else {
                    warn!(%coord, "nudge with unusable planted_at, ignoring");
                    return false;
                };
                let Some(state) = self.tiles.get(&coord) else {
                    debug!(%coord, "nudge for a tile with no crop, ignoring");
                    return false;
                };
                let (crop_type, level) = (state.crop_type.clone(), state.level);
                self.install(coord, crop_type, level, planted_at);
                self.broadcast_snapshot();
                true
            }
        }
    }

    /// Harvest or clearing: cancel the timer, drop the state.
    pub fn remove(&mut self, coord: TileCoord) {
        let Some(state) = self.tiles.remove(&coord) else {
            return;
        };
        if let Some(handle) = state.timer {
            self.timers.cancel(handle);
        }
        self.broadcast_snapshot();
    }

    pub fn get_stage(&self, coord: TileCoord) -> Option<StageInfo> {
        let state = self.tiles.get(&coord)?;
        Some(StageInfo {
            stage: state.stage,
            next_stage_at: state.next_stage_at,
        })
    }

    pub fn has_crop(&self, coord: TileCoord) -> bool {
        self.tiles.contains_key(&coord)
    }

    /// Re-announce the final stage for a tile whose crop is ready, so an
    /// unrelated update arriving first can't leave the "ready" state silent.
    pub fn renotify_if_final(&self, coord: TileCoord) {
        let Some(state) = self.tiles.get(&coord) else {
            return;
        };
        if state.next_stage_at.is_none() {
            let _ = self.events.send(EngineEvent::CropStageAdvanced {
                coord,
                stage: state.stage,
                next_stage_at: None,
            });
        }
    }

    pub fn shutdown(&mut self) {
        self.timers.cancel_all();
        self.tiles.clear();
        self.broadcast_snapshot();
    }

    pub fn next_deadline(&mut self) -> Option<DateTime<Utc>> {
        self.timers.next_deadline()
    }

    /// Drive every timer that has come due. Called by the runtime loop.
    pub fn fire_due(&mut self, now: DateTime<Utc>) {
        for (handle, coord) in self.timers.pop_due(now) {
            self.on_timer_fired(handle, coord, now);
        }
    }

    pub fn live_timer_count(&self) -> usize {
        self.timers.live_count()
    }

    pub fn tile_count(&self) -> usize {
        self.tiles.len()
    }

    /// Shared by plant, load and both authority update shapes: cancel any
    /// existing timer, recompute derived state, schedule the next boundary.
    /// Does not broadcast; callers decide the batching.
    fn install(&mut self, coord: TileCoord, crop_type: String, level: u32, planted_at: DateTime<Utc>) {
        let now = self.clock.now();
        let info = match self.config.curve(&crop_type, level) {
            Some(curve) => compute_stage(&curve, planted_at, now),
            None => {
                // Unconfigured crops behave as single-stage: visible, never
                // advancing, no timer.
                warn!(%coord, %crop_type, level, "no growth curve configured");
                StageInfo {
                    stage: 0,
                    next_stage_at: None,
                }
            }
        };
        let state = self.tiles.entry(coord).or_insert_with(|| CropState {
            crop_type: String::new(),
            level: 0,
            planted_at,
            stage: 0,
            next_stage_at: None,
            timer: None,
        });
        if let Some(handle) = state.timer.take() {
            self.timers.cancel(handle);
        }
        state.crop_type = crop_type;
        state.level = level;
        state.planted_at = planted_at;
        state.stage = info.stage;
        state.next_stage_at = info.next_stage_at;
        if let Some(at) = info.next_stage_at {
            state.timer = Some(self.timers.schedule(at, coord));
        }
    }

    fn on_timer_fired(&mut self, handle: TimerHandle, coord: TileCoord, now: DateTime<Utc>) {
        let Some(state) = self.tiles.get_mut(&coord) else {
            // Crop removed after the timer was queued.
            return;
        };
        if state.timer != Some(handle) {
            debug!(%coord, "stale growth timer fired, ignoring");
            return;
        }
        state.timer = None;
        // Recompute from the current clock; a late fire may have crossed
        // several boundaries at once.
        let info = match self.config.curve(&state.crop_type, state.level) {
            Some(curve) => compute_stage(&curve, state.planted_at, now),
            None => StageInfo {
                stage: state.stage,
                next_stage_at: None,
            },
        };
        state.stage = info.stage;
        state.next_stage_at = info.next_stage_at;
        if let Some(at) = info.next_stage_at {
            state.timer = Some(self.timers.schedule(at, coord));
        }
        let _ = self.events.send(EngineEvent::CropStageAdvanced {
            coord,
            stage: info.stage,
            next_stage_at: info.next_stage_at,
        });
        self.broadcast_snapshot();
    }

    fn snapshot(&self) -> CropSnapshot {
        self.tiles
            .iter()
            .map(|(coord, state)| {
                (
                    *coord,
                    CropEntry {
                        crop_type: state.crop_type.clone(),
                        level: state.level,
                        planted_at: state.planted_at,
                        stage: state.stage,
                        next_stage_at: state.next_stage_at,
                    },
                )
            })
            .collect()
    }

    fn broadcast_snapshot(&self) {
        let _ = self
            .events
            .send(EngineEvent::CropSnapshotChanged(Arc::new(self.snapshot())));
    }
}
