//! Per-tile rent due-date tracking.
//!
//! Mirrors the authority's lease state and raises `RentDue` when a due date
//! passes, with one wake-up timer per tile at most. Snapshot broadcasts are
//! batched: a bulk `load` emits exactly one, no matter how many tiles it
//! replaced.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::clock::SharedClock;
use crate::coord::TileCoord;
use crate::events::{EngineEvent, EventSender, RentEntry, RentSnapshot};
use crate::protocol::{RentLoadEntry, TimeInput};
use crate::timer::{TimerHandle, TimerRegistry};

#[derive(Debug, Default)]
struct RentState {
    next_due_at: Option<DateTime<Utc>>,
    // Some iff next_due_at was in the future when this state was installed.
    timer: Option<TimerHandle>,
}

pub struct RentTracker {
    clock: SharedClock,
    events: EventSender,
    timers: TimerRegistry<TileCoord>,
    tiles: HashMap<TileCoord, RentState>,
}

impl RentTracker {
    pub fn new(clock: SharedClock, events: EventSender) -> Self {
        Self {
            clock,
            events,
            timers: TimerRegistry::new(),
            tiles: HashMap::new(),
        }
    }

    /// Atomic bulk replace. Cancels every existing timer, clears the map,
    /// installs each entry, then emits a single snapshot broadcast. Entries
    /// with past or unparseable due dates get a record with no timer.
    pub fn load(&mut self, entries: Vec<RentLoadEntry>) {
        self.timers.cancel_all();
        self.tiles.clear();
        let now = self.clock.now();
        for entry in entries {
            let due = entry.due_at.resolve();
            let timer = match due {
                Some(at) if at > now => Some(self.timers.schedule(at, entry.coord)),
                _ => None,
            };
            self.tiles.insert(
                entry.coord,
                RentState {
                    next_due_at: due,
                    timer,
                },
            );
        }
        self.broadcast_snapshot();
    }

    /// Install or replace one tile's due date. Any existing timer for the
    /// tile is canceled before the new state lands, so a tile never has two
    /// live timers. A due date at or before now runs the due check right
    /// away instead of being scheduled.
    pub fn add_or_update(&mut self, coord: TileCoord, due_at: TimeInput) {
        let now = self.clock.now();
        let due = due_at.resolve();
        let state = self.tiles.entry(coord).or_default();
        if let Some(handle) = state.timer.take() {
            self.timers.cancel(handle);
        }
        state.next_due_at = due;
        let mut already_due = false;
        if let Some(at) = due {
            if at > now {
                state.timer = Some(self.timers.schedule(at, coord));
            } else {
                already_due = true;
            }
        }
        self.broadcast_snapshot();
        if already_due {
            self.due_check(coord, now);
        }
    }

    pub fn remove(&mut self, coord: TileCoord) {
        let Some(state) = self.tiles.remove(&coord) else {
            return;
        };
        if let Some(handle) = state.timer {
            self.timers.cancel(handle);
        }
        self.broadcast_snapshot();
    }

    pub fn query(&self, coord: TileCoord) -> Option<DateTime<Utc>> {
        self.tiles.get(&coord)?.next_due_at
    }

    /// Cancels all timers, clears state and emits one final empty snapshot.
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

    fn on_timer_fired(&mut self, handle: TimerHandle, coord: TileCoord, now: DateTime<Utc>) {
        let Some(state) = self.tiles.get_mut(&coord) else {
            // Tile removed after the timer was queued.
            return;
        };
        if state.timer != Some(handle) {
            debug!(%coord, "stale rent timer fired, ignoring");
            return;
        }
        // Clear the handle before anything else so re-entrant observers see
        // no active timer for this tile.
        state.timer = None;
        self.due_check(coord, now);
    }

    /// Re-validates against current state before announcing: rent paid in the
    /// same tick the old timer fired must stay silent.
    fn due_check(&mut self, coord: TileCoord, now: DateTime<Utc>) {
        let Some(state) = self.tiles.get(&coord) else {
            return;
        };
        let Some(due_at) = state.next_due_at else {
            return;
        };
        if due_at > now {
            return;
        }
        let _ = self.events.send(EngineEvent::RentDue { coord, due_at });
    }

    fn snapshot(&self) -> RentSnapshot {
        self.tiles
            .iter()
            .map(|(coord, state)| {
                (
                    *coord,
                    RentEntry {
                        next_due_at: state.next_due_at,
                    },
                )
            })
            .collect()
    }

    fn broadcast_snapshot(&self) {
        let _ = self
            .events
            .send(EngineEvent::RentSnapshotChanged(Arc::new(self.snapshot())));
    }
}
