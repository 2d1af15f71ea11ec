//! One-shot timer registry.
//!
//! Holds `(fire_at, payload)` entries keyed by opaque handles. The registry
//! never runs anything itself: the owning loop asks for the next deadline,
//! sleeps, then pops whatever came due. Scheduling something already in the
//! past therefore still fires on a later loop turn, never inline inside
//! `schedule`, so callers that schedule from within a fire handler are safe.
//!
//! Cancellation is lazy: a canceled handle is dropped from the live map and
//! its heap entry is skipped when encountered.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use chrono::{DateTime, Utc};

/// Opaque reference to a scheduled one-shot entry. Unique for the lifetime of
/// the registry that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

struct Entry<T> {
    fire_at: DateTime<Utc>,
    payload: T,
}

pub struct TimerRegistry<T> {
    next_handle: u64,
    live: HashMap<TimerHandle, Entry<T>>,
    queue: BinaryHeap<Reverse<(DateTime<Utc>, u64)>>,
}

impl<T> TimerRegistry<T> {
    pub fn new() -> Self {
        Self {
            next_handle: 0,
            live: HashMap::new(),
            queue: BinaryHeap::new(),
        }
    }

    /// Register a payload to come due at `fire_at`. Past timestamps are
    /// accepted and come due on the next `pop_due` call.
    pub fn schedule(&mut self, fire_at: DateTime<Utc>, payload: T) -> TimerHandle {
        let handle = TimerHandle(self.next_handle);
        self.next_handle += 1;
        self.live.insert(handle, Entry { fire_at, payload });
        self.queue.push(Reverse((fire_at, handle.0)));
        handle
    }

    /// Idempotent: canceling a fired or already-canceled handle is a no-op.
    pub fn cancel(&mut self, handle: TimerHandle) {
        self.live.remove(&handle);
    }

    pub fn cancel_all(&mut self) {
        self.live.clear();
        self.queue.clear();
    }

    /// Earliest fire time among live entries, skipping canceled debris.
    pub fn next_deadline(&mut self) -> Option<DateTime<Utc>> {
        while let Some(Reverse((fire_at, raw))) = self.queue.peek().copied() {
            if self.live.contains_key(&TimerHandle(raw)) {
                return Some(fire_at);
            }
            self.queue.pop();
        }
        None
    }

    /// Remove and return every entry with `fire_at <= now`, earliest first.
    pub fn pop_due(&mut self, now: DateTime<Utc>) -> Vec<(TimerHandle, T)> {
        let mut due = Vec::new();
        while let Some(Reverse((fire_at, raw))) = self.queue.peek().copied() {
            if fire_at > now {
                break;
            }
            self.queue.pop();
            let handle = TimerHandle(raw);
            if let Some(entry) = self.live.remove(&handle) {
                due.push((handle, entry.payload));
            }
        }
        due
    }

    /// Number of scheduled-but-not-yet-fired entries.
    pub fn live_count(&self) -> usize {
        self.live.len()
    }
}

impl<T> Default for TimerRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}
