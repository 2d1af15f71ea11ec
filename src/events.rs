//! Typed observer surface.
//!
//! Every notification the engine raises travels as one [`EngineEvent`] on a
//! `tokio::sync::broadcast` channel. Observers subscribe and filter on the
//! variants they care about; a slow observer lags and misses events rather
//! than blocking the engine. Snapshot variants carry the full per-tracker map
//! behind an `Arc` so each subscriber clone is cheap.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::coord::TileCoord;

/// Per-tile rent view published to observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RentEntry {
    pub next_due_at: Option<DateTime<Utc>>,
}

/// Per-tile crop view published to observers. `stage` and `next_stage_at` are
/// derived fields, recomputed by the tracker before every broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CropEntry {
    pub crop_type: String,
    pub level: u32,
    pub planted_at: DateTime<Utc>,
    pub stage: u32,
    pub next_stage_at: Option<DateTime<Utc>>,
}

pub type RentSnapshot = BTreeMap<TileCoord, RentEntry>;
pub type CropSnapshot = BTreeMap<TileCoord, CropEntry>;

#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A lease's rent became payable.
    RentDue {
        coord: TileCoord,
        due_at: DateTime<Utc>,
    },
    /// Full rent map after a batch or single-tile change.
    RentSnapshotChanged(Arc<RentSnapshot>),
    /// A crop crossed a stage boundary (or its final stage was re-announced).
    CropStageAdvanced {
        coord: TileCoord,
        stage: u32,
        next_stage_at: Option<DateTime<Utc>>,
    },
    /// Full crop map after a batch or single-tile change.
    CropSnapshotChanged(Arc<CropSnapshot>),
    /// Unified per-message notification, raised after both trackers have
    /// finished applying the update.
    TileChanged {
        coord: TileCoord,
        fields: Arc<serde_json::Value>,
        needs_visual_refresh: bool,
    },
}

pub type EventSender = broadcast::Sender<EngineEvent>;
pub type EventReceiver = broadcast::Receiver<EngineEvent>;

pub fn channel(capacity: usize) -> (EventSender, EventReceiver) {
    broadcast::channel(capacity)
}
