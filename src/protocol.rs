//! Transport boundary types.
//!
//! The authority delivers partial tile updates as already-deserialized JSON
//! field bags. Everything duck-typed is resolved here, once: timestamps into
//! [`TimeInput`], field bags into a [`ClassifiedUpdate`], snapshot records
//! into tracker load entries. Past this module nothing probes for field
//! presence again.
//!
//! Recognized keys: `terrain_type`, `crop_type`, `crop_level`, `planted_at`
//! at the top level, and `rent_due_at` nested under `properties`.

use std::collections::HashMap;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use tracing::warn;

use crate::coord::TileCoord;

pub const KEY_TERRAIN: &str = "terrain_type";
pub const KEY_CROP_TYPE: &str = "crop_type";
pub const KEY_CROP_LEVEL: &str = "crop_level";
pub const KEY_PLANTED_AT: &str = "planted_at";
pub const KEY_PROPERTIES: &str = "properties";
pub const KEY_RENT_DUE_AT: &str = "rent_due_at";

/// A timestamp as the wire carries it: absent, already-typed, epoch
/// milliseconds, or text. Resolution failures are logged and degrade to
/// "absent"; a malformed timestamp never aborts the operation it rode in on.
#[derive(Debug, Clone, PartialEq)]
pub enum TimeInput {
    Absent,
    At(DateTime<Utc>),
    Millis(i64),
    Text(String),
}

impl TimeInput {
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Null => Self::Absent,
            Value::Number(n) => match n.as_i64() {
                Some(ms) => Self::Millis(ms),
                // non-integral or out-of-range numbers go through the text
                // path so the failure is logged with the original token
                None => Self::Text(n.to_string()),
            },
            Value::String(s) => Self::Text(s.clone()),
            other => Self::Text(other.to_string()),
        }
    }

    pub fn resolve(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Absent => None,
            Self::At(at) => Some(*at),
            Self::Millis(ms) => match Utc.timestamp_millis_opt(*ms).single() {
                Some(at) => Some(at),
                None => {
                    warn!(millis = ms, "timestamp out of range, treating as absent");
                    None
                }
            },
            Self::Text(s) => {
                let trimmed = s.trim();
                if let Ok(at) = DateTime::parse_from_rfc3339(trimmed) {
                    return Some(at.with_timezone(&Utc));
                }
                if let Ok(ms) = trimmed.parse::<i64>() {
                    return Self::Millis(ms).resolve();
                }
                warn!(raw = %s, "unparseable timestamp, treating as absent");
                None
            }
        }
    }
}

impl From<DateTime<Utc>> for TimeInput {
    fn from(at: DateTime<Utc>) -> Self {
        Self::At(at)
    }
}

impl From<Option<DateTime<Utc>>> for TimeInput {
    fn from(at: Option<DateTime<Utc>>) -> Self {
        at.map_or(Self::Absent, Self::At)
    }
}

impl From<&str> for TimeInput {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

/// What one partial update asks of the crop tracker.
#[derive(Debug, Clone, PartialEq)]
pub enum CropAction {
    /// Full identity replace: treated exactly like a fresh plant.
    Replant {
        crop_type: String,
        level: u32,
        planted_at: TimeInput,
    },
    /// Planted-at-only nudge for a tile that already has a crop.
    Nudge { planted_at: TimeInput },
    /// Crop-type key set to the null/empty sentinel.
    Remove,
    /// Crop keys present in a combination the engine does not know.
    Unrecognized,
}

/// One partial update, resolved from a raw field bag.
#[derive(Debug, Clone, Default)]
pub struct ClassifiedUpdate {
    pub rent: Option<TimeInput>,
    pub crop: Option<CropAction>,
    pub terrain_touched: bool,
}

/// Resolve a raw field bag into the sub-states it touches. Total: anything
/// unknown lands in `CropAction::Unrecognized` or is simply not flagged.
pub fn classify(fields: &Value) -> ClassifiedUpdate {
    let Some(map) = fields.as_object() else {
        if !fields.is_null() {
            warn!("tile update fields are not an object, ignoring");
        }
        return ClassifiedUpdate::default();
    };

    let rent = map
        .get(KEY_PROPERTIES)
        .and_then(Value::as_object)
        .and_then(|props| props.get(KEY_RENT_DUE_AT))
        .filter(|due| !due.is_null())
        .map(TimeInput::from_value);

    let planted_at = map.get(KEY_PLANTED_AT).map(TimeInput::from_value);
    let crop = match map.get(KEY_CROP_TYPE) {
        Some(Value::Null) => Some(CropAction::Remove),
        Some(Value::String(s)) if s.is_empty() => Some(CropAction::Remove),
        Some(Value::String(s)) => match planted_at {
            Some(planted_at) => Some(CropAction::Replant {
                crop_type: s.clone(),
                level: map
                    .get(KEY_CROP_LEVEL)
                    .and_then(Value::as_u64)
                    .map_or(1, |level| u32::try_from(level).unwrap_or(u32::MAX)),
                planted_at,
            }),
            None => Some(CropAction::Unrecognized),
        },
        Some(_) => Some(CropAction::Unrecognized),
        None => planted_at.map(|planted_at| CropAction::Nudge { planted_at }),
    };

    ClassifiedUpdate {
        rent,
        crop,
        terrain_touched: map.contains_key(KEY_TERRAIN),
    }
}

/// One tile's rent portion of the initial snapshot.
#[derive(Debug, Clone)]
pub struct RentLoadEntry {
    pub coord: TileCoord,
    pub due_at: TimeInput,
}

/// One tile's crop portion of the initial snapshot.
#[derive(Debug, Clone)]
pub struct CropLoadEntry {
    pub coord: TileCoord,
    pub crop_type: String,
    pub level: u32,
    pub planted_at: TimeInput,
}

/// Fan an initial snapshot payload (`"x,y"` → record) into per-tracker load
/// entries. Records with unparseable keys are logged and skipped; the rest of
/// the batch is unaffected.
pub fn parse_snapshot(tiles: &HashMap<String, Value>) -> (Vec<RentLoadEntry>, Vec<CropLoadEntry>) {
    let mut rent = Vec::new();
    let mut crops = Vec::new();
    for (key, record) in tiles {
        let coord: TileCoord = match key.parse() {
            Ok(coord) => coord,
            Err(err) => {
                warn!(%err, "skipping snapshot record");
                continue;
            }
        };
        let classified = classify(record);
        if let Some(due_at) = classified.rent {
            rent.push(RentLoadEntry { coord, due_at });
        }
        if let Some(CropAction::Replant {
            crop_type,
            level,
            planted_at,
        }) = classified.crop
        {
            crops.push(CropLoadEntry {
                coord,
                crop_type,
                level,
                planted_at,
            });
        }
    }
    (rent, crops)
}
