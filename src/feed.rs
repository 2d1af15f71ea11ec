//! Replay feeds for the harness binary.
//!
//! A feed is a YAML script of transport messages with millisecond offsets
//! from replay start. Timestamps inside field bags are written as signed
//! relative tokens (`"+2500ms"`, `"-60000ms"`) and rewritten to absolute
//! RFC 3339 against the replay anchor at load time, so feed files stay valid
//! forever.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::Value;

fn default_settle_ms() -> u64 {
    1_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReplayFeed {
    pub name: String,
    /// How long to keep the engine alive after the last message, so trailing
    /// timers can fire.
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    pub events: Vec<FeedEvent>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeedEvent {
    Snapshot {
        at_ms: u64,
        tiles: HashMap<String, Value>,
    },
    Update {
        at_ms: u64,
        x: i32,
        y: i32,
        fields: Value,
    },
}

impl FeedEvent {
    pub fn at_ms(&self) -> u64 {
        match self {
            Self::Snapshot { at_ms, .. } | Self::Update { at_ms, .. } => *at_ms,
        }
    }
}

impl ReplayFeed {
    pub fn load(path: impl AsRef<Path>, anchor: DateTime<Utc>) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)
            .with_context(|| format!("failed to read feed file {}", path.display()))?;
        let mut feed: Self = serde_yaml::from_str(&data)
            .with_context(|| format!("failed to parse feed file {}", path.display()))?;
        for event in &mut feed.events {
            match event {
                FeedEvent::Snapshot { tiles, .. } => {
                    for record in tiles.values_mut() {
                        anchor_relative_times(record, anchor);
                    }
                }
                FeedEvent::Update { fields, .. } => anchor_relative_times(fields, anchor),
            }
        }
        feed.events.sort_by_key(FeedEvent::at_ms);
        Ok(feed)
    }
}

/// Rewrite every explicitly signed `"+<n>ms"` / `"-<n>ms"` string in the
/// tree to `anchor + n` as RFC 3339. Anything else is left untouched.
fn anchor_relative_times(value: &mut Value, anchor: DateTime<Utc>) {
    match value {
        Value::String(s) => {
            let signed = s.starts_with('+') || s.starts_with('-');
            if let Some(ms) = s
                .strip_suffix("ms")
                .filter(|_| signed)
                .and_then(|offset| offset.parse::<i64>().ok())
            {
                *s = (anchor + Duration::milliseconds(ms)).to_rfc3339();
            }
        }
        Value::Array(items) => {
            for item in items {
                anchor_relative_times(item, anchor);
            }
        }
        Value::Object(map) => {
            for item in map.values_mut() {
                anchor_relative_times(item, anchor);
            }
        }
        _ => {}
    }
}
