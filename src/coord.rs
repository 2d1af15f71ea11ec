use std::fmt;
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Grid position of a single tile. Used as the map key by every tracker and
/// as the `"x,y"` key in snapshot payloads from the authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TileCoord {
    pub x: i32,
    pub y: i32,
}

impl TileCoord {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.x, self.y)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid tile coordinate key '{0}'")]
pub struct CoordParseError(String);

impl FromStr for TileCoord {
    type Err = CoordParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (x, y) = s
            .split_once(',')
            .ok_or_else(|| CoordParseError(s.to_string()))?;
        let x = x
            .trim()
            .parse::<i32>()
            .map_err(|_| CoordParseError(s.to_string()))?;
        let y = y
            .trim()
            .parse::<i32>()
            .map_err(|_| CoordParseError(s.to_string()))?;
        Ok(Self { x, y })
    }
}

// Serialized as the wire key form so snapshot maps keyed by coordinate stay
// representable in JSON.
impl Serialize for TileCoord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TileCoord {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let key = String::deserialize(deserializer)?;
        key.parse().map_err(de::Error::custom)
    }
}
