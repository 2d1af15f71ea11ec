//! Growth-curve configuration.
//!
//! The numeric shape of crop growth lives outside the engine: per crop type,
//! a stage count and one total growth duration per level, loaded from YAML.
//! Trackers only ever see the resolved [`StageCurve`] for a concrete
//! `(crop_type, level)` pair.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read growth config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse growth config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid growth config: {0}")]
    Invalid(String),
}

/// Resolved curve for one `(crop_type, level)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageCurve {
    pub stage_count: u32,
    pub total_growth_ms: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CropSpec {
    pub stage_count: u32,
    /// Total growth duration in milliseconds, indexed by level (level 1 is
    /// the first entry). Levels past the end reuse the last entry.
    pub growth_ms: Vec<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GrowthConfig {
    #[serde(default)]
    crops: HashMap<String, CropSpec>,
}

impl GrowthConfig {
    pub fn from_yaml(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path)?;
        Self::from_yaml_str(&data)
    }

    pub fn from_yaml_str(data: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(data)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (name, spec) in &self.crops {
            if spec.stage_count == 0 {
                return Err(ConfigError::Invalid(format!(
                    "crop '{name}' has stage_count 0"
                )));
            }
            if spec.growth_ms.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "crop '{name}' has no growth durations"
                )));
            }
            if spec.growth_ms.iter().any(|ms| *ms == 0) {
                return Err(ConfigError::Invalid(format!(
                    "crop '{name}' has a zero growth duration"
                )));
            }
        }
        Ok(())
    }

    /// Builder-style insertion, used by tests and embedded defaults.
    pub fn with_crop(mut self, crop_type: &str, stage_count: u32, growth_ms: Vec<u64>) -> Self {
        self.crops.insert(
            crop_type.to_string(),
            CropSpec {
                stage_count,
                growth_ms,
            },
        );
        self
    }

    /// Curve for a concrete crop and level. Level 0 is treated as level 1;
    /// levels past the configured range reuse the highest configured one.
    pub fn curve(&self, crop_type: &str, level: u32) -> Option<StageCurve> {
        let spec = self.crops.get(crop_type)?;
        let last = spec.growth_ms.len().checked_sub(1)?;
        let index = (level.max(1) as usize - 1).min(last);
        let total = *spec.growth_ms.get(index)?;
        Some(StageCurve {
            stage_count: spec.stage_count,
            total_growth_ms: i64::try_from(total).unwrap_or(i64::MAX),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
crops:
  wheat:
    stage_count: 4
    growth_ms: [120000, 90000]
  pumpkin:
    stage_count: 6
    growth_ms: [600000]
"#;

    #[test]
    fn parses_sample_yaml() {
        let config = GrowthConfig::from_yaml_str(SAMPLE).unwrap();
        assert_eq!(
            config.curve("wheat", 1),
            Some(StageCurve {
                stage_count: 4,
                total_growth_ms: 120_000
            })
        );
        assert_eq!(
            config.curve("wheat", 2),
            Some(StageCurve {
                stage_count: 4,
                total_growth_ms: 90_000
            })
        );
    }

    #[test]
    fn level_past_range_reuses_last() {
        let config = GrowthConfig::from_yaml_str(SAMPLE).unwrap();
        assert_eq!(config.curve("wheat", 9).unwrap().total_growth_ms, 90_000);
        assert_eq!(config.curve("pumpkin", 3).unwrap().total_growth_ms, 600_000);
    }

    #[test]
    fn level_zero_is_level_one() {
        let config = GrowthConfig::from_yaml_str(SAMPLE).unwrap();
        assert_eq!(config.curve("wheat", 0), config.curve("wheat", 1));
    }

    #[test]
    fn unknown_crop_is_none() {
        let config = GrowthConfig::from_yaml_str(SAMPLE).unwrap();
        assert!(config.curve("kelp", 1).is_none());
    }

    #[test]
    fn rejects_zero_stage_count() {
        let bad = "crops:\n  weed:\n    stage_count: 0\n    growth_ms: [1000]\n";
        assert!(matches!(
            GrowthConfig::from_yaml_str(bad),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn rejects_empty_durations() {
        let bad = "crops:\n  weed:\n    stage_count: 2\n    growth_ms: []\n";
        assert!(matches!(
            GrowthConfig::from_yaml_str(bad),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let config = GrowthConfig::from_yaml(file.path()).unwrap();
        assert!(config.curve("pumpkin", 1).is_some());
    }
}
