use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
    #[error("TOML deserialization error: {source}")]
    TomlDe {
        #[from]
        source: toml::de::Error,
    },
}

fn default_day_to_night_threshold() -> f64 {
    40.0
}

fn default_night_to_day_threshold() -> f64 {
    60.0
}

fn default_hold_seconds() -> f64 {
    3.0
}

fn default_warmup_frames() -> u32 {
    5
}

/// Immutable per-controller switching policy.
///
/// Thresholds are mean luma values in `[0, 255]`. Holds are the minimum
/// continuous duration a threshold condition must persist before the
/// controller acts, which is what prevents day/night flicker from noisy
/// brightness readings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CameraSwitchConfig {
    /// Switch day -> night when mean luma stays below this.
    #[serde(default = "default_day_to_night_threshold")]
    pub day_to_night_threshold: f64,
    /// Switch night -> day when mean luma stays above this.
    #[serde(default = "default_night_to_day_threshold")]
    pub night_to_day_threshold: f64,
    #[serde(default = "default_hold_seconds")]
    pub day_to_night_hold_seconds: f64,
    #[serde(default = "default_hold_seconds")]
    pub night_to_day_hold_seconds: f64,
    /// Frames to discard immediately after a switch while the new camera's
    /// sensor and exposure stabilize.
    #[serde(default = "default_warmup_frames")]
    pub warmup_frames: u32,
}

impl Default for CameraSwitchConfig {
    fn default() -> Self {
        Self {
            day_to_night_threshold: default_day_to_night_threshold(),
            night_to_day_threshold: default_night_to_day_threshold(),
            day_to_night_hold_seconds: default_hold_seconds(),
            night_to_day_hold_seconds: default_hold_seconds(),
            warmup_frames: default_warmup_frames(),
        }
    }
}

impl CameraSwitchConfig {
    pub fn day_to_night_hold(&self) -> Duration {
        Duration::from_secs_f64(self.day_to_night_hold_seconds)
    }

    pub fn night_to_day_hold(&self) -> Duration {
        Duration::from_secs_f64(self.night_to_day_hold_seconds)
    }

    /// Load a configuration from a TOML file. Missing fields take their
    /// defaults.
    pub fn from_path<P: AsRef<std::path::Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_fields_take_defaults() {
        let cfg: CameraSwitchConfig = toml::from_str("day_to_night_threshold = 25.0").unwrap();
        assert_eq!(cfg.day_to_night_threshold, 25.0);
        assert_eq!(cfg.night_to_day_threshold, 60.0);
        assert_eq!(cfg.day_to_night_hold(), Duration::from_secs(3));
        assert_eq!(cfg.warmup_frames, 5);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(toml::from_str::<CameraSwitchConfig>("no_such_field = 1").is_err());
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "day_to_night_threshold = 35.0\nnight_to_day_hold_seconds = 1.5\n"
        )
        .unwrap();
        let cfg = CameraSwitchConfig::from_path(file.path()).unwrap();
        assert_eq!(cfg.day_to_night_threshold, 35.0);
        assert_eq!(cfg.night_to_day_hold(), Duration::from_millis(1500));
    }
}
