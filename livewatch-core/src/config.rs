use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use crate::models::Room;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub listener: ListenerConfig,
    pub split: SplitConfig,
    pub recorder: RecorderConfig,
    pub logging: LoggingConfig,
    pub rooms: Vec<RoomConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Nominal time between two status polls of a room
    pub interval_seconds: u64,
    /// Standard deviation of the normally distributed poll jitter
    pub jitter_stddev_ms: u64,
    pub fetch_timeout_seconds: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 30,
            jitter_stddev_ms: 3000,
            fetch_timeout_seconds: 10,
        }
    }
}

impl ListenerConfig {
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    #[must_use]
    pub const fn jitter_stddev(&self) -> Duration {
        Duration::from_millis(self.jitter_stddev_ms)
    }

    #[must_use]
    pub const fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_seconds)
    }
}

/// Segmentation policies: when a running recording is cut into a new file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitConfig {
    /// Restart the recording when the room title changes while live
    pub on_room_name_changed: bool,
    /// Maximum length of one recording segment, 0 disables duration splitting
    pub max_duration_seconds: u64,
    /// How often a recording's elapsed time is checked against the maximum
    pub check_interval_seconds: u64,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            on_room_name_changed: false,
            max_duration_seconds: 0,
            check_interval_seconds: 15,
        }
    }
}

impl SplitConfig {
    /// `None` when duration splitting is disabled
    #[must_use]
    pub const fn max_duration(&self) -> Option<Duration> {
        if self.max_duration_seconds == 0 {
            None
        } else {
            Some(Duration::from_secs(self.max_duration_seconds))
        }
    }

    #[must_use]
    pub const fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    pub begin_timeout_seconds: u64,
    pub end_timeout_seconds: u64,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            begin_timeout_seconds: 30,
            end_timeout_seconds: 10,
        }
    }
}

impl RecorderConfig {
    #[must_use]
    pub const fn begin_timeout(&self) -> Duration {
        Duration::from_secs(self.begin_timeout_seconds)
    }

    #[must_use]
    pub const fn end_timeout(&self) -> Duration {
        Duration::from_secs(self.end_timeout_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

/// A room seeded at start-up
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomConfig {
    pub url: String,
    #[serde(default = "default_listen")]
    pub listen: bool,
}

const fn default_listen() -> bool {
    true
}

impl Config {
    /// Load configuration from an optional file, overridden by environment variables
    /// (`LIVEWATCH_LISTENER__INTERVAL_SECONDS`, ...).
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("LIVEWATCH")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Validate the configuration, collecting every problem found
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.listener.interval_seconds == 0 {
            errors.push("listener.interval_seconds must be greater than 0".to_string());
        }
        if self.listener.fetch_timeout_seconds == 0 {
            errors.push("listener.fetch_timeout_seconds must be greater than 0".to_string());
        }
        if self.split.check_interval_seconds == 0 {
            errors.push("split.check_interval_seconds must be greater than 0".to_string());
        }
        if self.split.max_duration_seconds != 0
            && self.split.check_interval_seconds >= self.split.max_duration_seconds
        {
            errors.push(
                "split.check_interval_seconds must be smaller than split.max_duration_seconds"
                    .to_string(),
            );
        }
        if self.recorder.begin_timeout_seconds == 0 {
            errors.push("recorder.begin_timeout_seconds must be greater than 0".to_string());
        }
        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            errors.push(format!(
                "logging.format must be \"json\" or \"pretty\", got \"{}\"",
                self.logging.format
            ));
        }

        let mut seen = HashSet::new();
        for room in &self.rooms {
            match Room::parse(&room.url) {
                Ok(parsed) => {
                    if !seen.insert(parsed.id) {
                        errors.push(format!("duplicate room url: {}", room.url));
                    }
                }
                Err(e) => errors.push(format!("room {}: {e}", room.url)),
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
