use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Default location of the scan configuration, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config.json";

/// Scan configuration: which ports to probe and how many workers to run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Config {
    pub range: RangeConfig,
    pub thread: ThreadConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RangeConfig {
    pub low: i64,
    pub high: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThreadConfig {
    pub count: i64,
}

// Integers may be written as JSON numbers or numeric strings ("1000").
#[derive(Deserialize)]
struct RawConfig {
    range: RawRange,
    thread: RawThread,
}

#[derive(Deserialize)]
struct RawRange {
    low: Value,
    high: Value,
}

#[derive(Deserialize)]
struct RawThread {
    count: Value,
}

impl Config {
    /// Load and validate configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| {
            if source.kind() == ErrorKind::NotFound {
                ConfigError::NotFound { path: path.to_path_buf() }
            } else {
                ConfigError::Io { path: path.to_path_buf(), source }
            }
        })?;

        tracing::debug!(path = %path.display(), "loaded config file");
        Self::from_json(&content)
    }

    /// Parse and validate configuration from a JSON document
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_json::from_str(content)?;

        let config = Config {
            range: RangeConfig {
                low: integer_field("range.low", &raw.range.low)?,
                high: integer_field("range.high", &raw.range.high)?,
            },
            thread: ThreadConfig {
                count: integer_field("thread.count", &raw.thread.count)?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Replace file values with command line overrides where given
    pub fn with_overrides(mut self, low: Option<i64>, high: Option<i64>, threads: Option<i64>) -> Result<Self, ConfigError> {
        if let Some(low) = low {
            self.range.low = low;
        }
        if let Some(high) = high {
            self.range.high = high;
        }
        if let Some(threads) = threads {
            self.thread.count = threads;
        }

        self.validate()?;
        Ok(self)
    }

    /// Validate configuration settings.
    ///
    /// Range bounds are checked by the partitioner, not here. Any positive
    /// thread count is accepted; workers beyond the range size stay idle.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.thread.count < 1 {
            return Err(ConfigError::InvalidThreadCount(self.thread.count));
        }
        Ok(())
    }

    pub fn thread_count(&self) -> usize {
        usize::try_from(self.thread.count).unwrap_or(usize::MAX)
    }

    pub fn resolve_path(path: Option<PathBuf>) -> PathBuf {
        path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
    }
}

fn integer_field(field: &'static str, value: &Value) -> Result<i64, ConfigError> {
    let parsed = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };

    parsed.ok_or_else(|| ConfigError::InvalidValue {
        field,
        value: value.to_string(),
    })
}
