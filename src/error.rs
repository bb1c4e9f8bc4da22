use std::path::PathBuf;
use thiserror::Error;

/// Failures while loading the scan configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {}", .path.display())]
    NotFound { path: PathBuf },

    #[error("could not read config file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed config: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("config field `{field}` is not an integer: {value}")]
    InvalidValue { field: &'static str, value: String },

    #[error("thread count must be a positive integer, got {0}")]
    InvalidThreadCount(i64),
}

/// Errors that end a scan.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("hostname `{host}` could not be resolved: {reason}")]
    Resolution { host: String, reason: String },

    #[error("invalid port range [{low}, {high})")]
    InvalidRange { low: i64, high: i64 },

    #[error("thread count must be at least 1")]
    InvalidThreadCount,

    #[error("target unreachable while probing port {port}: {source}")]
    HostUnreachable {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("scan interrupted by user")]
    Interrupted,

    #[error("scan worker failed: {0}")]
    Worker(String),
}

impl ScanError {
    /// Process exit status for this failure.
    pub fn exit_code(&self) -> u8 {
        match self {
            ScanError::Config(_) => 1,
            ScanError::Interrupted => 130,
            _ => 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        let config = ScanError::from(ConfigError::InvalidThreadCount(0));
        assert_eq!(config.exit_code(), 1);
        assert_eq!(ScanError::Interrupted.exit_code(), 130);
        assert_eq!(ScanError::InvalidRange { low: 5, high: 1 }.exit_code(), 2);

        let unreachable = ScanError::HostUnreachable {
            port: 80,
            source: std::io::Error::new(std::io::ErrorKind::Other, "no route"),
        };
        assert_ne!(unreachable.exit_code(), 0);
    }

    #[test]
    fn test_config_error_is_transparent() {
        let err = ScanError::from(ConfigError::NotFound { path: PathBuf::from("config.json") });
        assert_eq!(err.to_string(), "config file not found: config.json");
    }
}
