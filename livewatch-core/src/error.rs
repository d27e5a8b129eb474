//! Error types for the monitoring core

use thiserror::Error;

/// Livewatch error types
#[derive(Debug, Error)]
pub enum Error {
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Transient room status fetch failure. Swallowed by listeners.
    #[error("Fetch error: {0}")]
    Fetch(String),

    /// A recording could not be started.
    #[error("Begin error: {0}")]
    Begin(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl Error {
    /// Registry-level "already registered" condition, expected under races.
    #[must_use]
    pub const fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists(_))
    }

    /// Registry-level "not registered" condition, expected under races.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Self::Configuration(err.to_string())
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Self::InvalidInput(format!("invalid room url: {err}"))
    }
}

/// Result type for livewatch operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expected_race_helpers() {
        assert!(Error::NotFound("room".to_string()).is_not_found());
        assert!(!Error::NotFound("room".to_string()).is_already_exists());
        assert!(Error::AlreadyExists("room".to_string()).is_already_exists());
        assert!(!Error::Begin("ffmpeg".to_string()).is_not_found());
    }

    #[test]
    fn test_url_parse_error_maps_to_invalid_input() {
        let err: Error = url::Url::parse("not a url").unwrap_err().into();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
