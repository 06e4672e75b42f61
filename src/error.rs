//! Unified error handling
//!
//! Domain modules keep their own `thiserror` enums; this module wraps them
//! in a single [`Error`] so module boundaries can share one `Result` type,
//! with a recoverability check and a coarse [`ErrorCategory`] for handling
//! strategies at the top level.

use std::io;
use thiserror::Error;

pub use crate::generator::GenerationError;
pub use crate::publisher::PublishError;
pub use crate::window::WindowError;

use crate::utils::retry::RetryClass;

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Network and platform API errors
    Network,
    /// Content generation errors
    Content,
    /// Storage and I/O errors
    Storage,
    /// Configuration and validation errors
    Config,
    /// Window and scheduling errors
    Schedule,
    /// Other/unknown errors
    Other,
}

/// Unified error type
#[derive(Error, Debug)]
pub enum Error {
    /// Window configuration errors
    #[error("Window error: {0}")]
    Window(#[from] WindowError),

    /// Publishing API errors
    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),

    /// Content generation errors
    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    /// Database errors
    #[error("Database error: {0}")]
    Database(#[source] rusqlite::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    /// Storage and other wrapped errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Check if this error is recoverable (can be retried)
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Window(_) => false,
            Self::Publish(e) => e.retry_class() != RetryClass::Fatal,
            Self::Generation(e) => e.retry_class() != RetryClass::Fatal,
            Self::Database(_) => false,
            Self::Io(_) => true,
            Self::Json(_) => false,
            Self::Config(_) => false,
            Self::Other(_) => false,
        }
    }

    /// Get the error category for handling strategies
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Window(_) => ErrorCategory::Schedule,
            Self::Publish(_) => ErrorCategory::Network,
            Self::Generation(_) => ErrorCategory::Content,
            Self::Database(_) | Self::Io(_) => ErrorCategory::Storage,
            Self::Json(_) => ErrorCategory::Other,
            Self::Config(_) => ErrorCategory::Config,
            Self::Other(_) => ErrorCategory::Other,
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(err)
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_publish_recoverability_follows_retry_class() {
        let server = Error::Publish(PublishError::Server(503));
        assert!(server.is_recoverable());
        assert_eq!(server.category(), ErrorCategory::Network);

        let auth = Error::Publish(PublishError::Auth(401));
        assert!(!auth.is_recoverable());

        let limited = Error::Publish(PublishError::RateLimited {
            retry_after: Some(Duration::from_secs(5)),
        });
        assert!(limited.is_recoverable());
    }

    #[test]
    fn test_generation_rejection_is_fatal() {
        let rejected = Error::Generation(GenerationError::Rejected("filtered".into()));
        assert!(!rejected.is_recoverable());
        assert_eq!(rejected.category(), ErrorCategory::Content);

        let empty = Error::Generation(GenerationError::Empty);
        assert!(empty.is_recoverable());
    }

    #[test]
    fn test_window_error_category() {
        let err = Error::Window(WindowError::StartOutOfRange(30));
        assert_eq!(err.category(), ErrorCategory::Schedule);
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_config_error() {
        let err = Error::config("Invalid timezone");
        assert_eq!(err.category(), ErrorCategory::Config);
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_anyhow_wraps_into_other() {
        let err: Error = anyhow::anyhow!("store unavailable").into();
        assert_eq!(err.category(), ErrorCategory::Other);
        assert!(err.to_string().contains("store unavailable"));
    }
}
