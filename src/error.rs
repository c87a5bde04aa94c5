//! Error types for the megashell engine.

use thiserror::Error;

/// Main error type for megashell operations.
#[derive(Error, Debug)]
pub enum MegaError {
    /// Bad credentials, expired session, or an operation that needs a login.
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Path resolution failed on a segment that has no matching child.
    #[error("Not found: {0}")]
    NotFound(String),

    /// An intermediate path segment names a file.
    #[error("Not a directory: {0}")]
    NotADirectory(String),

    /// Network or storage failure while a command was executing.
    #[error("Transfer error: {0}")]
    Transfer(String),

    /// Persisted session record could not be read back.
    #[error("Corrupt session state: {0}")]
    CorruptState(String),

    /// Tree snapshot violates the hierarchy invariants.
    #[error("Invalid tree: {0}")]
    InvalidTree(String),

    /// The worker pool no longer accepts commands.
    #[error("Worker pool stopped")]
    PoolStopped,

    /// Shell command that is recognised but not supported.
    #[error("{0} not implemented")]
    NotImplemented(String),

    /// Remote API returned an error code.
    #[error("API error: {code} - {message}")]
    ApiError { code: i32, message: String },

    /// Local I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Base64 decoding error.
    #[error("Base64 decode error: {0}")]
    Base64Error(#[from] base64::DecodeError),

    /// Custom error message.
    #[error("{0}")]
    Custom(String),
}

impl MegaError {
    /// True for errors that mean the session must log in again.
    pub fn is_auth(&self) -> bool {
        matches!(self, MegaError::Authentication(_))
    }
}

/// Result type alias for megashell operations.
pub type Result<T> = std::result::Result<T, MegaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        assert_eq!(
            MegaError::NotFound("/missing".to_string()).to_string(),
            "Not found: /missing"
        );
        assert_eq!(
            MegaError::NotImplemented("mount".to_string()).to_string(),
            "mount not implemented"
        );
        assert_eq!(MegaError::PoolStopped.to_string(), "Worker pool stopped");
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: MegaError = io.into();
        assert!(matches!(err, MegaError::Io(_)));
        assert!(!err.is_auth());
        assert!(MegaError::Authentication("expired".into()).is_auth());
    }
}
