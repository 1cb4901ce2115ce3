//! Error types for the session memory layer.

use uuid::Uuid;

/// Result type alias for memory operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the session memory system
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Provider error: {0}")]
    Provider(#[from] anyhow::Error),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Episode not found: {0}")]
    EpisodeNotFound(Uuid),

    #[error("Turn not found: {0}")]
    TurnNotFound(Uuid),

    #[error("Fact not found: {0}")]
    FactNotFound(Uuid),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Check if this error is recoverable (can retry with backoff).
    ///
    /// Storage and provider failures are treated as transport-level and
    /// retryable; validation, configuration, and lookup misses are not.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Storage(_) | Error::Provider(_) => true,
            Error::Validation(_)
            | Error::Configuration(_)
            | Error::SessionNotFound(_)
            | Error::EpisodeNotFound(_)
            | Error::TurnNotFound(_)
            | Error::FactNotFound(_)
            | Error::InvalidState(_)
            | Error::Serialization(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_errors_are_recoverable() {
        assert!(Error::Storage("io".into()).is_recoverable());
        assert!(Error::Provider(anyhow::anyhow!("timeout")).is_recoverable());
    }

    #[test]
    fn validation_errors_are_not_recoverable() {
        assert!(!Error::Validation("empty content".into()).is_recoverable());
        assert!(!Error::Configuration("bad pct".into()).is_recoverable());
        assert!(!Error::EpisodeNotFound(Uuid::new_v4()).is_recoverable());
    }
}
