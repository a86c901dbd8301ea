//! WolfKube Error Types

use thiserror::Error;

/// Result type alias for WolfKube operations
pub type Result<T> = std::result::Result<T, Error>;

/// WolfKube error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // Backend errors
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Backend call timed out: {0}")]
    Timeout(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Resource already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid label selector: {0}")]
    InvalidSelector(String),

    #[error("Watch error: {0}")]
    Watch(String),

    // Leadership errors
    #[error("Current instance is not the leader")]
    NotLeader,

    #[error("Leader election not configured")]
    LeaderElectionNotConfigured,

    #[error("Stale fencing token {presented} (current is {current})")]
    StaleFencingToken { presented: u64, current: u64 },

    // Enrichment errors (logged, never returned from read paths)
    #[error("Enrichment failed: {0}")]
    EnrichmentFailed(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Lifecycle errors
    #[error("Shutdown in progress")]
    ShuttingDown,
}

impl Error {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::BackendUnavailable(_) | Error::Timeout(_))
    }

    /// Check if this error means the caller lost (or never had) write authority
    pub fn is_leadership_error(&self) -> bool {
        matches!(
            self,
            Error::NotLeader | Error::LeaderElectionNotConfigured | Error::StaleFencingToken { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(Error::BackendUnavailable("down".into()).is_retryable());
        assert!(Error::Timeout("list pods".into()).is_retryable());
        assert!(!Error::NotLeader.is_retryable());
        assert!(!Error::Config("bad".into()).is_retryable());
    }

    #[test]
    fn test_leadership_errors() {
        assert!(Error::NotLeader.is_leadership_error());
        assert!(Error::StaleFencingToken { presented: 1, current: 2 }.is_leadership_error());
        assert!(!Error::ShuttingDown.is_leadership_error());
    }
}
