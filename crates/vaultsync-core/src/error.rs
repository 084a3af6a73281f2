//! Error types for vaultsync-core

use thiserror::Error;

/// Result type alias using vaultsync-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in vaultsync-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Entity not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Malformed or out-of-order protocol message
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A session or background channel went away
    #[error("Channel closed: {0}")]
    Closed(String),

    /// Concurrent writers kept winning the race for an entity
    #[error("Entity busy: {0}")]
    Busy(String),
}

impl Error {
    /// Errors that end the session they occurred on, leaving other sessions untouched.
    pub const fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            Self::Protocol(_) | Self::Closed(_) | Self::Serialization(_)
        )
    }

    /// Errors coming from the data store that callers must surface instead of skipping.
    pub const fn is_store_fatal(&self) -> bool {
        matches!(self, Self::Database(_) | Self::LibSql(_) | Self::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(Error::Protocol("bad frame".into()).is_session_fatal());
        assert!(Error::Closed("outbox".into()).is_session_fatal());
        assert!(!Error::NotFound("note".into()).is_session_fatal());
        assert!(Error::Database("locked".into()).is_store_fatal());
        assert!(!Error::InvalidInput("path".into()).is_store_fatal());
        assert!(!Error::Busy("note".into()).is_session_fatal());
    }
}
