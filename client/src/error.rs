//! Unified error handling for the client.

use crate::remote::TransportError;
use crate::store::StoreError;

/// Client error type.
///
/// Only [`Error::Config`] and [`Error::NotEnabled`] ever surface from
/// [`SyncCoordinator::sync`](crate::SyncCoordinator::sync); delivery failures
/// are counted in the sync status instead.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Sync is not enabled")]
    NotEnabled,

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Engine error: {0}")]
    Engine(#[from] ferry_engine::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Configuration-class errors are fatal and never retried.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Error::Config(_)
                | Error::Engine(ferry_engine::Error::InvalidTargetVersion(_))
                | Error::Engine(ferry_engine::Error::InvalidMigrationVersion(_))
                | Error::Engine(ferry_engine::Error::UnknownPolicy(_))
        )
    }
}

/// Result type alias for the client.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        assert_eq!(Error::NotEnabled.to_string(), "Sync is not enabled");

        let err = Error::from(TransportError::Status(503));
        assert_eq!(
            err.to_string(),
            "Transport error: server responded with status 503"
        );
    }

    #[test]
    fn config_classification() {
        assert!(Error::Config("bad".into()).is_config());
        assert!(Error::from(ferry_engine::Error::InvalidTargetVersion(0)).is_config());
        assert!(!Error::NotEnabled.is_config());
        assert!(!Error::from(ferry_engine::Error::MissingMigration(2)).is_config());
    }
}
