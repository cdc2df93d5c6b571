//! Error types for the Ferry engine.

use crate::SchemaVersion;
use thiserror::Error;

/// All possible errors from the Ferry engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Configuration errors
    #[error("invalid target version: {0} (versions start at 1)")]
    InvalidTargetVersion(SchemaVersion),

    #[error("invalid migration version: {0} (transforms are registered for versions 2 and up)")]
    InvalidMigrationVersion(SchemaVersion),

    #[error("unknown conflict resolution policy: {0}")]
    UnknownPolicy(String),

    // Migration errors
    #[error("cannot downgrade data from version {from} to version {to}")]
    Downgrade {
        from: SchemaVersion,
        to: SchemaVersion,
    },

    #[error("missing migration step for version {0}")]
    MissingMigration(SchemaVersion),

    #[error("migration to version {0} did not produce a sequence of items")]
    NotASequence(SchemaVersion),

    #[error("migration to version {version} failed: {reason}")]
    MigrationFailed {
        version: SchemaVersion,
        reason: String,
    },

    // Data errors
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    #[error("invalid record set: {0}")]
    InvalidRecordSet(String),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = Error::Downgrade { from: 3, to: 2 };
        assert_eq!(
            err.to_string(),
            "cannot downgrade data from version 3 to version 2"
        );

        let err = Error::MissingMigration(4);
        assert_eq!(err.to_string(), "missing migration step for version 4");

        let err = Error::MigrationFailed {
            version: 2,
            reason: "boom".into(),
        };
        assert_eq!(err.to_string(), "migration to version 2 failed: boom");
    }
}
