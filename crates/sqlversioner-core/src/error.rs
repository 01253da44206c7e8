use std::path::PathBuf;

use thiserror::Error;

use crate::migration::Version;

/// Core error type for sqlversioner operations.
#[derive(Error, Debug)]
pub enum VersionerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid version '{input}': {reason}")]
    Parse { input: String, reason: String },

    #[error("Duplicate migration version {version}: {} and {}", .first.display(), .second.display())]
    DuplicateVersion {
        version: Version,
        first: PathBuf,
        second: PathBuf,
    },

    #[error(
        "Checksum mismatch for migration {version}: recorded {stored}, script has {candidate}"
    )]
    Integrity {
        version: Version,
        stored: String,
        candidate: String,
    },

    #[error("Migration {version} failed: {reason}")]
    Apply { version: Version, reason: String },

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),
}

impl VersionerError {
    /// The migration version this error is about, if any.
    pub fn version(&self) -> Option<&Version> {
        match self {
            Self::DuplicateVersion { version, .. }
            | Self::Integrity { version, .. }
            | Self::Apply { version, .. } => Some(version),
            _ => None,
        }
    }
}

/// Result type alias using VersionerError.
pub type Result<T> = std::result::Result<T, VersionerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integrity_message_names_both_checksums() {
        let err = VersionerError::Integrity {
            version: Version::parse("1.0").unwrap(),
            stored: "aaa".into(),
            candidate: "bbb".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("1.0"));
        assert!(msg.contains("aaa"));
        assert!(msg.contains("bbb"));
    }

    #[test]
    fn test_version_accessor() {
        let err = VersionerError::Apply {
            version: Version::parse("2").unwrap(),
            reason: "syntax error".into(),
        };
        assert_eq!(err.version().map(|v| v.to_string()), Some("2".to_string()));
        assert!(VersionerError::Config("x".into()).version().is_none());
    }
}
