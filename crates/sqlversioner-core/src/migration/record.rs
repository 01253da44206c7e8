use chrono::{DateTime, Utc};

use super::Version;

/// One migration, either discovered on disk or read back from history.
///
/// Discovered records have no `install_order` or `installed_at`; the history
/// store fills both in when the migration is recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationRecord {
    /// Store-assigned, monotonically increasing position in the history.
    pub install_order: Option<i64>,
    pub version: Version,
    pub description: String,
    /// Path of the script the migration was read from.
    pub script: String,
    /// Hex-encoded MD5 digest of the script bytes.
    pub checksum: String,
    pub installed_at: Option<DateTime<Utc>>,
}

impl MigrationRecord {
    /// Create an unpersisted candidate.
    pub fn candidate(
        version: Version,
        description: impl Into<String>,
        script: impl Into<String>,
        checksum: impl Into<String>,
    ) -> Self {
        Self {
            install_order: None,
            version,
            description: description.into(),
            script: script.into(),
            checksum: checksum.into(),
            installed_at: None,
        }
    }

    /// Copy of this candidate as the store records it.
    pub fn persisted(&self, install_order: i64, installed_at: DateTime<Utc>) -> Self {
        Self {
            install_order: Some(install_order),
            installed_at: Some(installed_at),
            ..self.clone()
        }
    }

    pub fn is_persisted(&self) -> bool {
        self.install_order.is_some()
    }
}

impl std::fmt::Display for MigrationRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "V{} {}", self.version, self.description)
    }
}
