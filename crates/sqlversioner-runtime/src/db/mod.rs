//! Database adapters implementing [`HistoryStore`].

mod postgres;
mod sqlite;

pub use postgres::PostgresHistoryStore;
pub use sqlite::SqliteHistoryStore;

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::info;

use sqlversioner_core::config::{Connector, DatabaseConfig};
use sqlversioner_core::error::{Result, VersionerError};
use sqlversioner_core::migration::{MigrationRecord, Version};
use sqlversioner_core::store::HistoryStore;

/// Open a history store for the configured connector.
pub async fn connect(config: &DatabaseConfig) -> Result<Box<dyn HistoryStore>> {
    config.validate()?;

    let store: Box<dyn HistoryStore> = match config.connector {
        Connector::Postgres => Box::new(PostgresHistoryStore::connect(config).await?),
        Connector::Sqlite => Box::new(SqliteHistoryStore::connect(config).await?),
    };

    info!(
        "Connected to {} (history table {})",
        config.connector.as_str(),
        config.history_table
    );
    Ok(store)
}

/// Await a connection attempt, failing after `timeout_secs`.
async fn with_connect_timeout<T, F>(timeout_secs: u64, fut: F) -> Result<T>
where
    F: Future<Output = sqlx::Result<T>>,
{
    match tokio::time::timeout(Duration::from_secs(timeout_secs), fut).await {
        Ok(Ok(conn)) => Ok(conn),
        Ok(Err(e)) => Err(VersionerError::Connection(e.to_string())),
        Err(_) => Err(VersionerError::Connection(format!(
            "timed out after {}s",
            timeout_secs
        ))),
    }
}

fn history_record(
    install_order: i64,
    version: &str,
    description: String,
    script: String,
    checksum: String,
    installed_on: DateTime<Utc>,
) -> Result<MigrationRecord> {
    let version = Version::parse(version)?;
    let candidate = MigrationRecord::candidate(version, description, script, checksum);
    Ok(candidate.persisted(install_order, installed_on))
}

/// Reject a candidate whose version equals one already in history.
///
/// Stored versions are compared parsed, since rows may hold a non-canonical
/// spelling such as `1.01`.
fn ensure_not_recorded(candidate: &MigrationRecord, recorded: &[String]) -> Result<()> {
    for raw in recorded {
        if Version::parse(raw)? == candidate.version {
            return Err(VersionerError::Apply {
                version: candidate.version.clone(),
                reason: format!("version already recorded as {}", raw),
            });
        }
    }
    Ok(())
}

fn apply_error(candidate: &MigrationRecord, context: &str, e: sqlx::Error) -> VersionerError {
    VersionerError::Apply {
        version: candidate.version.clone(),
        reason: format!("{}: {}", context, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_not_recorded_compares_parsed_versions() {
        let candidate =
            MigrationRecord::candidate(Version::parse("1.1").unwrap(), "a", "V1_1__a.sql", "x");

        assert!(ensure_not_recorded(&candidate, &["1.0".into(), "1.10".into()]).is_ok());

        let err = ensure_not_recorded(&candidate, &["1.0".into(), "1.01".into()]).unwrap_err();
        assert!(matches!(err, VersionerError::Apply { .. }));
        assert!(err.to_string().contains("1.01"));
    }
}
