use std::str::FromStr;

use chrono::NaiveDateTime;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqliteRow};
use sqlx::{Connection, Row};
use tracing::debug;

use sqlversioner_core::config::DatabaseConfig;
use sqlversioner_core::error::{Result, VersionerError};
use sqlversioner_core::migration::{MigrationRecord, Version};
use sqlversioner_core::store::{BoxFuture, HistoryStore, InitOutcome};

use super::{apply_error, ensure_not_recorded, history_record, with_connect_timeout};

/// Columns selected for every history read, in this order.
const HISTORY_COLUMNS: &str = "install_order, version, description, script, checksum, installed_on";

/// History store backed by SQLite.
///
/// SQLite serializes writers itself, so no extra migration lock is taken.
pub struct SqliteHistoryStore {
    conn: SqliteConnection,
    table: String,
}

impl SqliteHistoryStore {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let options = connect_options(config)?;
        let conn = with_connect_timeout(
            config.connect_timeout_secs,
            SqliteConnection::connect_with(&options),
        )
        .await?;

        Ok(Self {
            conn,
            table: config.history_table.clone(),
        })
    }

    /// Table name without a schema qualifier, as stored in `sqlite_master`.
    fn bare_table_name(&self) -> &str {
        self.table.rsplit('.').next().unwrap_or(&self.table)
    }
}

fn connect_options(config: &DatabaseConfig) -> Result<SqliteConnectOptions> {
    let options = match config.url.as_deref().filter(|u| !u.trim().is_empty()) {
        Some(url) => SqliteConnectOptions::from_str(url)
            .map_err(|e| VersionerError::Config(format!("Invalid sqlite url: {}", e)))?,
        None => {
            let path = config.path.as_deref().ok_or_else(|| {
                VersionerError::Config("sqlite connector requires `url` or `path`".into())
            })?;
            SqliteConnectOptions::new().filename(path)
        }
    };
    Ok(options.create_if_missing(true))
}

fn row_to_record(row: &SqliteRow) -> Result<MigrationRecord> {
    let version: String = row.try_get("version")?;
    // CURRENT_TIMESTAMP is UTC
    let installed_on: NaiveDateTime = row.try_get("installed_on")?;
    history_record(
        row.try_get("install_order")?,
        &version,
        row.try_get("description")?,
        row.try_get("script")?,
        row.try_get("checksum")?,
        installed_on.and_utc(),
    )
}

impl HistoryStore for SqliteHistoryStore {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    fn initialize(&mut self) -> BoxFuture<'_, Result<InitOutcome>> {
        Box::pin(async move {
            let name = self.bare_table_name().to_string();
            let count: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
            )
            .bind(&name)
            .fetch_one(&mut self.conn)
            .await?;

            if count > 0 {
                debug!("History table {} already exists", self.table);
                return Ok(InitOutcome::AlreadyInitialized);
            }

            let ddl = format!(
                r#"
                CREATE TABLE IF NOT EXISTS {} (
                    install_order INTEGER PRIMARY KEY AUTOINCREMENT,
                    version TEXT NOT NULL UNIQUE,
                    description TEXT NOT NULL,
                    script TEXT NOT NULL,
                    checksum TEXT NOT NULL,
                    installed_on DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
                )
                "#,
                self.table
            );
            sqlx::query(&ddl).execute(&mut self.conn).await.map_err(|e| {
                VersionerError::Database(format!("Failed to create history table: {}", e))
            })?;

            Ok(InitOutcome::Created)
        })
    }

    fn last_applied(&mut self) -> BoxFuture<'_, Result<Option<MigrationRecord>>> {
        Box::pin(async move {
            let sql = format!(
                "SELECT {} FROM {} ORDER BY install_order DESC LIMIT 1",
                HISTORY_COLUMNS, self.table
            );
            let row = sqlx::query(&sql).fetch_optional(&mut self.conn).await?;
            row.as_ref().map(row_to_record).transpose()
        })
    }

    fn find_by_version<'a>(
        &'a mut self,
        version: &'a Version,
    ) -> BoxFuture<'a, Result<Option<MigrationRecord>>> {
        Box::pin(async move {
            let records = self.applied().await?;
            Ok(records.into_iter().find(|r| &r.version == version))
        })
    }

    fn applied(&mut self) -> BoxFuture<'_, Result<Vec<MigrationRecord>>> {
        Box::pin(async move {
            let sql = format!(
                "SELECT {} FROM {} ORDER BY install_order ASC",
                HISTORY_COLUMNS, self.table
            );
            let rows = sqlx::query(&sql).fetch_all(&mut self.conn).await?;
            rows.iter().map(row_to_record).collect()
        })
    }

    fn apply<'a>(
        &'a mut self,
        candidate: &'a MigrationRecord,
        sql: &'a str,
    ) -> BoxFuture<'a, Result<MigrationRecord>> {
        Box::pin(async move {
            let insert = format!(
                "INSERT INTO {} (version, description, script, checksum) \
                 VALUES (?, ?, ?, ?) RETURNING {}",
                self.table, HISTORY_COLUMNS
            );

            let mut tx = self
                .conn
                .begin()
                .await
                .map_err(|e| apply_error(candidate, "failed to begin transaction", e))?;

            let recorded: Vec<String> =
                sqlx::query_scalar(&format!("SELECT version FROM {}", self.table))
                    .fetch_all(&mut *tx)
                    .await
                    .map_err(|e| apply_error(candidate, "failed to read history", e))?;
            ensure_not_recorded(candidate, &recorded)?;

            sqlx::Executor::execute(tx.as_mut(), sqlx::raw_sql(sql))
                .await
                .map_err(|e| apply_error(candidate, "script failed", e))?;

            let row = sqlx::query(&insert)
                .bind(candidate.version.to_string())
                .bind(&candidate.description)
                .bind(&candidate.script)
                .bind(&candidate.checksum)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| apply_error(candidate, "failed to record history", e))?;
            let record = row_to_record(&row)?;

            tx.commit()
                .await
                .map_err(|e| apply_error(candidate, "failed to commit", e))?;

            Ok(record)
        })
    }

    fn close(self: Box<Self>) -> BoxFuture<'static, Result<()>> {
        Box::pin(async move {
            self.conn
                .close()
                .await
                .map_err(|e| VersionerError::Connection(format!("Failed to close: {}", e)))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations::{Reconciler, RunOutcome, ScriptRepository};
    use sqlversioner_core::config::Connector;

    async fn memory_store() -> SqliteHistoryStore {
        let config = DatabaseConfig::with_url(Connector::Sqlite, "sqlite::memory:");
        SqliteHistoryStore::connect(&config).await.unwrap()
    }

    fn candidate(version: &str, checksum: &str) -> MigrationRecord {
        MigrationRecord::candidate(
            Version::parse(version).unwrap(),
            format!("migration {}", version),
            format!("migrations/V{}__m.sql", version),
            checksum,
        )
    }

    async fn insert_raw_row(store: &mut SqliteHistoryStore, version: &str, checksum: &str) {
        sqlx::query(
            "INSERT INTO sql_versioner (version, description, script, checksum) \
             VALUES (?, 'seeded', 'seeded.sql', ?)",
        )
        .bind(version)
        .bind(checksum)
        .execute(&mut store.conn)
        .await
        .unwrap();
    }

    async fn table_exists(store: &mut SqliteHistoryStore, name: &str) -> bool {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?")
                .bind(name)
                .fetch_one(&mut store.conn)
                .await
                .unwrap();
        count > 0
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let mut store = memory_store().await;
        assert_eq!(store.initialize().await.unwrap(), InitOutcome::Created);
        assert_eq!(
            store.initialize().await.unwrap(),
            InitOutcome::AlreadyInitialized
        );
        assert!(table_exists(&mut store, "sql_versioner").await);
    }

    #[tokio::test]
    async fn test_apply_records_history() {
        let mut store = memory_store().await;
        store.initialize().await.unwrap();
        assert!(store.last_applied().await.unwrap().is_none());

        let first = store
            .apply(&candidate("1.0", "aaa"), "CREATE TABLE a (id INTEGER); INSERT INTO a VALUES (1);")
            .await
            .unwrap();
        let second = store
            .apply(&candidate("2.0", "bbb"), "CREATE TABLE b (id INTEGER);")
            .await
            .unwrap();

        assert_eq!(first.install_order, Some(1));
        assert_eq!(second.install_order, Some(2));
        assert!(first.installed_at.is_some());
        assert_eq!(first.checksum, "aaa");

        let last = store.last_applied().await.unwrap().unwrap();
        assert_eq!(last.version, Version::parse("2.0").unwrap());

        let found = store
            .find_by_version(&Version::parse("1.0").unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.description, "migration 1.0");
        assert!(store
            .find_by_version(&Version::parse("3.0").unwrap())
            .await
            .unwrap()
            .is_none());

        let all = store.applied().await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(table_exists(&mut store, "a").await);
    }

    #[tokio::test]
    async fn test_failed_apply_rolls_back_everything() {
        let mut store = memory_store().await;
        store.initialize().await.unwrap();

        let err = store
            .apply(
                &candidate("1.0", "aaa"),
                "CREATE TABLE partial (id INTEGER); INSERT INTO missing VALUES (1);",
            )
            .await
            .unwrap_err();

        assert!(matches!(err, VersionerError::Apply { .. }));
        assert!(!table_exists(&mut store, "partial").await);
        assert!(store.applied().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_equal_version_rejected() {
        let mut store = memory_store().await;
        store.initialize().await.unwrap();

        store
            .apply(&candidate("1.0", "aaa"), "CREATE TABLE x (id INTEGER);")
            .await
            .unwrap();
        let err = store
            .apply(&candidate("1.00", "aaa"), "CREATE TABLE y (id INTEGER);")
            .await
            .unwrap_err();

        assert!(matches!(err, VersionerError::Apply { .. }));
        assert!(err.to_string().contains("already recorded"));
        assert!(!table_exists(&mut store, "y").await);
        assert_eq!(store.applied().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_non_canonical_history_row_matches_by_version() {
        let mut store = memory_store().await;
        store.initialize().await.unwrap();
        insert_raw_row(&mut store, "1.01", "aaa").await;

        let found = store
            .find_by_version(&Version::parse("1.1").unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.checksum, "aaa");

        let err = store
            .apply(&candidate("1.1", "bbb"), "CREATE TABLE z (id INTEGER);")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("1.01"));
        assert!(!table_exists(&mut store, "z").await);
    }

    #[tokio::test]
    async fn test_custom_history_table() {
        let mut config = DatabaseConfig::with_url(Connector::Sqlite, "sqlite::memory:");
        config.history_table = "schema_history".into();
        let mut store = SqliteHistoryStore::connect(&config).await.unwrap();

        store.initialize().await.unwrap();
        assert!(table_exists(&mut store, "schema_history").await);
        assert!(!table_exists(&mut store, "sql_versioner").await);
    }

    #[tokio::test]
    async fn test_reads_before_initialize_fail() {
        let mut store = memory_store().await;
        assert!(store.last_applied().await.is_err());
    }

    fn scripts(files: &[(&str, &str)]) -> tempfile::TempDir {
        let dir = tempfile::TempDir::new().unwrap();
        for (name, sql) in files {
            std::fs::write(dir.path().join(name), sql).unwrap();
        }
        dir
    }

    #[tokio::test]
    async fn test_reconciler_stops_at_failing_script() {
        let dir = scripts(&[
            ("V1__first.sql", "CREATE TABLE first (id INTEGER);"),
            (
                "V2__second.sql",
                "CREATE TABLE second (id INTEGER); INSERT INTO missing VALUES (1);",
            ),
            ("V3__third.sql", "CREATE TABLE third (id INTEGER);"),
        ]);
        let mut store = memory_store().await;

        let mut reconciler = Reconciler::new(&mut store, ScriptRepository::new(dir.path()));
        reconciler.initialize().await.unwrap();
        let report = reconciler.migrate().await.unwrap();

        match &report.outcome {
            RunOutcome::Failed { version, error } => {
                assert_eq!(version, &Version::parse("2").unwrap());
                assert!(matches!(error, VersionerError::Apply { .. }));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(report.applied.len(), 1);

        let rows = store.applied().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].version, Version::parse("1").unwrap());
        assert!(table_exists(&mut store, "first").await);
        assert!(!table_exists(&mut store, "second").await);
        assert!(!table_exists(&mut store, "third").await);
    }

    #[tokio::test]
    async fn test_reconciler_checks_non_canonical_history_rows() {
        let dir = scripts(&[("V1_01__a.sql", "CREATE TABLE a (id INTEGER); -- edited")]);
        let mut store = memory_store().await;
        store.initialize().await.unwrap();
        insert_raw_row(&mut store, "1.01", "00000000000000000000000000000000").await;

        let err = Reconciler::new(&mut store, ScriptRepository::new(dir.path()))
            .migrate()
            .await
            .unwrap_err();

        assert!(matches!(err, VersionerError::Integrity { .. }));
        assert_eq!(store.applied().await.unwrap().len(), 1);
        assert!(!table_exists(&mut store, "a").await);
    }
}
