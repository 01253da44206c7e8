use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnectOptions, PgConnection, PgRow};
use sqlx::{Connection, Row};
use tracing::debug;

use sqlversioner_core::config::DatabaseConfig;
use sqlversioner_core::error::{Result, VersionerError};
use sqlversioner_core::migration::{MigrationRecord, Version};
use sqlversioner_core::store::{BoxFuture, HistoryStore, InitOutcome};

use super::{apply_error, ensure_not_recorded, history_record, with_connect_timeout};

/// `installed_on` is a local `TIMESTAMP` written by `now()`, the way existing
/// history tables store it. Reads convert it through the session time zone.
const HISTORY_COLUMNS: &str = "install_order, version, description, script, checksum, \
     installed_on AT TIME ZONE current_setting('TimeZone') AS installed_on";

/// History store backed by PostgreSQL.
///
/// Holds a single session for the whole run, so the advisory lock taken in
/// `lock` is released by the same backend in `unlock`.
pub struct PostgresHistoryStore {
    conn: PgConnection,
    table: String,
    lock_id: i64,
}

impl PostgresHistoryStore {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let options = connect_options(config)?;
        let conn = with_connect_timeout(
            config.connect_timeout_secs,
            PgConnection::connect_with(&options),
        )
        .await?;

        Ok(Self {
            conn,
            table: config.history_table.clone(),
            lock_id: config.lock_id,
        })
    }
}

fn connect_options(config: &DatabaseConfig) -> Result<PgConnectOptions> {
    if let Some(url) = config.url.as_deref().filter(|u| !u.trim().is_empty()) {
        return url
            .parse::<PgConnectOptions>()
            .map_err(|e| VersionerError::Config(format!("Invalid postgres url: {}", e)));
    }

    let mut options = PgConnectOptions::new();
    if let Some(host) = &config.host {
        options = options.host(host);
    }
    if let Some(port) = config.port {
        options = options.port(port);
    }
    if let Some(user) = &config.user {
        options = options.username(user);
    }
    if let Some(password) = &config.password {
        options = options.password(password);
    }
    if let Some(dbname) = &config.dbname {
        options = options.database(dbname);
    }
    Ok(options)
}

/// Schema and table name as Postgres folds unquoted identifiers.
fn split_table_name(table: &str) -> (Option<String>, String) {
    match table.split_once('.') {
        Some((schema, name)) => (Some(schema.to_lowercase()), name.to_lowercase()),
        None => (None, table.to_lowercase()),
    }
}

fn create_table_sql(table: &str) -> String {
    format!(
        r#"
        CREATE TABLE IF NOT EXISTS {} (
            install_order SERIAL PRIMARY KEY,
            version VARCHAR(50) NOT NULL UNIQUE,
            description VARCHAR(200) NOT NULL,
            script VARCHAR(1000) NOT NULL,
            checksum VARCHAR(32) NOT NULL,
            installed_on TIMESTAMP NOT NULL DEFAULT now()
        )
        "#,
        table
    )
}

fn row_to_record(row: &PgRow) -> Result<MigrationRecord> {
    let install_order: i32 = row.try_get("install_order")?;
    let version: String = row.try_get("version")?;
    let installed_on: DateTime<Utc> = row.try_get("installed_on")?;
    history_record(
        i64::from(install_order),
        &version,
        row.try_get("description")?,
        row.try_get("script")?,
        row.try_get("checksum")?,
        installed_on,
    )
}

impl HistoryStore for PostgresHistoryStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    fn initialize(&mut self) -> BoxFuture<'_, Result<InitOutcome>> {
        Box::pin(async move {
            let (schema, name) = split_table_name(&self.table);
            let exists: bool = sqlx::query_scalar(
                "SELECT EXISTS (SELECT 1 FROM information_schema.tables \
                 WHERE table_schema = COALESCE($1::text, current_schema()) \
                 AND table_name = $2)",
            )
            .bind(schema)
            .bind(name)
            .fetch_one(&mut self.conn)
            .await?;

            if exists {
                debug!("History table {} already exists", self.table);
                return Ok(InitOutcome::AlreadyInitialized);
            }

            sqlx::query(&create_table_sql(&self.table)).execute(&mut self.conn).await.map_err(|e| {
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
                 VALUES ($1, $2, $3, $4) RETURNING {}",
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

    fn lock(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            debug!("Acquiring advisory lock {}", self.lock_id);
            sqlx::query("SELECT pg_advisory_lock($1)")
                .bind(self.lock_id)
                .execute(&mut self.conn)
                .await
                .map_err(|e| {
                    VersionerError::Database(format!("Failed to acquire migration lock: {}", e))
                })?;
            Ok(())
        })
    }

    fn unlock(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            sqlx::query("SELECT pg_advisory_unlock($1)")
                .bind(self.lock_id)
                .execute(&mut self.conn)
                .await
                .map_err(|e| {
                    VersionerError::Database(format!("Failed to release migration lock: {}", e))
                })?;
            Ok(())
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
