use serde::{Deserialize, Serialize};

use crate::error::{Result, VersionerError};

/// Supported database engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Connector {
    #[serde(
        rename = "postgres",
        alias = "postgresql",
        alias = "PostgresqlConnector"
    )]
    Postgres,
    #[serde(rename = "sqlite", alias = "SqliteConnector")]
    Sqlite,
}

impl Connector {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::Sqlite => "sqlite",
        }
    }
}

/// Database configuration.
///
/// Either `url` or the discrete connection parameters must be given.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Which engine adapter to use.
    pub connector: Connector,

    /// Full connection URL. Takes precedence over discrete parameters.
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default)]
    pub host: Option<String>,

    #[serde(default)]
    pub port: Option<u16>,

    #[serde(default, alias = "username")]
    pub user: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default, alias = "database")]
    pub dbname: Option<String>,

    /// Database file (SQLite only).
    #[serde(default)]
    pub path: Option<String>,

    /// Seconds to wait for the initial connection.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Name of the migration history table, optionally schema-qualified.
    #[serde(default = "default_history_table")]
    pub history_table: String,

    /// Advisory lock key held while migrating (Postgres only).
    #[serde(default = "default_lock_id")]
    pub lock_id: i64,
}

impl DatabaseConfig {
    /// Configuration with defaults for the given connector and URL.
    pub fn with_url(connector: Connector, url: impl Into<String>) -> Self {
        Self {
            connector,
            url: Some(url.into()),
            host: None,
            port: None,
            user: None,
            password: None,
            dbname: None,
            path: None,
            connect_timeout_secs: default_connect_timeout(),
            history_table: default_history_table(),
            lock_id: default_lock_id(),
        }
    }

    /// Check that the parameters the connector needs are present.
    pub fn validate(&self) -> Result<()> {
        validate_table_name(&self.history_table)?;

        if self.url.as_deref().is_some_and(|u| !u.trim().is_empty()) {
            return Ok(());
        }

        match self.connector {
            Connector::Postgres => {
                if self.host.as_deref().map_or(true, str::is_empty) {
                    return Err(VersionerError::Config(
                        "postgres connector requires `url` or `host`".into(),
                    ));
                }
                if self.dbname.as_deref().map_or(true, str::is_empty) {
                    return Err(VersionerError::Config(
                        "postgres connector requires `url` or `dbname`".into(),
                    ));
                }
            }
            Connector::Sqlite => {
                if self.path.as_deref().map_or(true, str::is_empty) {
                    return Err(VersionerError::Config(
                        "sqlite connector requires `url` or `path`".into(),
                    ));
                }
            }
        }

        Ok(())
    }
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_history_table() -> String {
    "sql_versioner".to_string()
}

fn default_lock_id() -> i64 {
    0x5351_4C56 // "SQLV"
}

/// Table names are interpolated into DDL, so only plain identifiers pass.
fn validate_table_name(name: &str) -> Result<()> {
    let re = regex_lite::Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?$")
        .map_err(|e| VersionerError::Config(e.to_string()))?;
    if !re.is_match(name) {
        return Err(VersionerError::Config(format!(
            "invalid history table name '{}'",
            name
        )));
    }
    Ok(())
}
