mod database;

pub use database::{Connector, DatabaseConfig};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Result, VersionerError};

/// Root configuration for sqlversioner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionerConfig {
    /// Database configuration.
    pub database: DatabaseConfig,

    /// Migration script location.
    #[serde(default)]
    pub migrations: MigrationsConfig,
}

impl VersionerConfig {
    /// Load configuration from a YAML or TOML file, chosen by extension.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            VersionerError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        debug!("Loading configuration from {}", path.display());
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::parse_toml(&content),
            _ => Self::parse_yaml(&content),
        }
    }

    /// Parse configuration from a YAML string.
    pub fn parse_yaml(content: &str) -> Result<Self> {
        let content = substitute_env_vars(content)?;
        let config: Self = serde_yaml::from_str(&content)
            .map_err(|e| VersionerError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse_toml(content: &str) -> Result<Self> {
        let content = substitute_env_vars(content)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| VersionerError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.database.validate()
    }
}

/// Migration script location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationsConfig {
    /// Directory scanned for `V<version>__<description>.sql` files.
    #[serde(default = "default_migrations_path")]
    pub path: PathBuf,
}

impl Default for MigrationsConfig {
    fn default() -> Self {
        Self {
            path: default_migrations_path(),
        }
    }
}

fn default_migrations_path() -> PathBuf {
    PathBuf::from("migrations")
}

/// Substitute environment variables in the format ${VAR_NAME}.
fn substitute_env_vars(content: &str) -> Result<String> {
    let re = regex_lite::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}")
        .map_err(|e| VersionerError::Config(e.to_string()))?;

    let mut result = content.to_string();
    for cap in re.captures_iter(content) {
        let var_name = &cap[1];
        if let Ok(value) = std::env::var(var_name) {
            result = result.replace(&cap[0], &value);
        }
    }

    Ok(result)
}
