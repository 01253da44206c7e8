//! Migration script discovery.
//!
//! Scripts are named `V<version>__<description>.sql`. The `V` prefix and the
//! `.sql` suffix are case-insensitive; underscores in the version become dots
//! and underscores in the description become spaces.

use std::path::{Path, PathBuf};

use md5::{Digest, Md5};
use tracing::debug;

use sqlversioner_core::error::{Result, VersionerError};
use sqlversioner_core::migration::{MigrationRecord, Version};

/// Scans a directory for migration scripts.
#[derive(Debug, Clone)]
pub struct ScriptRepository {
    dir: PathBuf,
}

impl ScriptRepository {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// List candidate migrations, sorted ascending by version.
    ///
    /// Files that do not follow the naming convention are ignored. A file that
    /// does but carries a malformed version fails the whole scan. Duplicate
    /// versions are kept side by side; see [`ensure_unique_versions`].
    pub fn discover(&self) -> Result<Vec<MigrationRecord>> {
        if !self.dir.is_dir() {
            return Err(VersionerError::Config(format!(
                "Migrations directory not found: {}",
                self.dir.display()
            )));
        }

        let mut migrations = Vec::new();

        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }

            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                debug!("Skipping non UTF-8 file name: {:?}", file_name);
                continue;
            };

            let Some((version, description)) = parse_file_name(name)? else {
                debug!("Ignoring {}: not a migration script", name);
                continue;
            };

            let bytes = std::fs::read(&path)?;

            migrations.push(MigrationRecord::candidate(
                version,
                description,
                path.display().to_string(),
                checksum(&bytes),
            ));
        }

        migrations.sort_by(|a, b| a.version.cmp(&b.version).then_with(|| a.script.cmp(&b.script)));

        debug!(
            "Discovered {} migrations in {}",
            migrations.len(),
            self.dir.display()
        );
        Ok(migrations)
    }
}

/// Split a file name into version and description.
///
/// Returns `Ok(None)` for files that are not migration scripts. A name that
/// starts like one (`V` and a digit) but has no `__` separator is an error,
/// since ignoring it would strand the script below later versions.
pub fn parse_file_name(name: &str) -> Result<Option<(Version, String)>> {
    let lower = name.to_ascii_lowercase();
    if !lower.starts_with('v') || !lower.ends_with(".sql") || name.len() < 5 {
        return Ok(None);
    }

    let stem = &name[1..name.len() - 4];
    let Some((version, description)) = stem.split_once("__") else {
        if stem.starts_with(|c: char| c.is_ascii_digit()) {
            return Err(VersionerError::Parse {
                input: name.to_string(),
                reason: "missing `__` between version and description".to_string(),
            });
        }
        return Ok(None);
    };

    let version = Version::parse(version).map_err(|e| match e {
        VersionerError::Parse { input, reason } => VersionerError::Parse {
            input,
            reason: format!("{} (in file name {})", reason, name),
        },
        other => other,
    })?;

    Ok(Some((version, description.replace('_', " "))))
}

/// Hex-encoded MD5 digest of a script's raw bytes.
pub fn checksum(bytes: &[u8]) -> String {
    hex::encode(Md5::digest(bytes))
}

/// Fail if two candidates share a version. Expects sorted input.
pub fn ensure_unique_versions(migrations: &[MigrationRecord]) -> Result<()> {
    for pair in migrations.windows(2) {
        if pair[0].version == pair[1].version {
            return Err(VersionerError::DuplicateVersion {
                version: pair[0].version.clone(),
                first: PathBuf::from(&pair[0].script),
                second: PathBuf::from(&pair[1].script),
            });
        }
    }
    Ok(())
}

/// Read a candidate's SQL for execution.
///
/// The bytes must still hash to the checksum computed at discovery time.
pub fn load_script(migration: &MigrationRecord) -> Result<String> {
    let apply_error = |reason: String| VersionerError::Apply {
        version: migration.version.clone(),
        reason,
    };

    let bytes = std::fs::read(&migration.script)
        .map_err(|e| apply_error(format!("cannot read {}: {}", migration.script, e)))?;

    if checksum(&bytes) != migration.checksum {
        return Err(apply_error(format!(
            "{} changed since it was discovered",
            migration.script
        )));
    }

    let sql = String::from_utf8(bytes)
        .map_err(|_| apply_error(format!("{} is not valid UTF-8", migration.script)))?;

    if sql.trim().is_empty() {
        return Err(apply_error("script is empty".to_string()));
    }

    Ok(sql)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_parse_file_name() {
        let (version, description) = parse_file_name("V1_2__create_users_table.sql")
            .unwrap()
            .unwrap();
        assert_eq!(version.to_string(), "1.2");
        assert_eq!(description, "create users table");
    }

    #[test]
    fn test_parse_file_name_case_insensitive() {
        assert!(parse_file_name("v3__seed.SQL").unwrap().is_some());
        assert!(parse_file_name("V3__seed.Sql").unwrap().is_some());
    }

    #[test]
    fn test_parse_file_name_ignores_non_migrations() {
        for name in ["readme.md", "0001_init.sql", "V1__init.sql.bak", "views.sql", "v.sql"] {
            assert!(parse_file_name(name).unwrap().is_none(), "{}", name);
        }
    }

    #[test]
    fn test_parse_file_name_malformed_version() {
        let err = parse_file_name("V1_x__broken.sql").unwrap_err();
        match err {
            VersionerError::Parse { reason, .. } => assert!(reason.contains("V1_x__broken.sql")),
            other => panic!("unexpected error: {other}"),
        }
        assert!(parse_file_name("V__nothing.sql").is_err());
    }

    #[test]
    fn test_parse_file_name_missing_separator() {
        let err = parse_file_name("V2_add_users.sql").unwrap_err();
        match err {
            VersionerError::Parse { input, reason } => {
                assert_eq!(input, "V2_add_users.sql");
                assert!(reason.contains("__"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(parse_file_name("v10.sql").is_err());
        assert!(parse_file_name("views.sql").unwrap().is_none());
    }

    #[test]
    fn test_discover_fails_on_missing_separator() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("V1__a.sql"), "SELECT 1;").unwrap();
        fs::write(dir.path().join("V2_add_users.sql"), "SELECT 2;").unwrap();
        fs::write(dir.path().join("V3__c.sql"), "SELECT 3;").unwrap();

        let err = ScriptRepository::new(dir.path()).discover().unwrap_err();
        assert!(matches!(err, VersionerError::Parse { .. }));
    }

    #[test]
    fn test_checksum_is_md5_hex() {
        assert_eq!(checksum(b""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(checksum(b"SELECT 1;").len(), 32);
        assert_ne!(checksum(b"SELECT 1;"), checksum(b"SELECT 2;"));
    }

    #[test]
    fn test_discover_sorts_numerically() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("V10__ten.sql"), "SELECT 10;").unwrap();
        fs::write(dir.path().join("V2__two.sql"), "SELECT 2;").unwrap();
        fs::write(dir.path().join("V1_10__one_ten.sql"), "SELECT 110;").unwrap();
        fs::write(dir.path().join("V1_2__one_two.sql"), "SELECT 12;").unwrap();

        let found = ScriptRepository::new(dir.path()).discover().unwrap();
        let versions: Vec<String> = found.iter().map(|m| m.version.to_string()).collect();
        assert_eq!(versions, vec!["1.2", "1.10", "2", "10"]);
        assert_eq!(found[0].description, "one two");
        assert_eq!(found[0].checksum, checksum(b"SELECT 12;"));
        assert!(found.iter().all(|m| !m.is_persisted()));
    }

    #[test]
    fn test_discover_ignores_other_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("V1__init.sql"), "SELECT 1;").unwrap();
        fs::write(dir.path().join("notes.txt"), "hello").unwrap();
        fs::write(dir.path().join("V1__init.sql.bak"), "old").unwrap();
        fs::create_dir(dir.path().join("V2__dir.sql")).unwrap();

        let found = ScriptRepository::new(dir.path()).discover().unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].version.to_string(), "1");
    }

    #[test]
    fn test_discover_fails_on_malformed_version() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("V1__ok.sql"), "SELECT 1;").unwrap();
        fs::write(dir.path().join("Vone__bad.sql"), "SELECT 1;").unwrap();

        let err = ScriptRepository::new(dir.path()).discover().unwrap_err();
        assert!(matches!(err, VersionerError::Parse { .. }));
    }

    #[test]
    fn test_discover_missing_directory() {
        let err = ScriptRepository::new("/nonexistent/migrations").discover().unwrap_err();
        assert!(matches!(err, VersionerError::Config(_)));
    }

    #[test]
    fn test_duplicate_versions_detected() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("V1_0__a.sql"), "SELECT 1;").unwrap();
        fs::write(dir.path().join("V1_00__b.sql"), "SELECT 2;").unwrap();

        let found = ScriptRepository::new(dir.path()).discover().unwrap();
        assert_eq!(found.len(), 2);
        let err = ensure_unique_versions(&found).unwrap_err();
        match err {
            VersionerError::DuplicateVersion { version, .. } => {
                assert_eq!(version.to_string(), "1.0")
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_load_script_detects_change() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("V1__init.sql");
        fs::write(&path, "CREATE TABLE a (id INT);").unwrap();

        let found = ScriptRepository::new(dir.path()).discover().unwrap();
        assert_eq!(load_script(&found[0]).unwrap(), "CREATE TABLE a (id INT);");

        fs::write(&path, "CREATE TABLE b (id INT);").unwrap();
        let err = load_script(&found[0]).unwrap_err();
        assert!(matches!(err, VersionerError::Apply { .. }));
    }

    #[test]
    fn test_load_script_rejects_empty() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("V1__empty.sql"), "  \n").unwrap();

        let found = ScriptRepository::new(dir.path()).discover().unwrap();
        let err = load_script(&found[0]).unwrap_err();
        assert!(err.to_string().contains("empty"));
    }
}
