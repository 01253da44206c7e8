use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;

use sqlversioner_core::error::{Result, VersionerError};
use sqlversioner_core::migration::{MigrationRecord, Version};
use sqlversioner_core::store::{BoxFuture, HistoryStore, InitOutcome};

/// In-memory history store.
///
/// Applies are atomic: a failing apply leaves no row and no executed script.
/// Failures can be injected per version.
#[derive(Debug, Default)]
pub struct MemoryHistoryStore {
    initialized: bool,
    rows: Vec<MigrationRecord>,
    next_install_order: i64,
    executed: Vec<String>,
    apply_calls: usize,
    failures: HashMap<Version, String>,
    locked: bool,
    lock_count: usize,
    closed: Arc<AtomicBool>,
}

impl MemoryHistoryStore {
    /// An initialized, empty store.
    pub fn new() -> Self {
        Self {
            initialized: true,
            next_install_order: 1,
            ..Default::default()
        }
    }

    /// A store whose history table has not been created yet.
    pub fn uninitialized() -> Self {
        Self {
            next_install_order: 1,
            ..Default::default()
        }
    }

    /// Insert a history row directly, bypassing `apply`.
    pub fn seed(&mut self, version: &str, checksum: &str) -> MigrationRecord {
        let candidate = MigrationRecord::candidate(
            Version::parse(version).unwrap_or_else(|e| panic!("bad seed version: {e}")),
            format!("seeded {}", version),
            format!("V{}__seeded.sql", version),
            checksum,
        );
        self.record(&candidate)
    }

    /// Make `apply` fail for this version.
    pub fn fail_on(&mut self, version: &str, reason: &str) {
        let version = Version::parse(version).unwrap_or_else(|e| panic!("bad version: {e}"));
        self.failures.insert(version, reason.to_string());
    }

    pub fn rows(&self) -> &[MigrationRecord] {
        &self.rows
    }

    /// SQL of every successfully applied script, in order.
    pub fn executed(&self) -> &[String] {
        &self.executed
    }

    pub fn apply_calls(&self) -> usize {
        self.apply_calls
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn lock_count(&self) -> usize {
        self.lock_count
    }

    /// Set once `close` has run. Outlives the store, which `close` consumes.
    pub fn closed_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.closed)
    }

    fn record(&mut self, candidate: &MigrationRecord) -> MigrationRecord {
        let stored = candidate.persisted(self.next_install_order, Utc::now());
        self.next_install_order += 1;
        self.rows.push(stored.clone());
        stored
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.initialized {
            Ok(())
        } else {
            Err(VersionerError::Database(
                "history table does not exist".to_string(),
            ))
        }
    }
}

impl HistoryStore for MemoryHistoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    fn initialize(&mut self) -> BoxFuture<'_, Result<InitOutcome>> {
        Box::pin(async move {
            if self.initialized {
                return Ok(InitOutcome::AlreadyInitialized);
            }
            self.initialized = true;
            Ok(InitOutcome::Created)
        })
    }

    fn last_applied(&mut self) -> BoxFuture<'_, Result<Option<MigrationRecord>>> {
        Box::pin(async move {
            self.ensure_initialized()?;
            Ok(self.rows.iter().max_by_key(|r| r.install_order).cloned())
        })
    }

    fn find_by_version<'a>(
        &'a mut self,
        version: &'a Version,
    ) -> BoxFuture<'a, Result<Option<MigrationRecord>>> {
        Box::pin(async move {
            self.ensure_initialized()?;
            Ok(self.rows.iter().find(|r| &r.version == version).cloned())
        })
    }

    fn applied(&mut self) -> BoxFuture<'_, Result<Vec<MigrationRecord>>> {
        Box::pin(async move {
            self.ensure_initialized()?;
            let mut rows = self.rows.clone();
            rows.sort_by_key(|r| r.install_order);
            Ok(rows)
        })
    }

    fn apply<'a>(
        &'a mut self,
        candidate: &'a MigrationRecord,
        sql: &'a str,
    ) -> BoxFuture<'a, Result<MigrationRecord>> {
        Box::pin(async move {
            self.apply_calls += 1;
            self.ensure_initialized()?;

            if let Some(reason) = self.failures.get(&candidate.version) {
                return Err(VersionerError::Apply {
                    version: candidate.version.clone(),
                    reason: reason.clone(),
                });
            }
            if self.rows.iter().any(|r| r.version == candidate.version) {
                return Err(VersionerError::Apply {
                    version: candidate.version.clone(),
                    reason: "version already recorded".to_string(),
                });
            }

            self.executed.push(sql.to_string());
            Ok(self.record(candidate))
        })
    }

    fn lock(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if self.locked {
                return Err(VersionerError::Database("lock already held".to_string()));
            }
            self.locked = true;
            self.lock_count += 1;
            Ok(())
        })
    }

    fn unlock(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.locked = false;
            Ok(())
        })
    }

    fn close(self: Box<Self>) -> BoxFuture<'static, Result<()>> {
        self.closed.store(true, Ordering::SeqCst);
        Box::pin(async { Ok(()) })
    }
}
