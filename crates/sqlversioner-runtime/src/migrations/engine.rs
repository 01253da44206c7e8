//! The reconciliation engine.
//!
//! A run discovers candidate scripts, checks them against the recorded history,
//! computes the pending set and applies it one migration at a time. Each apply
//! is atomic on its own; the run as a whole stops at the first failure and
//! keeps whatever it applied before that.

use std::collections::HashMap;

use tracing::{debug, info, warn};

use sqlversioner_core::error::{Result, VersionerError};
use sqlversioner_core::migration::{MigrationRecord, Version};
use sqlversioner_core::store::{HistoryStore, InitOutcome};

use super::repository::{ensure_unique_versions, load_script, ScriptRepository};

/// How a migrate run ended.
#[derive(Debug)]
pub enum RunOutcome {
    /// Nothing was pending.
    UpToDate,
    /// Every pending migration was applied.
    Completed,
    /// Applying `version` failed; later migrations were not attempted.
    Failed {
        version: Version,
        error: VersionerError,
    },
}

/// Result of a migrate run.
#[derive(Debug)]
pub struct MigrationReport {
    /// Migrations applied in this run, in order, as recorded by the store.
    pub applied: Vec<MigrationRecord>,
    pub outcome: RunOutcome,
}

impl MigrationReport {
    pub fn is_success(&self) -> bool {
        !matches!(self.outcome, RunOutcome::Failed { .. })
    }

    /// Turn a stopped-early run into an error.
    pub fn into_result(self) -> Result<Vec<MigrationRecord>> {
        match self.outcome {
            RunOutcome::Failed { error, .. } => Err(error),
            _ => Ok(self.applied),
        }
    }
}

/// A candidate whose checksum differs from the recorded one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumDrift {
    pub version: Version,
    pub script: String,
    pub stored: String,
    pub candidate: String,
}

/// Read-only comparison of scripts on disk against history.
#[derive(Debug, Default)]
pub struct MigrationStatus {
    /// Recorded history, by install order.
    pub applied: Vec<MigrationRecord>,
    /// Candidates a migrate run would apply.
    pub pending: Vec<MigrationRecord>,
    /// Candidates at or below the last applied version that were never recorded.
    pub skipped: Vec<MigrationRecord>,
    pub drift: Vec<ChecksumDrift>,
}

impl MigrationStatus {
    pub fn is_up_to_date(&self) -> bool {
        self.pending.is_empty() && self.drift.is_empty()
    }
}

/// Drives migrations from a script repository into a history store.
pub struct Reconciler<'s> {
    store: &'s mut dyn HistoryStore,
    repository: ScriptRepository,
}

impl<'s> Reconciler<'s> {
    pub fn new(store: &'s mut dyn HistoryStore, repository: ScriptRepository) -> Self {
        Self { store, repository }
    }

    /// Create the history table if needed.
    pub async fn initialize(&mut self) -> Result<InitOutcome> {
        let outcome = self.store.initialize().await?;
        match outcome {
            InitOutcome::Created => info!("Created migration history ({})", self.store.backend()),
            InitOutcome::AlreadyInitialized => {
                info!("Migration history already present, skipping initialization")
            }
        }
        Ok(outcome)
    }

    /// Apply every pending migration.
    ///
    /// Configuration, parse, duplicate and integrity problems are returned as
    /// errors before anything is applied. A failing apply ends the run with
    /// [`RunOutcome::Failed`].
    pub async fn migrate(&mut self) -> Result<MigrationReport> {
        info!("Discovering migrations in {}", self.repository.dir().display());
        let candidates = self.discover()?;

        self.store.lock().await?;
        debug!("Migration lock acquired");

        let result = self.migrate_locked(candidates).await;

        // Always release the lock, even on error
        if let Err(e) = self.store.unlock().await {
            warn!("Failed to release migration lock: {}", e);
        } else {
            debug!("Migration lock released");
        }

        result
    }

    /// Compare scripts on disk against history without changing anything.
    pub async fn status(&mut self) -> Result<MigrationStatus> {
        let candidates = self.discover()?;
        let applied = self.store.applied().await?;
        let last = applied.iter().max_by_key(|r| r.install_order).cloned();

        let recorded: HashMap<&Version, &MigrationRecord> =
            applied.iter().map(|r| (&r.version, r)).collect();

        let mut drift = Vec::new();
        let mut skipped = Vec::new();
        for candidate in &candidates {
            match recorded.get(&candidate.version) {
                Some(stored) if stored.checksum != candidate.checksum => {
                    drift.push(ChecksumDrift {
                        version: candidate.version.clone(),
                        script: candidate.script.clone(),
                        stored: stored.checksum.clone(),
                        candidate: candidate.checksum.clone(),
                    });
                }
                Some(_) => {}
                None => {
                    if last.as_ref().is_some_and(|l| candidate.version <= l.version) {
                        skipped.push(candidate.clone());
                    }
                }
            }
        }

        let pending = pending_set(candidates, last.as_ref());

        Ok(MigrationStatus {
            applied,
            pending,
            skipped,
            drift,
        })
    }

    fn discover(&self) -> Result<Vec<MigrationRecord>> {
        let candidates = self.repository.discover()?;
        ensure_unique_versions(&candidates)?;
        debug!("Found {} candidate migrations", candidates.len());
        Ok(candidates)
    }

    async fn migrate_locked(&mut self, candidates: Vec<MigrationRecord>) -> Result<MigrationReport> {
        self.validate(&candidates).await?;

        let last = self.store.last_applied().await?;
        match &last {
            Some(last) => debug!("Last applied migration: {}", last),
            None => debug!("No migrations applied yet"),
        }

        let pending = pending_set(candidates, last.as_ref());
        if pending.is_empty() {
            info!("Database is up to date");
            return Ok(MigrationReport {
                applied: Vec::new(),
                outcome: RunOutcome::UpToDate,
            });
        }

        info!("{} pending migration(s)", pending.len());

        let total = pending.len();
        let mut applied = Vec::with_capacity(total);
        for (i, migration) in pending.iter().enumerate() {
            info!("Applying migration {}/{}: {}", i + 1, total, migration);

            let result = match load_script(migration) {
                Ok(sql) => self.store.apply(migration, &sql).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(record) => applied.push(record),
                Err(error) => {
                    warn!("Migration {} failed: {}", migration.version, error);
                    return Ok(MigrationReport {
                        applied,
                        outcome: RunOutcome::Failed {
                            version: migration.version.clone(),
                            error,
                        },
                    });
                }
            }
        }

        info!("Applied {} migration(s)", applied.len());
        Ok(MigrationReport {
            applied,
            outcome: RunOutcome::Completed,
        })
    }

    /// Every candidate already in history must carry the recorded checksum.
    ///
    /// Rows are matched on parsed versions, so `1.01` on disk matches a row
    /// recorded as `1.1`.
    async fn validate(&mut self, candidates: &[MigrationRecord]) -> Result<()> {
        let applied = self.store.applied().await?;
        let recorded: HashMap<&Version, &MigrationRecord> =
            applied.iter().map(|r| (&r.version, r)).collect();

        for candidate in candidates {
            let Some(stored) = recorded.get(&candidate.version) else {
                continue;
            };
            if stored.checksum != candidate.checksum {
                return Err(VersionerError::Integrity {
                    version: candidate.version.clone(),
                    stored: stored.checksum.clone(),
                    candidate: candidate.checksum.clone(),
                });
            }
        }
        debug!("Checksums verified for {} candidates", candidates.len());
        Ok(())
    }
}

/// Candidates strictly newer than the last applied migration.
pub fn pending_set(
    candidates: Vec<MigrationRecord>,
    last: Option<&MigrationRecord>,
) -> Vec<MigrationRecord> {
    match last {
        None => candidates,
        Some(last) => candidates
            .into_iter()
            .filter(|c| c.version > last.version)
            .collect(),
    }
}
