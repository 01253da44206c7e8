//! The history store contract.
//!
//! A history store persists the migrations that have been applied to one
//! database. Each backing engine provides its own adapter; the reconciliation
//! engine only ever sees `dyn HistoryStore`.

use std::future::Future;
use std::pin::Pin;

use crate::error::Result;
use crate::migration::{MigrationRecord, Version};

/// Boxed future returned by store operations.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Result of `HistoryStore::initialize`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitOutcome {
    /// The history table was created.
    Created,
    /// The history table was already present; nothing changed.
    AlreadyInitialized,
}

/// Persists and queries applied migrations.
///
/// A store owns one live session for the duration of a run. Callers must
/// call [`HistoryStore::close`] when the run ends, whatever its outcome.
pub trait HistoryStore: Send {
    /// Short engine name used in logs.
    fn backend(&self) -> &'static str;

    /// Create the history table if it does not exist.
    fn initialize(&mut self) -> BoxFuture<'_, Result<InitOutcome>>;

    /// The record with the greatest install order, if any.
    fn last_applied(&mut self) -> BoxFuture<'_, Result<Option<MigrationRecord>>>;

    /// The record whose version compares equal to `version`, if any.
    fn find_by_version<'a>(
        &'a mut self,
        version: &'a Version,
    ) -> BoxFuture<'a, Result<Option<MigrationRecord>>>;

    /// Every recorded migration, ordered by install order.
    fn applied(&mut self) -> BoxFuture<'_, Result<Vec<MigrationRecord>>>;

    /// Execute `sql` and record `candidate` as one atomic unit of work.
    ///
    /// On success the returned record carries the store-assigned install order
    /// and timestamp. On failure neither the script's effects nor the history
    /// row are visible. A candidate whose version equals a recorded one is
    /// rejected.
    fn apply<'a>(
        &'a mut self,
        candidate: &'a MigrationRecord,
        sql: &'a str,
    ) -> BoxFuture<'a, Result<MigrationRecord>>;

    /// Take an exclusive lock around a migration run.
    ///
    /// Stores without a native lock primitive keep the default no-op.
    fn lock(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async { Ok(()) })
    }

    /// Release the lock taken by [`HistoryStore::lock`].
    fn unlock(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async { Ok(()) })
    }

    /// Release the underlying session.
    fn close(self: Box<Self>) -> BoxFuture<'static, Result<()>>;
}
