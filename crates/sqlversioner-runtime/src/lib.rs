pub mod db;
pub mod migrations;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use db::{connect, PostgresHistoryStore, SqliteHistoryStore};
pub use migrations::{
    MigrationReport, MigrationStatus, Reconciler, RunOutcome, ScriptRepository,
};
