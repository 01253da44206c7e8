//! Core types for sqlversioner: versions, migration records, the history
//! store contract, configuration and errors.

pub mod config;
pub mod error;
pub mod migration;
pub mod store;

pub use config::{Connector, DatabaseConfig, MigrationsConfig, VersionerConfig};
pub use error::{Result, VersionerError};
pub use migration::{MigrationRecord, Version};
pub use store::{BoxFuture, HistoryStore, InitOutcome};
