mod engine;
mod repository;

pub use engine::{
    pending_set, ChecksumDrift, MigrationReport, MigrationStatus, Reconciler, RunOutcome,
};
pub use repository::{
    checksum, ensure_unique_versions, load_script, parse_file_name, ScriptRepository,
};
