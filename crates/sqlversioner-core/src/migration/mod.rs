mod record;
mod version;

pub use record::MigrationRecord;
pub use version::Version;
