//! Migration discovery.

mod dir;

pub use dir::DirectorySource;

use stratum_core::error::{MigrateError, Result};
use stratum_core::migration::Migration;

/// Discovers the full set of migration units from durable storage.
///
/// `load` must be deterministic: the same backing source yields the same
/// units in the same (ascending-by-version) order on every call.
pub trait MigrationSource: Send + Sync {
    fn load(&self) -> Result<Vec<Migration>>;
}

/// A fixed, in-memory set of units.
///
/// Used for migrations embedded in the binary (`include_str!`) and in tests.
pub struct StaticSource {
    migrations: Vec<Migration>,
}

impl StaticSource {
    pub fn new(migrations: Vec<Migration>) -> Self {
        Self { migrations }
    }
}

impl MigrationSource for StaticSource {
    fn load(&self) -> Result<Vec<Migration>> {
        let mut migrations = self.migrations.clone();
        migrations.sort_by_key(|m| m.version);
        check_duplicate_versions(&migrations)?;
        Ok(migrations)
    }
}

/// Reject adjacent duplicates in a version-sorted unit list.
pub(crate) fn check_duplicate_versions(sorted: &[Migration]) -> Result<()> {
    for pair in sorted.windows(2) {
        if pair[0].version == pair[1].version {
            let (first, second) = if pair[0].name <= pair[1].name {
                (pair[0].name.clone(), pair[1].name.clone())
            } else {
                (pair[1].name.clone(), pair[0].name.clone())
            };
            return Err(MigrateError::DuplicateVersion {
                version: pair[0].version,
                first,
                second,
            });
        }
    }
    Ok(())
}
