use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::debug;

use stratum_core::error::{MigrateError, Result};
use stratum_core::migration::{Migration, Script};

use super::MigrationSource;

const UP_SUFFIX: &str = ".up.sql";
const DOWN_SUFFIX: &str = ".down.sql";

/// Filesystem migration source.
///
/// Discovers `NNNN_name.up.sql` / `NNNN_name.down.sql` pairs in a directory:
///
/// - `0001_create_users.up.sql`
/// - `0001_create_users.down.sql`  (optional)
/// - `0002_add_posts.up.sql`
///
/// The numeric prefix is the version; the rest of the stem is the name.
/// Files with any other extension are ignored. A down file must have a
/// matching up file with the same name.
pub struct DirectorySource {
    dir: PathBuf,
}

impl DirectorySource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl MigrationSource for DirectorySource {
    fn load(&self) -> Result<Vec<Migration>> {
        if !self.dir.exists() {
            debug!("Migrations directory does not exist: {:?}", self.dir);
            return Ok(Vec::new());
        }

        let mut ups: BTreeMap<i64, (String, String)> = BTreeMap::new();
        let mut downs: BTreeMap<i64, (String, String, PathBuf)> = BTreeMap::new();

        let entries = std::fs::read_dir(&self.dir).map_err(|e| read_error(&self.dir, &e))?;
        for entry in entries {
            let entry = entry.map_err(|e| read_error(&self.dir, &e))?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }

            let Some(file_name) = path.file_name().and_then(|s| s.to_str()) else {
                continue;
            };

            if let Some(stem) = file_name.strip_suffix(UP_SUFFIX) {
                let (version, name) = parse_stem(stem, &path)?;
                let sql = std::fs::read_to_string(&path).map_err(|e| read_error(&path, &e))?;
                if let Some((existing, _)) = ups.get(&version) {
                    let (first, second) = if existing <= &name {
                        (existing.clone(), name)
                    } else {
                        (name, existing.clone())
                    };
                    return Err(MigrateError::DuplicateVersion {
                        version,
                        first,
                        second,
                    });
                }
                ups.insert(version, (name, sql));
            } else if let Some(stem) = file_name.strip_suffix(DOWN_SUFFIX) {
                let (version, name) = parse_stem(stem, &path)?;
                let sql = std::fs::read_to_string(&path).map_err(|e| read_error(&path, &e))?;
                if let Some((existing, _, _)) = downs.get(&version) {
                    let (first, second) = if existing <= &name {
                        (existing.clone(), name)
                    } else {
                        (name, existing.clone())
                    };
                    return Err(MigrateError::DuplicateVersion {
                        version,
                        first,
                        second,
                    });
                }
                downs.insert(version, (name, sql, path));
            } else {
                debug!("Skipping non-migration file: {}", file_name);
            }
        }

        let mut migrations = Vec::with_capacity(ups.len());
        for (version, (name, up_sql)) in ups {
            let mut migration = Migration::new(version, name, Script::new(up_sql));
            if let Some((down_name, down_sql, path)) = downs.remove(&version) {
                if down_name != migration.name {
                    return Err(MigrateError::Discovery(format!(
                        "down migration {:?} does not match up migration name {:?}",
                        path, migration.name
                    )));
                }
                migration = migration.with_down(Script::new(down_sql));
            }
            migrations.push(migration);
        }

        if let Some((_, (_, _, path))) = downs.into_iter().next() {
            return Err(MigrateError::Discovery(format!(
                "down migration {:?} has no matching up migration",
                path
            )));
        }

        debug!("Loaded {} migrations from {:?}", migrations.len(), self.dir);
        Ok(migrations)
    }
}

fn read_error(path: &Path, err: &std::io::Error) -> MigrateError {
    MigrateError::Discovery(format!("failed to read {:?}: {}", path, err))
}

/// Parse `NNNN_name` into (version, name).
fn parse_stem(stem: &str, path: &Path) -> Result<(i64, String)> {
    let invalid = || {
        MigrateError::Discovery(format!(
            "invalid migration filename {:?}: expected NNNN_name{} or NNNN_name{}",
            path, UP_SUFFIX, DOWN_SUFFIX
        ))
    };

    let (prefix, name) = stem.split_once('_').ok_or_else(invalid)?;
    let version: i64 = prefix.parse().map_err(|_| invalid())?;
    if version < 1 || name.is_empty() {
        return Err(invalid());
    }

    Ok((version, name.to_string()))
}
