//! Plan computation: diffing source units against ledger history.
//!
//! Everything here is pure. A plan is recomputed from scratch on every run
//! and never persisted, which is what makes re-running after any failure
//! safe.

use std::collections::HashSet;

use stratum_core::error::{MigrateError, Result};
use stratum_core::migration::{AppliedMigration, Direction, Migration};

/// One step of a plan: a unit and the direction to run it in.
#[derive(Debug, Clone)]
pub struct PlanStep {
    pub migration: Migration,
    pub direction: Direction,
}

/// How far a reverse run goes.
#[derive(Debug, Clone, Copy)]
pub enum RevertScope {
    /// Revert the N most recently applied versions.
    Steps(usize),
    /// Revert every version strictly greater than this one. Zero reverts
    /// everything.
    ToVersion(i64),
}

/// Check ledger history against the source's view of the world.
///
/// Three things must hold before any plan is worth executing:
/// - every applied version still exists in the source (no rewriting history
///   out from under the ledger);
/// - applied content has not drifted (stored checksum matches the unit's
///   current checksum, when a checksum was stored);
/// - no known version below the highest applied version is unapplied. An
///   unapplied unit older than applied history means source and ledger have
///   diverged, and applying it now would reorder history, so the run refuses.
pub fn validate_history(available: &[Migration], applied: &[AppliedMigration]) -> Result<()> {
    for entry in applied {
        let Some(unit) = available.iter().find(|m| m.version == entry.version) else {
            return Err(MigrateError::HistoryMismatch {
                version: entry.version,
            });
        };

        if let Some(stored) = &entry.checksum {
            if *stored != unit.checksum() {
                return Err(MigrateError::ChecksumMismatch {
                    version: unit.version,
                    name: unit.name.clone(),
                });
            }
        }
    }

    if let Some(max_applied) = applied.iter().map(|e| e.version).max() {
        let applied_set: HashSet<i64> = applied.iter().map(|e| e.version).collect();
        for unit in available.iter().filter(|m| m.version < max_applied) {
            if !applied_set.contains(&unit.version) {
                return Err(MigrateError::OutOfOrder {
                    version: unit.version,
                    name: unit.name.clone(),
                    applied: max_applied,
                });
            }
        }
    }

    Ok(())
}

/// Forward plan: every unapplied unit, ascending, optionally capped at
/// `target` (inclusive).
///
/// Assumes `available` is sorted ascending and history has been validated.
pub fn plan_up(
    available: &[Migration],
    applied: &[AppliedMigration],
    target: Option<i64>,
) -> Result<Vec<PlanStep>> {
    if let Some(target) = target {
        if !available.iter().any(|m| m.version == target) {
            return Err(MigrateError::UnknownVersion(target));
        }
    }

    let applied_set: HashSet<i64> = applied.iter().map(|e| e.version).collect();

    Ok(available
        .iter()
        .filter(|m| !applied_set.contains(&m.version))
        .filter(|m| target.map_or(true, |t| m.version <= t))
        .map(|m| PlanStep {
            migration: m.clone(),
            direction: Direction::Up,
        })
        .collect())
}

/// Reverse plan: the selected applied versions, highest first.
///
/// Every selected unit must still exist in the source and carry a down
/// script; both are checked here, before anything executes.
pub fn plan_down(
    available: &[Migration],
    applied: &[AppliedMigration],
    scope: RevertScope,
) -> Result<Vec<PlanStep>> {
    if let RevertScope::ToVersion(target) = scope {
        if target != 0 && !available.iter().any(|m| m.version == target) {
            return Err(MigrateError::UnknownVersion(target));
        }
    }

    let selected: Vec<&AppliedMigration> = match scope {
        RevertScope::Steps(n) => applied.iter().rev().take(n).collect(),
        RevertScope::ToVersion(target) => {
            applied.iter().rev().filter(|e| e.version > target).collect()
        }
    };

    let mut steps = Vec::with_capacity(selected.len());
    for entry in selected {
        let unit = available
            .iter()
            .find(|m| m.version == entry.version)
            .ok_or(MigrateError::HistoryMismatch {
                version: entry.version,
            })?;

        if unit.down.is_none() {
            return Err(MigrateError::Irreversible {
                version: unit.version,
                name: unit.name.clone(),
            });
        }

        steps.push(PlanStep {
            migration: unit.clone(),
            direction: Direction::Down,
        });
    }

    Ok(steps)
}
