//! Migration units and the scripts they execute.

use std::fmt;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

/// Direction a migration runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single migration: a versioned, named pair of forward/backward scripts.
///
/// Units are immutable once discovered. The runner only ever reads them; it
/// never needs to know what the scripts contain.
#[derive(Debug, Clone)]
pub struct Migration {
    /// Ordering key. Unique, ascending; gaps in value are fine.
    pub version: i64,
    /// Human-readable name (e.g., "create_users").
    pub name: String,
    /// Forward script.
    pub up: Script,
    /// Backward script. Units without one cannot be reverted.
    pub down: Option<Script>,
}

impl Migration {
    pub fn new(version: i64, name: impl Into<String>, up: Script) -> Self {
        Self {
            version,
            name: name.into(),
            up,
            down: None,
        }
    }

    pub fn with_down(mut self, down: Script) -> Self {
        self.down = Some(down);
        self
    }

    pub fn has_down(&self) -> bool {
        self.down.is_some()
    }

    /// Content checksum over both scripts, hex-encoded SHA-256.
    ///
    /// Stored in the ledger at apply time and compared on later runs to
    /// detect units edited after they were applied.
    pub fn checksum(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.up.sql().as_bytes());
        if let Some(down) = &self.down {
            hasher.update([0u8]);
            hasher.update(down.sql().as_bytes());
        }
        hex::encode(hasher.finalize())
    }
}

/// An opaque SQL script: the executable half of a migration unit.
///
/// The engine never interprets the SQL beyond splitting it into statements;
/// what the statements do is operator data.
#[derive(Debug, Clone)]
pub struct Script {
    sql: String,
}

impl Script {
    pub fn new(sql: impl Into<String>) -> Self {
        Self { sql: sql.into() }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Split into individual executable statements.
    ///
    /// Splits on `;` while respecting dollar-quoted strings, so PL/pgSQL
    /// bodies with internal semicolons stay whole. Empty and comment-only
    /// fragments are dropped.
    pub fn statements(&self) -> Vec<String> {
        split_sql_statements(&self.sql)
            .into_iter()
            .filter(|stmt| {
                !stmt.lines().all(|l| {
                    let l = l.trim();
                    l.is_empty() || l.starts_with("--")
                })
            })
            .collect()
    }
}

/// Split SQL into statements, respecting `$$`/`$tag$` dollar quoting.
fn split_sql_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut in_dollar_quote = false;
    let mut dollar_tag = String::new();
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);

        if c == '$' {
            // Collect a potential $tag$ delimiter.
            let mut potential_tag = String::from("$");
            while let Some(&next_c) = chars.peek() {
                if next_c == '$' {
                    chars.next();
                    current.push('$');
                    potential_tag.push('$');
                    break;
                } else if next_c.is_alphanumeric() || next_c == '_' {
                    chars.next();
                    current.push(next_c);
                    potential_tag.push(next_c);
                } else {
                    break;
                }
            }

            if potential_tag.len() >= 2 && potential_tag.ends_with('$') {
                if in_dollar_quote && potential_tag == dollar_tag {
                    in_dollar_quote = false;
                    dollar_tag.clear();
                } else if !in_dollar_quote {
                    in_dollar_quote = true;
                    dollar_tag = potential_tag;
                }
            }
        }

        if c == ';' && !in_dollar_quote {
            let stmt = current.trim().trim_end_matches(';').trim().to_string();
            if !stmt.is_empty() {
                statements.push(stmt);
            }
            current.clear();
        }
    }

    // Trailing statement without a closing semicolon.
    let stmt = current.trim().trim_end_matches(';').trim().to_string();
    if !stmt.is_empty() {
        statements.push(stmt);
    }

    statements
}

/// A migration the ledger records as applied.
#[derive(Debug, Clone)]
pub struct AppliedMigration {
    pub version: i64,
    pub name: String,
    pub applied_at: DateTime<Utc>,
    pub checksum: Option<String>,
}
