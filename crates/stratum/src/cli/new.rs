use std::fs;
use std::path::Path;

use console::style;

use stratum_core::error::{MigrateError, Result};
use stratum_runtime::source::{DirectorySource, MigrationSource};

/// Create the next migration's `NNNN_name.up.sql` / `NNNN_name.down.sql`
/// pair, numbered one past the highest version already on disk.
pub fn create_migration(dir: &str, name: &str) -> Result<()> {
    let name = sanitize_name(name)?;

    let dir = Path::new(dir);
    let existing = DirectorySource::new(dir).load()?;
    let version = existing.last().map(|m| m.version + 1).unwrap_or(1);

    fs::create_dir_all(dir)?;
    let up_path = dir.join(format!("{version:04}_{name}.up.sql"));
    let down_path = dir.join(format!("{version:04}_{name}.down.sql"));

    fs::write(&up_path, format!("-- {name} (up)\n"))?;
    fs::write(&down_path, format!("-- {name} (down)\n"))?;

    println!("  {} Created {}", style("✓").green(), up_path.display());
    println!("  {} Created {}", style("✓").green(), down_path.display());
    Ok(())
}

/// Normalize to `snake_case` and reject anything a filename can't carry.
fn sanitize_name(name: &str) -> Result<String> {
    let name = name.trim().to_lowercase().replace([' ', '-'], "_");
    if name.is_empty()
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(MigrateError::Config(format!(
            "invalid migration name: {name:?}"
        )));
    }
    Ok(name)
}
