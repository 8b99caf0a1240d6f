pub mod config;
pub mod error;
pub mod migration;

pub use config::StratumConfig;
pub use error::{Direction, MigrateError, Result};
pub use migration::{AppliedMigration, Migration, Script};
