use std::sync::Arc;
use std::time::Duration;

use console::style;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use stratum_core::error::Result;
use stratum_core::migration::Direction;
use stratum_runtime::ledger::Ledger;
use stratum_runtime::runner::{RunReport, Runner, StatusReport};
use stratum_runtime::source::DirectorySource;
use stratum_runtime::Database;

use super::{load_config, Cli, Commands};

/// Execute a database-touching command.
pub async fn execute(cli: &Cli) -> Result<()> {
    let mut config = load_config(&cli.config)?;
    if let Some(dir) = &cli.migrations_dir {
        config.migrations.dir = dir.clone();
    }

    let db = Database::from_config(&config.database).await?;
    db.health_check().await?;

    let source = Arc::new(DirectorySource::new(&config.migrations.dir));

    // Ctrl-C stops the run between units; the in-flight transaction still
    // commits or rolls back whole.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!();
                eprintln!("  {} Interrupt received, finishing current migration", style("!").yellow());
                cancel.cancel();
            }
        });
    }

    let runner = Runner::new(db.pool().clone(), source)
        .with_ledger(Ledger::new(config.migrations.table.clone()))
        .with_lock_timeout(Duration::from_secs(config.migrations.lock_timeout_secs))
        .with_cancellation(cancel);

    print_header();

    let result = match cli.command {
        Commands::Up => runner.up().await.map(|r| print_report(&r)),
        Commands::UpTo { version } => runner.up_to(version).await.map(|r| print_report(&r)),
        Commands::Down { count } => {
            if count == 0 {
                println!("  {} Nothing to revert (count=0)", style("ℹ").blue());
                println!();
                Ok(())
            } else {
                runner.down(count).await.map(|r| print_report(&r))
            }
        }
        Commands::DownTo { version } => runner.down_to(version).await.map(|r| print_report(&r)),
        Commands::Status => runner.status().await.map(|s| print_status(&s)),
        Commands::New { .. } => unreachable!("handled before connecting"),
    };

    debug!("Closing database pool");
    db.close().await;

    result
}

fn print_header() {
    println!();
    println!(
        "  {} {}",
        style("stratum").bold().cyan(),
        style(format!("v{}", env!("CARGO_PKG_VERSION"))).dim()
    );
    println!();
}

fn print_report(report: &RunReport) {
    if report.executed.is_empty() && !report.interrupted {
        println!("  {} Nothing to do, ledger is up to date", style("ℹ").blue());
        println!();
        return;
    }

    for step in &report.executed {
        let verb = match step.direction {
            Direction::Up => "Applied",
            Direction::Down => "Reverted",
        };
        println!(
            "  {} {} {} ({})",
            style("✓").green(),
            verb,
            step.version,
            style(&step.name).cyan()
        );
    }

    println!();
    if report.interrupted {
        println!(
            "  {} Interrupted after {} migration(s); re-run to continue",
            style("!").yellow(),
            report.executed.len()
        );
    } else {
        println!(
            "  {} {} migration(s) executed",
            style("✓").green(),
            report.executed.len()
        );
    }
    println!();
}

fn print_status(status: &StatusReport) {
    if status.applied.is_empty() && status.pending.is_empty() {
        println!("  {} No migrations found", style("ℹ").blue());
        println!();
        return;
    }

    if !status.applied.is_empty() {
        println!("  {} Applied:", style("✓").green());
        for applied in &status.applied {
            let down_marker = if applied.has_down {
                style("↓").green().to_string()
            } else {
                style("-").dim().to_string()
            };
            let mut flags = String::new();
            if !applied.known {
                flags.push_str(&format!(" {}", style("[missing from source]").red()));
            }
            if applied.drifted {
                flags.push_str(&format!(" {}", style("[content drifted]").yellow()));
            }
            println!(
                "    {} {} {} {} ({}){}",
                down_marker,
                applied.entry.version,
                style(&applied.entry.name).cyan(),
                style("at").dim(),
                applied.entry.applied_at.format("%Y-%m-%d %H:%M:%S"),
                flags
            );
        }
    }

    if !status.pending.is_empty() {
        if !status.applied.is_empty() {
            println!();
        }
        println!("  {} Pending:", style("○").yellow());
        for pending in &status.pending {
            println!(
                "    {} {} {}",
                style("→").dim(),
                pending.version,
                style(&pending.name).yellow()
            );
        }
    }

    println!();
    println!(
        "  {} {} applied, {} pending",
        style("ℹ").blue(),
        status.applied.len(),
        status.pending.len()
    );
    println!();

    // Legend
    println!(
        "  {} = has down migration, {} = no down migration",
        style("↓").green(),
        style("-").dim()
    );
    println!();
}
