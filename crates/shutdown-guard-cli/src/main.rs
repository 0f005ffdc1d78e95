//! shutdown-stamp - record the moment the OS shuts the process down
//!
//! Subscribes to the platform's shutdown notification and appends the
//! shutdown time to a file before the process is terminated.

use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use shutdown_guard_core::Outcome;

mod cmd;
mod config;
mod stamp;

use config::Config;

#[derive(Parser)]
#[command(name = "shutdown-stamp")]
#[command(about = "Record the time the OS shuts this process down")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Config file path (default: ./shutdown-guard.toml or ~/.config/shutdown-guard/config.toml)
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Wait for shutdown and append the shutdown time to a file
    Run(cmd::run::RunArgs),
    /// List notification backends available in this build
    Backends,
    /// Show current configuration
    Config,
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    shutdown_guard_core::init_logging(cli.quiet, cli.debug);

    // Load configuration
    let config = if let Some(path) = cli.config {
        Config::from_file(&path)?
    } else {
        Config::load()?
    };

    match cli.command {
        Command::Run(args) => match cmd::run::run(args, &config)? {
            Outcome::ShutdownTimedOut => Ok(ExitCode::FAILURE),
            Outcome::ShutdownCompleted | Outcome::Stopped => Ok(ExitCode::SUCCESS),
        },
        Command::Backends => {
            cmd::backends::run()?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Config => {
            use comfy_table::{
                Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL,
            };

            let guard = config.guard_config(None, None)?;

            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .apply_modifier(UTF8_ROUND_CORNERS)
                .set_header(vec![
                    Cell::new("Setting").fg(Color::Cyan),
                    Cell::new("Value").fg(Color::Cyan),
                ]);

            table.add_row(vec!["Backend", guard.backend.as_str()]);
            table.add_row(vec!["Budget", &guard.budget.to_string()]);
            table.add_row(vec![
                "Signals",
                &if guard.signals.is_empty() {
                    "default (INT, TERM, HUP)".to_string()
                } else {
                    format!("{:?}", guard.signals)
                },
            ]);
            table.add_row(vec!["Output file", &config.output.path.display().to_string()]);
            table.add_row(vec![
                "Heartbeat",
                &match config.output.heartbeat_secs {
                    0 => "off".to_string(),
                    secs => format!("{secs}s"),
                },
            ]);

            eprintln!("\n{table}");
            Ok(ExitCode::SUCCESS)
        }
    }
}
