//! reposync: keep a host's working copy in step with a git branch and
//! trigger the applier when it moves.
//!
//! # Usage
//!
//! ```text
//! reposync                                   # same as `reposync run`
//! reposync run
//! reposync status [--json]
//! reposync config
//! reposync units print|install|uninstall [--interval M] [--unit-dir D] [--binary B]
//! reposync logs [--lines N]
//! ```
//!
//! Every command takes `--config <path>` (or `REPOSYNC_CONFIG`), defaulting
//! to `/etc/reposync/config.yaml`.

mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{logs::LogsArgs, run::RunArgs, status::StatusArgs, units::UnitsCommand};
use reposync_core::DEFAULT_CONFIG_PATH;
use reposync_service::paths::CONFIG_ENV;

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "reposync",
    version,
    about = "Pull configuration from git and trigger its apply (GitOps sync agent)",
    long_about = None,
)]
struct Cli {
    /// Configuration file.
    #[arg(
        long,
        short = 'c',
        global = true,
        env = CONFIG_ENV,
        default_value = DEFAULT_CONFIG_PATH,
    )]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one lock → detect → sync → trigger cycle (the default).
    Run(RunArgs),

    /// Show lock, working copy and override marker state.
    Status(StatusArgs),

    /// Print the effective configuration as YAML.
    Config,

    /// Render or install the systemd service/timer pair.
    Units {
        #[command(subcommand)]
        command: UnitsCommand,
    },

    /// Show the tail of the sync log.
    Logs(LogsArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = cli.config.as_path();
    match cli.command.unwrap_or(Commands::Run(RunArgs::default())) {
        Commands::Run(args) => args.run(config),
        Commands::Status(args) => args.run(config).map(|()| ExitCode::SUCCESS),
        Commands::Config => commands::config::run(config).map(|()| ExitCode::SUCCESS),
        Commands::Units { command } => {
            commands::units::run(config, command).map(|()| ExitCode::SUCCESS)
        }
        Commands::Logs(args) => args.run(config).map(|()| ExitCode::SUCCESS),
    }
}
