use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use reposync_core::SyncConfig;
use reposync_service::paths::{current_binary, DEFAULT_UNIT_DIR};
use reposync_service::{install_units, uninstall_units, Systemctl};
use reposync_units::{context, RenderedUnit, Renderer, UnitContext, DEFAULT_INTERVAL_MINUTES};

use super::load_config;

#[derive(Subcommand, Debug)]
pub enum UnitsCommand {
    /// Print the rendered service and timer to stdout.
    Print(UnitArgs),

    /// Write both units, reload systemd and enable the timer.
    Install(UnitArgs),

    /// Disable the timer and remove both units.
    Uninstall {
        /// Directory holding the unit files.
        #[arg(long, default_value = DEFAULT_UNIT_DIR)]
        unit_dir: PathBuf,
    },
}

#[derive(Args, Debug)]
pub struct UnitArgs {
    /// Minutes between runs.
    #[arg(long, default_value_t = DEFAULT_INTERVAL_MINUTES)]
    pub interval: u64,

    /// Directory to write the unit files into.
    #[arg(long, default_value = DEFAULT_UNIT_DIR)]
    pub unit_dir: PathBuf,

    /// Binary the service runs. Defaults to this executable.
    #[arg(long)]
    pub binary: Option<PathBuf>,
}

pub fn run(config_path: &Path, command: UnitsCommand) -> Result<()> {
    let config = load_config(config_path)?;
    match command {
        UnitsCommand::Print(args) => {
            for unit in render(&config, config_path, &args)? {
                println!("# {}", unit.file_name);
                println!("{}", unit.content);
            }
        }
        UnitsCommand::Install(args) => {
            let units = render(&config, config_path, &args)?;
            let written = install_units(&args.unit_dir, &units, &Systemctl::default())?;
            for path in written {
                println!("wrote {}", path.display());
            }
        }
        UnitsCommand::Uninstall { unit_dir } => {
            let project = config.project.to_string();
            let removed = uninstall_units(
                &unit_dir,
                &context::service_name(&project),
                &context::timer_name(&project),
                &Systemctl::default(),
            )?;
            if removed.is_empty() {
                println!("no units installed in {}", unit_dir.display());
            }
            for path in removed {
                println!("removed {}", path.display());
            }
        }
    }
    Ok(())
}

fn render(config: &SyncConfig, config_path: &Path, args: &UnitArgs) -> Result<Vec<RenderedUnit>> {
    let config_path = config_path
        .canonicalize()
        .with_context(|| format!("cannot resolve {}", config_path.display()))?;
    let binary = args.binary.clone().unwrap_or_else(current_binary);
    let ctx = UnitContext::from_config(config, &binary, &config_path, args.interval)?;
    Ok(Renderer::new()?.render_all(&ctx)?)
}
