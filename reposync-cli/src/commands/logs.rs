use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;
use reposync_service::logging;

use super::load_config;

#[derive(Args, Debug)]
pub struct LogsArgs {
    /// Number of lines to show.
    #[arg(long, short = 'n', default_value_t = 50)]
    pub lines: usize,
}

impl LogsArgs {
    pub fn run(self, config_path: &Path) -> Result<()> {
        let config = load_config(config_path)?;
        let lines = logging::tail(&config.log_path, self.lines)
            .with_context(|| format!("no sync log at {}", config.log_path.display()))?;
        for line in lines {
            println!("{line}");
        }
        Ok(())
    }
}
