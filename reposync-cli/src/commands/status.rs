use std::path::Path;

use anyhow::Result;
use clap::Args;
use reposync_agent::GitCli;

use super::{load_config, runtime};

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit JSON instead of text.
    #[arg(long)]
    pub json: bool,
}

impl StatusArgs {
    pub fn run(self, config_path: &Path) -> Result<()> {
        let config = load_config(config_path)?;
        let git = GitCli::from_config(&config);
        let report = runtime()?.block_on(reposync_service::inspect_status(&config, &git))?;

        if self.json {
            println!("{}", report.to_json()?);
        } else {
            print!("{report}");
        }
        Ok(())
    }
}
