use std::path::Path;

use anyhow::Result;

use super::load_config;

/// Print the resolved configuration, presets and environment overrides applied.
pub fn run(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    println!("# effective configuration loaded from {}", config_path.display());
    print!("{}", config.to_yaml()?);
    Ok(())
}
