//! Configuration commands: `tracemend config`.

use std::path::Path;

use anyhow::Result;

use tracemend::config::TracemendConfig;

use super::super::ConfigCommands;

pub fn cmd_config(project_dir: &Path, command: Option<ConfigCommands>) -> Result<()> {
    let config_path = TracemendConfig::path(project_dir);

    match command {
        None | Some(ConfigCommands::Show) => {
            let config = TracemendConfig::load(project_dir)?;
            if config_path.exists() {
                println!("# Config file: {}", config_path.display());
            } else {
                println!("# No config file at {}; using defaults", config_path.display());
            }
            println!("# Effective values (with environment overrides):");
            println!();
            print!("{}", config.to_toml()?);
        }
        Some(ConfigCommands::Init { force }) => {
            let path = TracemendConfig::write_default(project_dir, force)?;
            println!("Created {}", path.display());
        }
    }
    Ok(())
}
