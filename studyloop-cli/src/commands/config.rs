//! Config inspection subcommands

use anyhow::Result;
use clap::{Args, Subcommand};

use crate::app::GlobalArgs;
use crate::config::ConfigLoader;

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the effective configuration as TOML
    Show,
    /// Print the config files consulted and the resolved store location
    Path,
}

pub fn run(global: &GlobalArgs, args: ConfigArgs) -> Result<()> {
    match args.command {
        ConfigCommand::Show => {
            let config = global.config()?;
            print!("{}", toml::to_string_pretty(&config)?);
        }
        ConfigCommand::Path => {
            let config = global.config()?;
            println!("user:    {}", ConfigLoader::user_config_path().display());
            println!("project: {}", ConfigLoader::project_config_path().display());
            println!(
                "store:   {} ({:?})",
                config.storage.resolved_path().display(),
                config.storage.backend
            );
        }
    }
    Ok(())
}
