//! `treewatch config`: show (and optionally persist) the effective settings.

use anyhow::{Context, Result};
use clap::Args;

use treewatch_core::config;

use super::options::ConfigArgs;

#[derive(Args, Debug)]
pub struct ConfigCommandArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Save the effective configuration to ~/.treewatch/config.yaml.
    #[arg(long)]
    pub write: bool,
}

impl ConfigCommandArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home_dir()?;
        let effective = self.config.resolve(&home)?;

        if self.write {
            effective.validate().context("refusing to save an invalid configuration")?;
            let path = config::config_path_at(&home);
            config::save_at(&path, &effective)
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("saved {}", path.display());
            return Ok(());
        }

        print!("{}", effective.to_yaml().context("failed to render config YAML")?);
        Ok(())
    }
}
