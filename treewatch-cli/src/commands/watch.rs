//! `treewatch watch`: run the watcher pipeline in the foreground.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use treewatch_daemon::start_blocking;

use super::options::ConfigArgs;

#[derive(Args, Debug)]
pub struct WatchArgs {
    #[command(flatten)]
    pub config: ConfigArgs,
}

impl WatchArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home_dir()?;
        let config = self.config.resolve(&home)?;
        config.validate().context("invalid configuration")?;

        let summary = start_blocking(config, &home).context("watcher exited with error")?;
        println!(
            "{} {} synced, {} failed, {} abandoned",
            "✓ stopped:".green(),
            summary.counters.synced,
            summary.counters.failed,
            summary.counters.abandoned,
        );
        if summary.unsynced_at_shutdown > 0 {
            println!(
                "{} {} change(s) left for the next startup reconciliation",
                "!".yellow(),
                summary.unsynced_at_shutdown
            );
        }
        Ok(())
    }
}
