//! `treewatch status`: ask the running watcher for its state.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde_json::{json, Value};

use treewatch_daemon::{paths::socket_path, request_status, DaemonError};

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home_dir()?;
        let socket = socket_path(&home);
        let status = match request_status(&socket) {
            Ok(status) => status,
            Err(DaemonError::DaemonNotRunning { .. }) => json!({
                "running": false,
                "socket": socket.display().to_string(),
            }),
            Err(err) => return Err(err).context("failed to query watcher status"),
        };

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&status).context("failed to render status JSON")?
            );
        } else {
            print_human(&status);
        }
        Ok(())
    }
}

fn print_human(status: &Value) {
    if status["running"] != true {
        println!("{} watcher is not running", "●".red());
        return;
    }
    let text = |key: &str| status[key].as_str().unwrap_or("?").to_string();
    let count = |section: &str, key: &str| status[section][key].as_u64().unwrap_or(0);

    println!(
        "{} watching {} → {} via {} (pid {})",
        "●".green(),
        text("source"),
        text("mirror"),
        text("transport"),
        status["pid"]
    );
    println!(
        "  queue: {} queued ({} in backoff), {} in flight",
        count("queue", "queued"),
        count("queue", "delayed"),
        count("queue", "in_flight"),
    );
    println!(
        "  syncs: {} ok, {} failed, {} abandoned",
        count("sync", "synced"),
        count("sync", "failed"),
        count("sync", "abandoned"),
    );
}
