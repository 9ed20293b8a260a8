use anyhow::{Context, Result};

use treewatch_daemon::{paths::socket_path, request_stop, DaemonError};

pub fn run() -> Result<()> {
    let home = super::home_dir()?;
    match request_stop(&socket_path(&home)) {
        Ok(()) => println!("watcher stop requested"),
        Err(DaemonError::DaemonNotRunning { .. }) => println!("watcher is not running"),
        Err(err) => return Err(err).context("failed to stop watcher"),
    }
    Ok(())
}
