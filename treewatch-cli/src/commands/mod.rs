pub mod config;
pub mod logs;
pub mod options;
pub mod status;
pub mod stop;
pub mod sync;
pub mod watch;

use std::path::PathBuf;

use anyhow::{Context, Result};

pub fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().context("could not determine home directory")
}
