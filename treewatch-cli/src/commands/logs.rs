//! `treewatch logs`: tail the audit trail.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;

use treewatch_daemon::paths::audit_log_path;

use super::options::ConfigArgs;

#[derive(Args, Debug)]
pub struct LogsArgs {
    /// Number of trailing lines to show.
    #[arg(long, short = 'n', default_value_t = 100)]
    pub lines: usize,

    #[command(flatten)]
    pub config: ConfigArgs,
}

impl LogsArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home_dir()?;
        let config = self.config.resolve(&home)?;
        let path = config
            .audit_log
            .unwrap_or_else(|| audit_log_path(&home));
        print_tail(&path, self.lines)
    }
}

fn print_tail(path: &Path, lines: usize) -> Result<()> {
    if !path.exists() {
        println!("log file not found: {}", path.display());
        return Ok(());
    }

    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut tail = VecDeque::<String>::with_capacity(lines);
    for line in BufReader::new(file).lines() {
        let line = line.with_context(|| format!("read {}", path.display()))?;
        if tail.len() == lines {
            tail.pop_front();
        }
        if lines > 0 {
            tail.push_back(line);
        }
    }

    for line in tail {
        println!("{line}");
    }
    Ok(())
}
