//! Config file + flag overrides shared by `watch`, `sync` and `config`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;

use treewatch_core::config::{self, TransportKind, WatchConfig};

#[derive(Args, Debug, Clone, Default)]
pub struct ConfigArgs {
    /// Config file to load (default: ~/.treewatch/config.yaml when present).
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Directory tree to watch.
    #[arg(long, value_name = "DIR")]
    pub source: Option<PathBuf>,

    /// Mirror directory kept in sync with the source.
    #[arg(long, value_name = "DIR")]
    pub mirror: Option<PathBuf>,

    /// Quiet window per path before a change is synced.
    #[arg(long, value_name = "MS")]
    pub debounce_ms: Option<u64>,

    /// Seconds between full reconciliation sweeps.
    #[arg(long, value_name = "SECS")]
    pub reconcile_secs: Option<u64>,

    /// Number of concurrent sync workers.
    #[arg(long)]
    pub workers: Option<usize>,

    /// Total attempts per path before giving up until the next sweep.
    #[arg(long)]
    pub max_attempts: Option<u32>,

    /// First retry delay; doubles per failed attempt.
    #[arg(long, value_name = "MS")]
    pub backoff_base_ms: Option<u64>,

    /// Upper bound on the retry delay.
    #[arg(long, value_name = "MS")]
    pub backoff_cap_ms: Option<u64>,

    /// Capacity of the channel between the file watcher and the debouncer.
    #[arg(long, value_name = "EVENTS")]
    pub event_buffer: Option<usize>,

    /// Sync transport: rsync or local.
    #[arg(long)]
    pub transport: Option<TransportKind>,

    /// rsync executable to invoke.
    #[arg(long, value_name = "PATH")]
    pub rsync_binary: Option<PathBuf>,

    /// Audit log file (default: ~/.treewatch/logs/sync.log).
    #[arg(long, value_name = "FILE")]
    pub audit_log: Option<PathBuf>,
}

impl ConfigArgs {
    /// Load the file layer, then apply flags on top. Not validated.
    pub fn resolve(&self, home: &Path) -> Result<WatchConfig> {
        let mut config = match &self.config {
            Some(path) => config::load_at(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None => {
                let path = config::config_path_at(home);
                config::load_if_exists(&path)
                    .with_context(|| format!("failed to load config {}", path.display()))?
                    .unwrap_or_default()
            }
        };
        self.apply(&mut config);
        Ok(config)
    }

    fn apply(&self, config: &mut WatchConfig) {
        if let Some(source) = &self.source {
            config.source = source.clone();
        }
        if let Some(mirror) = &self.mirror {
            config.mirror = mirror.clone();
        }
        if let Some(ms) = self.debounce_ms {
            config.debounce_ms = ms;
        }
        if let Some(secs) = self.reconcile_secs {
            config.reconcile_interval_secs = secs;
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(attempts) = self.max_attempts {
            config.max_attempts = attempts;
        }
        if let Some(base) = self.backoff_base_ms {
            config.backoff_base_ms = base;
        }
        if let Some(cap) = self.backoff_cap_ms {
            config.backoff_cap_ms = cap;
        }
        if let Some(capacity) = self.event_buffer {
            config.event_buffer = capacity;
        }
        if let Some(transport) = self.transport {
            config.transport = transport;
        }
        if let Some(binary) = &self.rsync_binary {
            config.rsync_binary = binary.clone();
        }
        if let Some(audit_log) = &self.audit_log {
            config.audit_log = Some(audit_log.clone());
        }
    }
}
