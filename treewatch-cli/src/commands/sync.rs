//! `treewatch sync`: one full reconciliation, no watching.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;

use treewatch_daemon::log_rotation::{MAX_LOG_BYTES, MAX_ROTATED_FILES};
use treewatch_daemon::{paths::audit_log_path, AuditLog};
use treewatch_sync::pipeline;

use super::options::ConfigArgs;

#[derive(Args, Debug)]
pub struct SyncArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,

    /// Also print the itemized change list.
    #[arg(long, short)]
    pub verbose: bool,
}

#[derive(Debug, Serialize)]
struct SyncOutput<'a> {
    source: String,
    mirror: String,
    transport: &'a str,
    transferred: usize,
    removed: usize,
}

impl SyncArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home_dir()?;
        let config = self.config.resolve(&home)?;
        config.validate().context("invalid configuration")?;

        let audit_path = config
            .audit_log
            .clone()
            .unwrap_or_else(|| audit_log_path(&home));
        let audit = AuditLog::open(&audit_path).context("failed to open audit log")?;
        audit
            .rotate_if_needed(MAX_LOG_BYTES, MAX_ROTATED_FILES)
            .with_context(|| format!("failed to rotate {}", audit_path.display()))?;

        let roots = pipeline::prepare_roots(&config).context("failed to prepare mirror roots")?;
        let transport = pipeline::transport_for(&config);
        audit.reconciliation_started();
        let result = pipeline::reconcile(&roots, transport.as_ref());
        match &result {
            Ok(_) => {
                audit.synchronized(&roots.source, &roots.mirror);
                audit.reconciliation_completed();
            }
            Err(err) => audit.failed(&roots.source, &err.to_string(), 1, 1),
        }
        let report = result.with_context(|| {
            format!(
                "reconciliation of {} into {} failed",
                roots.source.display(),
                roots.mirror.display()
            )
        })?;

        if self.json {
            let output = SyncOutput {
                source: roots.source.display().to_string(),
                mirror: roots.mirror.display().to_string(),
                transport: transport.name(),
                transferred: report.transferred,
                removed: report.removed,
            };
            println!(
                "{}",
                serde_json::to_string_pretty(&output).context("failed to render sync JSON")?
            );
            return Ok(());
        }

        if report.is_noop() {
            println!(
                "{} {} is up to date",
                "✓".green(),
                roots.mirror.display()
            );
        } else {
            println!(
                "{} {} → {} ({} transferred, {} removed)",
                "✓".green(),
                roots.source.display(),
                roots.mirror.display(),
                report.transferred,
                report.removed
            );
        }
        if self.verbose && !report.output.is_empty() {
            println!("{}", report.output.dimmed());
        }
        Ok(())
    }
}
