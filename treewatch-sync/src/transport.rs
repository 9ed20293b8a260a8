//! The transport seam: the only place bytes actually move.

use serde::Serialize;

use crate::error::TransportError;
use crate::plan::SyncAction;

/// What a transport did for one action.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TransferReport {
    /// Entries created or rewritten on the mirror.
    pub transferred: usize,
    /// Entries deleted from the mirror.
    pub removed: usize,
    /// Itemized, rsync-style description of the changes (one per line).
    pub output: String,
}

impl TransferReport {
    /// True when the mirror was already up to date.
    pub fn is_noop(&self) -> bool {
        self.transferred == 0 && self.removed == 0
    }

    pub(crate) fn record_transfer(&mut self, item: &str) {
        self.transferred += 1;
        self.push_line(item);
    }

    pub(crate) fn record_removal(&mut self, item: &str) {
        self.removed += 1;
        self.push_line(&format!("*deleting   {item}"));
    }

    fn push_line(&mut self, line: &str) {
        if !self.output.is_empty() {
            self.output.push('\n');
        }
        self.output.push_str(line);
    }
}

/// Mirrors a planned action onto the destination.
///
/// Implementations are blocking; the daemon calls them from the blocking pool.
pub trait Transport: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    fn execute(&self, action: &SyncAction) -> Result<TransferReport, TransportError>;
}
