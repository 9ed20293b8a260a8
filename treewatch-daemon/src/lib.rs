//! treewatch daemon: event source → debouncer → work queue → workers.
//!
//! A reconciliation scheduler injects full-tree tasks on a timer, and an
//! optional Unix control socket serves `status`, `sync` and `stop`.

pub mod audit;
pub mod debounce;
mod error;
pub mod event_source;
pub mod executor;
pub mod log_rotation;
pub mod paths;
pub mod protocol;
pub mod queue;
pub mod reconcile;
mod runtime;
pub mod task;

pub use audit::AuditLog;
pub use error::DaemonError;
pub use executor::{Disposition, Executor, RetryPolicy, SyncCounters};
pub use protocol::{
    request_status, request_stop, request_sync, send_request, ControlRequest, ControlResponse,
};
pub use queue::{QueueStats, WorkQueue};
pub use runtime::{run, start_blocking, RunOptions, RunSummary};
pub use task::{ChangeEvent, PendingTask};
