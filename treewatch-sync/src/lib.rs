//! # treewatch-sync
//!
//! Mirror transports and action planning.
//!
//! [`plan::plan`] turns a changed path into a [`SyncAction`]; a [`Transport`]
//! carries it out. [`pipeline::reconcile`] is the one-shot full-tree sweep
//! shared by the CLI and the daemon.

pub mod error;
pub mod local;
pub mod pipeline;
pub mod plan;
pub mod rsync;
pub mod transport;

pub use error::TransportError;
pub use local::LocalTransport;
pub use plan::{MirrorRoots, SyncAction};
pub use rsync::RsyncTransport;
pub use transport::{TransferReport, Transport};
