//! treewatch core library: change model, watch configuration, errors.
//!
//! Public API surface:
//! - [`types`]: change kinds and per-sync outcomes
//! - [`config`]: [`WatchConfig`] load / save / validate
//! - [`error`]: [`ConfigError`]

pub mod config;
pub mod error;
pub mod types;

pub use config::{TransportKind, WatchConfig};
pub use error::ConfigError;
pub use types::{ChangeKind, SyncErrorKind, SyncResult};
