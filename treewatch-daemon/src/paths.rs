use std::path::{Path, PathBuf};

pub use treewatch_core::config::treewatch_root;

pub const DAEMON_SOCKET: &str = "treewatch.sock";
pub const AUDIT_LOG: &str = "sync.log";

pub fn run_dir(home: &Path) -> PathBuf {
    treewatch_root(home).join("run")
}

pub fn socket_path(home: &Path) -> PathBuf {
    run_dir(home).join(DAEMON_SOCKET)
}

pub fn logs_dir(home: &Path) -> PathBuf {
    treewatch_root(home).join("logs")
}

/// Default audit trail location when the config does not name one.
pub fn audit_log_path(home: &Path) -> PathBuf {
    logs_dir(home).join(AUDIT_LOG)
}
