//! Error types for treewatch-sync.

use std::path::PathBuf;

use thiserror::Error;

use treewatch_core::SyncErrorKind;

/// All errors a transport invocation can produce.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The external program could not be started.
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The external program ran and exited unsuccessfully.
    #[error("{program} exited with {}: {stderr}", exit_label(.status))]
    Exit {
        program: PathBuf,
        status: Option<i32>,
        stderr: String,
    },

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The path is not below the watched root.
    #[error("{path} is outside the watched root {root}")]
    OutsideRoot { path: PathBuf, root: PathBuf },
}

impl TransportError {
    /// Classification used by the retry policy and the sync result.
    pub fn kind(&self) -> SyncErrorKind {
        match self {
            TransportError::Spawn { .. } => SyncErrorKind::Spawn,
            TransportError::Exit { .. } => SyncErrorKind::ExitStatus,
            TransportError::Io { .. } => SyncErrorKind::Io,
            TransportError::OutsideRoot { .. } => SyncErrorKind::InvalidPath,
        }
    }
}

fn exit_label(status: &Option<i32>) -> String {
    match status {
        Some(code) => format!("status {code}"),
        None => "a signal".to_string(),
    }
}

/// Convenience constructor for [`TransportError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> TransportError {
    TransportError::Io {
        path: path.into(),
        source,
    }
}
