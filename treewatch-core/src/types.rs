//! Domain types shared by the watcher pipeline and the transports.
//!
//! All path fields use `PathBuf`; never `String` for filesystem paths.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Change kinds
// ---------------------------------------------------------------------------

/// What happened to a path, as seen by the event source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
    Renamed,
}

impl ChangeKind {
    /// Merge rank: `Deleted > Created > Renamed > Modified`.
    pub fn precedence(self) -> u8 {
        match self {
            ChangeKind::Modified => 0,
            ChangeKind::Renamed => 1,
            ChangeKind::Created => 2,
            ChangeKind::Deleted => 3,
        }
    }

    /// Combine two kinds observed for the same path; the higher precedence wins.
    pub fn merge(self, other: ChangeKind) -> ChangeKind {
        if other.precedence() > self.precedence() {
            other
        } else {
            self
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeKind::Created => write!(f, "created"),
            ChangeKind::Modified => write!(f, "modified"),
            ChangeKind::Deleted => write!(f, "deleted"),
            ChangeKind::Renamed => write!(f, "renamed"),
        }
    }
}

// ---------------------------------------------------------------------------
// Sync outcomes
// ---------------------------------------------------------------------------

/// Why a transport invocation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncErrorKind {
    /// The transport process could not be started.
    Spawn,
    /// The transport ran and reported failure (non-zero exit).
    ExitStatus,
    /// Filesystem error while mirroring.
    Io,
    /// The path does not belong to the watched tree.
    InvalidPath,
}

impl SyncErrorKind {
    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(self) -> bool {
        !matches!(self, SyncErrorKind::InvalidPath)
    }
}

impl fmt::Display for SyncErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncErrorKind::Spawn => write!(f, "spawn"),
            SyncErrorKind::ExitStatus => write!(f, "exit-status"),
            SyncErrorKind::Io => write!(f, "io"),
            SyncErrorKind::InvalidPath => write!(f, "invalid-path"),
        }
    }
}

/// Outcome of one executor run for one path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncResult {
    pub path: PathBuf,
    pub success: bool,
    pub error_kind: Option<SyncErrorKind>,
    /// Human-readable failure reason (transport stderr, I/O error text).
    pub reason: Option<String>,
    pub duration_ms: u64,
    pub transferred: usize,
    pub removed: usize,
}

impl SyncResult {
    pub fn succeeded(path: PathBuf, duration_ms: u64, transferred: usize, removed: usize) -> Self {
        Self {
            path,
            success: true,
            error_kind: None,
            reason: None,
            duration_ms,
            transferred,
            removed,
        }
    }

    pub fn failed(
        path: PathBuf,
        duration_ms: u64,
        kind: SyncErrorKind,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            path,
            success: false,
            error_kind: Some(kind),
            reason: Some(reason.into()),
            duration_ms,
            transferred: 0,
            removed: 0,
        }
    }
}
