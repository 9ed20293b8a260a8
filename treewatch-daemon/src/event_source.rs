//! Recursive filesystem subscription feeding a bounded channel.
//!
//! The notify callback runs on the watcher's own thread and owns the only
//! sender, so dropping the [`EventSource`] (and with it the watcher) closes
//! the channel and lets the debouncer flush.

use std::fs;
use std::path::{Path, PathBuf};

use notify::event::{ModifyKind, RenameMode};
use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use treewatch_core::ChangeKind;

use crate::error::{io_err, DaemonError};
use crate::task::ChangeEvent;

pub struct EventSource {
    root: PathBuf,
    _watcher: RecommendedWatcher,
}

impl EventSource {
    /// Subscribe recursively to `root`. Failure here is fatal for the daemon.
    pub fn subscribe(
        root: &Path,
        capacity: usize,
    ) -> Result<(Self, mpsc::Receiver<ChangeEvent>), DaemonError> {
        // Backends report real paths (/private/var/... on macOS); compare
        // against the canonical root.
        let root = fs::canonicalize(root).map_err(|e| io_err(root, e))?;
        let (tx, rx) = mpsc::channel(capacity.max(1));

        let callback_root = root.clone();
        let mut watcher = recommended_watcher(move |result: notify::Result<Event>| {
            let changes = match result {
                Ok(event) => translate(&event, &callback_root),
                Err(err) => {
                    tracing::warn!(error = %err, "watcher error; forcing full reconciliation");
                    vec![ChangeEvent::new(&callback_root, ChangeKind::Modified)]
                }
            };
            for change in changes {
                // Blocks the notify thread when the pipeline is behind.
                if tx.blocking_send(change).is_err() {
                    return;
                }
            }
        })
        .map_err(|source| DaemonError::Subscribe {
            path: root.clone(),
            source,
        })?;

        watcher
            .watch(&root, RecursiveMode::Recursive)
            .map_err(|source| DaemonError::Subscribe {
                path: root.clone(),
                source,
            })?;
        tracing::info!(root = %root.display(), "watching source tree");

        Ok((
            Self {
                root,
                _watcher: watcher,
            },
            rx,
        ))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Stop watching. The channel closes once the watcher thread releases its sender.
    pub fn close(self) {
        tracing::debug!(root = %self.root.display(), "closing event source");
    }
}

/// Map one backend event onto zero or more [`ChangeEvent`]s under `root`.
pub fn translate(event: &Event, root: &Path) -> Vec<ChangeEvent> {
    if event.need_rescan() {
        tracing::warn!("watcher queue overflowed; forcing full reconciliation");
        return vec![ChangeEvent::new(root, ChangeKind::Modified)];
    }

    let inside = |path: &&PathBuf| path.starts_with(root);
    let emit = |path: &PathBuf, kind| ChangeEvent::new(path, kind);

    match &event.kind {
        EventKind::Access(_) => Vec::new(),
        EventKind::Create(_) => event
            .paths
            .iter()
            .filter(inside)
            .map(|p| emit(p, ChangeKind::Created))
            .collect(),
        EventKind::Remove(_) => event
            .paths
            .iter()
            .filter(inside)
            .map(|p| emit(p, ChangeKind::Deleted))
            .collect(),
        EventKind::Modify(ModifyKind::Name(mode)) => match mode {
            RenameMode::Both => {
                let mut out = Vec::with_capacity(2);
                if let Some(from) = event.paths.first().filter(|p| p.starts_with(root)) {
                    out.push(emit(from, ChangeKind::Deleted));
                }
                if let Some(to) = event.paths.get(1).filter(|p| p.starts_with(root)) {
                    out.push(emit(to, ChangeKind::Renamed));
                }
                out
            }
            RenameMode::From => event
                .paths
                .iter()
                .filter(inside)
                .map(|p| emit(p, ChangeKind::Deleted))
                .collect(),
            RenameMode::To => event
                .paths
                .iter()
                .filter(inside)
                .map(|p| emit(p, ChangeKind::Renamed))
                .collect(),
            _ => event
                .paths
                .iter()
                .filter(inside)
                .map(|p| {
                    let kind = if p.exists() {
                        ChangeKind::Renamed
                    } else {
                        ChangeKind::Deleted
                    };
                    emit(p, kind)
                })
                .collect(),
        },
        EventKind::Modify(_) | EventKind::Any | EventKind::Other => event
            .paths
            .iter()
            .filter(inside)
            .filter(|p| !p.is_dir())
            .map(|p| emit(p, ChangeKind::Modified))
            .collect(),
    }
}
