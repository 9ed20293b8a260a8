use std::path::{Path, PathBuf};

use tokio::time::Instant;
use treewatch_core::ChangeKind;

/// One observed filesystem change, as produced by the event source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub path: PathBuf,
    pub kind: ChangeKind,
    pub observed_at: Instant,
}

impl ChangeEvent {
    pub fn new(path: impl Into<PathBuf>, kind: ChangeKind) -> Self {
        Self::at(path, kind, Instant::now())
    }

    pub fn at(path: impl Into<PathBuf>, kind: ChangeKind, observed_at: Instant) -> Self {
        Self {
            path: path.into(),
            kind,
            observed_at,
        }
    }
}

/// The unit of work: "bring this path in sync".
///
/// At most one `PendingTask` exists per path at a time, whether it sits in
/// the debouncer or the work queue; later observations merge into it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTask {
    pub path: PathBuf,
    pub first_seen_at: Instant,
    pub last_seen_at: Instant,
    /// Sync attempts already made for this path.
    pub attempts: u32,
    pub kind: ChangeKind,
}

impl PendingTask {
    pub fn from_event(event: &ChangeEvent) -> Self {
        Self {
            path: event.path.clone(),
            first_seen_at: event.observed_at,
            last_seen_at: event.observed_at,
            attempts: 0,
            kind: event.kind,
        }
    }

    /// A task covering the whole source tree, used by reconciliation.
    pub fn full_tree(root: &Path, now: Instant) -> Self {
        Self {
            path: root.to_path_buf(),
            first_seen_at: now,
            last_seen_at: now,
            attempts: 0,
            kind: ChangeKind::Modified,
        }
    }

    pub fn absorb(&mut self, event: &ChangeEvent) {
        self.last_seen_at = self.last_seen_at.max(event.observed_at);
        self.kind = self.kind.merge(event.kind);
    }

    /// Fold a second task for the same path into this one. The older
    /// `first_seen_at` and the larger attempt count survive.
    pub fn merge(&mut self, other: PendingTask) {
        debug_assert_eq!(self.path, other.path);
        self.first_seen_at = self.first_seen_at.min(other.first_seen_at);
        self.last_seen_at = self.last_seen_at.max(other.last_seen_at);
        self.attempts = self.attempts.max(other.attempts);
        self.kind = self.kind.merge(other.kind);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn merge_keeps_oldest_first_seen_and_strongest_kind() {
        let t0 = Instant::now();
        let mut task = PendingTask::from_event(&ChangeEvent::at("/s/a", ChangeKind::Modified, t0));
        let mut later = PendingTask::from_event(&ChangeEvent::at(
            "/s/a",
            ChangeKind::Deleted,
            t0 + Duration::from_secs(2),
        ));
        later.attempts = 3;

        task.merge(later);
        assert_eq!(task.first_seen_at, t0);
        assert_eq!(task.last_seen_at, t0 + Duration::from_secs(2));
        assert_eq!(task.kind, ChangeKind::Deleted);
        assert_eq!(task.attempts, 3);
    }

    #[test]
    fn absorb_does_not_move_first_seen() {
        let t0 = Instant::now();
        let mut task = PendingTask::from_event(&ChangeEvent::at("/s/a", ChangeKind::Created, t0));
        task.absorb(&ChangeEvent::at(
            "/s/a",
            ChangeKind::Modified,
            t0 + Duration::from_millis(40),
        ));
        assert_eq!(task.first_seen_at, t0);
        assert_eq!(task.kind, ChangeKind::Created);
    }
}
