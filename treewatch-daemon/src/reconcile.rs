use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::{Instant, MissedTickBehavior};

use crate::queue::WorkQueue;
use crate::task::PendingTask;

/// Queue a full-tree sweep of `root`.
pub fn request_full_sweep(queue: &WorkQueue, root: &Path) {
    tracing::debug!(root = %root.display(), "full reconciliation requested");
    queue.enqueue(PendingTask::full_tree(root, Instant::now()));
}

/// Enqueue a full sweep every `interval` until shutdown. The startup sweep is
/// queued by the runtime, so the first tick comes one interval in.
pub async fn run(
    root: PathBuf,
    interval: Duration,
    queue: WorkQueue,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = ticker.tick() => request_full_sweep(&queue, &root),
        }
    }
}
