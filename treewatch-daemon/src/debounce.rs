//! Per-path quiet-window coalescing between the event source and the queue.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::audit::AuditLog;
use crate::queue::WorkQueue;
use crate::task::{ChangeEvent, PendingTask};

struct Slot {
    task: PendingTask,
    deadline: Instant,
}

/// Buffers events per path until that path has been quiet for `window`.
pub struct Debouncer {
    window: Duration,
    slots: HashMap<PathBuf, Slot>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            slots: HashMap::new(),
        }
    }

    /// Record an event; each arrival restarts the path's quiet timer.
    pub fn push(&mut self, event: ChangeEvent, now: Instant) {
        let deadline = now + self.window;
        match self.slots.get_mut(&event.path) {
            Some(slot) => {
                slot.task.absorb(&event);
                slot.deadline = deadline;
            }
            None => {
                let task = PendingTask::from_event(&event);
                self.slots.insert(event.path, Slot { task, deadline });
            }
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.slots.values().map(|slot| slot.deadline).min()
    }

    /// Release every task whose window has elapsed, oldest first.
    pub fn drain_due(&mut self, now: Instant) -> Vec<PendingTask> {
        let due: Vec<PathBuf> = self
            .slots
            .iter()
            .filter(|(_, slot)| slot.deadline <= now)
            .map(|(path, _)| path.clone())
            .collect();
        let mut tasks: Vec<PendingTask> = due
            .into_iter()
            .filter_map(|path| self.slots.remove(&path))
            .map(|slot| slot.task)
            .collect();
        sort_by_first_seen(&mut tasks);
        tasks
    }

    /// Release everything regardless of deadlines (shutdown flush).
    pub fn drain_all(&mut self) -> Vec<PendingTask> {
        let mut tasks: Vec<PendingTask> = self.slots.drain().map(|(_, slot)| slot.task).collect();
        sort_by_first_seen(&mut tasks);
        tasks
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

fn sort_by_first_seen(tasks: &mut [PendingTask]) {
    tasks.sort_by(|a, b| {
        a.first_seen_at
            .cmp(&b.first_seen_at)
            .then_with(|| a.path.cmp(&b.path))
    });
}

/// Drive the debouncer until the event channel closes, then flush.
///
/// Returns how many tasks the final flush released.
pub async fn run(
    mut events: mpsc::Receiver<ChangeEvent>,
    mut debouncer: Debouncer,
    queue: WorkQueue,
    audit: AuditLog,
) -> usize {
    loop {
        let deadline = debouncer.next_deadline();
        tokio::select! {
            received = events.recv() => match received {
                Some(event) => debouncer.push(event, Instant::now()),
                None => break,
            },
            _ = sleep_until_some(deadline), if deadline.is_some() => {
                release(debouncer.drain_due(Instant::now()), &queue, &audit);
            }
        }
    }

    let flushed = debouncer.drain_all();
    let count = flushed.len();
    if count > 0 {
        tracing::info!(count, "flushing debounced changes at shutdown");
    }
    release(flushed, &queue, &audit);
    count
}

async fn sleep_until_some(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

fn release(tasks: Vec<PendingTask>, queue: &WorkQueue, audit: &AuditLog) {
    for task in tasks {
        audit.detected(&task.path);
        tracing::debug!(path = %task.path.display(), kind = %task.kind, "change settled");
        queue.enqueue(task);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use treewatch_core::ChangeKind;

    const WINDOW: Duration = Duration::from_millis(500);

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn burst_on_one_path_collapses_to_one_task() {
        let mut debouncer = Debouncer::new(WINDOW);
        let start = Instant::now();
        for i in 0..5u64 {
            let at = start + Duration::from_millis(i * 40);
            debouncer.push(ChangeEvent::at("/s/a.txt", ChangeKind::Modified, at), at);
        }
        let last = start + Duration::from_millis(160);

        assert!(debouncer.drain_due(last + Duration::from_millis(499)).is_empty());
        let released = debouncer.drain_due(last + WINDOW);
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].first_seen_at, start);
        assert_eq!(released[0].last_seen_at, last);
        assert!(debouncer.is_empty());
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn kind_follows_precedence() {
        let mut debouncer = Debouncer::new(WINDOW);
        let now = Instant::now();
        for kind in [ChangeKind::Modified, ChangeKind::Deleted, ChangeKind::Created] {
            debouncer.push(ChangeEvent::at("/s/x", kind, now), now);
        }
        let released = debouncer.drain_all();
        assert_eq!(released[0].kind, ChangeKind::Deleted);
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn release_order_is_first_seen() {
        let mut debouncer = Debouncer::new(WINDOW);
        let t0 = Instant::now();
        debouncer.push(ChangeEvent::at("/s/zeta", ChangeKind::Modified, t0), t0);
        let t1 = t0 + Duration::from_millis(10);
        debouncer.push(ChangeEvent::at("/s/alpha", ChangeKind::Modified, t1), t1);
        // zeta keeps getting touched, but was seen first.
        let t2 = t0 + Duration::from_millis(20);
        debouncer.push(ChangeEvent::at("/s/zeta", ChangeKind::Modified, t2), t2);

        let released = debouncer.drain_due(t2 + WINDOW);
        let paths: Vec<_> = released.iter().map(|t| t.path.clone()).collect();
        assert_eq!(paths, vec![PathBuf::from("/s/zeta"), PathBuf::from("/s/alpha")]);
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn run_releases_after_quiet_window_and_logs_once() {
        let (tx, rx) = mpsc::channel(16);
        let queue = WorkQueue::new();
        let audit = AuditLog::memory();
        let handle = tokio::spawn(run(rx, Debouncer::new(WINDOW), queue.clone(), audit.clone()));

        for _ in 0..5 {
            tx.send(ChangeEvent::new("/s/a.txt", ChangeKind::Modified))
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(40)).await;
        }
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(queue.stats().queued, 0, "released before the window elapsed");

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(queue.stats().queued, 1);

        drop(tx);
        assert_eq!(handle.await.unwrap(), 0);
        let detected: Vec<_> = audit
            .entries()
            .into_iter()
            .filter(|line| line.contains("Detected change in: /s/a.txt"))
            .collect();
        assert_eq!(detected.len(), 1);
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn closing_the_channel_flushes_pending_paths() {
        let (tx, rx) = mpsc::channel(16);
        let queue = WorkQueue::new();
        let handle = tokio::spawn(run(
            rx,
            Debouncer::new(WINDOW),
            queue.clone(),
            AuditLog::memory(),
        ));
        tx.send(ChangeEvent::new("/s/one", ChangeKind::Created))
            .await
            .unwrap();
        tx.send(ChangeEvent::new("/s/two", ChangeKind::Deleted))
            .await
            .unwrap();
        drop(tx);

        assert_eq!(handle.await.unwrap(), 2);
        assert_eq!(queue.stats().queued, 2);
    }
}
