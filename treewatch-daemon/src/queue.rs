//! Path-unique work queue shared by the debouncer, the reconciler and the workers.
//!
//! Invariants:
//! - at most one entry per path across queued and in-flight state;
//! - a path is handed to at most one worker at a time;
//! - updates arriving for an in-flight path are parked and re-queued when the
//!   worker reports back.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::task::PendingTask;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Entries waiting for a worker, including those in backoff.
    pub queued: usize,
    /// Entries still waiting out a retry delay.
    pub delayed: usize,
    pub in_flight: usize,
}

#[derive(Debug)]
struct Entry {
    task: PendingTask,
    seq: u64,
    ready_at: Option<Instant>,
}

impl Entry {
    fn is_ready(&self, now: Instant) -> bool {
        self.ready_at.map_or(true, |at| at <= now)
    }
}

#[derive(Debug, Default)]
struct State {
    queued: HashMap<PathBuf, Entry>,
    /// In-flight paths, with any update parked while the worker runs.
    in_flight: HashMap<PathBuf, Option<PendingTask>>,
    closed: bool,
    next_seq: u64,
}

impl State {
    fn insert(&mut self, task: PendingTask, ready_at: Option<Instant>) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queued
            .insert(task.path.clone(), Entry { task, seq, ready_at });
    }

    fn take_ready(&mut self, now: Instant) -> Option<PendingTask> {
        let path = self
            .queued
            .iter()
            .filter(|(_, entry)| entry.is_ready(now))
            .min_by(|(_, a), (_, b)| {
                a.task
                    .first_seen_at
                    .cmp(&b.task.first_seen_at)
                    .then(a.seq.cmp(&b.seq))
            })
            .map(|(path, _)| path.clone())?;
        let entry = self.queued.remove(&path)?;
        self.in_flight.insert(path, None);
        Some(entry.task)
    }

    fn next_ready_at(&self) -> Option<Instant> {
        self.queued.values().filter_map(|entry| entry.ready_at).min()
    }
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<State>,
    wakeup: Notify,
}

#[derive(Debug, Clone, Default)]
pub struct WorkQueue {
    shared: Arc<Shared>,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `task`, merging with any entry already held for its path.
    pub fn enqueue(&self, task: PendingTask) {
        {
            let mut state = self.shared.state.lock();
            if let Some(parked) = state.in_flight.get_mut(&task.path) {
                match parked {
                    Some(existing) => existing.merge(task),
                    None => *parked = Some(task),
                }
                return;
            }
            match state.queued.get_mut(&task.path) {
                Some(entry) => entry.task.merge(task),
                None => state.insert(task, None),
            }
        }
        self.shared.wakeup.notify_waiters();
    }

    /// Wait for the oldest ready task and mark its path in flight.
    ///
    /// Returns `None` once the queue has been closed.
    pub async fn dequeue_next(&self) -> Option<PendingTask> {
        loop {
            let notified = self.shared.wakeup.notified();
            tokio::pin!(notified);
            // Register before inspecting state so a concurrent enqueue cannot slip between.
            notified.as_mut().enable();

            let wake_at = {
                let mut state = self.shared.state.lock();
                if state.closed {
                    return None;
                }
                if let Some(task) = state.take_ready(Instant::now()) {
                    return Some(task);
                }
                state.next_ready_at()
            };

            match wake_at {
                Some(at) => {
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = tokio::time::sleep_until(at) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Non-waiting variant of [`dequeue_next`](Self::dequeue_next).
    pub fn try_dequeue(&self) -> Option<PendingTask> {
        let mut state = self.shared.state.lock();
        if state.closed {
            return None;
        }
        state.take_ready(Instant::now())
    }

    /// The worker finished with `path`; re-queue any update parked meanwhile.
    pub fn mark_done(&self, path: &Path) {
        let requeued = {
            let mut state = self.shared.state.lock();
            match state.in_flight.remove(path).flatten() {
                Some(parked) => {
                    state.insert(parked, None);
                    true
                }
                None => false,
            }
        };
        if requeued {
            self.shared.wakeup.notify_waiters();
        }
    }

    /// Put a failed task back, eligible again after `delay`.
    pub fn reschedule(&self, mut task: PendingTask, delay: Duration) {
        {
            let mut state = self.shared.state.lock();
            if let Some(parked) = state.in_flight.remove(&task.path).flatten() {
                task.merge(parked);
            }
            state.insert(task, Some(Instant::now() + delay));
        }
        self.shared.wakeup.notify_waiters();
    }

    /// Stop handing out work. Waiting workers wake up and see `None`.
    pub fn close(&self) {
        self.shared.state.lock().closed = true;
        self.shared.wakeup.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    pub fn is_in_flight(&self, path: &Path) -> bool {
        self.shared.state.lock().in_flight.contains_key(path)
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.shared.state.lock();
        let now = Instant::now();
        QueueStats {
            queued: state.queued.len(),
            delayed: state.queued.values().filter(|e| !e.is_ready(now)).count(),
            in_flight: state.in_flight.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready, task};
    use treewatch_core::ChangeKind;

    use crate::task::ChangeEvent;

    fn task_at(path: &str, kind: ChangeKind, at: Instant) -> PendingTask {
        PendingTask::from_event(&ChangeEvent::at(path, kind, at))
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn one_entry_per_path() {
        let queue = WorkQueue::new();
        let now = Instant::now();
        queue.enqueue(task_at("/s/a", ChangeKind::Modified, now));
        queue.enqueue(task_at("/s/a", ChangeKind::Created, now + Duration::from_millis(5)));
        assert_eq!(queue.stats().queued, 1);

        let task = queue.try_dequeue().expect("task");
        assert_eq!(task.kind, ChangeKind::Created);
        assert_eq!(task.first_seen_at, now);
        assert!(queue.try_dequeue().is_none());
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn dequeues_oldest_first_seen() {
        let queue = WorkQueue::new();
        let t0 = Instant::now();
        queue.enqueue(task_at("/s/late", ChangeKind::Modified, t0 + Duration::from_secs(1)));
        queue.enqueue(task_at("/s/early", ChangeKind::Modified, t0));
        queue.enqueue(task_at("/s/tie", ChangeKind::Modified, t0));

        let order: Vec<_> = std::iter::from_fn(|| queue.try_dequeue())
            .map(|t| t.path)
            .collect();
        assert_eq!(
            order,
            vec![
                PathBuf::from("/s/early"),
                PathBuf::from("/s/tie"),
                PathBuf::from("/s/late")
            ]
        );
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn in_flight_path_is_not_handed_out_twice() {
        let queue = WorkQueue::new();
        let now = Instant::now();
        queue.enqueue(task_at("/s/a", ChangeKind::Modified, now));
        let first = queue.try_dequeue().expect("first");

        queue.enqueue(task_at("/s/a", ChangeKind::Deleted, now));
        assert!(queue.is_in_flight(&first.path));
        let mut second = task::spawn(queue.dequeue_next());
        assert_pending!(second.poll());

        queue.mark_done(&first.path);
        assert!(second.is_woken());
        let parked = assert_ready!(second.poll()).expect("parked update");
        assert_eq!(parked.kind, ChangeKind::Deleted);
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn rescheduled_task_waits_out_its_delay() {
        let queue = WorkQueue::new();
        queue.enqueue(task_at("/s/a", ChangeKind::Modified, Instant::now()));
        let mut failed = queue.try_dequeue().expect("task");
        failed.attempts = 1;
        queue.reschedule(failed, Duration::from_secs(2));

        assert_eq!(
            queue.stats(),
            QueueStats {
                queued: 1,
                delayed: 1,
                in_flight: 0
            }
        );
        assert!(queue.try_dequeue().is_none());

        let retried = queue.dequeue_next().await.expect("retry");
        assert_eq!(retried.attempts, 1);
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn reschedule_merges_parked_update() {
        let queue = WorkQueue::new();
        let now = Instant::now();
        queue.enqueue(task_at("/s/a", ChangeKind::Modified, now));
        let mut failed = queue.try_dequeue().expect("task");
        queue.enqueue(task_at("/s/a", ChangeKind::Deleted, now));

        failed.attempts = 1;
        queue.reschedule(failed, Duration::from_millis(10));
        tokio::time::advance(Duration::from_millis(10)).await;

        let retried = queue.try_dequeue().expect("retry");
        assert_eq!(retried.kind, ChangeKind::Deleted);
        assert_eq!(retried.attempts, 1);
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn close_wakes_waiting_workers() {
        let queue = WorkQueue::new();
        let mut waiter = task::spawn(queue.dequeue_next());
        assert_pending!(waiter.poll());

        queue.close();
        assert!(waiter.is_woken());
        assert!(assert_ready!(waiter.poll()).is_none());

        queue.enqueue(task_at("/s/late", ChangeKind::Modified, Instant::now()));
        assert_eq!(queue.stats().queued, 1, "closed queue still records work");
        assert!(queue.try_dequeue().is_none());
    }
}
