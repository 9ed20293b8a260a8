//! Sync executor: plans a dequeued task, runs the transport on the blocking
//! pool, and decides between done, retry-with-backoff and abandon.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use treewatch_core::{SyncErrorKind, SyncResult, WatchConfig};
use treewatch_sync::{plan::plan, MirrorRoots, Transport, TransportError};

use crate::audit::AuditLog;
use crate::queue::WorkQueue;
use crate::task::PendingTask;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    pub base: Duration,
    pub cap: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Done,
    Retry(Duration),
    Abandon,
}

impl RetryPolicy {
    pub fn from_config(config: &WatchConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base: config.backoff_base(),
            cap: config.backoff_cap(),
        }
    }

    /// Delay before the attempt following failed attempt number `attempt` (1-based):
    /// `min(base * 2^(attempt-1), cap)`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.cap)
            .min(self.cap)
    }

    pub fn disposition(&self, result: &SyncResult, attempt: u32) -> Disposition {
        if result.success {
            return Disposition::Done;
        }
        let retryable = result.error_kind.map_or(true, SyncErrorKind::is_retryable);
        if retryable && attempt < self.max_attempts {
            Disposition::Retry(self.delay_after(attempt))
        } else {
            Disposition::Abandon
        }
    }
}

/// Running totals reported by `status`.
#[derive(Debug, Default)]
pub struct SyncCounters {
    synced: AtomicU64,
    failed: AtomicU64,
    abandoned: AtomicU64,
    last_sync_at_unix: AtomicU64,
    last_reconciliation_at_unix: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CountersSnapshot {
    pub synced: u64,
    pub failed: u64,
    pub abandoned: u64,
    pub last_sync_at_unix: u64,
    pub last_reconciliation_at_unix: u64,
}

impl SyncCounters {
    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            synced: self.synced.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
            last_sync_at_unix: self.last_sync_at_unix.load(Ordering::Relaxed),
            last_reconciliation_at_unix: self.last_reconciliation_at_unix.load(Ordering::Relaxed),
        }
    }

    fn record_success(&self, full_tree: bool) {
        let now = unix_seconds_now();
        self.synced.fetch_add(1, Ordering::Relaxed);
        self.last_sync_at_unix.store(now, Ordering::Relaxed);
        if full_tree {
            self.last_reconciliation_at_unix
                .store(now, Ordering::Relaxed);
        }
    }
}

pub struct Executor {
    roots: MirrorRoots,
    transport: Arc<dyn Transport>,
    audit: AuditLog,
    counters: Arc<SyncCounters>,
}

impl Executor {
    pub fn new(
        roots: MirrorRoots,
        transport: Arc<dyn Transport>,
        audit: AuditLog,
        counters: Arc<SyncCounters>,
    ) -> Self {
        Self {
            roots,
            transport,
            audit,
            counters,
        }
    }

    pub fn roots(&self) -> &MirrorRoots {
        &self.roots
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// Run attempt number `attempt` for `task`. Never returns an error: every
    /// outcome is folded into the [`SyncResult`].
    pub async fn execute(&self, task: &PendingTask, attempt: u32, max_attempts: u32) -> SyncResult {
        let full_tree = task.path == self.roots.source;
        if full_tree {
            self.audit.reconciliation_started();
        }

        let started = std::time::Instant::now();
        let roots = self.roots.clone();
        let transport = Arc::clone(&self.transport);
        let path = task.path.clone();
        let kind = task.kind;
        let outcome = tokio::task::spawn_blocking(move || {
            let action = plan(&roots, &path, kind)?;
            let report = transport.execute(&action)?;
            Ok::<_, TransportError>((action, report))
        })
        .await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let (kind, reason) = match outcome {
            Ok(Ok((action, report))) => {
                tracing::info!(
                    path = %task.path.display(),
                    transport = self.transport.name(),
                    transferred = report.transferred,
                    removed = report.removed,
                    duration_ms,
                    "sync completed",
                );
                self.audit.synchronized(&task.path, action.dest());
                if full_tree {
                    self.audit.reconciliation_completed();
                }
                self.counters.record_success(full_tree);
                return SyncResult::succeeded(
                    task.path.clone(),
                    duration_ms,
                    report.transferred,
                    report.removed,
                );
            }
            Ok(Err(err)) => (err.kind(), err.to_string()),
            Err(join) => (SyncErrorKind::Io, format!("sync task join failure: {join}")),
        };

        tracing::warn!(
            path = %task.path.display(),
            error_kind = %kind,
            attempt,
            max_attempts,
            "sync failed: {reason}",
        );
        self.counters.failed.fetch_add(1, Ordering::Relaxed);
        self.audit
            .failed(&task.path, &reason, attempt, max_attempts);
        SyncResult::failed(task.path.clone(), duration_ms, kind, reason)
    }

    fn abandon(&self, task: &PendingTask, attempts: u32) {
        tracing::error!(
            path = %task.path.display(),
            attempts,
            "giving up; the next reconciliation will retry",
        );
        self.counters.abandoned.fetch_add(1, Ordering::Relaxed);
        self.audit.abandoned(&task.path, attempts);
    }
}

/// Worker loop: drain the queue until it closes.
pub async fn run_worker(id: usize, queue: WorkQueue, executor: Arc<Executor>, policy: RetryPolicy) {
    tracing::debug!(worker = id, "sync worker started");
    while let Some(mut task) = queue.dequeue_next().await {
        let attempt = task.attempts + 1;
        let result = executor
            .execute(&task, attempt, policy.max_attempts)
            .await;
        match policy.disposition(&result, attempt) {
            Disposition::Done => queue.mark_done(&task.path),
            Disposition::Retry(delay) => {
                tracing::debug!(
                    worker = id,
                    path = %task.path.display(),
                    delay_ms = delay.as_millis() as u64,
                    "retry scheduled",
                );
                task.attempts = attempt;
                queue.reschedule(task, delay);
            }
            Disposition::Abandon => {
                executor.abandon(&task, attempt);
                queue.mark_done(&task.path);
            }
        }
    }
    tracing::debug!(worker = id, "sync worker stopped");
}

fn unix_seconds_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
