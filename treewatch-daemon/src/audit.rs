//! Append-only audit trail: one `[timestamp] event` line per sync event.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;

use crate::error::{io_err, DaemonError};
use crate::log_rotation;

enum Sink {
    File { path: PathBuf, file: File },
    Memory(Vec<String>),
}

/// Serialized writer for the audit trail. Cloning shares the same sink.
#[derive(Clone)]
pub struct AuditLog {
    sink: Arc<Mutex<Sink>>,
}

impl AuditLog {
    /// Open (or create) the log file at `path` for appending.
    pub fn open(path: &Path) -> Result<Self, DaemonError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
        let file = open_append(path).map_err(|e| io_err(path, e))?;
        Ok(Self {
            sink: Arc::new(Mutex::new(Sink::File {
                path: path.to_path_buf(),
                file,
            })),
        })
    }

    /// An in-memory sink, used by tests and one-shot runs.
    pub fn memory() -> Self {
        Self {
            sink: Arc::new(Mutex::new(Sink::Memory(Vec::new()))),
        }
    }

    pub fn path(&self) -> Option<PathBuf> {
        match &*self.sink.lock() {
            Sink::File { path, .. } => Some(path.clone()),
            Sink::Memory(_) => None,
        }
    }

    /// Lines recorded by a memory sink; empty for file sinks.
    pub fn entries(&self) -> Vec<String> {
        match &*self.sink.lock() {
            Sink::Memory(lines) => lines.clone(),
            Sink::File { .. } => Vec::new(),
        }
    }

    pub fn detected(&self, path: &Path) {
        self.append(&format!("Detected change in: {}", path.display()));
    }

    pub fn synchronized(&self, path: &Path, dest: &Path) {
        self.append(&format!(
            "Synchronized {} to {}",
            path.display(),
            dest.display()
        ));
    }

    pub fn failed(&self, path: &Path, reason: &str, attempt: u32, max_attempts: u32) {
        self.append(&format!(
            "Sync failed for {}: {} (attempt {attempt}/{max_attempts})",
            path.display(),
            single_line(reason)
        ));
    }

    pub fn abandoned(&self, path: &Path, attempts: u32) {
        self.append(&format!(
            "Sync abandoned for {} after {attempts} attempts",
            path.display()
        ));
    }

    pub fn reconciliation_started(&self) {
        self.append("Full reconciliation started");
    }

    pub fn reconciliation_completed(&self) {
        self.append("Full reconciliation completed");
    }

    fn append(&self, message: &str) {
        let line = format_line(Utc::now(), message);
        let mut sink = self.sink.lock();
        match &mut *sink {
            Sink::Memory(lines) => lines.push(line),
            Sink::File { path, file } => {
                if let Err(err) = writeln!(file, "{line}") {
                    tracing::warn!(path = %path.display(), error = %err, "audit log write failed");
                }
            }
        }
    }

    /// Rotate the backing file when it has outgrown `max_bytes`, then reopen it.
    pub fn rotate_if_needed(&self, max_bytes: u64, max_files: usize) -> io::Result<bool> {
        let mut sink = self.sink.lock();
        let Sink::File { path, file } = &mut *sink else {
            return Ok(false);
        };
        file.flush()?;
        if !log_rotation::rotate_if_needed(path, max_bytes, max_files)? {
            return Ok(false);
        }
        *file = open_append(path)?;
        tracing::info!(path = %path.display(), "audit log rotated");
        Ok(true)
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

/// `[2024-05-01T12:00:00.000Z] message`
pub fn format_line(at: DateTime<Utc>, message: &str) -> String {
    format!(
        "[{}] {}",
        at.to_rfc3339_opts(SecondsFormat::Millis, true),
        message
    )
}

fn single_line(reason: &str) -> String {
    reason
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[test]
    fn line_format_is_bracketed_rfc3339() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        assert_eq!(
            format_line(at, "Full reconciliation started"),
            "[2024-05-01T12:00:00.000Z] Full reconciliation started"
        );
    }

    #[test]
    fn event_messages_match_the_audit_vocabulary() {
        let audit = AuditLog::memory();
        let path = Path::new("/src/a.txt");
        audit.detected(path);
        audit.synchronized(path, Path::new("/mirror/a.txt"));
        audit.failed(path, "rsync exited with 23:\nsome files vanished\n", 2, 5);
        audit.abandoned(path, 5);

        let messages: Vec<String> = audit
            .entries()
            .iter()
            .map(|line| line.split_once("] ").unwrap().1.to_string())
            .collect();
        assert_eq!(
            messages,
            vec![
                "Detected change in: /src/a.txt",
                "Synchronized /src/a.txt to /mirror/a.txt",
                "Sync failed for /src/a.txt: rsync exited with 23:; some files vanished (attempt 2/5)",
                "Sync abandoned for /src/a.txt after 5 attempts",
            ]
        );
    }

    #[test]
    fn file_sink_appends_and_reopens_after_rotation() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("logs").join("sync.log");
        let audit = AuditLog::open(&path).unwrap();
        audit.reconciliation_started();
        audit.reconciliation_completed();

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert!(content.lines().all(|line| line.starts_with('[')));

        assert!(audit.rotate_if_needed(1, 5).unwrap());
        audit.detected(Path::new("/src/after"));
        let fresh = fs::read_to_string(&path).unwrap();
        assert!(fresh.contains("Detected change in: /src/after"));
        assert_eq!(fresh.lines().count(), 1);
        assert!(log_rotation::numbered_path(&path, 1).exists());
    }
}
