//! Size-based rotation for the audit log.
//!
//! `sync.log` is shifted to `sync.log.1`, older copies move up by one, and
//! anything beyond `max_files` is discarded.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Rotate once the live file reaches 10 MiB.
pub const MAX_LOG_BYTES: u64 = 10 * 1024 * 1024;

/// Rotated copies to keep.
pub const MAX_ROTATED_FILES: usize = 5;

/// Rotate `log_path` when it has grown to `max_bytes`.
///
/// Returns `Ok(false)` when the file is below the threshold or missing. The
/// caller is responsible for reopening its handle afterwards; the live path
/// is left absent.
pub fn rotate_if_needed(log_path: &Path, max_bytes: u64, max_files: usize) -> io::Result<bool> {
    let size = match fs::metadata(log_path) {
        Ok(meta) => meta.len(),
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err),
    };
    if size < max_bytes || max_files == 0 {
        return Ok(false);
    }

    remove_if_present(&numbered_path(log_path, max_files))?;
    for n in (1..max_files).rev() {
        let from = numbered_path(log_path, n);
        if from.exists() {
            fs::rename(&from, numbered_path(log_path, n + 1))?;
        }
    }
    fs::rename(log_path, numbered_path(log_path, 1))?;
    Ok(true)
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}

/// `sync.log` + 2 → `sync.log.2`.
pub fn numbered_path(base: &Path, n: usize) -> PathBuf {
    let name = base
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| crate::paths::AUDIT_LOG.to_string());
    base.with_file_name(format!("{name}.{n}"))
}
