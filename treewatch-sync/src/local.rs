//! In-process transport: hash-gated atomic copy.
//!
//! ## `mirror_file`: per-file protocol
//!
//! 1. Stat source and mirror.
//! 2. Quick check: same length and same mtime → unchanged.
//! 3. SHA-256 both files → if identical, only restamp the mtime.
//! 4. Copy into a uniquely named `.<name>.XXXXXX.treewatch.tmp` next to it.
//! 5. Stamp the source mtime on the tmp file.
//! 6. Rename to final path (atomic on POSIX).
//!
//! Every writer gets its own tmp file, so a sweep and a single-file copy of
//! the same path can overlap; the last rename wins.
//!
//! Directories are walked in sorted order. With `delete_extraneous`, mirror
//! entries absent from the source are removed, except in-progress tmp files.
//! Symlinks are not mirrored.

use std::collections::BTreeSet;
use std::ffi::{OsStr, OsString};
use std::fs::{self, File, Metadata};
use std::io;
use std::path::{Path, PathBuf};

use filetime::FileTime;
use sha2::{Digest, Sha256};

use crate::error::{io_err, TransportError};
use crate::plan::SyncAction;
use crate::transport::{TransferReport, Transport};

/// Mirrors with plain filesystem calls. Needs no external tooling.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalTransport;

impl Transport for LocalTransport {
    fn name(&self) -> &'static str {
        "local"
    }

    fn execute(&self, action: &SyncAction) -> Result<TransferReport, TransportError> {
        let mut report = TransferReport::default();
        match action {
            SyncAction::Copy {
                source,
                dest,
                delete_extraneous,
            } => {
                let metadata = fs::symlink_metadata(source).map_err(|e| io_err(source, e))?;
                if metadata.is_dir() {
                    mirror_dir(source, dest, *delete_extraneous, &mut report)?;
                } else if metadata.is_file() {
                    if let Some(parent) = dest.parent() {
                        fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
                    }
                    mirror_file(source, &metadata, dest, &mut report)?;
                } else {
                    tracing::debug!("skipping non-regular entry {}", source.display());
                }
            }
            SyncAction::Prune { source, dest } => prune_entry(source, dest, &mut report)?,
        }
        Ok(report)
    }
}

fn mirror_dir(
    source: &Path,
    dest: &Path,
    delete_extraneous: bool,
    report: &mut TransferReport,
) -> Result<(), TransportError> {
    match fs::symlink_metadata(dest) {
        Ok(meta) if meta.is_dir() => {}
        Ok(_) => {
            remove_entry(dest, report)?;
            create_dir(dest, report)?;
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => create_dir(dest, report)?,
        Err(err) => return Err(io_err(dest, err)),
    }

    let mut seen = BTreeSet::new();
    for (name, path) in sorted_entries(source)? {
        let metadata = match fs::symlink_metadata(&path) {
            Ok(metadata) => metadata,
            // Removed while we were walking; the watcher reports it separately.
            Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
            Err(err) => return Err(io_err(&path, err)),
        };
        let target = dest.join(&name);
        if metadata.is_dir() {
            mirror_dir(&path, &target, delete_extraneous, report)?;
        } else if metadata.is_file() {
            mirror_file(&path, &metadata, &target, report)?;
        } else {
            tracing::debug!("skipping non-regular entry {}", path.display());
            continue;
        }
        seen.insert(name);
    }

    if delete_extraneous {
        for (name, path) in sorted_entries(dest)? {
            if !seen.contains(&name) && !is_tmp_name(&name) {
                remove_entry(&path, report)?;
            }
        }
    }
    Ok(())
}

fn mirror_file(
    source: &Path,
    source_meta: &Metadata,
    dest: &Path,
    report: &mut TransferReport,
) -> Result<(), TransportError> {
    let source_mtime = FileTime::from_last_modification_time(source_meta);

    match fs::symlink_metadata(dest) {
        Ok(dest_meta) if dest_meta.is_file() => {
            // Step 2: quick check.
            let dest_mtime = FileTime::from_last_modification_time(&dest_meta);
            if dest_meta.len() == source_meta.len() && dest_mtime == source_mtime {
                return Ok(());
            }
            // Step 3: content check.
            if dest_meta.len() == source_meta.len() && digest(source)? == digest(dest)? {
                filetime::set_file_mtime(dest, source_mtime).map_err(|e| io_err(dest, e))?;
                tracing::debug!("unchanged content, restamped: {}", dest.display());
                return Ok(());
            }
        }
        Ok(_) => remove_entry(dest, report)?,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(io_err(dest, err)),
    }

    // Steps 4–6: tmp copy, stamp, rename. The tmp file is removed on drop
    // if any step fails.
    let parent = dest.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::Builder::new()
        .prefix(&tmp_prefix(dest))
        .suffix(TMP_SUFFIX)
        .tempfile_in(parent)
        .map_err(|e| io_err(parent, e))?;
    let mut input = File::open(source).map_err(|e| io_err(source, e))?;
    io::copy(&mut input, tmp.as_file_mut()).map_err(|e| io_err(tmp.path(), e))?;
    fs::set_permissions(tmp.path(), source_meta.permissions())
        .map_err(|e| io_err(tmp.path(), e))?;
    filetime::set_file_mtime(tmp.path(), source_mtime).map_err(|e| io_err(tmp.path(), e))?;
    tmp.persist(dest).map_err(|e| io_err(dest, e.error))?;

    tracing::info!("wrote: {}", dest.display());
    report.record_transfer(&format!(">f {}", dest.display()));
    Ok(())
}

fn prune_entry(
    source: &Path,
    dest: &Path,
    report: &mut TransferReport,
) -> Result<(), TransportError> {
    match fs::symlink_metadata(source) {
        Ok(_) => {
            tracing::debug!("{} exists again; nothing to prune", source.display());
            return Ok(());
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(io_err(source, err)),
    }
    match fs::symlink_metadata(dest) {
        Ok(_) => remove_entry(dest, report),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(dest, err)),
    }
}

fn create_dir(dest: &Path, report: &mut TransferReport) -> Result<(), TransportError> {
    fs::create_dir_all(dest).map_err(|e| io_err(dest, e))?;
    report.record_transfer(&format!("cd {}/", dest.display()));
    Ok(())
}

fn remove_entry(path: &Path, report: &mut TransferReport) -> Result<(), TransportError> {
    let metadata = fs::symlink_metadata(path).map_err(|e| io_err(path, e))?;
    let result = if metadata.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    match result {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(io_err(path, err)),
    }
    tracing::info!("removed: {}", path.display());
    report.record_removal(&path.display().to_string());
    Ok(())
}

fn sorted_entries(dir: &Path) -> Result<Vec<(OsString, PathBuf)>, TransportError> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| io_err(dir, e))? {
        let entry = entry.map_err(|e| io_err(dir, e))?;
        entries.push((entry.file_name(), entry.path()));
    }
    entries.sort();
    Ok(entries)
}

fn digest(path: &Path) -> Result<Vec<u8>, TransportError> {
    let mut file = File::open(path).map_err(|e| io_err(path, e))?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher).map_err(|e| io_err(path, e))?;
    Ok(hasher.finalize().to_vec())
}

const TMP_SUFFIX: &str = ".treewatch.tmp";

/// `.<file name>.`; the random part and [`TMP_SUFFIX`] follow.
fn tmp_prefix(dest: &Path) -> OsString {
    let mut prefix = OsString::from(".");
    if let Some(name) = dest.file_name() {
        prefix.push(name);
        prefix.push(".");
    }
    prefix
}

fn is_tmp_name(name: &OsStr) -> bool {
    name.to_string_lossy().ends_with(TMP_SUFFIX)
}
