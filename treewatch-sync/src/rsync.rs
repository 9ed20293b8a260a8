//! External `rsync` transport.
//!
//! Every call uses `-a --itemize-changes` so the output can be counted:
//! lines starting with `>`, `<`, `c` or `h` are transfers, `*deleting`
//! lines are removals, and attribute-only lines (`.`) are ignored.
//!
//! | action                              | command                                              |
//! |-------------------------------------|------------------------------------------------------|
//! | `Copy` of a directory               | `rsync -a -i [--delete] src/ dst/`                   |
//! | `Copy` of a file                    | `rsync -a -i src dst`                                |
//! | `Prune` of `name`                   | `rsync -a -i --delete --existing --ignore-existing --include=/name --include=/name/*** --exclude=* src_parent/ dst_parent/` |
//!
//! The prune filters restrict deletion to the one entry; everything else in
//! the parent is excluded and therefore protected.

use std::ffi::{OsStr, OsString};
use std::fs;
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{io_err, TransportError};
use crate::plan::SyncAction;
use crate::transport::{TransferReport, Transport};

/// Shells out to an `rsync` binary.
#[derive(Debug, Clone)]
pub struct RsyncTransport {
    binary: PathBuf,
}

impl Default for RsyncTransport {
    fn default() -> Self {
        Self::new("rsync")
    }
}

impl RsyncTransport {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Arguments for `action`, without the program name.
    pub fn command_args(&self, action: &SyncAction) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["-a".into(), "--itemize-changes".into()];
        match action {
            SyncAction::Copy {
                source,
                dest,
                delete_extraneous,
            } => {
                if *delete_extraneous {
                    args.push("--delete".into());
                }
                if source.is_dir() {
                    args.push(with_trailing_slash(source));
                    args.push(with_trailing_slash(dest));
                } else {
                    args.push(source.as_os_str().to_os_string());
                    args.push(dest.as_os_str().to_os_string());
                }
            }
            SyncAction::Prune { source, dest } => {
                args.push("--delete".into());
                args.push("--existing".into());
                args.push("--ignore-existing".into());
                match source.file_name() {
                    Some(name) => args.extend(entry_filters(name)),
                    None => args.push("--exclude=*".into()),
                }
                args.push(with_trailing_slash(parent_or_self(source)));
                args.push(with_trailing_slash(parent_or_self(dest)));
            }
        }
        args
    }
}

impl Transport for RsyncTransport {
    fn name(&self) -> &'static str {
        "rsync"
    }

    fn execute(&self, action: &SyncAction) -> Result<TransferReport, TransportError> {
        let mut cleared = false;
        match action {
            SyncAction::Prune { source, dest } => {
                if fs::symlink_metadata(dest).is_err() || !parent_or_self(source).is_dir() {
                    return Ok(TransferReport::default());
                }
            }
            SyncAction::Copy { source, dest, .. } => {
                // rsync creates the final component only.
                if let Some(parent) = dest.parent() {
                    fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
                }
                cleared = clear_directory_in_the_way(source, dest)?;
            }
        }

        let args = self.command_args(action);
        tracing::debug!("running {} {:?}", self.binary.display(), args);
        let output = Command::new(&self.binary)
            .args(&args)
            .output()
            .map_err(|source| TransportError::Spawn {
                program: self.binary.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(TransportError::Exit {
                program: self.binary.clone(),
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let mut report = parse_itemized(&String::from_utf8_lossy(&output.stdout));
        if cleared {
            report.record_removal(&format!("{}/", action.dest().display()));
        }
        Ok(report)
    }
}

/// `rsync -a file dir` would nest the file inside `dir`, so a directory that
/// sits where a file belongs is removed first. Returns whether it was.
fn clear_directory_in_the_way(source: &Path, dest: &Path) -> Result<bool, TransportError> {
    if fs::symlink_metadata(source).is_err() || source.is_dir() {
        return Ok(false);
    }
    match fs::symlink_metadata(dest) {
        Ok(meta) if meta.is_dir() => {
            fs::remove_dir_all(dest).map_err(|e| io_err(dest, e))?;
            tracing::info!("removed directory in the way of {}", dest.display());
            Ok(true)
        }
        _ => Ok(false),
    }
}

/// Anchored include rules for `name` and everything beneath it, then an
/// exclude for the rest of the directory.
fn entry_filters(name: &OsStr) -> [OsString; 3] {
    let raw = name.as_bytes();
    // Backslash escapes only count in patterns that contain a wildcard.
    let has_wildcard = raw.iter().any(|b| matches!(b, b'*' | b'?' | b'['));

    let mut exact = b"--include=/".to_vec();
    if has_wildcard {
        exact.extend(escape_pattern(raw));
    } else {
        exact.extend_from_slice(raw);
    }
    let mut nested = b"--include=/".to_vec();
    nested.extend(escape_pattern(raw));
    nested.extend_from_slice(b"/***");

    [
        OsString::from_vec(exact),
        OsString::from_vec(nested),
        OsString::from("--exclude=*"),
    ]
}

fn escape_pattern(raw: &[u8]) -> Vec<u8> {
    let mut escaped = Vec::with_capacity(raw.len());
    for &byte in raw {
        if matches!(byte, b'*' | b'?' | b'[' | b'\\') {
            escaped.push(b'\\');
        }
        escaped.push(byte);
    }
    escaped
}

fn parent_or_self(path: &Path) -> &Path {
    path.parent().unwrap_or(path)
}

/// Count transfers and removals in `--itemize-changes` output.
pub fn parse_itemized(stdout: &str) -> TransferReport {
    let mut report = TransferReport::default();
    for line in stdout.lines().map(str::trim_end).filter(|l| !l.is_empty()) {
        if line.starts_with("*deleting") {
            report.removed += 1;
        } else if matches!(line.chars().next(), Some('>' | '<' | 'c' | 'h')) {
            report.transferred += 1;
        } else {
            continue;
        }
        if !report.output.is_empty() {
            report.output.push('\n');
        }
        report.output.push_str(line);
    }
    report
}

fn with_trailing_slash(path: &Path) -> OsString {
    let mut raw = path.as_os_str().to_os_string();
    if !path.as_os_str().to_string_lossy().ends_with('/') {
        raw.push("/");
    }
    raw
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn strings(args: Vec<OsString>) -> Vec<String> {
        args.into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn directory_copy_uses_trailing_slashes_and_delete() {
        let src = TempDir::new().unwrap();
        let action = SyncAction::Copy {
            source: src.path().to_path_buf(),
            dest: PathBuf::from("/mnt/mirror"),
            delete_extraneous: true,
        };
        let args = strings(RsyncTransport::default().command_args(&action));
        assert_eq!(&args[..3], ["-a", "--itemize-changes", "--delete"]);
        assert!(args[3].ends_with('/'));
        assert_eq!(args[4], "/mnt/mirror/");
    }

    #[test]
    fn file_copy_keeps_plain_paths() {
        let src = TempDir::new().unwrap();
        let file = src.path().join("a.txt");
        std::fs::write(&file, "a").unwrap();
        let action = SyncAction::Copy {
            source: file.clone(),
            dest: PathBuf::from("/mnt/mirror/a.txt"),
            delete_extraneous: false,
        };
        let args = strings(RsyncTransport::default().command_args(&action));
        assert_eq!(
            args,
            [
                "-a".to_string(),
                "--itemize-changes".to_string(),
                file.display().to_string(),
                "/mnt/mirror/a.txt".to_string(),
            ]
        );
    }

    #[test]
    fn prune_transfers_nothing_and_targets_one_entry() {
        let action = SyncAction::Prune {
            source: PathBuf::from("/srv/data/docs/b.txt"),
            dest: PathBuf::from("/mnt/mirror/docs/b.txt"),
        };
        let args = strings(RsyncTransport::default().command_args(&action));
        for flag in ["--delete", "--existing", "--ignore-existing"] {
            assert!(args.iter().any(|a| a == flag), "missing {flag}: {args:?}");
        }
        assert_eq!(
            args[args.len() - 5..],
            [
                "--include=/b.txt",
                "--include=/b.txt/***",
                "--exclude=*",
                "/srv/data/docs/",
                "/mnt/mirror/docs/",
            ]
        );
    }

    #[test]
    fn prune_filters_escape_wildcards() {
        let [exact, nested, _] = entry_filters(OsStr::new("report[1]*.txt"));
        assert_eq!(exact, "--include=/report\\[1]\\*.txt");
        assert_eq!(nested, "--include=/report\\[1]\\*.txt/***");

        let [plain, nested, _] = entry_filters(OsStr::new("back\\slash"));
        assert_eq!(plain, "--include=/back\\slash");
        assert_eq!(nested, "--include=/back\\\\slash/***");
    }

    #[test]
    fn prune_of_missing_mirror_entry_skips_rsync() {
        let (src, dst) = (TempDir::new().unwrap(), TempDir::new().unwrap());
        let transport = RsyncTransport::new(src.path().join("no-such-rsync"));
        let report = transport
            .execute(&SyncAction::Prune {
                source: src.path().join("gone.txt"),
                dest: dst.path().join("gone.txt"),
            })
            .expect("nothing to prune");
        assert!(report.is_noop());
    }

    #[test]
    fn directory_where_a_file_belongs_is_cleared() {
        let (src, dst) = (TempDir::new().unwrap(), TempDir::new().unwrap());
        let file = src.path().join("node");
        fs::write(&file, "file now").unwrap();
        fs::create_dir_all(dst.path().join("node").join("child")).unwrap();

        assert!(clear_directory_in_the_way(&file, &dst.path().join("node")).unwrap());
        assert!(!dst.path().join("node").exists());
    }

    #[test]
    fn directory_source_or_missing_source_clears_nothing() {
        let (src, dst) = (TempDir::new().unwrap(), TempDir::new().unwrap());
        fs::create_dir_all(dst.path().join("node")).unwrap();

        let node = dst.path().join("node");
        assert!(!clear_directory_in_the_way(src.path(), &node).unwrap());
        assert!(!clear_directory_in_the_way(&src.path().join("gone"), &node).unwrap());
        assert!(dst.path().join("node").is_dir());
    }

    #[test]
    fn itemized_output_is_counted() {
        let stdout = "\
cd+++++++++ docs/
>f+++++++++ docs/a.txt
>f.st...... b.txt
.d..t...... ./
*deleting   old.txt
";
        let report = parse_itemized(stdout);
        assert_eq!(report.transferred, 3);
        assert_eq!(report.removed, 1);
        assert!(!report.output.contains(".d..t"));
    }

    #[test]
    fn empty_output_is_noop() {
        assert!(parse_itemized("").is_noop());
        assert!(parse_itemized(".d..t...... ./\n").is_noop());
    }

    #[test]
    fn missing_binary_is_spawn_error() {
        let (src, dst) = (TempDir::new().unwrap(), TempDir::new().unwrap());
        let transport = RsyncTransport::new(src.path().join("no-such-rsync"));
        let err = transport
            .execute(&SyncAction::Copy {
                source: src.path().to_path_buf(),
                dest: dst.path().join("m"),
                delete_extraneous: true,
            })
            .unwrap_err();
        assert_eq!(err.kind(), treewatch_core::SyncErrorKind::Spawn);
    }
}
