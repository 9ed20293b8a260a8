//! Action planning: which transport call a changed path needs.
//!
//! Planning looks at the source tree at execution time, not at event time.
//! A path that was deleted and recreated inside one debounce window is
//! copied; a path whose file vanished after a `Modified` event is pruned.

use std::path::{Path, PathBuf};

use treewatch_core::ChangeKind;

use crate::error::TransportError;

/// Concrete mirror operation for one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncAction {
    /// Mirror `source` (a file, or a whole subtree) onto `dest`.
    Copy {
        source: PathBuf,
        dest: PathBuf,
        /// Remove mirror entries under `dest` that are absent from `source`.
        delete_extraneous: bool,
    },
    /// Deletion propagation: remove the single mirror entry `dest` (and
    /// anything beneath it) when `source` no longer exists. Transfers nothing.
    Prune { source: PathBuf, dest: PathBuf },
}

impl SyncAction {
    pub fn is_prune(&self) -> bool {
        matches!(self, SyncAction::Prune { .. })
    }

    /// The mirror-side path this action writes to.
    pub fn dest(&self) -> &Path {
        match self {
            SyncAction::Copy { dest, .. } | SyncAction::Prune { dest, .. } => dest,
        }
    }
}

/// The watched root and its mirror.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorRoots {
    pub source: PathBuf,
    pub mirror: PathBuf,
}

impl MirrorRoots {
    pub fn new(source: impl Into<PathBuf>, mirror: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            mirror: mirror.into(),
        }
    }

    /// Map a path under the source root to its mirror counterpart.
    pub fn mirror_path(&self, path: &Path) -> Result<PathBuf, TransportError> {
        let relative = path
            .strip_prefix(&self.source)
            .map_err(|_| TransportError::OutsideRoot {
                path: path.to_path_buf(),
                root: self.source.clone(),
            })?;
        if relative.as_os_str().is_empty() {
            Ok(self.mirror.clone())
        } else {
            Ok(self.mirror.join(relative))
        }
    }

    /// The action for a full-tree reconciliation sweep.
    pub fn full_sweep(&self) -> SyncAction {
        SyncAction::Copy {
            source: self.source.clone(),
            dest: self.mirror.clone(),
            delete_extraneous: true,
        }
    }
}

/// Plan the mirror action for `path`, whose merged change kind is `kind`.
pub fn plan(
    roots: &MirrorRoots,
    path: &Path,
    kind: ChangeKind,
) -> Result<SyncAction, TransportError> {
    if path == roots.source {
        return Ok(roots.full_sweep());
    }
    let dest = roots.mirror_path(path)?;

    let metadata = match std::fs::symlink_metadata(path) {
        Ok(metadata) => Some(metadata),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
        Err(err) => return Err(crate::error::io_err(path, err)),
    };

    let Some(metadata) = metadata else {
        let source = topmost_vanished(path, &roots.source);
        let dest = roots.mirror_path(&source)?;
        tracing::debug!(
            "{} is gone ({kind}); pruning {}",
            path.display(),
            dest.display()
        );
        return Ok(SyncAction::Prune { source, dest });
    };

    if kind == ChangeKind::Deleted {
        tracing::debug!("{} was recreated after deletion; copying", path.display());
    }

    Ok(SyncAction::Copy {
        source: path.to_path_buf(),
        dest,
        delete_extraneous: metadata.is_dir(),
    })
}

/// The highest ancestor of the vanished `path` (itself included) that is
/// also gone, stopping below `root`. Pruning it removes the whole lost
/// subtree in one step without touching its surviving siblings.
fn topmost_vanished(path: &Path, root: &Path) -> PathBuf {
    let mut vanished = path;
    for dir in path.ancestors().skip(1) {
        if dir == root || !dir.starts_with(root) || std::fs::symlink_metadata(dir).is_ok() {
            break;
        }
        vanished = dir;
    }
    vanished.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn roots(source: &TempDir, mirror: &TempDir) -> MirrorRoots {
        MirrorRoots::new(source.path(), mirror.path())
    }

    #[test]
    fn root_path_plans_full_sweep() {
        let (source, mirror) = (TempDir::new().unwrap(), TempDir::new().unwrap());
        let roots = roots(&source, &mirror);
        let action = plan(&roots, source.path(), ChangeKind::Modified).unwrap();
        assert_eq!(action, roots.full_sweep());
    }

    #[test]
    fn existing_file_plans_plain_copy() {
        let (source, mirror) = (TempDir::new().unwrap(), TempDir::new().unwrap());
        let file = source.path().join("a.txt");
        fs::write(&file, "a").unwrap();

        let action = plan(&roots(&source, &mirror), &file, ChangeKind::Modified).unwrap();
        assert_eq!(
            action,
            SyncAction::Copy {
                source: file,
                dest: mirror.path().join("a.txt"),
                delete_extraneous: false,
            }
        );
    }

    #[test]
    fn renamed_directory_plans_subtree_copy() {
        let (source, mirror) = (TempDir::new().unwrap(), TempDir::new().unwrap());
        let dir = source.path().join("moved").join("inner");
        fs::create_dir_all(&dir).unwrap();

        let action = plan(
            &roots(&source, &mirror),
            &source.path().join("moved"),
            ChangeKind::Renamed,
        )
        .unwrap();
        assert_eq!(
            action,
            SyncAction::Copy {
                source: source.path().join("moved"),
                dest: mirror.path().join("moved"),
                delete_extraneous: true,
            }
        );
    }

    #[test]
    fn deleted_file_plans_prune_of_that_file_only() {
        let (source, mirror) = (TempDir::new().unwrap(), TempDir::new().unwrap());
        fs::create_dir_all(source.path().join("docs")).unwrap();
        let gone = source.path().join("docs").join("b.txt");

        let action = plan(&roots(&source, &mirror), &gone, ChangeKind::Deleted).unwrap();
        assert_eq!(
            action,
            SyncAction::Prune {
                source: gone,
                dest: mirror.path().join("docs").join("b.txt"),
            }
        );
    }

    #[test]
    fn deleted_subtree_prunes_its_topmost_vanished_directory() {
        let (source, mirror) = (TempDir::new().unwrap(), TempDir::new().unwrap());
        let gone = source.path().join("x").join("y").join("z.txt");

        let action = plan(&roots(&source, &mirror), &gone, ChangeKind::Deleted).unwrap();
        assert_eq!(
            action,
            SyncAction::Prune {
                source: source.path().join("x"),
                dest: mirror.path().join("x"),
            }
        );
    }

    #[test]
    fn deleted_then_recreated_is_copied() {
        let (source, mirror) = (TempDir::new().unwrap(), TempDir::new().unwrap());
        let file = source.path().join("back.txt");
        fs::write(&file, "again").unwrap();

        let action = plan(&roots(&source, &mirror), &file, ChangeKind::Deleted).unwrap();
        assert!(!action.is_prune());
    }

    #[test]
    fn path_outside_root_is_rejected() {
        let (source, mirror) = (TempDir::new().unwrap(), TempDir::new().unwrap());
        let err = plan(
            &roots(&source, &mirror),
            Path::new("/definitely/elsewhere.txt"),
            ChangeKind::Modified,
        )
        .unwrap_err();
        assert_eq!(err.kind(), treewatch_core::SyncErrorKind::InvalidPath);
    }
}
