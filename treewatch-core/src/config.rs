//! Watch configuration.
//!
//! # Storage layout
//!
//! ```text
//! ~/.treewatch/
//!   config.yaml   (optional; every field has a default except source/mirror)
//! ```
//!
//! A [`WatchConfig`] is built once at process start (file values, then CLI
//! overrides), validated, and passed by value to every stage. Nothing reads
//! it from global state, so several watchers can run in one process.
//!
//! Every path-taking function has an `_at` form with an explicit location;
//! tests always use those.

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{invalid, io_err, ConfigError};

pub const DEFAULT_DEBOUNCE_MS: u64 = 500;
pub const DEFAULT_RECONCILE_INTERVAL_SECS: u64 = 15 * 60;
pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 2_000;
pub const DEFAULT_BACKOFF_CAP_MS: u64 = 60_000;
pub const DEFAULT_EVENT_BUFFER: usize = 1024;

/// Which transport performs the actual mirroring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Spawn the external `rsync` binary.
    #[default]
    Rsync,
    /// In-process hash-gated copy.
    Local,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Rsync => write!(f, "rsync"),
            TransportKind::Local => write!(f, "local"),
        }
    }
}

impl std::str::FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rsync" => Ok(TransportKind::Rsync),
            "local" => Ok(TransportKind::Local),
            other => Err(format!(
                "unknown transport '{other}'; expected: rsync, local"
            )),
        }
    }
}

/// Immutable process-wide watch settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WatchConfig {
    /// Directory tree being watched.
    pub source: PathBuf,
    /// Mirror target kept consistent with `source`.
    pub mirror: PathBuf,
    pub debounce_ms: u64,
    pub reconcile_interval_secs: u64,
    pub workers: usize,
    /// Total attempts per task before it is abandoned.
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    /// Capacity of the event-source channel.
    pub event_buffer: usize,
    pub transport: TransportKind,
    pub rsync_binary: PathBuf,
    /// Audit log file; `None` means `~/.treewatch/logs/sync.log`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audit_log: Option<PathBuf>,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            source: PathBuf::new(),
            mirror: PathBuf::new(),
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            reconcile_interval_secs: DEFAULT_RECONCILE_INTERVAL_SECS,
            workers: DEFAULT_WORKERS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_base_ms: DEFAULT_BACKOFF_BASE_MS,
            backoff_cap_ms: DEFAULT_BACKOFF_CAP_MS,
            event_buffer: DEFAULT_EVENT_BUFFER,
            transport: TransportKind::default(),
            rsync_binary: PathBuf::from("rsync"),
            audit_log: None,
        }
    }
}

impl WatchConfig {
    /// Defaults with the two required paths filled in.
    pub fn new(source: impl Into<PathBuf>, mirror: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            mirror: mirror.into(),
            ..Self::default()
        }
    }

    pub fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_cap(&self) -> Duration {
        Duration::from_millis(self.backoff_cap_ms)
    }

    /// Check the config is runnable. Touches the filesystem for `source`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source.as_os_str().is_empty() {
            return Err(invalid("source", "a source directory is required"));
        }
        if self.mirror.as_os_str().is_empty() {
            return Err(invalid("mirror", "a mirror directory is required"));
        }
        let source = std::fs::canonicalize(&self.source).map_err(|e| io_err(&self.source, e))?;
        if !source.is_dir() {
            return Err(invalid(
                "source",
                format!("{} is not a directory", source.display()),
            ));
        }
        let mirror = resolve_lenient(&self.mirror)?;
        if mirror.starts_with(&source) {
            return Err(invalid(
                "mirror",
                format!(
                    "{} lies inside the watched tree {}",
                    mirror.display(),
                    source.display()
                ),
            ));
        }
        if source.starts_with(&mirror) {
            return Err(invalid(
                "mirror",
                format!(
                    "{} contains the watched tree {}",
                    mirror.display(),
                    source.display()
                ),
            ));
        }
        if self.workers == 0 {
            return Err(invalid("workers", "must be at least 1"));
        }
        if self.max_attempts == 0 {
            return Err(invalid("max_attempts", "must be at least 1"));
        }
        if self.event_buffer == 0 {
            return Err(invalid("event_buffer", "must be at least 1"));
        }
        if self.reconcile_interval_secs == 0 {
            return Err(invalid("reconcile_interval_secs", "must be at least 1"));
        }
        if self.backoff_base_ms > self.backoff_cap_ms {
            return Err(invalid(
                "backoff_base_ms",
                format!(
                    "base {}ms exceeds cap {}ms",
                    self.backoff_base_ms, self.backoff_cap_ms
                ),
            ));
        }
        Ok(())
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }
}

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

/// `<home>/.treewatch/`
pub fn treewatch_root(home: &Path) -> PathBuf {
    home.join(".treewatch")
}

/// `<home>/.treewatch/config.yaml`. Pure, no I/O.
pub fn config_path_at(home: &Path) -> PathBuf {
    treewatch_root(home).join("config.yaml")
}

/// `config_path_at` convenience wrapper.
pub fn config_path() -> Result<PathBuf, ConfigError> {
    Ok(config_path_at(&home()?))
}

fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}

/// Canonicalize the longest existing prefix of `path` and re-append the rest,
/// so paths that do not exist yet still compare correctly with `starts_with`.
fn resolve_lenient(path: &Path) -> Result<PathBuf, ConfigError> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map_err(|e| io_err(path, e))?
            .join(path)
    };

    let mut existing = absolute.as_path();
    let mut rest = Vec::new();
    loop {
        match std::fs::canonicalize(existing) {
            Ok(resolved) => {
                let mut out = resolved;
                for component in rest.iter().rev() {
                    out.push(component);
                }
                return Ok(out);
            }
            Err(_) => match (existing.parent(), existing.components().next_back()) {
                (Some(parent), Some(Component::Normal(name))) => {
                    rest.push(name.to_os_string());
                    existing = parent;
                }
                _ => return Ok(absolute),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Load / save
// ---------------------------------------------------------------------------

/// Load a config file.
///
/// Returns `ConfigError::NotFound` if absent,
/// `ConfigError::Parse` (with path + line context) if malformed YAML.
pub fn load_at(path: &Path) -> Result<WatchConfig, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound {
            path: path.to_path_buf(),
        });
    }
    let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Load `path` if it exists, otherwise return `None`.
pub fn load_if_exists(path: &Path) -> Result<Option<WatchConfig>, ConfigError> {
    match load_at(path) {
        Ok(config) => Ok(Some(config)),
        Err(ConfigError::NotFound { .. }) => Ok(None),
        Err(err) => Err(err),
    }
}

/// Save a config atomically: write `<path>.tmp`, then rename over `<path>`.
pub fn save_at(path: &Path, config: &WatchConfig) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
    }
    let yaml = config.to_yaml()?;
    let tmp = path.with_extension("yaml.tmp");
    std::fs::write(&tmp, yaml).map_err(|e| io_err(&tmp, e))?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(path, e));
    }
    Ok(())
}
