//! Config load/save error messages and validation rules.

use assert_fs::prelude::*;
use predicates::prelude::predicate;
use rstest::rstest;
use treewatch_core::{
    config::{self, WatchConfig},
    ConfigError, TransportKind,
};

fn valid_pair() -> (assert_fs::TempDir, assert_fs::TempDir) {
    let source = assert_fs::TempDir::new().expect("source");
    let mirror = assert_fs::TempDir::new().expect("mirror");
    (source, mirror)
}

// ---------------------------------------------------------------------------
// 1. Load
// ---------------------------------------------------------------------------

#[test]
fn load_missing_config_returns_not_found() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let path = config::config_path_at(home.path());
    let err = config::load_at(&path).unwrap_err();
    assert!(matches!(err, ConfigError::NotFound { .. }), "got: {err}");
    assert!(err.to_string().contains("config.yaml"));
}

#[test]
fn load_if_exists_returns_none_for_missing_file() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let loaded = config::load_if_exists(&config::config_path_at(home.path())).expect("load");
    assert!(loaded.is_none());
}

#[test]
fn load_corrupt_yaml_returns_parse_error_with_path() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let file = home.child(".treewatch/config.yaml");
    file.write_str("source: [unclosed\n  workers: : :").expect("write");

    let err = config::load_at(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }), "got: {err}");
    assert!(err.to_string().contains("config.yaml"));
}

#[test]
fn load_rejects_unknown_fields() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let file = home.child("config.yaml");
    file.write_str("source: /a\nmirror: /b\nworkerz: 3\n").expect("write");

    let err = config::load_at(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }), "got: {err}");
}

#[test]
fn partial_yaml_fills_remaining_fields_with_defaults() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let file = home.child("config.yaml");
    file.write_str("source: /srv/data\nmirror: /mnt/mirror\nworkers: 2\ntransport: local\n")
        .expect("write");

    let loaded = config::load_at(file.path()).expect("load");
    assert_eq!(loaded.source, std::path::PathBuf::from("/srv/data"));
    assert_eq!(loaded.workers, 2);
    assert_eq!(loaded.transport, TransportKind::Local);
    assert_eq!(loaded.debounce_ms, 500);
    assert_eq!(loaded.max_attempts, 5);
    assert!(loaded.audit_log.is_none());
}

// ---------------------------------------------------------------------------
// 2. Save
// ---------------------------------------------------------------------------

#[test]
fn save_then_load_preserves_every_field() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let path = config::config_path_at(home.path());
    let mut cfg = WatchConfig::new("/srv/data", "/mnt/mirror");
    cfg.reconcile_interval_secs = 60;
    cfg.audit_log = Some("/var/log/treewatch.log".into());

    config::save_at(&path, &cfg).expect("save");
    assert_eq!(config::load_at(&path).expect("load"), cfg);

    home.child(".treewatch/config.yaml.tmp")
        .assert(predicate::path::missing());
}

// ---------------------------------------------------------------------------
// 3. Validation
// ---------------------------------------------------------------------------

#[test]
fn validate_accepts_sibling_directories() {
    let (source, mirror) = valid_pair();
    WatchConfig::new(source.path(), mirror.path())
        .validate()
        .expect("valid config");
}

#[test]
fn validate_accepts_mirror_that_does_not_exist_yet() {
    let (source, mirror) = valid_pair();
    WatchConfig::new(source.path(), mirror.path().join("nested/new"))
        .validate()
        .expect("valid config");
}

#[test]
fn validate_rejects_missing_source_directory() {
    let (source, mirror) = valid_pair();
    let err = WatchConfig::new(source.path().join("gone"), mirror.path())
        .validate()
        .unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }), "got: {err}");
}

#[test]
fn validate_rejects_file_as_source() {
    let (source, mirror) = valid_pair();
    let file = source.child("plain.txt");
    file.write_str("x").expect("write");
    let err = WatchConfig::new(file.path(), mirror.path())
        .validate()
        .unwrap_err();
    assert!(
        matches!(err, ConfigError::Invalid { field: "source", .. }),
        "got: {err}"
    );
}

#[test]
fn validate_rejects_mirror_inside_source() {
    let (source, _mirror) = valid_pair();
    let err = WatchConfig::new(source.path(), source.path().join("backup"))
        .validate()
        .unwrap_err();
    assert!(
        matches!(err, ConfigError::Invalid { field: "mirror", .. }),
        "got: {err}"
    );
}

#[test]
fn validate_rejects_source_inside_mirror() {
    let (_source, mirror) = valid_pair();
    let nested = mirror.child("src");
    nested.create_dir_all().expect("mkdir");
    let err = WatchConfig::new(nested.path(), mirror.path())
        .validate()
        .unwrap_err();
    assert!(
        matches!(err, ConfigError::Invalid { field: "mirror", .. }),
        "got: {err}"
    );
    assert!(err.to_string().contains("contains the watched tree"), "got: {err}");
}

#[rstest]
#[case::no_workers("workers", |c: &mut WatchConfig| c.workers = 0)]
#[case::no_attempts("max_attempts", |c: &mut WatchConfig| c.max_attempts = 0)]
#[case::no_buffer("event_buffer", |c: &mut WatchConfig| c.event_buffer = 0)]
#[case::no_interval("reconcile_interval_secs", |c: &mut WatchConfig| c.reconcile_interval_secs = 0)]
#[case::base_over_cap("backoff_base_ms", |c: &mut WatchConfig| c.backoff_base_ms = c.backoff_cap_ms + 1)]
fn validate_rejects_unusable_numbers(
    #[case] expected: &'static str,
    #[case] mutate: fn(&mut WatchConfig),
) {
    let (source, mirror) = valid_pair();
    let mut cfg = WatchConfig::new(source.path(), mirror.path());
    mutate(&mut cfg);
    match cfg.validate() {
        Err(ConfigError::Invalid { field, .. }) => assert_eq!(field, expected),
        other => panic!("expected Invalid({expected}), got {other:?}"),
    }
}

#[test]
fn validate_requires_both_paths() {
    let err = WatchConfig::default().validate().unwrap_err();
    assert!(
        matches!(err, ConfigError::Invalid { field: "source", .. }),
        "got: {err}"
    );
}
