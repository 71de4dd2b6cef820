#![forbid(unsafe_code)]

//! Loading [`ManagerConfig`] from TOML and JSON files.
//!
//! Run:
//!   cargo test -p opmgr-runtime --features config --test config_loading

use std::io::Write;

use opmgr_runtime::{ConfigError, ManagerConfig, ManagerError, OpManager, UNLIMITED_STORAGE};

fn write_temp(suffix: &str, content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(suffix)
        .tempfile()
        .expect("create temp file");
    file.write_all(content.as_bytes()).expect("write temp file");
    file
}

#[test]
fn toml_file_round_trip() {
    let file = write_temp(
        ".toml",
        r#"
storage_limit = 25
thread_name_prefix = "editor-op"
thread_stack_size = 262144
"#,
    );
    let config = ManagerConfig::from_toml_file(file.path()).unwrap();
    assert_eq!(config.storage_limit, 25);
    assert_eq!(config.thread_name_prefix, "editor-op");
    assert_eq!(config.thread_stack_size, Some(262_144));

    let mgr = OpManager::new(config.clone());
    assert_eq!(mgr.config(), &config);
}

#[test]
fn json_file_round_trip() {
    let original = ManagerConfig::with_storage_limit(7).thread_name_prefix("json");
    let file = write_temp(".json", &original.to_json());
    let loaded = ManagerConfig::from_json_file(file.path()).unwrap();
    assert_eq!(loaded, original);
}

#[test]
fn empty_documents_give_defaults() {
    let toml = ManagerConfig::from_toml_str("").unwrap();
    let json = ManagerConfig::from_json_str("{}").unwrap();
    assert_eq!(toml, ManagerConfig::default());
    assert_eq!(json, ManagerConfig::default());
    assert_eq!(toml.storage_limit, UNLIMITED_STORAGE);
}

#[test]
fn invalid_values_fail_validation() {
    let err = ManagerConfig::from_toml_str("thread_name_prefix = \"\"\nthread_stack_size = 10")
        .unwrap_err();
    match err {
        ConfigError::Validation(errors) => assert_eq!(errors.len(), 2, "{errors:?}"),
        other => panic!("expected validation error, got {other}"),
    }
}

#[test]
fn malformed_input_reports_parser() {
    assert!(matches!(
        ManagerConfig::from_toml_str("storage_limit = ["),
        Err(ConfigError::Toml(_))
    ));
    assert!(matches!(
        ManagerConfig::from_json_str("{\"storage_limit\": \"many\"}"),
        Err(ConfigError::Json(_))
    ));
}

#[test]
fn missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.toml");
    assert!(matches!(
        ManagerConfig::from_toml_file(&path),
        Err(ConfigError::Io(_))
    ));
}

#[test]
fn two_loaded_configs_are_rejected() {
    let a = ManagerConfig::from_toml_str("storage_limit = 1").unwrap();
    let b = ManagerConfig::from_json_str("{\"storage_limit\": 2}").unwrap();
    assert!(matches!(
        OpManager::with_configs([a.clone(), b]),
        Err(ManagerError::TooManyConfigs)
    ));
    let mgr = OpManager::with_configs([a]).unwrap();
    assert_eq!(mgr.config().storage_limit, 1);
}
