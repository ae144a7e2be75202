use std::fs;

use serial_test::serial;
use tempfile::TempDir;

use super::settings::{PartialSettings, Settings};
use super::{load_config, load_config_from};

#[test]
fn test_default_settings() {
    let settings = Settings::default();
    assert_eq!(settings.server.host, "127.0.0.1");
    assert_eq!(settings.server.port, 1883);
    assert_eq!(settings.server.address(), "127.0.0.1:1883");
    assert_eq!(settings.broker.max_connections, 1000);
    assert_eq!(settings.logging.level, "info");
}

#[test]
fn test_empty_partial_merges_to_defaults() {
    let merged = PartialSettings::default().merge(Settings::default());
    assert_eq!(merged, Settings::default());
}

#[test]
#[serial]
fn load_config_without_overrides_uses_defaults() {
    temp_env::with_vars_unset(
        [
            "TIERMQ_SERVER__HOST",
            "TIERMQ_SERVER__PORT",
            "TIERMQ_BROKER__MAX_CONNECTIONS",
            "TIERMQ_LOGGING__LEVEL",
        ],
        || {
            let cfg = load_config().expect("load_config failed");
            assert_eq!(cfg, Settings::default());
        },
    );
}

#[test]
#[serial]
fn load_config_from_file_overrides_defaults() {
    let tmp = TempDir::new().expect("create tempdir");
    let path = tmp.path().join("tiermq.toml");
    let toml = r#"
        [server]
        host = "0.0.0.0"
        port = 9000

        [broker]
        max_connections = 10
    "#;
    fs::write(&path, toml).expect("write config file");

    let cfg = load_config_from(Some(&path)).expect("load_config failed");
    assert_eq!(cfg.server.host, "0.0.0.0");
    assert_eq!(cfg.server.port, 9000);
    assert_eq!(cfg.broker.max_connections, 10);
    // untouched section keeps its default
    assert_eq!(cfg.logging.level, "info");
}

#[test]
#[serial]
fn environment_overrides_file() {
    let tmp = TempDir::new().expect("create tempdir");
    let path = tmp.path().join("tiermq.toml");
    fs::write(&path, "[server]\nport = 9000\n").expect("write config file");

    temp_env::with_vars(
        [
            ("TIERMQ_SERVER__PORT", Some("9100")),
            ("TIERMQ_LOGGING__LEVEL", Some("debug")),
        ],
        || {
            let cfg = load_config_from(Some(&path)).expect("load_config failed");
            assert_eq!(cfg.server.port, 9100);
            assert_eq!(cfg.logging.level, "debug");
            assert_eq!(cfg.server.host, "127.0.0.1");
        },
    );
}

#[test]
#[serial]
fn missing_explicit_file_is_an_error() {
    let tmp = TempDir::new().expect("create tempdir");
    let path = tmp.path().join("absent.toml");
    assert!(load_config_from(Some(&path)).is_err());
}
