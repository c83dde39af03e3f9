//! Configuration resolution and TOML round trip tests
//!
//! Tests touching ELECT_ROOT_FOLDER are marked #[serial] so they do not race
//! on the process environment.

use elect_common::config::{
    load_toml_config, resolve_root_folder, write_toml_config, PollSettings, TomlConfig,
    ROOT_FOLDER_ENV,
};
use serial_test::serial;
use std::env;
use std::path::{Path, PathBuf};

#[test]
#[serial]
fn test_env_var_beats_toml() {
    env::set_var(ROOT_FOLDER_ENV, "/from/env");
    let toml = TomlConfig {
        root_folder: Some(PathBuf::from("/from/toml")),
        ..Default::default()
    };

    let resolved = resolve_root_folder(None, &toml);
    env::remove_var(ROOT_FOLDER_ENV);

    assert_eq!(resolved, PathBuf::from("/from/env"));
}

#[test]
#[serial]
fn test_toml_used_when_no_cli_or_env() {
    env::remove_var(ROOT_FOLDER_ENV);
    let toml = TomlConfig {
        root_folder: Some(PathBuf::from("/from/toml")),
        ..Default::default()
    };

    assert_eq!(resolve_root_folder(None, &toml), PathBuf::from("/from/toml"));
}

#[test]
#[serial]
fn test_default_when_nothing_configured() {
    env::remove_var(ROOT_FOLDER_ENV);
    let resolved = resolve_root_folder(None, &TomlConfig::default());
    assert!(resolved.ends_with("elect") || resolved.ends_with("elect_data"));
}

#[test]
fn test_cli_beats_everything() {
    let toml = TomlConfig {
        root_folder: Some(PathBuf::from("/from/toml")),
        ..Default::default()
    };
    let resolved = resolve_root_folder(Some(Path::new("/from/cli")), &toml);
    assert_eq!(resolved, PathBuf::from("/from/cli"));
}

#[test]
fn test_write_then_load_preserves_sections() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("config.toml");

    let mut config = TomlConfig::default();
    config.listen = Some("127.0.0.1:5800".to_string());
    config.delimited.delimiter = Some(',');
    config.html.page_url = Some("http://example.org/diff".to_string());
    config.poll = Some(PollSettings {
        name: "Test poll".to_string(),
        candidates: vec!["A".to_string(), "B".to_string()],
    });

    write_toml_config(&config, &path).unwrap();
    let loaded = load_toml_config(&path).unwrap();

    assert_eq!(loaded, config);
}

#[test]
fn test_partial_file_fills_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[delimited]\ndelimiter = \"\\t\"\n").unwrap();

    let loaded = load_toml_config(&path).unwrap();
    assert_eq!(loaded.delimited.delimiter, Some('\t'));
    assert_eq!(loaded.logging.level, "info");
    assert!(loaded.poll.is_none());
}
