//! Malformed configuration layers must fail loading rather than fall back.

use std::ffi::OsString;
use std::fs;

use tempfile::TempDir;

use neat_config::Config;
use ortho_config::OrthoConfig;

#[test]
fn malformed_config_file_is_rejected() {
    let temp_dir = TempDir::new().expect("create temp dir");
    let path = temp_dir.path().join("neat.toml");
    fs::write(&path, "stagger_ms = \"not a number\"\n").expect("write malformed config");

    let args = vec![
        OsString::from("neat"),
        OsString::from("--config-path"),
        path.into_os_string(),
    ];

    let error = Config::load_from_iter(args).expect_err("loading must fail");
    assert!(
        !error.to_string().is_empty(),
        "expected a descriptive loader error"
    );
}

#[test]
fn unknown_log_format_is_rejected() {
    let args = vec![
        OsString::from("neat"),
        OsString::from("--log-format"),
        OsString::from("pretty"),
    ];
    assert!(Config::load_from_iter(args).is_err());
}
