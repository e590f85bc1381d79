//! Binary-level behaviour that needs no database server.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

fn keel_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_keel"))
}

fn run_cli(args: &[&str], home: &Path) -> Output {
    Command::new(keel_bin())
        .args(args)
        .env("KEEL_HOME", home)
        .env("RUST_LOG", "error")
        .env_remove("KEEL_CONFIG")
        .env_remove("KEEL_HOST")
        .env_remove("KEEL_PORT")
        .env_remove("KEEL_TIMEOUT_SECS")
        .output()
        .expect("run keel")
}

#[test]
fn test_help_lists_operations() {
    let home = TempDir::new().unwrap();
    let output = run_cli(&["--help"], home.path());
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    for command in ["assert", "apply", "rollback"] {
        assert!(stdout.contains(command), "missing {} in help:\n{}", command, stdout);
    }
}

#[test]
fn test_invalid_config_file_fails_generic() {
    let home = TempDir::new().unwrap();
    let config = home.path().join("keel.toml");
    std::fs::write(&config, "[database]\nport = \"not a port\"\n").unwrap();

    let output = run_cli(
        &["--config", config.to_str().unwrap(), "assert", "1"],
        home.path(),
    );
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("Invalid config file"));
}

#[test]
fn test_missing_migrations_directory_fails_generic() {
    let home = TempDir::new().unwrap();
    let missing = home.path().join("no-migrations-here");

    let output = run_cli(
        &[
            "--migrations",
            missing.to_str().unwrap(),
            "--retry-attempts",
            "1",
            "--timeout-secs",
            "10",
            "apply",
            "3",
        ],
        home.path(),
    );
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("migrations directory not found"));
}

#[test]
fn test_logs_written_under_keel_home() {
    let home = TempDir::new().unwrap();
    let missing = home.path().join("absent");
    let _ = run_cli(
        &["--migrations", missing.to_str().unwrap(), "assert", "1"],
        home.path(),
    );
    assert!(home.path().join("logs").is_dir());
}
