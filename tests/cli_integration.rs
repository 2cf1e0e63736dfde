//! CLI integration tests
//!
//! These tests spawn the built binary and verify command parsing, output
//! and exit codes. Exit code contract: 0 success, 1 stage/gate failure,
//! 2 configuration errors.

use std::env;
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use tempfile::TempDir;

/// Helper to get the path to the gantry binary
fn gantry_bin() -> PathBuf {
    let mut path = env::current_exe()
        .expect("Failed to get current executable path")
        .parent()
        .expect("No parent")
        .parent()
        .expect("No parent")
        .to_path_buf();

    // If we're in deps/, go up one more level
    if path.ends_with("deps") {
        path = path.parent().expect("No parent").to_path_buf();
    }

    path.join("gantry")
}

/// A project directory with a full .env so configuration resolves.
fn configured_project() -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join(".env"),
        "APP_NAME=scraper\n\
         APP_VERSION=1.2.3\n\
         INTERNAL_REG=registry.internal.example.org\n\
         EXTERNAL_REG=registry.example.org\n\
         PYTHON_IMG_TAG=3.12-slim\n\
         MAINTAINER=ops@example.org\n",
    )
    .unwrap();
    fs::write(
        dir.path().join(".env.secret"),
        "EXTERNAL_REG_PASSWORD=hunter2secret\nEXTERNAL_REG_USER=deployer\n",
    )
    .unwrap();
    fs::write(dir.path().join("Dockerfile"), "FROM scratch\n").unwrap();
    dir
}

#[test]
fn test_cli_help() {
    let output = Command::new(gantry_bin())
        .arg("--help")
        .output()
        .expect("Failed to execute gantry");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("gantry"));
    assert!(stdout.contains("run"));
    assert!(stdout.contains("build"));
    assert!(stdout.contains("scan"));
    assert!(stdout.contains("promote"));
    assert!(stdout.contains("env"));
    assert!(stdout.contains("compose"));
}

#[test]
fn test_cli_version() {
    let output = Command::new(gantry_bin())
        .arg("--version")
        .output()
        .expect("Failed to execute gantry");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("gantry"));
}

#[test]
fn test_env_check_names_every_missing_variable() {
    let dir = TempDir::new().unwrap();
    let output = Command::new(gantry_bin())
        .env_clear()
        .args(["env", "--check", "--project-dir"])
        .arg(dir.path())
        .output()
        .expect("Failed to execute gantry");

    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    for name in [
        "APP_NAME",
        "APP_VERSION",
        "INTERNAL_REG",
        "EXTERNAL_REG",
        "PYTHON_IMG_TAG",
        "MAINTAINER",
    ] {
        assert!(stderr.contains(name), "missing {name} in: {stderr}");
    }
}

#[test]
fn test_env_check_passes_with_full_configuration() {
    let dir = configured_project();
    let output = Command::new(gantry_bin())
        .env_clear()
        .args(["env", "--check", "--project-dir"])
        .arg(dir.path())
        .output()
        .expect("Failed to execute gantry");

    assert_eq!(output.status.code(), Some(0));
}

#[test]
fn test_env_masks_secrets() {
    let dir = configured_project();
    let output = Command::new(gantry_bin())
        .env_clear()
        .args(["env", "--project-dir"])
        .arg(dir.path())
        .output()
        .expect("Failed to execute gantry");

    assert_eq!(output.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("APP_NAME=scraper"));
    assert!(!stdout.contains("hunter2secret"));
}

#[test]
fn test_process_env_beats_dotenv_files() {
    let dir = configured_project();
    let output = Command::new(gantry_bin())
        .env_clear()
        .env("APP_VERSION", "9.9.9")
        .args(["env", "--format", "json", "--project-dir"])
        .arg(dir.path())
        .output()
        .expect("Failed to execute gantry");

    let stdout = String::from_utf8_lossy(&output.stdout);
    let parsed: serde_json::Value = serde_json::from_str(&stdout).expect("env output is JSON");
    assert_eq!(parsed["APP_VERSION"], "9.9.9");
}

#[test]
fn test_compose_check_reports_unresolved_variables() {
    let dir = configured_project();
    fs::write(
        dir.path().join("docker-compose.yml"),
        "services:\n  scraper:\n    image: ${NO_SUCH_IMAGE_VAR}\n",
    )
    .unwrap();

    let output = Command::new(gantry_bin())
        .env_clear()
        .args(["compose", "--check", "--project-dir"])
        .arg(dir.path())
        .output()
        .expect("Failed to execute gantry");

    assert_eq!(output.status.code(), Some(2));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("NO_SUCH_IMAGE_VAR"), "got: {stdout}");
}

#[test]
fn test_compose_render_is_deterministic() {
    let dir = configured_project();
    fs::write(
        dir.path().join("docker-compose.yml"),
        "services:\n  scraper:\n    image: registry.example.org/scraper:${APP_VERSION}\n",
    )
    .unwrap();

    let render = || {
        let output = Command::new(gantry_bin())
            .env_clear()
            .args(["compose", "--project-dir"])
            .arg(dir.path())
            .output()
            .expect("Failed to execute gantry");
        assert_eq!(output.status.code(), Some(0));
        String::from_utf8_lossy(&output.stdout).to_string()
    };

    let first = render();
    let second = render();
    assert_eq!(first, second);
    assert!(first.contains("registry.example.org/scraper:1.2.3"));
}

#[test]
fn test_scan_rejects_malformed_image_reference() {
    let dir = configured_project();
    let output = Command::new(gantry_bin())
        .env_clear()
        .args(["scan", "no-registry-here", "--project-dir"])
        .arg(dir.path())
        .output()
        .expect("Failed to execute gantry");

    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_invalid_subcommand_is_a_usage_error() {
    let output = Command::new(gantry_bin())
        .arg("teleport")
        .output()
        .expect("Failed to execute gantry");

    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_verbose_and_quiet_conflict() {
    let output = Command::new(gantry_bin())
        .args(["run", "-v", "-q"])
        .output()
        .expect("Failed to execute gantry");

    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_env_output_writes_dotenv_file() {
    let dir = configured_project();
    let out_file = dir.path().join("resolved.env");
    let output = Command::new(gantry_bin())
        .env_clear()
        .args(["env", "-q", "--output"])
        .arg(&out_file)
        .arg("--project-dir")
        .arg(dir.path())
        .output()
        .expect("Failed to execute gantry");

    assert_eq!(output.status.code(), Some(0));
    let content = fs::read_to_string(&out_file).unwrap();
    assert!(content.contains("APP_NAME=scraper"));
    // artifact keeps real values, masking is display-only
    assert!(content.contains("EXTERNAL_REG_PASSWORD=hunter2secret"));
}
