//! In-process tests for project configuration resolution
//!
//! These build a realistic project directory on disk and run the layered
//! environment, config resolution and compose rendering over it together,
//! the way a pipeline invocation does.

use gantry::compose::ComposeFile;
use gantry::environment::Environment;
use gantry::PipelineConfig;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const COMPOSE: &str = r#"services:
  scraper:
    image: ${EXTERNAL_REG}/${APP_NAME}:${APP_VERSION}
    build:
      context: .
      args:
        APP_VERSION: ${APP_VERSION}
        PYTHON_IMG_TAG: ${PYTHON_IMG_TAG}
    networks:
      - ingest

networks:
  ingest:
    external: true
"#;

/// A project with dynamic versioning: APP_VERSION is absent from the env
/// layers and comes from the pyproject manifest's version file.
fn dynamic_version_project() -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join(".env"),
        "APP_NAME=scraper\n\
         INTERNAL_REG=registry.internal.example.org\n\
         EXTERNAL_REG=registry.example.org\n\
         PYTHON_IMG_TAG=3.12-slim\n\
         MAINTAINER=ops@example.org\n",
    )
    .unwrap();
    fs::write(
        dir.path().join("pyproject.toml"),
        "[project]\n\
         name = \"scraper\"\n\
         dynamic = [\"version\"]\n\n\
         [tool.setuptools.dynamic]\n\
         version = { file = \"VERSION\" }\n",
    )
    .unwrap();
    fs::write(dir.path().join("VERSION"), "2.4.0\n").unwrap();
    fs::write(dir.path().join("docker-compose.yml"), COMPOSE).unwrap();
    dir
}

#[test]
fn test_resolves_project_with_manifest_version() {
    let dir = dynamic_version_project();
    let env = Environment::load(dir.path(), &[]).unwrap();
    let config = PipelineConfig::resolve(&env, dir.path()).unwrap();

    assert_eq!(config.app_version, "2.4.0");
    assert_eq!(
        config.unverified_image().unwrap().to_string(),
        "registry.internal.example.org/scraper:2.4.0-unverified"
    );
    assert_eq!(
        config.release_image().unwrap().to_string(),
        "registry.example.org/scraper:2.4.0"
    );
}

#[test]
fn test_attr_version_source() {
    let dir = dynamic_version_project();
    fs::remove_file(dir.path().join("VERSION")).unwrap();
    fs::write(
        dir.path().join("pyproject.toml"),
        "[project]\n\
         name = \"scraper\"\n\
         dynamic = [\"version\"]\n\n\
         [tool.setuptools.dynamic]\n\
         version = { attr = \"scraper.__version__\" }\n",
    )
    .unwrap();
    fs::create_dir(dir.path().join("scraper")).unwrap();
    fs::write(
        dir.path().join("scraper/__init__.py"),
        "__version__ = \"5.1.2\"\n",
    )
    .unwrap();

    let env = Environment::load(dir.path(), &[]).unwrap();
    let config = PipelineConfig::resolve(&env, dir.path()).unwrap();
    assert_eq!(config.app_version, "5.1.2");
}

#[test]
fn test_env_file_version_beats_manifest() {
    let dir = dynamic_version_project();
    let mut content = fs::read_to_string(dir.path().join(".env")).unwrap();
    content.push_str("APP_VERSION=7.0.0\n");
    fs::write(dir.path().join(".env"), content).unwrap();

    let env = Environment::load(dir.path(), &[]).unwrap();
    let config = PipelineConfig::resolve(&env, dir.path()).unwrap();
    assert_eq!(config.app_version, "7.0.0");
}

#[test]
fn test_secret_layer_overrides_env_layer() {
    let dir = dynamic_version_project();
    fs::write(
        dir.path().join(".env.secret"),
        "EXTERNAL_REG_USER=deployer\n\
         EXTERNAL_REG_PASSWORD=hunter2\n\
         MAINTAINER=release-team@example.org\n",
    )
    .unwrap();

    let env = Environment::load(dir.path(), &[]).unwrap();
    let config = PipelineConfig::resolve(&env, dir.path()).unwrap();

    assert_eq!(config.maintainer, "release-team@example.org");
    let creds = config.credentials_for("registry.example.org").unwrap();
    assert_eq!(creds.username, "deployer");
    assert_eq!(creds.password, "hunter2");
}

#[test]
fn test_extra_files_have_lowest_precedence() {
    let dir = dynamic_version_project();
    let extra = dir.path().join("ci.env");
    fs::write(
        &extra,
        "APP_NAME=shadowed\nCI_PIPELINE_ID=4711\n",
    )
    .unwrap();

    let env = Environment::load(dir.path(), &[extra]).unwrap();
    // .env keeps APP_NAME, the extra file only contributes new keys
    assert_eq!(env.get("APP_NAME"), Some("scraper"));
    assert_eq!(env.get("CI_PIPELINE_ID"), Some("4711"));
}

#[test]
fn test_compose_renders_with_resolved_environment() {
    let dir = dynamic_version_project();
    let mut env = Environment::load(dir.path(), &[]).unwrap();
    // Compose interpolation sees the manifest-resolved version too, the
    // way the build stage feeds it back before rendering.
    let config = PipelineConfig::resolve(&env, dir.path()).unwrap();
    env.set("APP_VERSION", &config.app_version);

    let compose = ComposeFile::load(&dir.path().join("docker-compose.yml")).unwrap();
    let rendered = compose.render(&env).unwrap();
    assert!(rendered.contains("image: registry.example.org/scraper:2.4.0"));
    assert!(rendered.contains("APP_VERSION: 2.4.0"));

    let check = compose.check(&env, dir.path());
    assert!(check.is_ok(), "unexpected errors: {:?}", check.errors);
}

#[test]
fn test_compose_check_flags_missing_service_network() {
    let dir = dynamic_version_project();
    fs::write(
        dir.path().join("docker-compose.yml"),
        "services:\n  scraper:\n    image: ${EXTERNAL_REG}/${APP_NAME}:1.0\n",
    )
    .unwrap();

    let env = Environment::load(dir.path(), &[]).unwrap();
    let compose = ComposeFile::load(&dir.path().join("docker-compose.yml")).unwrap();
    let check = compose.check(&env, dir.path());

    assert!(!check.is_ok());
    assert!(check
        .errors
        .iter()
        .any(|e| e.contains("external network")));
}

#[test]
fn test_missing_manifest_and_version_reports_app_version() {
    let dir = dynamic_version_project();
    fs::remove_file(dir.path().join("pyproject.toml")).unwrap();

    let env = Environment::load(dir.path(), &[]).unwrap();
    let err = PipelineConfig::resolve(&env, dir.path()).unwrap_err();
    assert!(err.to_string().contains("APP_VERSION"));
}

#[test]
fn test_tool_settings_from_environment() {
    let dir = dynamic_version_project();
    let mut content = fs::read_to_string(dir.path().join(".env")).unwrap();
    content.push_str("GANTRY_SCANNER=/opt/trivy/trivy\nGANTRY_SCAN_TIMEOUT=900\nGANTRY_REPORT_DIR=artifacts\n");
    fs::write(dir.path().join(".env"), content).unwrap();

    let env = Environment::load(dir.path(), &[]).unwrap();
    let config = PipelineConfig::resolve(&env, dir.path()).unwrap();
    assert_eq!(config.scanner_binary, "/opt/trivy/trivy");
    assert_eq!(config.scan_timeout_secs, 900);
    assert_eq!(config.report_dir, Path::new("artifacts"));
}
