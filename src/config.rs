//! Pipeline configuration
//!
//! Configuration is resolved from the merged environment (see
//! [`crate::environment`]). The application variables come from the
//! project's `.env` files or the CI job; tool behavior is tuned through the
//! `GANTRY_*` namespace.
//!
//! # Environment Variables
//!
//! ## Application (required)
//! - `APP_NAME`: image repository name
//! - `APP_VERSION`: release version (falls back to the package manifest)
//! - `INTERNAL_REG`: registry host holding unverified images
//! - `EXTERNAL_REG`: registry host holding promoted images
//! - `PYTHON_IMG_TAG`: base image tag passed as a build argument
//! - `MAINTAINER`: image maintainer label
//!
//! ## Credentials and trust (optional)
//! - `INTERNAL_REG_USER` / `INTERNAL_REG_PASSWORD`
//! - `EXTERNAL_REG_USER` / `EXTERNAL_REG_PASSWORD`
//! - `REGISTRY_CA_CERT`: path to a PEM bundle for private registry TLS
//!
//! ## Tool settings (optional)
//! - `GANTRY_SCANNER`: scanner binary - default: "trivy"
//! - `GANTRY_SCAN_TIMEOUT`: scan timeout in seconds - default: "300"
//! - `GANTRY_REPORT_DIR`: directory for report artifacts - default: "."

use crate::environment::{Environment, EnvironmentError};
use crate::manifest::{ManifestError, PackageManifest};
use crate::reference::{ImageReference, ReferenceError};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

const DEFAULT_SCANNER: &str = "trivy";
const DEFAULT_SCAN_TIMEOUT_SECS: u64 = 300;

/// The application variables every pipeline run needs.
pub const REQUIRED_VARIABLES: [&str; 6] = [
    "APP_NAME",
    "APP_VERSION",
    "INTERNAL_REG",
    "EXTERNAL_REG",
    "PYTHON_IMG_TAG",
    "MAINTAINER",
];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Environment(#[from] EnvironmentError),

    #[error("Failed to resolve APP_VERSION from the package manifest: {0}")]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Reference(#[from] ReferenceError),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Username/password pair for a registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryCredentials {
    pub username: String,
    pub password: String,
}

/// Fully resolved configuration for one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub app_name: String,
    pub app_version: String,
    pub internal_registry: String,
    pub external_registry: String,
    pub python_img_tag: String,
    pub maintainer: String,

    pub internal_credentials: Option<RegistryCredentials>,
    pub external_credentials: Option<RegistryCredentials>,
    pub ca_cert: Option<PathBuf>,

    pub scanner_binary: String,
    pub scan_timeout_secs: u64,
    pub report_dir: PathBuf,
}

impl PipelineConfig {
    /// Resolves configuration from the merged environment.
    ///
    /// When `APP_VERSION` is not set, the package manifest in `project_dir`
    /// supplies it (dynamic versioning); after that, all required variables
    /// are checked in one pass so the error names every missing one.
    pub fn resolve(env: &Environment, project_dir: &Path) -> Result<Self, ConfigError> {
        let mut env = env.clone();

        if !env.contains("APP_VERSION") {
            let manifest_path = project_dir.join("pyproject.toml");
            if manifest_path.exists() {
                let manifest = PackageManifest::load(&manifest_path)?;
                let version = manifest.resolve_version(project_dir)?;
                debug!(version, "APP_VERSION resolved from package manifest");
                env.set("APP_VERSION", version);
            }
        }

        env.require(&REQUIRED_VARIABLES)?;

        let get = |key: &str| env.get(key).unwrap_or_default().to_string();

        let credentials = |user_key: &str, password_key: &str| {
            match (env.get(user_key), env.get(password_key)) {
                (Some(username), Some(password)) => Some(RegistryCredentials {
                    username: username.to_string(),
                    password: password.to_string(),
                }),
                _ => None,
            }
        };

        let scan_timeout_secs = match env.get("GANTRY_SCAN_TIMEOUT") {
            Some(raw) => raw.parse::<u64>().map_err(|_| {
                ConfigError::ValidationFailed(format!(
                    "GANTRY_SCAN_TIMEOUT must be a number of seconds, got '{raw}'"
                ))
            })?,
            None => DEFAULT_SCAN_TIMEOUT_SECS,
        };

        let config = Self {
            app_name: get("APP_NAME"),
            app_version: get("APP_VERSION"),
            internal_registry: get("INTERNAL_REG"),
            external_registry: get("EXTERNAL_REG"),
            python_img_tag: get("PYTHON_IMG_TAG"),
            maintainer: get("MAINTAINER"),
            internal_credentials: credentials("INTERNAL_REG_USER", "INTERNAL_REG_PASSWORD"),
            external_credentials: credentials("EXTERNAL_REG_USER", "EXTERNAL_REG_PASSWORD"),
            ca_cert: env.get("REGISTRY_CA_CERT").map(PathBuf::from),
            scanner_binary: env
                .get("GANTRY_SCANNER")
                .unwrap_or(DEFAULT_SCANNER)
                .to_string(),
            scan_timeout_secs,
            report_dir: env
                .get("GANTRY_REPORT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".")),
        };

        config.validate()?;
        Ok(config)
    }

    /// Checks that resolved values actually work as image references.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("INTERNAL_REG", &self.internal_registry),
            ("EXTERNAL_REG", &self.external_registry),
        ] {
            if value.contains("://") {
                return Err(ConfigError::ValidationFailed(format!(
                    "{name} must be a bare host (no scheme), got '{value}'"
                )));
            }
        }

        if self.scan_timeout_secs == 0 {
            return Err(ConfigError::ValidationFailed(
                "GANTRY_SCAN_TIMEOUT must be at least 1 second".to_string(),
            ));
        }

        // Surfaces invalid names, versions and registry hosts in one place.
        self.unverified_image()?;
        self.release_image()?;
        self.latest_image()?;
        Ok(())
    }

    /// `<INTERNAL_REG>/<APP_NAME>:<APP_VERSION>-unverified`
    pub fn unverified_image(&self) -> Result<ImageReference, ConfigError> {
        let release =
            ImageReference::new(&self.internal_registry, &self.app_name, &self.app_version)?;
        Ok(release.unverified())
    }

    /// `<EXTERNAL_REG>/<APP_NAME>:<APP_VERSION>`
    pub fn release_image(&self) -> Result<ImageReference, ConfigError> {
        Ok(ImageReference::new(
            &self.external_registry,
            &self.app_name,
            &self.app_version,
        )?)
    }

    /// `<EXTERNAL_REG>/<APP_NAME>:latest`
    pub fn latest_image(&self) -> Result<ImageReference, ConfigError> {
        Ok(ImageReference::new(
            &self.external_registry,
            &self.app_name,
            "latest",
        )?)
    }

    /// Credentials for a registry host, when configured.
    pub fn credentials_for(&self, registry: &str) -> Option<&RegistryCredentials> {
        if registry == self.internal_registry {
            self.internal_credentials.as_ref()
        } else if registry == self.external_registry {
            self.external_credentials.as_ref()
        } else {
            None
        }
    }

    /// The build arguments every image build receives.
    pub fn build_args(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("APP_NAME".to_string(), self.app_name.clone()),
            ("APP_VERSION".to_string(), self.app_version.clone()),
            ("PYTHON_IMG_TAG".to_string(), self.python_img_tag.clone()),
            ("MAINTAINER".to_string(), self.maintainer.clone()),
        ])
    }
}

#[cfg(test)]
impl PipelineConfig {
    pub(crate) fn for_tests() -> Self {
        Self {
            app_name: "scraper".to_string(),
            app_version: "1.2.3".to_string(),
            internal_registry: "registry.internal.example.org".to_string(),
            external_registry: "registry.example.org".to_string(),
            python_img_tag: "3.12-slim".to_string(),
            maintainer: "ops@example.org".to_string(),
            internal_credentials: None,
            external_credentials: None,
            ca_cert: None,
            scanner_binary: "trivy".to_string(),
            scan_timeout_secs: 300,
            report_dir: std::env::temp_dir(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_env() -> Environment {
        Environment::from_pairs([
            ("APP_NAME", "scraper"),
            ("APP_VERSION", "1.4.3"),
            ("INTERNAL_REG", "registry.internal.example.org"),
            ("EXTERNAL_REG", "registry.example.org"),
            ("PYTHON_IMG_TAG", "3.10-slim"),
            ("MAINTAINER", "ops@example.org"),
        ])
    }

    #[test]
    fn test_resolve_full_environment() {
        let config = PipelineConfig::resolve(&full_env(), Path::new(".")).unwrap();
        assert_eq!(config.app_name, "scraper");
        assert_eq!(config.scanner_binary, "trivy");
        assert_eq!(config.scan_timeout_secs, 300);
        assert!(config.internal_credentials.is_none());
    }

    #[test]
    fn test_missing_variables_listed_together() {
        let env = Environment::from_pairs([("APP_NAME", "scraper")]);
        let err = PipelineConfig::resolve(&env, Path::new(".")).unwrap_err();
        let message = err.to_string();
        for name in ["APP_VERSION", "INTERNAL_REG", "EXTERNAL_REG", "PYTHON_IMG_TAG", "MAINTAINER"]
        {
            assert!(message.contains(name), "missing {name} in: {message}");
        }
    }

    #[test]
    fn test_app_version_from_manifest() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("pyproject.toml"),
            "[project]\nname = \"scraper\"\ndynamic = [\"version\"]\n\n[tool.setuptools.dynamic]\nversion = { file = \"VERSION\" }\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("VERSION"), "9.9.9\n").unwrap();

        let pairs: Vec<(String, String)> = full_env()
            .iter()
            .filter(|(k, _)| *k != "APP_VERSION")
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let env = Environment::from_pairs(pairs);

        let config = PipelineConfig::resolve(&env, dir.path()).unwrap();
        assert_eq!(config.app_version, "9.9.9");
    }

    #[test]
    fn test_image_reference_builders() {
        let config = PipelineConfig::resolve(&full_env(), Path::new(".")).unwrap();
        assert_eq!(
            config.unverified_image().unwrap().to_string(),
            "registry.internal.example.org/scraper:1.4.3-unverified"
        );
        assert_eq!(
            config.release_image().unwrap().to_string(),
            "registry.example.org/scraper:1.4.3"
        );
        assert_eq!(
            config.latest_image().unwrap().to_string(),
            "registry.example.org/scraper:latest"
        );
    }

    #[test]
    fn test_registry_with_scheme_rejected() {
        let mut env = full_env();
        env.set("INTERNAL_REG", "https://registry.internal.example.org");
        let result = PipelineConfig::resolve(&env, Path::new("."));
        assert!(matches!(result, Err(ConfigError::ValidationFailed(_))));
    }

    #[test]
    fn test_credentials_resolution() {
        let mut env = full_env();
        env.set("INTERNAL_REG_USER", "ci");
        env.set("INTERNAL_REG_PASSWORD", "hunter2");

        let config = PipelineConfig::resolve(&env, Path::new(".")).unwrap();
        let creds = config
            .credentials_for("registry.internal.example.org")
            .unwrap();
        assert_eq!(creds.username, "ci");
        assert!(config.credentials_for("registry.example.org").is_none());
        assert!(config.credentials_for("elsewhere.example.org").is_none());
    }

    #[test]
    fn test_invalid_scan_timeout() {
        let mut env = full_env();
        env.set("GANTRY_SCAN_TIMEOUT", "soon");
        assert!(PipelineConfig::resolve(&env, Path::new(".")).is_err());

        env.set("GANTRY_SCAN_TIMEOUT", "0");
        assert!(PipelineConfig::resolve(&env, Path::new(".")).is_err());
    }

    #[test]
    fn test_build_args_contents() {
        let config = PipelineConfig::resolve(&full_env(), Path::new(".")).unwrap();
        let args = config.build_args();
        assert_eq!(args.get("APP_NAME").map(String::as_str), Some("scraper"));
        assert_eq!(
            args.get("PYTHON_IMG_TAG").map(String::as_str),
            Some("3.10-slim")
        );
        assert_eq!(args.len(), 4);
    }
}
