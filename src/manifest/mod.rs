//! Package manifest parsing and dynamic version resolution
//!
//! The project being shipped declares its identity in a pyproject-style
//! manifest. The pipeline only needs the package name and version: the
//! version may be static, sourced from a version file, or scraped from a
//! module attribute (`__version__`). The resolved value feeds `APP_VERSION`
//! when the environment does not pin it.

use regex::Regex;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Manifest has no [project] table")]
    NoProjectTable,

    #[error("'version' is declared dynamic but no [tool.setuptools.dynamic] version source is configured")]
    DynamicWithoutSource,

    #[error("Manifest declares neither a static version nor a dynamic version source")]
    NoVersion,

    #[error("Version file {0} is missing or empty")]
    VersionFileInvalid(PathBuf),

    #[error("Could not find attribute '{attribute}' in module '{module}'")]
    AttributeNotFound { module: String, attribute: String },

    #[error("Resolved version '{0}' is not usable as an image tag")]
    InvalidVersion(String),
}

/// Where the package version comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionSource {
    Static(String),
    File(PathBuf),
    Attr { module: String, attribute: String },
}

/// The subset of a pyproject manifest the pipeline cares about.
#[derive(Debug, Clone)]
pub struct PackageManifest {
    pub name: String,
    pub version_source: VersionSource,
    pub requires_python: Option<String>,
    pub license: Option<String>,
    pub dependencies: Vec<String>,
    pub build_backend: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PyProject {
    project: Option<ProjectTable>,
    #[serde(default)]
    tool: ToolTable,
    #[serde(rename = "build-system")]
    build_system: Option<BuildSystem>,
}

#[derive(Debug, Deserialize)]
struct ProjectTable {
    name: String,
    version: Option<String>,
    #[serde(default)]
    dynamic: Vec<String>,
    #[serde(rename = "requires-python")]
    requires_python: Option<String>,
    license: Option<toml::Value>,
    #[serde(default)]
    dependencies: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ToolTable {
    setuptools: Option<SetuptoolsTable>,
}

#[derive(Debug, Deserialize)]
struct SetuptoolsTable {
    dynamic: Option<SetuptoolsDynamic>,
}

#[derive(Debug, Deserialize)]
struct SetuptoolsDynamic {
    version: Option<DynamicVersion>,
}

#[derive(Debug, Deserialize)]
struct DynamicVersion {
    file: Option<String>,
    attr: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BuildSystem {
    #[serde(rename = "build-backend")]
    build_backend: Option<String>,
}

impl PackageManifest {
    pub fn parse(content: &str, path: &Path) -> Result<Self, ManifestError> {
        let pyproject: PyProject =
            toml::from_str(content).map_err(|source| ManifestError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        let project = pyproject.project.ok_or(ManifestError::NoProjectTable)?;

        let version_source = if let Some(version) = project.version {
            VersionSource::Static(version)
        } else if project.dynamic.iter().any(|d| d == "version") {
            let dynamic = pyproject
                .tool
                .setuptools
                .and_then(|s| s.dynamic)
                .and_then(|d| d.version)
                .ok_or(ManifestError::DynamicWithoutSource)?;

            if let Some(file) = dynamic.file {
                VersionSource::File(PathBuf::from(file))
            } else if let Some(attr) = dynamic.attr {
                match attr.rsplit_once('.') {
                    Some((module, attribute)) => VersionSource::Attr {
                        module: module.to_string(),
                        attribute: attribute.to_string(),
                    },
                    None => VersionSource::Attr {
                        module: attr,
                        attribute: "__version__".to_string(),
                    },
                }
            } else {
                return Err(ManifestError::DynamicWithoutSource);
            }
        } else {
            return Err(ManifestError::NoVersion);
        };

        let license = project.license.map(|value| match value {
            toml::Value::String(s) => s,
            toml::Value::Table(t) => t
                .get("text")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            other => other.to_string(),
        });

        Ok(Self {
            name: project.name,
            version_source,
            requires_python: project.requires_python,
            license,
            dependencies: project.dependencies,
            build_backend: pyproject.build_system.and_then(|b| b.build_backend),
        })
    }

    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let content = fs::read_to_string(path).map_err(|source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content, path)
    }

    /// Resolves the concrete version string relative to `project_dir`.
    pub fn resolve_version(&self, project_dir: &Path) -> Result<String, ManifestError> {
        let version = match &self.version_source {
            VersionSource::Static(version) => version.clone(),
            VersionSource::File(file) => {
                let path = project_dir.join(file);
                let content = fs::read_to_string(&path)
                    .map_err(|_| ManifestError::VersionFileInvalid(path.clone()))?;
                let trimmed = content.trim().to_string();
                if trimmed.is_empty() {
                    return Err(ManifestError::VersionFileInvalid(path));
                }
                trimmed
            }
            VersionSource::Attr { module, attribute } => {
                resolve_attr(project_dir, module, attribute)?
            }
        };

        validate_version(&version)?;
        debug!(version, "Resolved package version");
        Ok(version)
    }
}

fn resolve_attr(
    project_dir: &Path,
    module: &str,
    attribute: &str,
) -> Result<String, ManifestError> {
    let module_path = module.replace('.', "/");
    let candidates = [
        project_dir.join(format!("{module_path}.py")),
        project_dir.join(&module_path).join("__init__.py"),
    ];

    // The attribute name is a Python identifier, safe to embed verbatim.
    let pattern = Regex::new(&format!(
        r#"(?m)^{}\s*=\s*["']([^"']+)["']"#,
        regex::escape(attribute)
    ))
    .expect("valid regex");

    for candidate in &candidates {
        if let Ok(content) = fs::read_to_string(candidate) {
            if let Some(captures) = pattern.captures(&content) {
                return Ok(captures[1].to_string());
            }
        }
    }

    Err(ManifestError::AttributeNotFound {
        module: module.to_string(),
        attribute: attribute.to_string(),
    })
}

/// The version becomes part of an image tag, so it must be tag-safe.
fn validate_version(version: &str) -> Result<(), ManifestError> {
    if version.is_empty()
        || version.chars().any(char::is_whitespace)
        || version.contains('/')
        || version.contains(':')
    {
        return Err(ManifestError::InvalidVersion(version.to_string()));
    }
    Ok(())
}
