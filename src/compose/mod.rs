//! Compose descriptor model, substitution and operational checks
//!
//! The deployment descriptor declares a single containerized service built
//! from a local Dockerfile, attached to an external reverse-proxy network,
//! with the repository mounted read-only. gantry renders the descriptor
//! (environment substitution) and verifies those operational properties.

use crate::environment::{Environment, EnvironmentError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ComposeError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse compose file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Unresolved variables in compose file: {}", .0.join(", "))]
    Unresolved(Vec<String>),
}

/// A parsed compose descriptor together with its raw text.
///
/// The raw text is kept because substitution operates on the whole document,
/// not just on modeled fields.
#[derive(Debug, Clone)]
pub struct ComposeFile {
    content: String,
    pub model: ComposeModel,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComposeModel {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub services: BTreeMap<String, Service>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub networks: BTreeMap<String, Option<Network>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Service {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build: Option<BuildSection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restart: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env_file: Option<StringOrList>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<EnvironmentSection>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<VolumeEntry>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub networks: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BuildSection {
    Context(String),
    Detailed(BuildSpec),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildSpec {
    pub context: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dockerfile: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<ArgsSection>,
}

/// Build args in either map form or `KEY=VALUE` / bare `KEY` list form.
/// A bare key takes its value from the environment at build time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgsSection {
    Map(BTreeMap<String, Option<String>>),
    List(Vec<String>),
}

impl ArgsSection {
    /// Pairs of (name, declared value); `None` means reference-only.
    pub fn pairs(&self) -> Vec<(String, Option<String>)> {
        match self {
            Self::Map(map) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            Self::List(list) => list
                .iter()
                .map(|entry| match entry.split_once('=') {
                    Some((k, v)) => (k.to_string(), Some(v.to_string())),
                    None => (entry.clone(), None),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnvironmentSection {
    Map(BTreeMap<String, Option<String>>),
    List(Vec<String>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StringOrList {
    One(String),
    Many(Vec<String>),
}

impl StringOrList {
    pub fn entries(&self) -> Vec<&str> {
        match self {
            Self::One(s) => vec![s.as_str()],
            Self::Many(v) => v.iter().map(String::as_str).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VolumeEntry {
    Short(String),
    Long(VolumeLong),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumeLong {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub read_only: bool,
}

/// Normalized view of one volume mount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeSpec {
    pub source: String,
    pub target: String,
    pub read_only: bool,
}

impl VolumeEntry {
    pub fn spec(&self) -> Option<VolumeSpec> {
        match self {
            Self::Short(raw) => {
                let mut parts = raw.splitn(3, ':');
                let source = parts.next()?.to_string();
                let target = parts.next()?.to_string();
                let read_only = parts.next() == Some("ro");
                Some(VolumeSpec {
                    source,
                    target,
                    read_only,
                })
            }
            Self::Long(long) => Some(VolumeSpec {
                source: long.source.clone()?,
                target: long.target.clone()?,
                read_only: long.read_only,
            }),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Network {
    pub external: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Result of the operational configuration checks.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ComposeCheck {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ComposeCheck {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

impl ComposeFile {
    pub fn parse(content: &str) -> Result<Self, ComposeError> {
        let model: ComposeModel = serde_yaml::from_str(content)?;
        Ok(Self {
            content: content.to_string(),
            model,
        })
    }

    pub fn load(path: &Path) -> Result<Self, ComposeError> {
        let content = fs::read_to_string(path).map_err(|source| ComposeError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Substitutes variable references through the whole document and
    /// re-parses the result to prove it is still valid YAML.
    pub fn render(&self, env: &Environment) -> Result<String, ComposeError> {
        let rendered = env.interpolate(&self.content).map_err(|e| match e {
            EnvironmentError::UnresolvedVariables(names) => ComposeError::Unresolved(names),
            other => ComposeError::Unresolved(vec![other.to_string()]),
        })?;
        let _: ComposeModel = serde_yaml::from_str(&rendered)?;
        Ok(rendered)
    }

    /// Operational checks against the descriptor and the resolved
    /// environment. Errors block the pipeline; warnings do not.
    pub fn check(&self, env: &Environment, project_dir: &Path) -> ComposeCheck {
        let mut check = ComposeCheck::default();

        if self.model.services.len() != 1 {
            check.warnings.push(format!(
                "Expected exactly one service, found {}",
                self.model.services.len()
            ));
        }

        if let Err(EnvironmentError::UnresolvedVariables(names)) = env.interpolate(&self.content) {
            for name in names {
                check
                    .errors
                    .push(format!("Variable '{}' is referenced but not set", name));
            }
        }

        for (name, service) in &self.model.services {
            self.check_service(name, service, env, project_dir, &mut check);
        }

        check
    }

    fn check_service(
        &self,
        name: &str,
        service: &Service,
        env: &Environment,
        project_dir: &Path,
        check: &mut ComposeCheck,
    ) {
        let joins_external = service.networks.iter().any(|net| {
            self.model
                .networks
                .get(net)
                .and_then(|n| n.as_ref())
                .map(|n| n.external)
                .unwrap_or(false)
        });
        if !joins_external {
            check.errors.push(format!(
                "Service '{}' does not join any external network",
                name
            ));
        }

        if let Some(BuildSection::Detailed(spec)) = &service.build {
            if let Some(args) = &spec.args {
                for (arg, value) in args.pairs() {
                    if value.is_none() && !env.contains(&arg) {
                        check.errors.push(format!(
                            "Build arg '{}' of service '{}' has no value and is not set in the environment",
                            arg, name
                        ));
                    }
                }
            }
        }

        for entry in &service.volumes {
            if let Some(spec) = entry.spec() {
                let is_repo_mount = spec.source == "."
                    || spec.source.starts_with("./")
                    || spec.source.starts_with("${PWD");
                if is_repo_mount && !spec.read_only {
                    check.warnings.push(format!(
                        "Repository mount '{}' of service '{}' is not read-only",
                        spec.target, name
                    ));
                }
            }
        }

        match service.restart.as_deref() {
            Some("unless-stopped") => {}
            Some(other) => check.warnings.push(format!(
                "Service '{}' uses restart policy '{}' instead of 'unless-stopped'",
                name, other
            )),
            None => check.warnings.push(format!(
                "Service '{}' has no restart policy (expected 'unless-stopped')",
                name
            )),
        }

        if let Some(env_files) = &service.env_file {
            for entry in env_files.entries() {
                if !project_dir.join(entry).exists() {
                    check.warnings.push(format!(
                        "env_file '{}' of service '{}' does not exist",
                        entry, name
                    ));
                }
            }
        }
    }
}
