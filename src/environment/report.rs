//! The dotenv report artifact
//!
//! Stages communicate resolved facts (image references, digests) through a
//! flat `KEY=VALUE` artifact that later stages and the surrounding CI job
//! re-read.

use super::{is_secret_key, mask_value, EnvFile, EnvironmentError};
use std::fmt;
use std::fs;
use std::path::Path;

/// Default artifact file name.
pub const DEFAULT_REPORT_NAME: &str = "gantry.env";

/// Well-known report keys.
pub mod keys {
    pub const APP_NAME: &str = "APP_NAME";
    pub const APP_VERSION: &str = "APP_VERSION";
    pub const IMAGE_UNVERIFIED: &str = "IMAGE_UNVERIFIED";
    pub const IMAGE_RELEASE: &str = "IMAGE_RELEASE";
    pub const IMAGE_LATEST: &str = "IMAGE_LATEST";
    pub const IMAGE_DIGEST: &str = "IMAGE_DIGEST";
}

/// Ordered KEY=VALUE pairs written as a dotenv artifact.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DotenvReport {
    entries: Vec<(String, String)>,
}

impl DotenvReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a key, preserving first-write ordering on update.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        if let Some(existing) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            existing.1 = value;
        } else {
            self.entries.push((key, value));
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn parse(content: &str) -> Result<Self, EnvironmentError> {
        let file = EnvFile::parse(content)?;
        Ok(Self {
            entries: file
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        })
    }

    pub fn load(path: &Path) -> Result<Self, EnvironmentError> {
        let content = fs::read_to_string(path).map_err(|source| EnvironmentError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content).map_err(|e| e.with_file(path))
    }

    pub fn write(&self, path: &Path) -> Result<(), EnvironmentError> {
        fs::write(path, self.to_string()).map_err(|source| EnvironmentError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Rendering with secret values masked, for logs and human output.
    pub fn to_masked_string(&self) -> String {
        self.entries
            .iter()
            .map(|(k, v)| {
                if is_secret_key(k) {
                    format!("{}={}\n", k, mask_value(v))
                } else {
                    format!("{}={}\n", k, v)
                }
            })
            .collect()
    }
}

impl fmt::Display for DotenvReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, value) in &self.entries {
            writeln!(f, "{}={}", key, value)?;
        }
        Ok(())
    }
}
