//! Environment resolution for the pipeline
//!
//! Configuration flows into the pipeline as environment variables layered
//! from dotenv files and the process environment. Precedence is fixed:
//! process environment > `.env.secret` > `.env` > extra files given on the
//! command line. A value set in the process environment is never overridden
//! by a file.

mod env_file;
pub mod report;

pub use env_file::EnvFile;
pub use report::DotenvReport;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// The default dotenv layers, lowest precedence first.
pub const DEFAULT_ENV_FILES: [&str; 2] = [".env", ".env.secret"];

#[derive(Debug, Error)]
pub enum EnvironmentError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Malformed line {line}: '{content}'")]
    MalformedLine { line: usize, content: String },

    #[error("Malformed line {line} in {path}: '{content}'")]
    MalformedLineInFile {
        path: PathBuf,
        line: usize,
        content: String,
    },

    #[error("Missing required environment variables: {}", .0.join(", "))]
    MissingVariables(Vec<String>),

    #[error("Unresolved variable references: {}", .0.join(", "))]
    UnresolvedVariables(Vec<String>),
}

impl EnvironmentError {
    pub(crate) fn with_file(self, path: &Path) -> Self {
        match self {
            Self::MalformedLine { line, content } => Self::MalformedLineInFile {
                path: path.to_path_buf(),
                line,
                content,
            },
            other => other,
        }
    }
}

/// Merged view over dotenv layers and the process environment.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    values: BTreeMap<String, String>,
}

impl Environment {
    /// Loads the default layers from `project_dir` plus any extra files.
    ///
    /// Missing default files are skipped silently (`.env.secret` is commonly
    /// absent on CI runners); missing extra files are an error since the
    /// operator named them explicitly.
    pub fn load(project_dir: &Path, extra_files: &[PathBuf]) -> Result<Self, EnvironmentError> {
        let mut values = BTreeMap::new();

        // Lowest precedence first: later merges overwrite earlier ones.
        for path in extra_files {
            Self::merge_file(&mut values, path)?;
        }

        for name in DEFAULT_ENV_FILES {
            let path = project_dir.join(name);
            if !path.exists() {
                debug!(path = %path.display(), "Env file not present, skipping");
                continue;
            }
            Self::merge_file(&mut values, &path)?;
        }

        // Process environment wins over every file layer.
        for (key, value) in std::env::vars() {
            values.insert(key, value);
        }

        Ok(Self { values })
    }

    fn merge_file(
        values: &mut BTreeMap<String, String>,
        path: &Path,
    ) -> Result<(), EnvironmentError> {
        let file = EnvFile::load(path)?;
        debug!(path = %path.display(), entries = file.len(), "Loaded env file");
        for (key, value) in file.iter() {
            values.insert(key.to_string(), value.to_string());
        }
        Ok(())
    }

    /// Builds an environment from explicit pairs, without touching the
    /// process environment. Used by tests and by compose rendering.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Fails fast with one error naming every missing variable.
    pub fn require(&self, names: &[&str]) -> Result<(), EnvironmentError> {
        let missing: Vec<String> = names
            .iter()
            .filter(|name| !self.values.contains_key(**name))
            .map(|name| name.to_string())
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(EnvironmentError::MissingVariables(missing))
        }
    }

    /// Substitutes `${VAR}`, `${VAR:-default}`, `$VAR` and the `$$` escape.
    ///
    /// Strict: every unresolvable reference is collected and reported in a
    /// single error.
    pub fn interpolate(&self, template: &str) -> Result<String, EnvironmentError> {
        let mut out = String::with_capacity(template.len());
        let mut unresolved: Vec<String> = Vec::new();
        let mut chars = template.char_indices().peekable();

        while let Some((_, c)) = chars.next() {
            if c != '$' {
                out.push(c);
                continue;
            }

            match chars.peek().copied() {
                Some((_, '$')) => {
                    chars.next();
                    out.push('$');
                }
                Some((start, '{')) => {
                    chars.next();
                    let mut body = String::new();
                    let mut closed = false;
                    for (_, b) in chars.by_ref() {
                        if b == '}' {
                            closed = true;
                            break;
                        }
                        body.push(b);
                    }
                    if !closed {
                        unresolved.push(template[start..].to_string());
                        break;
                    }
                    let (name, default) = match body.split_once(":-") {
                        Some((n, d)) => (n.to_string(), Some(d.to_string())),
                        None => (body, None),
                    };
                    match self.get(&name) {
                        Some(value) => out.push_str(value),
                        None => match default {
                            Some(d) => out.push_str(&d),
                            None => {
                                if !unresolved.contains(&name) {
                                    unresolved.push(name);
                                }
                            }
                        },
                    }
                }
                Some((_, b)) if b.is_ascii_alphabetic() || b == '_' => {
                    let mut name = String::new();
                    while let Some((_, n)) = chars.peek().copied() {
                        if n.is_ascii_alphanumeric() || n == '_' {
                            name.push(n);
                            chars.next();
                        } else {
                            break;
                        }
                    }
                    match self.get(&name) {
                        Some(value) => out.push_str(value),
                        None => {
                            if !unresolved.contains(&name) {
                                unresolved.push(name);
                            }
                        }
                    }
                }
                _ => out.push('$'),
            }
        }

        if unresolved.is_empty() {
            Ok(out)
        } else {
            Err(EnvironmentError::UnresolvedVariables(unresolved))
        }
    }
}

/// Whether a variable name denotes a secret that must never be logged.
pub fn is_secret_key(key: &str) -> bool {
    let upper = key.to_uppercase();
    ["_PASSWORD", "_SECRET", "_TOKEN", "_KEY"]
        .iter()
        .any(|suffix| upper.ends_with(suffix))
}

/// Masks a secret value for display, keeping a short recognizable prefix.
pub fn mask_value(value: &str) -> String {
    if value.len() <= 4 {
        "****".to_string()
    } else {
        format!("{}****", &value[..4])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_from_pairs_and_get() {
        let env = Environment::from_pairs([("APP_NAME", "scraper")]);
        assert_eq!(env.get("APP_NAME"), Some("scraper"));
        assert_eq!(env.get("OTHER"), None);
    }

    #[test]
    fn test_require_lists_all_missing() {
        let env = Environment::from_pairs([("APP_NAME", "scraper")]);
        let err = env
            .require(&["APP_NAME", "APP_VERSION", "INTERNAL_REG"])
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("APP_VERSION"));
        assert!(message.contains("INTERNAL_REG"));
        assert!(!message.contains("APP_NAME,"));
    }

    #[test]
    fn test_interpolate_forms() {
        let env = Environment::from_pairs([("NAME", "scraper"), ("TAG", "1.0")]);
        assert_eq!(env.interpolate("${NAME}:${TAG}").unwrap(), "scraper:1.0");
        assert_eq!(env.interpolate("$NAME-x").unwrap(), "scraper-x");
        assert_eq!(env.interpolate("${MISSING:-fallback}").unwrap(), "fallback");
        assert_eq!(env.interpolate("cost: $$5").unwrap(), "cost: $5");
        assert_eq!(env.interpolate("plain text").unwrap(), "plain text");
    }

    #[test]
    fn test_interpolate_collects_all_unresolved() {
        let env = Environment::from_pairs([("A", "1")]);
        let err = env.interpolate("${A} ${B} $C ${B}").unwrap_err();
        match err {
            EnvironmentError::UnresolvedVariables(names) => {
                assert_eq!(names, vec!["B".to_string(), "C".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_empty_default_allowed() {
        let env = Environment::from_pairs([("A", "1")]);
        assert_eq!(env.interpolate("${B:-}").unwrap(), "");
    }

    #[test]
    #[serial]
    fn test_load_layering() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join(".env"),
            "APP_NAME=scraper\nSHARED=from_env\n",
        )
        .unwrap();
        fs::write(
            dir.path().join(".env.secret"),
            "INTERNAL_REG_PASSWORD=hunter2\nSHARED=from_secret\n",
        )
        .unwrap();

        let env = Environment::load(dir.path(), &[]).unwrap();
        assert_eq!(env.get("APP_NAME"), Some("scraper"));
        assert_eq!(env.get("INTERNAL_REG_PASSWORD"), Some("hunter2"));
        // .env.secret overrides .env
        assert_eq!(env.get("SHARED"), Some("from_secret"));
    }

    #[test]
    #[serial]
    fn test_extra_files_lose_to_default_layers() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(".env"), "APP_NAME=scraper\n").unwrap();

        let extra = dir.path().join("ci.env");
        fs::write(&extra, "APP_NAME=shadowed\nCI_ONLY=yes\n").unwrap();

        let env = Environment::load(dir.path(), &[extra]).unwrap();
        assert_eq!(env.get("APP_NAME"), Some("scraper"));
        assert_eq!(env.get("CI_ONLY"), Some("yes"));
    }

    #[test]
    #[serial]
    fn test_process_env_wins_over_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(".env"), "GANTRY_TEST_LAYER=file\n").unwrap();

        std::env::set_var("GANTRY_TEST_LAYER", "process");
        let env = Environment::load(dir.path(), &[]).unwrap();
        std::env::remove_var("GANTRY_TEST_LAYER");

        assert_eq!(env.get("GANTRY_TEST_LAYER"), Some("process"));
    }

    #[test]
    #[serial]
    fn test_missing_extra_file_is_error() {
        let dir = TempDir::new().unwrap();
        let result = Environment::load(dir.path(), &[dir.path().join("nope.env")]);
        assert!(result.is_err());
    }

    #[test]
    fn test_secret_detection() {
        assert!(is_secret_key("INTERNAL_REG_PASSWORD"));
        assert!(is_secret_key("api_token"));
        assert!(is_secret_key("SOME_KEY"));
        assert!(!is_secret_key("APP_NAME"));
        assert!(!is_secret_key("KEYBOARD"));
    }

    #[test]
    fn test_mask_value() {
        assert_eq!(mask_value("hunter2"), "hunt****");
        assert_eq!(mask_value("ab"), "****");
    }
}
