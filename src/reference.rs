//! Image references and tag algebra
//!
//! An [`ImageReference`] is always fully qualified: registry host, repository
//! path and tag. The pipeline never works with implicit `docker.io` defaults;
//! every image it touches lives in a registry named by configuration.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Suffix appended to the tag of a freshly built, not yet scanned image.
pub const UNVERIFIED_SUFFIX: &str = "-unverified";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReferenceError {
    #[error("Empty image reference")]
    Empty,

    #[error("Invalid tag '{0}': tags must match [A-Za-z0-9_][A-Za-z0-9._-]{{0,127}}")]
    InvalidTag(String),

    #[error("Invalid repository '{0}': repository components must be lowercase")]
    InvalidRepository(String),

    #[error("Invalid digest '{0}': expected sha256:<64 hex characters>")]
    InvalidDigest(String),
}

/// A fully qualified image reference: `registry/repository:tag`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageReference {
    pub registry: String,
    pub repository: String,
    pub tag: String,
}

impl ImageReference {
    pub fn new(
        registry: impl Into<String>,
        repository: impl Into<String>,
        tag: impl Into<String>,
    ) -> Result<Self, ReferenceError> {
        let reference = Self {
            registry: registry.into(),
            repository: repository.into(),
            tag: tag.into(),
        };
        reference.validate()?;
        Ok(reference)
    }

    /// Parses `registry/repository[:tag]`.
    ///
    /// The first path component is treated as a registry host when it
    /// contains a `.` or `:` or equals `localhost` (the docker reference
    /// grammar); otherwise the whole string is rejected, since gantry only
    /// deals in fully qualified references.
    pub fn parse(input: &str) -> Result<Self, ReferenceError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(ReferenceError::Empty);
        }

        let (remainder, tag) = match input.rsplit_once(':') {
            // A ':' inside the last path component is a tag separator; a ':'
            // before the first '/' belongs to the registry host port.
            Some((head, candidate)) if !candidate.contains('/') => {
                (head.to_string(), candidate.to_string())
            }
            _ => (input.to_string(), "latest".to_string()),
        };

        let (registry, repository) = match remainder.split_once('/') {
            Some((host, repo))
                if host.contains('.') || host.contains(':') || host == "localhost" =>
            {
                (host.to_string(), repo.to_string())
            }
            _ => return Err(ReferenceError::InvalidRepository(remainder)),
        };

        Self::new(registry, repository, tag)
    }

    fn validate(&self) -> Result<(), ReferenceError> {
        if self.registry.is_empty() || self.repository.is_empty() {
            return Err(ReferenceError::Empty);
        }
        if !valid_tag(&self.tag) {
            return Err(ReferenceError::InvalidTag(self.tag.clone()));
        }
        let repo_ok = self
            .repository
            .split('/')
            .all(|c| !c.is_empty() && c.chars().all(|ch| matches!(ch, 'a'..='z' | '0'..='9' | '.' | '-' | '_')));
        if !repo_ok {
            return Err(ReferenceError::InvalidRepository(self.repository.clone()));
        }
        Ok(())
    }

    /// Returns the same image with a different tag.
    pub fn with_tag(&self, tag: impl Into<String>) -> Result<Self, ReferenceError> {
        Self::new(self.registry.clone(), self.repository.clone(), tag)
    }

    /// Returns the unverified variant of this reference.
    pub fn unverified(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            repository: self.repository.clone(),
            tag: format!("{}{}", self.tag, UNVERIFIED_SUFFIX),
        }
    }

    pub fn is_unverified(&self) -> bool {
        self.tag.ends_with(UNVERIFIED_SUFFIX)
    }

    /// `registry/repository` without the tag, as used in registry API paths.
    pub fn name(&self) -> String {
        format!("{}/{}", self.registry, self.repository)
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.registry, self.repository, self.tag)
    }
}

impl FromStr for ImageReference {
    type Err = ReferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn valid_tag(tag: &str) -> bool {
    if tag.is_empty() || tag.len() > 128 {
        return false;
    }
    let mut chars = tag.chars();
    let first = chars.next().unwrap_or(' ');
    if !(first.is_ascii_alphanumeric() || first == '_') {
        return false;
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
}

/// A validated `sha256:<64 hex>` content digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Digest(String);

impl Digest {
    pub fn parse(input: &str) -> Result<Self, ReferenceError> {
        let hex_part = input
            .strip_prefix("sha256:")
            .ok_or_else(|| ReferenceError::InvalidDigest(input.to_string()))?;
        if hex_part.len() != 64 || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ReferenceError::InvalidDigest(input.to_string()));
        }
        Ok(Self(input.to_lowercase()))
    }

    /// Digest of raw bytes, computed locally.
    pub fn of_bytes(bytes: &[u8]) -> Self {
        use sha2::{Digest as _, Sha256};
        let hash = Sha256::digest(bytes);
        Self(format!("sha256:{}", hex::encode(hash)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use yare::parameterized;

    #[test]
    fn test_parse_full_reference() {
        let r = ImageReference::parse("registry.example.org/envidat/scraper:1.4.3").unwrap();
        assert_eq!(r.registry, "registry.example.org");
        assert_eq!(r.repository, "envidat/scraper");
        assert_eq!(r.tag, "1.4.3");
    }

    #[test]
    fn test_parse_defaults_tag_to_latest() {
        let r = ImageReference::parse("registry.example.org/scraper").unwrap();
        assert_eq!(r.tag, "latest");
    }

    #[test]
    fn test_parse_registry_with_port() {
        let r = ImageReference::parse("localhost:5000/scraper:dev").unwrap();
        assert_eq!(r.registry, "localhost:5000");
        assert_eq!(r.repository, "scraper");
        assert_eq!(r.tag, "dev");
    }

    #[test]
    fn test_parse_rejects_unqualified_reference() {
        assert!(ImageReference::parse("scraper:latest").is_err());
        assert!(ImageReference::parse("library/scraper").is_err());
        assert!(ImageReference::parse("").is_err());
    }

    #[test]
    fn test_display_round_trip() {
        let r = ImageReference::parse("registry.example.org:443/envidat/scraper:2.0").unwrap();
        assert_eq!(ImageReference::parse(&r.to_string()).unwrap(), r);
    }

    #[test]
    fn test_unverified_algebra() {
        let r = ImageReference::parse("reg.internal/app:1.0").unwrap();
        let u = r.unverified();
        assert_eq!(u.tag, "1.0-unverified");
        assert!(u.is_unverified());
        assert!(!r.is_unverified());
    }

    #[parameterized(
        empty = { "" },
        leading_dash = { "-oops" },
        slash = { "a/b" },
        colon = { "a:b" },
    )]
    fn test_invalid_tags(tag: &str) {
        assert!(ImageReference::new("reg.example.org", "app", tag).is_err());
    }

    #[test]
    fn test_tag_length_limit() {
        let long = "a".repeat(129);
        assert!(ImageReference::new("reg.example.org", "app", long).is_err());
        let max = "a".repeat(128);
        assert!(ImageReference::new("reg.example.org", "app", max).is_ok());
    }

    #[test]
    fn test_digest_parse() {
        let d = Digest::parse(&format!("sha256:{}", "ab".repeat(32))).unwrap();
        assert!(d.as_str().starts_with("sha256:"));
        assert!(Digest::parse("sha256:zz").is_err());
        assert!(Digest::parse("md5:abcd").is_err());
    }

    #[test]
    fn test_digest_of_bytes_matches_known_value() {
        // sha256 of the empty string
        let d = Digest::of_bytes(b"");
        assert_eq!(
            d.as_str(),
            "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
