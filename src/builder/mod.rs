//! Build stage engine
//!
//! Image builds go through the container engine API. [`ContainerEngine`] is
//! the seam: production code uses [`DockerEngine`] (rootless-capable daemon
//! via bollard), tests use [`MockEngine`].

pub mod context;
mod docker;
mod mock;

pub use docker::DockerEngine;
pub use mock::MockEngine;

use crate::config::RegistryCredentials;
use crate::reference::ImageReference;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Dockerfile not found at {0}")]
    MissingDockerfile(PathBuf),

    #[error("Build context {0} is not a directory")]
    InvalidContext(PathBuf),

    #[error("Failed to package build context: {0}")]
    Context(#[from] std::io::Error),

    #[error("Failed to walk build context: {0}")]
    ContextWalk(String),

    #[error("Cannot reach the container engine: {0}. Is the daemon running and the socket accessible to this user?")]
    EngineUnavailable(String),

    #[error("Image build failed: {0}")]
    BuildFailed(String),

    #[error("Failed to push {image}: {message}")]
    PushFailed { image: String, message: String },

    #[error("Container engine error: {0}")]
    Engine(#[from] bollard::errors::Error),
}

/// Everything the engine needs to produce one tagged image.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub context_dir: PathBuf,
    /// Dockerfile path relative to the context directory.
    pub dockerfile: PathBuf,
    pub image: ImageReference,
    pub build_args: BTreeMap<String, String>,
    pub cache_from: Vec<ImageReference>,
    pub pull_base: bool,
    pub labels: BTreeMap<String, String>,
}

impl BuildRequest {
    pub fn new(context_dir: impl Into<PathBuf>, image: ImageReference) -> Self {
        Self {
            context_dir: context_dir.into(),
            dockerfile: PathBuf::from("Dockerfile"),
            image,
            build_args: BTreeMap::new(),
            cache_from: Vec::new(),
            pull_base: false,
            labels: BTreeMap::new(),
        }
    }
}

/// A successfully built image together with its engine-side id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltImage {
    pub image: ImageReference,
    pub id: String,
}

#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Builds the image described by `request`, streaming engine output
    /// into the log. Any engine-reported error fails the build.
    async fn build(&self, request: &BuildRequest) -> Result<BuiltImage, BuildError>;

    /// Pushes a local image tag to its registry.
    async fn push(
        &self,
        image: &ImageReference,
        credentials: Option<&RegistryCredentials>,
    ) -> Result<(), BuildError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_request_defaults() {
        let image = ImageReference::parse("reg.internal/app:1.0-unverified").unwrap();
        let request = BuildRequest::new("/tmp/project", image.clone());
        assert_eq!(request.dockerfile, PathBuf::from("Dockerfile"));
        assert_eq!(request.image, image);
        assert!(request.build_args.is_empty());
        assert!(!request.pull_base);
    }
}
