//! Mock engine for tests

use super::{BuildError, BuildRequest, BuiltImage, ContainerEngine};
use crate::config::RegistryCredentials;
use crate::reference::ImageReference;
use async_trait::async_trait;
use std::sync::Mutex;

/// Records build and push calls instead of talking to a daemon.
#[derive(Debug, Default)]
pub struct MockEngine {
    builds: Mutex<Vec<BuildRequest>>,
    pushes: Mutex<Vec<ImageReference>>,
    fail_build: Option<String>,
    fail_push: Option<String>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_build(message: impl Into<String>) -> Self {
        Self {
            fail_build: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn failing_push(message: impl Into<String>) -> Self {
        Self {
            fail_push: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn builds(&self) -> Vec<BuildRequest> {
        self.builds.lock().expect("mock lock").clone()
    }

    pub fn pushes(&self) -> Vec<ImageReference> {
        self.pushes.lock().expect("mock lock").clone()
    }
}

#[async_trait]
impl ContainerEngine for MockEngine {
    async fn build(&self, request: &BuildRequest) -> Result<BuiltImage, BuildError> {
        if let Some(message) = &self.fail_build {
            return Err(BuildError::BuildFailed(message.clone()));
        }
        self.builds.lock().expect("mock lock").push(request.clone());
        Ok(BuiltImage {
            image: request.image.clone(),
            id: format!("sha256:{}", "f".repeat(64)),
        })
    }

    async fn push(
        &self,
        image: &ImageReference,
        _credentials: Option<&RegistryCredentials>,
    ) -> Result<(), BuildError> {
        if let Some(message) = &self.fail_push {
            return Err(BuildError::PushFailed {
                image: image.to_string(),
                message: message.clone(),
            });
        }
        self.pushes.lock().expect("mock lock").push(image.clone());
        Ok(())
    }
}
