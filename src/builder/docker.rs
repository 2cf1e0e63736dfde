//! Container engine implementation backed by the daemon API

use super::{context, BuildError, BuildRequest, BuiltImage, ContainerEngine};
use crate::config::RegistryCredentials;
use crate::reference::ImageReference;
use async_trait::async_trait;
use bollard::auth::DockerCredentials;
use bollard::image::{BuildImageOptions, PushImageOptions};
use bollard::Docker;
use futures_util::StreamExt;
use std::collections::HashMap;
use tracing::{debug, info, warn};

pub struct DockerEngine {
    docker: Docker,
}

impl DockerEngine {
    /// Connects to the local daemon (honors `DOCKER_HOST`, works with
    /// rootless setups exposing a user socket).
    pub fn connect() -> Result<Self, BuildError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| BuildError::EngineUnavailable(e.to_string()))?;
        Ok(Self { docker })
    }

    /// Verifies the daemon actually answers before the pipeline starts.
    pub async fn ping(&self) -> Result<(), BuildError> {
        let version = self
            .docker
            .version()
            .await
            .map_err(|e| BuildError::EngineUnavailable(e.to_string()))?;
        debug!(
            api_version = version.api_version.as_deref().unwrap_or("unknown"),
            "Connected to container engine"
        );
        Ok(())
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn build(&self, request: &BuildRequest) -> Result<BuiltImage, BuildError> {
        let dockerfile_path = request.context_dir.join(&request.dockerfile);
        if !dockerfile_path.is_file() {
            return Err(BuildError::MissingDockerfile(dockerfile_path));
        }

        let tar = context::package_build_context(&request.context_dir)?;

        let options = BuildImageOptions::<String> {
            dockerfile: request.dockerfile.to_string_lossy().into_owned(),
            t: request.image.to_string(),
            buildargs: request
                .build_args
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect::<HashMap<_, _>>(),
            cachefrom: request.cache_from.iter().map(ToString::to_string).collect(),
            pull: request.pull_base,
            rm: true,
            labels: request
                .labels
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect::<HashMap<_, _>>(),
            ..Default::default()
        };

        info!(image = %request.image, "Building image");
        let mut stream = self.docker.build_image(options, None, Some(tar));

        while let Some(message) = stream.next().await {
            let update = message?;

            if let Some(output) = update.stream {
                for line in output.lines().filter(|l| !l.trim().is_empty()) {
                    info!(target: "gantry::builder", "{}", line);
                }
            }

            if let Some(error) = update.error {
                let detail = update
                    .error_detail
                    .and_then(|d| d.message)
                    .unwrap_or_default();
                let message = if detail.is_empty() || detail == error {
                    error
                } else {
                    format!("{error}: {detail}")
                };
                return Err(BuildError::BuildFailed(message));
            }
        }

        let inspect = self
            .docker
            .inspect_image(&request.image.to_string())
            .await?;
        let id = inspect.id.unwrap_or_default();
        info!(image = %request.image, id, "Image built");

        Ok(BuiltImage {
            image: request.image.clone(),
            id,
        })
    }

    async fn push(
        &self,
        image: &ImageReference,
        credentials: Option<&RegistryCredentials>,
    ) -> Result<(), BuildError> {
        if credentials.is_none() {
            warn!(registry = %image.registry, "Pushing without credentials");
        }

        let docker_credentials = credentials.map(|c| DockerCredentials {
            username: Some(c.username.clone()),
            password: Some(c.password.clone()),
            serveraddress: Some(image.registry.clone()),
            ..Default::default()
        });

        let options = PushImageOptions {
            tag: image.tag.clone(),
        };

        info!(image = %image, "Pushing image");
        let mut stream = self
            .docker
            .push_image(&image.name(), Some(options), docker_credentials);

        while let Some(message) = stream.next().await {
            let update = message.map_err(|e| BuildError::PushFailed {
                image: image.to_string(),
                message: e.to_string(),
            })?;

            if let Some(error) = update.error {
                return Err(BuildError::PushFailed {
                    image: image.to_string(),
                    message: error,
                });
            }

            if let Some(status) = update.status {
                debug!(target: "gantry::builder", "{}", status);
            }
        }

        info!(image = %image, "Image pushed");
        Ok(())
    }
}
