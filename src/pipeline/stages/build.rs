//! Build stage: assemble the build request, drive the engine, push the
//! unverified tag.

use crate::builder::BuildRequest;
use crate::compose::ComposeFile;
use crate::environment::report::keys;
use crate::pipeline::context::{PipelineContext, StageStatus};
use crate::pipeline::stage_trait::PipelineStage;
use crate::progress::ProgressEvent;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, info, warn};

const COMPOSE_CANDIDATES: [&str; 4] = [
    "docker-compose.yml",
    "docker-compose.yaml",
    "compose.yml",
    "compose.yaml",
];

pub struct BuildStage {
    /// Build without pushing the unverified tag (local verification runs).
    pub no_push: bool,
}

impl BuildStage {
    pub fn new() -> Self {
        Self { no_push: false }
    }

    /// Build args declared in the project's compose descriptor, beyond the
    /// standard set. Reference-only entries are resolved from the
    /// environment.
    fn compose_build_args(&self, context: &PipelineContext) -> Result<BTreeMap<String, String>> {
        let mut args = BTreeMap::new();
        let Some(path) = find_compose_file(&context.project_dir) else {
            return Ok(args);
        };

        debug!(file = %path.display(), "Collecting compose-declared build args");
        let compose = ComposeFile::load(&path)
            .with_context(|| format!("Failed to load {}", path.display()))?;
        let rendered = compose
            .render(&context.environment)
            .with_context(|| format!("Failed to render {}", path.display()))?;
        let compose = ComposeFile::parse(&rendered)
            .with_context(|| format!("Failed to parse rendered {}", path.display()))?;

        for service in compose.model.services.values() {
            let Some(crate::compose::BuildSection::Detailed(spec)) = &service.build else {
                continue;
            };
            let Some(section) = &spec.args else { continue };
            for (key, value) in section.pairs() {
                match value {
                    Some(value) => {
                        args.insert(key, value);
                    }
                    None => match context.environment.get(&key) {
                        Some(value) => {
                            args.insert(key, value.to_string());
                        }
                        None => {
                            warn!(arg = %key, "Compose build arg has no value in the environment, skipping");
                        }
                    },
                }
            }
        }
        Ok(args)
    }
}

impl Default for BuildStage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PipelineStage for BuildStage {
    fn name(&self) -> &'static str {
        "build"
    }

    async fn execute(&self, context: &mut PipelineContext) -> Result<StageStatus> {
        let image = context.config.unverified_image()?;

        // Compose-declared extras first so the standard args win on clash.
        let mut build_args = self.compose_build_args(context)?;
        build_args.extend(context.config.build_args());

        let mut request = BuildRequest::new(&context.project_dir, image.clone());
        request.build_args = build_args;
        request.pull_base = true;
        request.cache_from = vec![image.clone(), context.config.latest_image()?];
        request
            .labels
            .insert("maintainer".to_string(), context.config.maintainer.clone());

        let built = context
            .engine
            .build(&request)
            .await
            .context("Build stage failed")?;
        info!(image = %built.image, id = %built.id, "Image built");

        if self.no_push {
            debug!("Push skipped (--no-push)");
        } else {
            let credentials = context.config.credentials_for(&image.registry);
            context
                .engine
                .push(&image, credentials)
                .await
                .with_context(|| format!("Failed to push {image}"))?;
            info!(image = %image, "Unverified image pushed");
            context.progress.on_progress(&ProgressEvent::ImagePushed {
                image: image.to_string(),
            });
        }

        context
            .report
            .set(keys::APP_NAME, context.config.app_name.clone());
        context
            .report
            .set(keys::APP_VERSION, context.config.app_version.clone());
        context.report.set(keys::IMAGE_UNVERIFIED, image.to_string());
        context.built_image = Some(built);

        Ok(StageStatus::Passed)
    }
}

fn find_compose_file(project_dir: &std::path::Path) -> Option<PathBuf> {
    COMPOSE_CANDIDATES
        .iter()
        .map(|name| project_dir.join(name))
        .find(|path| path.is_file())
}
