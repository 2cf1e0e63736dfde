//! Promote stage: retag the verified image to the release and latest tags
//! and drop the unverified tag.

use crate::environment::report::keys;
use crate::pipeline::context::{PipelineContext, StageStatus};
use crate::pipeline::stage_trait::PipelineStage;
use crate::progress::ProgressEvent;
use crate::reference::ImageReference;
use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, info};

pub struct PromoteStage {
    /// Leave the unverified tag in place after promotion.
    pub keep_unverified: bool,
    /// Promote this image instead of the pipeline's unverified tag.
    pub source: Option<ImageReference>,
}

impl PromoteStage {
    pub fn new() -> Self {
        Self {
            keep_unverified: false,
            source: None,
        }
    }
}

impl Default for PromoteStage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PipelineStage for PromoteStage {
    fn name(&self) -> &'static str {
        "promote"
    }

    async fn execute(&self, context: &mut PipelineContext) -> Result<StageStatus> {
        let unverified = match &self.source {
            Some(image) => image.clone(),
            None => context.config.unverified_image()?,
        };
        let release = context.config.release_image()?;
        let latest = context.config.latest_image()?;

        let digest = context
            .registry
            .copy_image(&unverified, &release)
            .await
            .with_context(|| format!("Failed to promote {unverified} to {release}"))?;
        context
            .registry
            .copy_image(&unverified, &latest)
            .await
            .with_context(|| format!("Failed to promote {unverified} to {latest}"))?;
        info!(release = %release, latest = %latest, digest = %digest, "Image promoted");
        for promoted in [&release, &latest] {
            context.progress.on_progress(&ProgressEvent::ImagePushed {
                image: promoted.to_string(),
            });
        }

        if self.keep_unverified {
            debug!(image = %unverified, "Keeping unverified tag (--keep-unverified)");
        } else {
            // Digest deletion drops every tag pointing at the digest, so the
            // fallback is only safe when the promoted tags live elsewhere.
            let digest_fallback_safe = [&release, &latest].iter().all(|promoted| {
                promoted.registry != unverified.registry
                    || promoted.repository != unverified.repository
            });
            context
                .registry
                .delete_tag(&unverified, digest_fallback_safe)
                .await
                .with_context(|| format!("Failed to delete {unverified}"))?;
        }

        context.report.set(keys::IMAGE_RELEASE, release.to_string());
        context.report.set(keys::IMAGE_LATEST, latest.to_string());
        context.report.set(keys::IMAGE_DIGEST, digest.to_string());

        Ok(StageStatus::Passed)
    }
}
