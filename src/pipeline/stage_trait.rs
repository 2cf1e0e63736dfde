use super::context::{PipelineContext, StageStatus};
use anyhow::Result;
use async_trait::async_trait;

/// One pipeline stage executed against the shared context.
///
/// A stage returns `Ok(StageStatus::GateFailed { .. })` when it completed
/// but vetoed promotion; `Err` means the stage itself broke.
#[async_trait]
pub trait PipelineStage: Send + Sync {
    fn name(&self) -> &'static str;

    async fn execute(&self, context: &mut PipelineContext) -> Result<StageStatus>;
}
