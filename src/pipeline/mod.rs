//! Pipeline orchestration: build, scan and promote stages over a shared
//! mutable context.

pub mod context;
pub mod orchestrator;
pub mod stage_trait;
pub mod stages;

pub use context::{PipelineContext, PipelineRun, StageRecord, StageStatus};
pub use orchestrator::PipelineOrchestrator;
pub use stage_trait::PipelineStage;
pub use stages::{BuildStage, PromoteStage, ScanStage};
