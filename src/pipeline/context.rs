//! Pipeline context for managing dependencies and run state

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::builder::{BuiltImage, ContainerEngine};
use crate::config::PipelineConfig;
use crate::environment::{DotenvReport, Environment};
use crate::progress::{NoOpHandler, ProgressHandler};
use crate::registry::ImageRegistry;
use crate::scanner::{ImageScanner, ScanSummary};

/// Context that owns all long-lived pipeline dependencies plus the state
/// stages hand to each other.
pub struct PipelineContext {
    /// Container engine for the build stage
    pub engine: Arc<dyn ContainerEngine>,

    /// Vulnerability scanner for the scan stage
    pub scanner: Arc<dyn ImageScanner>,

    /// Registry client for the promote stage
    pub registry: Arc<dyn ImageRegistry>,

    /// Resolved pipeline configuration
    pub config: PipelineConfig,

    /// Layered environment the configuration was resolved from
    pub environment: Environment,

    /// Project directory (build context root)
    pub project_dir: PathBuf,

    /// Handler for progress events raised inside stages
    pub progress: Arc<dyn ProgressHandler>,

    /// Dotenv report accumulated across stages
    pub report: DotenvReport,

    /// Set by the build stage
    pub built_image: Option<BuiltImage>,

    /// Set by the scan stage
    pub scan_summary: Option<ScanSummary>,
}

impl PipelineContext {
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        scanner: Arc<dyn ImageScanner>,
        registry: Arc<dyn ImageRegistry>,
        config: PipelineConfig,
        environment: Environment,
        project_dir: PathBuf,
    ) -> Self {
        Self {
            engine,
            scanner,
            registry,
            config,
            environment,
            project_dir,
            progress: Arc::new(NoOpHandler),
            report: DotenvReport::new(),
            built_image: None,
            scan_summary: None,
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressHandler>) -> Self {
        self.progress = progress;
        self
    }
}

/// Outcome of one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageStatus {
    Passed,
    /// The scan gate rejected the image.
    GateFailed { failing: usize },
    /// The stage itself errored out.
    Failed { error: String },
}

impl StageStatus {
    pub fn is_passed(&self) -> bool {
        matches!(self, StageStatus::Passed)
    }
}

/// One executed stage, as recorded in the pipeline report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    pub name: String,
    #[serde(flatten)]
    pub status: StageStatus,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// A finished pipeline run: the stage records plus total wall time.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub records: Vec<StageRecord>,
    pub duration: Duration,
}

impl PipelineRun {
    pub fn passed(&self) -> bool {
        !self.records.is_empty() && self.records.iter().all(|r| r.status.is_passed())
    }

    pub fn gate_failed(&self) -> bool {
        self.records
            .iter()
            .any(|r| matches!(r.status, StageStatus::GateFailed { .. }))
    }

    /// Exit code for the process: zero only when every stage passed.
    pub fn exit_code(&self) -> i32 {
        if self.passed() {
            0
        } else {
            1
        }
    }
}
