//! Scan stage: vulnerability scanner invocation and the promotion gate
//!
//! The scanner run itself is informational: it produces the JSON report
//! artifact and never fails the stage on findings. The gate verdict is
//! computed in-process from the parsed report (see
//! [`report::ScanSummary::evaluate`]), so the promotion decision is
//! testable without a scanner install.

mod mock;
pub mod report;
mod trivy;

pub use mock::MockScanner;
pub use report::{GateFinding, GatePolicy, ScanReport, ScanSummary, Severity, Vulnerability};
pub use trivy::TrivyScanner;

use crate::reference::ImageReference;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File name of the raw scanner report artifact.
pub const SCAN_REPORT_NAME: &str = "container-scanning-report.json";

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Scanner binary '{binary}' not found. Install it or point GANTRY_SCANNER at it")]
    ScannerMissing { binary: String },

    #[error("Failed to launch scanner: {0}")]
    Launch(#[from] std::io::Error),

    #[error("Scanner timed out after {0}s")]
    Timeout(u64),

    #[error("Scanner exited with {status}: {stderr}")]
    ScannerFailed { status: String, stderr: String },

    #[error("Failed to read scan report {path}: {source}")]
    ReportIo {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse scan report: {0}")]
    ReportParse(#[from] serde_json::Error),
}

#[async_trait]
pub trait ImageScanner: Send + Sync {
    /// Scans `image`, writes the raw JSON report to `report_path` and
    /// returns the parsed report.
    async fn scan(
        &self,
        image: &ImageReference,
        report_path: &Path,
    ) -> Result<ScanReport, ScanError>;
}
