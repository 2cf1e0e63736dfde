//! Report artifacts and output formatting
//!
//! Two artifacts leave a pipeline run: the dotenv report (stage-to-stage
//! values) and `pipeline-report.json` (machine-readable run summary). The
//! formatter renders results as JSON, YAML or human-readable text for the
//! CLI.

use anyhow::{Context as _, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

use crate::compose::ComposeCheck;
use crate::config::PipelineConfig;
use crate::environment::{is_secret_key, mask_value, Environment};
use crate::pipeline::{PipelineRun, StageRecord, StageStatus};
use crate::scanner::ScanSummary;

/// File name of the run summary artifact.
pub const PIPELINE_REPORT_NAME: &str = "pipeline-report.json";

/// Machine-readable summary of one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineReport {
    pub tool: String,
    pub tool_version: String,
    pub generated_at: DateTime<Utc>,
    pub app: AppInfo,
    pub images: ImageSet,
    pub stages: Vec<StageRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scan: Option<ScanSummary>,
    pub passed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppInfo {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageSet {
    pub unverified: String,
    pub release: String,
    pub latest: String,
}

impl PipelineReport {
    pub fn from_run(
        config: &PipelineConfig,
        run: &PipelineRun,
        scan: Option<&ScanSummary>,
    ) -> Result<Self> {
        Ok(Self {
            tool: env!("CARGO_PKG_NAME").to_string(),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            generated_at: Utc::now(),
            app: AppInfo {
                name: config.app_name.clone(),
                version: config.app_version.clone(),
            },
            images: ImageSet {
                unverified: config.unverified_image()?.to_string(),
                release: config.release_image()?.to_string(),
                latest: config.latest_image()?.to_string(),
            },
            stages: run.records.clone(),
            scan: scan.cloned(),
            passed: run.passed(),
        })
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .context("Failed to serialize pipeline report")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }
}

/// Output format enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// JSON format (machine-readable)
    Json,
    /// YAML format (human-friendly, version-control friendly)
    Yaml,
    /// Human-readable formatted text
    #[default]
    Human,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "yaml" | "yml" => Ok(Self::Yaml),
            "human" | "text" => Ok(Self::Human),
            other => Err(format!(
                "Invalid format: {}. Valid options: json, yaml, human",
                other
            )),
        }
    }
}

/// Formatter for the CLI's result types
pub struct OutputFormatter {
    format: OutputFormat,
}

impl OutputFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Renders the resolved environment, secrets masked.
    pub fn format_environment(&self, env: &Environment) -> Result<String> {
        let masked: Vec<(String, String)> = env
            .iter()
            .map(|(key, value)| {
                let value = if is_secret_key(key) {
                    mask_value(value)
                } else {
                    value.to_string()
                };
                (key.to_string(), value)
            })
            .collect();

        match self.format {
            OutputFormat::Json => {
                let map: serde_json::Map<String, serde_json::Value> = masked
                    .into_iter()
                    .map(|(k, v)| (k, serde_json::Value::String(v)))
                    .collect();
                serde_json::to_string_pretty(&map).context("Failed to serialize environment")
            }
            OutputFormat::Yaml => {
                let map: std::collections::BTreeMap<String, String> =
                    masked.into_iter().collect();
                serde_yaml::to_string(&map).context("Failed to serialize environment")
            }
            OutputFormat::Human => Ok(masked
                .into_iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("\n")),
        }
    }

    pub fn format_compose_check(&self, check: &ComposeCheck) -> Result<String> {
        match self.format {
            OutputFormat::Json => {
                serde_json::to_string_pretty(check).context("Failed to serialize compose check")
            }
            OutputFormat::Yaml => {
                serde_yaml::to_string(check).context("Failed to serialize compose check")
            }
            OutputFormat::Human => {
                let mut lines = Vec::new();
                for error in &check.errors {
                    lines.push(format!("error: {error}"));
                }
                for warning in &check.warnings {
                    lines.push(format!("warning: {warning}"));
                }
                if lines.is_empty() {
                    lines.push("compose file OK".to_string());
                }
                Ok(lines.join("\n"))
            }
        }
    }

    pub fn format_scan_summary(&self, summary: &ScanSummary) -> Result<String> {
        match self.format {
            OutputFormat::Json => {
                serde_json::to_string_pretty(summary).context("Failed to serialize scan summary")
            }
            OutputFormat::Yaml => {
                serde_yaml::to_string(summary).context("Failed to serialize scan summary")
            }
            OutputFormat::Human => {
                let mut lines = vec![
                    format!(
                        "findings: {} (critical {}, high {}, medium {}, low {}, unknown {})",
                        summary.total,
                        summary.critical,
                        summary.high,
                        summary.medium,
                        summary.low,
                        summary.unknown
                    ),
                    format!("fixable: {}, unfixed: {}", summary.fixable, summary.unfixed),
                ];
                if summary.passed {
                    lines.push("gate: PASSED".to_string());
                } else {
                    lines.push(format!(
                        "gate: FAILED ({} unfixed finding(s) at or above threshold)",
                        summary.gate_failures.len()
                    ));
                    for finding in &summary.gate_failures {
                        lines.push(format!(
                            "  {} {} {} (installed {})",
                            finding.severity,
                            finding.id,
                            finding.package,
                            finding.installed_version.as_deref().unwrap_or("?")
                        ));
                    }
                }
                Ok(lines.join("\n"))
            }
        }
    }

    pub fn format_pipeline_report(&self, report: &PipelineReport) -> Result<String> {
        match self.format {
            OutputFormat::Json => {
                serde_json::to_string_pretty(report).context("Failed to serialize pipeline report")
            }
            OutputFormat::Yaml => {
                serde_yaml::to_string(report).context("Failed to serialize pipeline report")
            }
            OutputFormat::Human => {
                let mut lines = vec![format!(
                    "{} {} ({})",
                    report.app.name,
                    report.app.version,
                    if report.passed { "PASSED" } else { "FAILED" }
                )];
                for stage in &report.stages {
                    let status = match &stage.status {
                        StageStatus::Passed => "passed".to_string(),
                        StageStatus::GateFailed { failing } => {
                            format!("gate failed ({failing} finding(s))")
                        }
                        StageStatus::Failed { error } => format!("failed: {error}"),
                    };
                    lines.push(format!(
                        "  {:<8} {:<30} {}ms",
                        stage.name, status, stage.duration_ms
                    ));
                }
                lines.push(format!("release: {}", report.images.release));
                lines.push(format!("latest:  {}", report.images.latest));
                Ok(lines.join("\n"))
            }
        }
    }
}
