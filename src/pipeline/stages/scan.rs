//! Scan stage: run the scanner, persist the report artifact, apply the
//! promotion gate.

use crate::pipeline::context::{PipelineContext, StageStatus};
use crate::pipeline::stage_trait::PipelineStage;
use crate::reference::ImageReference;
use crate::scanner::{GatePolicy, ScanSummary, SCAN_REPORT_NAME};
use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{info, warn};

pub struct ScanStage {
    pub policy: GatePolicy,
    /// Scan this image instead of the pipeline's unverified tag.
    pub image: Option<ImageReference>,
    /// Write the report artifact here instead of the report directory.
    pub report_path: Option<std::path::PathBuf>,
}

impl ScanStage {
    pub fn new() -> Self {
        Self {
            policy: GatePolicy::default(),
            image: None,
            report_path: None,
        }
    }

    pub fn with_policy(policy: GatePolicy) -> Self {
        Self {
            policy,
            ..Self::new()
        }
    }
}

impl Default for ScanStage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PipelineStage for ScanStage {
    fn name(&self) -> &'static str {
        "scan"
    }

    async fn execute(&self, context: &mut PipelineContext) -> Result<StageStatus> {
        let image = match &self.image {
            Some(image) => image.clone(),
            None => context.config.unverified_image()?,
        };

        let report_path = match &self.report_path {
            Some(path) => path.clone(),
            None => context.config.report_dir.join(SCAN_REPORT_NAME),
        };
        if let Some(parent) = report_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }

        let report = context
            .scanner
            .scan(&image, &report_path)
            .await
            .context("Scan stage failed")?;
        info!(report = %report_path.display(), "Scan report written");

        let summary = ScanSummary::evaluate(&report, self.policy);
        info!(
            total = summary.total,
            critical = summary.critical,
            high = summary.high,
            medium = summary.medium,
            low = summary.low,
            unknown = summary.unknown,
            fixable = summary.fixable,
            unfixed = summary.unfixed,
            "Scan summary"
        );

        for finding in &summary.gate_failures {
            warn!(
                id = %finding.id,
                package = %finding.package,
                installed = finding.installed_version.as_deref().unwrap_or("?"),
                severity = %finding.severity,
                "Unfixed finding blocks promotion"
            );
        }

        let status = if summary.passed {
            StageStatus::Passed
        } else {
            StageStatus::GateFailed {
                failing: summary.gate_failures.len(),
            }
        };
        context.scan_summary = Some(summary);
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::MockEngine;
    use crate::config::PipelineConfig;
    use crate::environment::Environment;
    use crate::registry::MockRegistry;
    use crate::scanner::MockScanner;
    use std::sync::Arc;
    use tempfile::TempDir;

    const CRITICAL_UNFIXED: &str = r#"{
        "SchemaVersion": 2,
        "ArtifactName": "registry.internal.example.org/scraper:1.2.3-unverified",
        "Results": [
            {
                "Target": "debian 12",
                "Class": "os-pkgs",
                "Type": "debian",
                "Vulnerabilities": [
                    {
                        "VulnerabilityID": "CVE-2026-0001",
                        "PkgName": "libssl3",
                        "InstalledVersion": "3.0.11",
                        "Severity": "CRITICAL"
                    }
                ]
            }
        ]
    }"#;

    fn context_for(dir: &TempDir, scanner: Arc<MockScanner>) -> PipelineContext {
        let mut config = PipelineConfig::for_tests();
        config.report_dir = dir.path().to_path_buf();
        PipelineContext::new(
            Arc::new(MockEngine::new()),
            scanner,
            Arc::new(MockRegistry::new()),
            config,
            Environment::from_pairs(Vec::<(String, String)>::new()),
            dir.path().to_path_buf(),
        )
    }

    #[tokio::test]
    async fn test_clean_report_passes_the_gate() {
        let dir = TempDir::new().unwrap();
        let scanner = Arc::new(MockScanner::clean());
        let mut context = context_for(&dir, scanner.clone());

        let status = ScanStage::new().execute(&mut context).await.unwrap();
        assert_eq!(status, StageStatus::Passed);
        assert!(context.scan_summary.unwrap().passed);
        assert!(dir.path().join(SCAN_REPORT_NAME).is_file());
        assert_eq!(scanner.scanned().len(), 1);
    }

    #[tokio::test]
    async fn test_unfixed_critical_fails_the_gate() {
        let dir = TempDir::new().unwrap();
        let scanner = Arc::new(MockScanner::new(CRITICAL_UNFIXED));
        let mut context = context_for(&dir, scanner);

        let status = ScanStage::new().execute(&mut context).await.unwrap();
        assert_eq!(status, StageStatus::GateFailed { failing: 1 });

        let summary = context.scan_summary.unwrap();
        assert!(!summary.passed);
        assert_eq!(summary.critical, 1);
        assert_eq!(summary.gate_failures[0].id, "CVE-2026-0001");
    }

    #[tokio::test]
    async fn test_explicit_image_overrides_the_unverified_tag() {
        let dir = TempDir::new().unwrap();
        let scanner = Arc::new(MockScanner::clean());
        let mut context = context_for(&dir, scanner.clone());

        let image: ImageReference = "registry.example.org/other:9.9.9".parse().unwrap();
        let stage = ScanStage {
            image: Some(image.clone()),
            ..ScanStage::new()
        };
        stage.execute(&mut context).await.unwrap();

        assert_eq!(scanner.scanned(), vec![image]);
    }
}
