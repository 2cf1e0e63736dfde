//! Scan report model and the promotion gate
//!
//! The report JSON is trivy-compatible (PascalCase keys). The raw report is
//! preserved verbatim as an artifact; this model only reads the fields the
//! gate needs.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ScanReport {
    #[serde(default)]
    pub schema_version: Option<i64>,
    #[serde(default)]
    pub artifact_name: Option<String>,
    #[serde(default)]
    pub results: Vec<ScanResult>,
}

impl ScanReport {
    pub fn parse(content: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(content)
    }

    pub fn vulnerabilities(&self) -> impl Iterator<Item = &Vulnerability> {
        self.results.iter().flat_map(|r| r.vulnerabilities.iter())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ScanResult {
    pub target: String,
    #[serde(default)]
    pub class: Option<String>,
    #[serde(rename = "Type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub vulnerabilities: Vec<Vulnerability>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Vulnerability {
    #[serde(rename = "VulnerabilityID")]
    pub vulnerability_id: String,
    pub pkg_name: String,
    #[serde(default)]
    pub installed_version: Option<String>,
    #[serde(default)]
    pub fixed_version: Option<String>,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(rename = "PrimaryURL", default)]
    pub primary_url: Option<String>,
}

impl Vulnerability {
    /// Whether the advisory ships a fixed version to upgrade to.
    pub fn has_fix(&self) -> bool {
        self.fixed_version
            .as_deref()
            .map(|v| !v.trim().is_empty())
            .unwrap_or(false)
    }
}

/// Scanner severity classification, ordered lowest to highest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    #[default]
    Unknown,
    Low,
    Medium,
    High,
    Critical,
}

// Scanners emit severity strings outside the common five; anything
// unrecognized maps to Unknown instead of failing the whole report.
impl<'de> Deserialize<'de> for Severity {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(raw.parse().unwrap_or(Severity::Unknown))
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unknown => "UNKNOWN",
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        };
        f.write_str(name)
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "UNKNOWN" => Ok(Self::Unknown),
            "LOW" => Ok(Self::Low),
            "MEDIUM" => Ok(Self::Medium),
            "HIGH" => Ok(Self::High),
            "CRITICAL" => Ok(Self::Critical),
            other => Err(format!(
                "Invalid severity: {}. Valid options: unknown, low, medium, high, critical",
                other
            )),
        }
    }
}

/// The promotion gate policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatePolicy {
    /// Findings at or above this severity with no available fix fail
    /// promotion.
    pub severity_threshold: Severity,
}

impl Default for GatePolicy {
    fn default() -> Self {
        Self {
            severity_threshold: Severity::Critical,
        }
    }
}

/// One finding that tripped the gate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GateFinding {
    pub id: String,
    pub package: String,
    pub installed_version: Option<String>,
    pub severity: Severity,
    pub title: Option<String>,
}

/// Aggregated verdict over a scan report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScanSummary {
    pub total: usize,
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub unknown: usize,
    pub fixable: usize,
    pub unfixed: usize,
    /// Findings at/above the gate threshold without an available fix.
    pub gate_failures: Vec<GateFinding>,
    pub passed: bool,
}

impl ScanSummary {
    /// Applies the gate: the image fails promotion iff any finding at or
    /// above the threshold has no fixed version available. Findings with a
    /// fix, and findings below the threshold, never fail the gate.
    pub fn evaluate(report: &ScanReport, policy: GatePolicy) -> Self {
        let mut summary = Self {
            total: 0,
            critical: 0,
            high: 0,
            medium: 0,
            low: 0,
            unknown: 0,
            fixable: 0,
            unfixed: 0,
            gate_failures: Vec::new(),
            passed: true,
        };

        for vuln in report.vulnerabilities() {
            summary.total += 1;
            match vuln.severity {
                Severity::Critical => summary.critical += 1,
                Severity::High => summary.high += 1,
                Severity::Medium => summary.medium += 1,
                Severity::Low => summary.low += 1,
                Severity::Unknown => summary.unknown += 1,
            }

            if vuln.has_fix() {
                summary.fixable += 1;
            } else {
                summary.unfixed += 1;
                if vuln.severity >= policy.severity_threshold {
                    summary.gate_failures.push(GateFinding {
                        id: vuln.vulnerability_id.clone(),
                        package: vuln.pkg_name.clone(),
                        installed_version: vuln.installed_version.clone(),
                        severity: vuln.severity,
                        title: vuln.title.clone(),
                    });
                }
            }
        }

        summary.passed = summary.gate_failures.is_empty();
        summary
    }
}
