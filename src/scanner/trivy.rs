//! Trivy scanner subprocess

use super::{ImageScanner, ScanError, ScanReport};
use crate::config::RegistryCredentials;
use crate::reference::ImageReference;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

pub struct TrivyScanner {
    binary: String,
    timeout: Duration,
    credentials: Option<RegistryCredentials>,
    ca_cert: Option<PathBuf>,
}

impl TrivyScanner {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
            credentials: None,
            ca_cert: None,
        }
    }

    /// Registry credentials passed through the scanner's environment.
    pub fn with_credentials(mut self, credentials: Option<RegistryCredentials>) -> Self {
        self.credentials = credentials;
        self
    }

    /// CA bundle for registries with private TLS.
    pub fn with_ca_cert(mut self, ca_cert: Option<PathBuf>) -> Self {
        self.ca_cert = ca_cert;
        self
    }
}

#[async_trait]
impl ImageScanner for TrivyScanner {
    async fn scan(
        &self,
        image: &ImageReference,
        report_path: &Path,
    ) -> Result<ScanReport, ScanError> {
        let timeout_arg = format!("{}s", self.timeout.as_secs());

        let mut command = Command::new(&self.binary);
        command
            .arg("image")
            .arg("--format")
            .arg("json")
            .arg("--output")
            .arg(report_path)
            .arg("--timeout")
            .arg(&timeout_arg)
            .arg(image.to_string())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if let Some(credentials) = &self.credentials {
            command
                .env("TRIVY_USERNAME", &credentials.username)
                .env("TRIVY_PASSWORD", &credentials.password);
        }
        if let Some(ca_cert) = &self.ca_cert {
            command.env("SSL_CERT_FILE", ca_cert);
        }

        info!(image = %image, scanner = self.binary, "Scanning image");
        debug!(report = %report_path.display(), timeout = %timeout_arg, "Scanner invocation");

        let child = command.spawn().map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                ScanError::ScannerMissing {
                    binary: self.binary.clone(),
                }
            } else {
                ScanError::Launch(e)
            }
        })?;

        // The scanner gets its own --timeout, but a wedged process must not
        // hang the pipeline, so the subprocess is bounded too (with slack
        // for database downloads).
        let deadline = self.timeout + Duration::from_secs(60);
        let output = tokio::time::timeout(deadline, child.wait_with_output())
            .await
            .map_err(|_| ScanError::Timeout(deadline.as_secs()))??;

        if !output.status.success() {
            return Err(ScanError::ScannerFailed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        let content =
            std::fs::read_to_string(report_path).map_err(|source| ScanError::ReportIo {
                path: report_path.to_path_buf(),
                source,
            })?;
        let report = ScanReport::parse(&content)?;
        info!(
            image = %image,
            findings = report.vulnerabilities().count(),
            "Scan complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_binary_is_actionable() {
        let scanner = TrivyScanner::new("definitely-not-a-scanner", Duration::from_secs(5));
        let image = ImageReference::parse("reg.internal/app:1.0-unverified").unwrap();
        let dir = tempfile::TempDir::new().unwrap();

        let err = scanner
            .scan(&image, &dir.path().join("report.json"))
            .await
            .unwrap_err();

        match &err {
            ScanError::ScannerMissing { binary } => {
                assert_eq!(binary, "definitely-not-a-scanner");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.to_string().contains("GANTRY_SCANNER"));
    }
}
