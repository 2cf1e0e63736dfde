//! Mock scanner for tests

use super::{ImageScanner, ScanError, ScanReport};
use crate::reference::ImageReference;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Mutex;

/// Returns a canned report and writes it to the artifact path, like the
/// real scanner would.
pub struct MockScanner {
    report_json: String,
    scanned: Mutex<Vec<ImageReference>>,
}

impl MockScanner {
    pub fn new(report_json: impl Into<String>) -> Self {
        Self {
            report_json: report_json.into(),
            scanned: Mutex::new(Vec::new()),
        }
    }

    /// A report with no findings.
    pub fn clean() -> Self {
        Self::new(r#"{"SchemaVersion":2,"ArtifactName":"mock","Results":[]}"#)
    }

    pub fn scanned(&self) -> Vec<ImageReference> {
        self.scanned.lock().expect("mock lock").clone()
    }
}

#[async_trait]
impl ImageScanner for MockScanner {
    async fn scan(
        &self,
        image: &ImageReference,
        report_path: &Path,
    ) -> Result<ScanReport, ScanError> {
        self.scanned.lock().expect("mock lock").push(image.clone());
        std::fs::write(report_path, &self.report_json).map_err(|source| ScanError::ReportIo {
            path: report_path.to_path_buf(),
            source,
        })?;
        Ok(ScanReport::parse(&self.report_json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_clean_mock_writes_artifact() {
        let scanner = MockScanner::clean();
        let image = ImageReference::parse("reg.internal/app:1.0-unverified").unwrap();
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("report.json");

        let report = scanner.scan(&image, &path).await.unwrap();
        assert_eq!(report.vulnerabilities().count(), 0);
        assert!(path.exists());
        assert_eq!(scanner.scanned(), vec![image]);
    }
}
