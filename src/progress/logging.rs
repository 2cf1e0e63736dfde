//! Logging-based progress handler

use super::{ProgressEvent, ProgressHandler};
use tracing::{info, warn};

/// Handler that logs progress events using tracing
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandler;

impl ProgressHandler for LoggingHandler {
    fn on_progress(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::Started { app, version } => {
                info!(app = %app, version = %version, "Starting pipeline");
            }
            ProgressEvent::StageStarted { stage } => {
                info!(stage = %stage, "Starting stage");
            }
            ProgressEvent::StageComplete { stage, duration } => {
                info!(
                    stage = %stage,
                    duration_ms = duration.as_millis(),
                    "Stage complete"
                );
            }
            ProgressEvent::GateFailed { stage, findings } => {
                warn!(stage = %stage, findings, "Vulnerability gate failed");
            }
            ProgressEvent::ImagePushed { image } => {
                info!(image = %image, "Image pushed");
            }
            ProgressEvent::Completed {
                stages_run,
                total_time,
            } => {
                info!(
                    stages = stages_run,
                    total_time_ms = total_time.as_millis(),
                    "Pipeline complete"
                );
            }
            ProgressEvent::Failed { stage, error } => {
                warn!(stage = %stage, error = %error, "Pipeline failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_logging_handler_creation() {
        let handler = LoggingHandler;
        // Should not panic
        handler.on_progress(&ProgressEvent::Started {
            app: "scraper".to_string(),
            version: "1.2.3".to_string(),
        });
    }

    #[test]
    fn test_logging_all_events() {
        let handler = LoggingHandler;

        // Test all event types to ensure they don't panic
        let events = vec![
            ProgressEvent::Started {
                app: "scraper".to_string(),
                version: "1.2.3".to_string(),
            },
            ProgressEvent::StageStarted {
                stage: "build".to_string(),
            },
            ProgressEvent::StageComplete {
                stage: "build".to_string(),
                duration: Duration::from_millis(50),
            },
            ProgressEvent::GateFailed {
                stage: "scan".to_string(),
                findings: 2,
            },
            ProgressEvent::ImagePushed {
                image: "registry.example.org/scraper:1.2.3".to_string(),
            },
            ProgressEvent::Completed {
                stages_run: 3,
                total_time: Duration::from_secs(5),
            },
            ProgressEvent::Failed {
                stage: "promote".to_string(),
                error: "Test error".to_string(),
            },
        ];

        for event in events {
            handler.on_progress(&event);
        }
    }
}
