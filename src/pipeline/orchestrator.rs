use super::context::{PipelineContext, PipelineRun, StageRecord, StageStatus};
use super::stage_trait::PipelineStage;
use crate::progress::{NoOpHandler, ProgressEvent, ProgressHandler};
use std::time::Instant;
use tracing::{debug, error, info};

pub struct PipelineOrchestrator {
    progress: Box<dyn ProgressHandler>,
}

impl PipelineOrchestrator {
    pub fn new() -> Self {
        Self {
            progress: Box::new(NoOpHandler),
        }
    }

    pub fn with_progress(progress: Box<dyn ProgressHandler>) -> Self {
        Self { progress }
    }

    /// Runs the stages in order, stopping at the first error or gate
    /// failure. Every executed stage leaves exactly one record.
    pub async fn execute(
        &self,
        stages: Vec<Box<dyn PipelineStage>>,
        context: &mut PipelineContext,
    ) -> PipelineRun {
        let start = Instant::now();
        info!(
            app = %context.config.app_name,
            version = %context.config.app_version,
            "Starting pipeline"
        );
        self.progress.on_progress(&ProgressEvent::Started {
            app: context.config.app_name.clone(),
            version: context.config.app_version.clone(),
        });

        let mut records = Vec::new();
        for stage in stages {
            let name = stage.name();
            info!(stage = name, "Stage: {}", name);
            self.progress.on_progress(&ProgressEvent::StageStarted {
                stage: name.to_string(),
            });

            let stage_start = Instant::now();
            let result = stage.execute(context).await;
            let duration = stage_start.elapsed();

            match result {
                Ok(StageStatus::Passed) => {
                    debug!(stage = name, "Stage complete");
                    self.progress.on_progress(&ProgressEvent::StageComplete {
                        stage: name.to_string(),
                        duration,
                    });
                    records.push(StageRecord {
                        name: name.to_string(),
                        status: StageStatus::Passed,
                        duration_ms: duration.as_millis() as u64,
                        detail: None,
                    });
                }
                Ok(StageStatus::GateFailed { failing }) => {
                    self.progress.on_progress(&ProgressEvent::GateFailed {
                        stage: name.to_string(),
                        findings: failing,
                    });
                    records.push(StageRecord {
                        name: name.to_string(),
                        status: StageStatus::GateFailed { failing },
                        duration_ms: duration.as_millis() as u64,
                        detail: Some(format!("{failing} finding(s) blocked promotion")),
                    });
                    break;
                }
                Ok(StageStatus::Failed { error }) => {
                    error!(stage = name, error = %error, "Stage failed");
                    self.progress.on_progress(&ProgressEvent::Failed {
                        stage: name.to_string(),
                        error: error.clone(),
                    });
                    records.push(StageRecord {
                        name: name.to_string(),
                        status: StageStatus::Failed { error },
                        duration_ms: duration.as_millis() as u64,
                        detail: None,
                    });
                    break;
                }
                Err(err) => {
                    let message = format!("{err:#}");
                    error!(stage = name, error = %message, "Stage failed");
                    self.progress.on_progress(&ProgressEvent::Failed {
                        stage: name.to_string(),
                        error: message.clone(),
                    });
                    records.push(StageRecord {
                        name: name.to_string(),
                        status: StageStatus::Failed { error: message },
                        duration_ms: duration.as_millis() as u64,
                        detail: None,
                    });
                    break;
                }
            }
        }

        let duration = start.elapsed();
        let run = PipelineRun { records, duration };
        if run.passed() {
            info!(
                stages = run.records.len(),
                total_time_ms = duration.as_millis(),
                "Pipeline complete"
            );
            self.progress.on_progress(&ProgressEvent::Completed {
                stages_run: run.records.len(),
                total_time: duration,
            });
        }
        run
    }
}

impl Default for PipelineOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use async_trait::async_trait;

    enum Behaviour {
        Pass,
        Gate(usize),
        Error(&'static str),
    }

    struct StubStage {
        name: &'static str,
        behaviour: Behaviour,
    }

    #[async_trait]
    impl PipelineStage for StubStage {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn execute(&self, _context: &mut PipelineContext) -> anyhow::Result<StageStatus> {
            match &self.behaviour {
                Behaviour::Pass => Ok(StageStatus::Passed),
                Behaviour::Gate(failing) => Ok(StageStatus::GateFailed { failing: *failing }),
                Behaviour::Error(message) => Err(anyhow!(*message)),
            }
        }
    }

    fn test_context() -> PipelineContext {
        use crate::builder::MockEngine;
        use crate::config::PipelineConfig;
        use crate::environment::Environment;
        use crate::registry::MockRegistry;
        use crate::scanner::MockScanner;
        use std::sync::Arc;

        PipelineContext::new(
            Arc::new(MockEngine::new()),
            Arc::new(MockScanner::clean()),
            Arc::new(MockRegistry::new()),
            PipelineConfig::for_tests(),
            Environment::from_pairs(Vec::<(String, String)>::new()),
            std::env::temp_dir(),
        )
    }

    #[tokio::test]
    async fn test_all_stages_pass() {
        let mut context = test_context();
        let stages: Vec<Box<dyn PipelineStage>> = vec![
            Box::new(StubStage {
                name: "build",
                behaviour: Behaviour::Pass,
            }),
            Box::new(StubStage {
                name: "scan",
                behaviour: Behaviour::Pass,
            }),
        ];

        let run = PipelineOrchestrator::new().execute(stages, &mut context).await;
        assert!(run.passed());
        assert_eq!(run.records.len(), 2);
    }

    #[tokio::test]
    async fn test_gate_failure_stops_the_run() {
        let mut context = test_context();
        let stages: Vec<Box<dyn PipelineStage>> = vec![
            Box::new(StubStage {
                name: "build",
                behaviour: Behaviour::Pass,
            }),
            Box::new(StubStage {
                name: "scan",
                behaviour: Behaviour::Gate(2),
            }),
            Box::new(StubStage {
                name: "promote",
                behaviour: Behaviour::Pass,
            }),
        ];

        let run = PipelineOrchestrator::new().execute(stages, &mut context).await;
        assert!(!run.passed());
        assert!(run.gate_failed());
        // promote must never run after a gate failure
        assert_eq!(run.records.len(), 2);
        assert_eq!(
            run.records[1].status,
            StageStatus::GateFailed { failing: 2 }
        );
    }

    #[tokio::test]
    async fn test_stage_error_stops_the_run() {
        let mut context = test_context();
        let stages: Vec<Box<dyn PipelineStage>> = vec![
            Box::new(StubStage {
                name: "build",
                behaviour: Behaviour::Error("daemon unreachable"),
            }),
            Box::new(StubStage {
                name: "scan",
                behaviour: Behaviour::Pass,
            }),
        ];

        let run = PipelineOrchestrator::new().execute(stages, &mut context).await;
        assert!(!run.passed());
        assert_eq!(run.records.len(), 1);
        assert!(matches!(run.records[0].status, StageStatus::Failed { .. }));
        assert_eq!(run.exit_code(), 1);
    }
}
