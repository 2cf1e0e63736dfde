//! Progress handler trait and events

use std::time::Duration;

/// Events emitted while a pipeline run progresses
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// Pipeline run started
    Started { app: String, version: String },

    /// A stage began executing
    StageStarted { stage: String },

    /// A stage finished successfully
    StageComplete { stage: String, duration: Duration },

    /// The scan gate rejected the image
    GateFailed { stage: String, findings: usize },

    /// Image pushed to a registry
    ImagePushed { image: String },

    /// Pipeline run completed successfully
    Completed {
        stages_run: usize,
        total_time: Duration,
    },

    /// Pipeline run failed
    Failed { stage: String, error: String },
}

/// Trait for handling progress events during a pipeline run
pub trait ProgressHandler: Send + Sync {
    /// Called when a progress event occurs
    fn on_progress(&self, event: &ProgressEvent);
}

/// No-op handler that ignores all events
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpHandler;

impl ProgressHandler for NoOpHandler {
    fn on_progress(&self, _event: &ProgressEvent) {
        // Intentionally empty
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingHandler {
        count: Arc<AtomicUsize>,
    }

    impl ProgressHandler for CountingHandler {
        fn on_progress(&self, _event: &ProgressEvent) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_noop_handler() {
        let handler = NoOpHandler;
        handler.on_progress(&ProgressEvent::Started {
            app: "scraper".to_string(),
            version: "1.2.3".to_string(),
        });
        // Should not panic or do anything
    }

    #[test]
    fn test_progress_events() {
        let count = Arc::new(AtomicUsize::new(0));
        let handler = CountingHandler {
            count: count.clone(),
        };

        handler.on_progress(&ProgressEvent::Started {
            app: "scraper".to_string(),
            version: "1.2.3".to_string(),
        });
        handler.on_progress(&ProgressEvent::StageStarted {
            stage: "build".to_string(),
        });
        handler.on_progress(&ProgressEvent::Completed {
            stages_run: 3,
            total_time: Duration::from_secs(5),
        });

        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_event_debug() {
        let event = ProgressEvent::StageStarted {
            stage: "scan".to_string(),
        };
        let debug_str = format!("{:?}", event);
        assert!(debug_str.contains("StageStarted"));
        assert!(debug_str.contains("scan"));
    }
}
