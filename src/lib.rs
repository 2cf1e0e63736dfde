//! gantry - gated container image delivery pipeline
//!
//! Drives a container image through a three-stage pipeline: build the
//! image and push it under an unverified tag, scan it for vulnerabilities,
//! and promote it to the release registry only when the gate passes.
//!
//! # Core Concepts
//!
//! - **Unverified tag**: a freshly built image carries the `-unverified`
//!   suffix until the scan gate clears it
//! - **Gate**: promotion fails iff any finding at or above the threshold
//!   severity has no fixed version available
//! - **Retag**: promotion copies manifests and blobs between registries
//!   over the OCI distribution API; image contents never touch disk
//! - **Dotenv report**: a KEY=VALUE artifact carries resolved values
//!   between separately invoked stages
//!
//! # Example Usage
//!
//! ```ignore
//! use gantry::config::PipelineConfig;
//! use gantry::environment::Environment;
//! use gantry::pipeline::{BuildStage, PipelineOrchestrator, PromoteStage, ScanStage};
//!
//! let env = Environment::load(project_dir, &[])?;
//! let config = PipelineConfig::resolve(&env, project_dir)?;
//! let run = PipelineOrchestrator::new()
//!     .execute(
//!         vec![
//!             Box::new(BuildStage::new()),
//!             Box::new(ScanStage::new()),
//!             Box::new(PromoteStage::new()),
//!         ],
//!         &mut context,
//!     )
//!     .await;
//! std::process::exit(run.exit_code());
//! ```

// Public modules
pub mod builder;
pub mod cli;
pub mod compose;
pub mod config;
pub mod environment;
pub mod manifest;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod reference;
pub mod registry;
pub mod scanner;
pub mod util;

// Re-export key types for convenient access
pub use config::{ConfigError, PipelineConfig};
pub use pipeline::{PipelineContext, PipelineOrchestrator, PipelineRun};
pub use reference::ImageReference;
pub use util::{init_from_env, init_logging, LoggingConfig};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_exists() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_name_is_gantry() {
        assert_eq!(NAME, "gantry");
    }
}
