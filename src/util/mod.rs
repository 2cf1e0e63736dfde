//! Utility modules for gantry

pub mod logging;

// Re-export commonly used items
pub use logging::{init_from_env, init_logging, LoggingConfig};
