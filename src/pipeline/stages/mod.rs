pub mod build;
pub mod promote;
pub mod scan;

pub use build::BuildStage;
pub use promote::PromoteStage;
pub use scan::ScanStage;
