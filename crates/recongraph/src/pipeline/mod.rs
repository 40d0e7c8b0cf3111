pub mod context;
pub mod error;
pub mod runner;

pub use context::{ScanContext, ScanType, FULL_AUTO, FULL_AUTO_CHAIN};
pub use error::PipelineError;
pub use runner::Pipeline;
