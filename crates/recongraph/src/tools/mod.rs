//! External recon tools: catalog, availability and execution.

pub mod catalog;
pub mod checker;
pub mod runner;

pub use catalog::ToolInfo;
pub use checker::{GoStatus, ToolChecker, ToolStatus};
pub use runner::{RunOutput, ToolRunner};
