pub mod broadcast;
pub mod config;
pub mod db;
pub mod error;
pub mod orchestrator;
pub mod parsers;
pub mod pipeline;
pub mod scan;
pub mod telemetry;
pub mod tools;
pub mod worker;

#[cfg(test)]
pub(crate) mod test_support;

pub use broadcast::{LogStream, ScanEvent, ScanJob, ScanStore};
pub use config::{load_settings, load_settings_or_default, ReplayPolicy, ScanSettings, Settings};
pub use db::Database;
pub use error::{ConfigError, RecongraphError, Result, ScanError, ToolError};
pub use orchestrator::{Orchestrator, ScanDetails, StartScanRequest};
pub use pipeline::{Pipeline, ScanContext, ScanType};
pub use scan::{ActiveScanRegistry, ControlAction, ScanStatus};
pub use tools::{ToolChecker, ToolStatus};
