use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::scan::status::{ControlAction, ScanStatus};

#[derive(Error, Debug)]
pub enum RecongraphError {
    #[error("Settings: {0}")]
    Config(#[from] ConfigError),

    #[error("Tool: {0}")]
    Tool(#[from] ToolError),

    #[error("Scan: {0}")]
    Scan(#[from] ScanError),

    #[error("Pipeline: {0}")]
    Pipeline(#[from] crate::pipeline::PipelineError),

    #[error("Database: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read settings file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Settings are not valid JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Settings are not valid YAML: {0}")]
    ParseYaml(#[from] serde_yaml::Error),

    #[error("Invalid settings: {message}")]
    Validation { message: String },

    #[error("Settings do not match the schema: {errors}")]
    SchemaValidation { errors: String },
}

/// Errors raised while resolving, installing or running an external tool.
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("{0} is not installed. Install it from the tools page first.")]
    NotInstalled(String),

    #[error("Failed to launch {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error while running {tool}: {source}")]
    Io {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} exceeded the stage timeout of {timeout:?} and was terminated")]
    StageTimedOut { tool: String, timeout: Duration },

    #[error("Go is not installed. Install Go first: https://go.dev/dl/")]
    GoMissing,

    #[error("Installation of {tool} failed: {reason}")]
    InstallFailed { tool: String, reason: String },

    #[error("Installation of {tool} timed out after {secs}s")]
    InstallTimedOut { tool: String, secs: u64 },
}

/// Control-surface failures. Every variant is raised before any state is mutated.
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Scan job not found: {0}")]
    NotFound(String),

    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    #[error("A scan is already active for project {project_id}")]
    Conflict { project_id: String },

    #[error("Cannot {action} scan {scan_id}: scan is {status}")]
    InvalidTransition {
        scan_id: String,
        action: ControlAction,
        status: ScanStatus,
    },

    #[error("Unknown scan type '{0}'")]
    UnknownScanType(String),

    #[error("Invalid scan target '{0}'")]
    InvalidTarget(String),

    #[error("Orchestrator is shutting down")]
    ShuttingDown,

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

pub type Result<T> = std::result::Result<T, RecongraphError>;
