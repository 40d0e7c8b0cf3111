use thiserror::Error;

use crate::db::DatabaseError;
use crate::error::ToolError;

/// A failure that aborts a scan. Its text is stored as the job's error.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("{0}")]
    Tool(#[from] ToolError),

    #[error("Failed to store {tool} results: {source}")]
    Parse {
        tool: String,
        #[source]
        source: DatabaseError,
    },

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}
