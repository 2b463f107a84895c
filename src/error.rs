//! Error handling module for shrinkwrap
//!
//! Provides the workflow error taxonomy using thiserror. Every step of the
//! pipeline reports failures through these types so `main` can map them to a
//! process exit status in one place.

use thiserror::Error;

/// Main error type for the shrink workflow
#[derive(Error, Debug)]
pub enum WorkflowError {
    /// Drive mapping failures (create, remap, query)
    #[error("Mount error: {0}")]
    Mount(String),

    /// Repository clone/pull failures
    #[error("Fetch error: {0}")]
    Fetch(String),

    /// The shrink tool ran but reported failure
    #[error("Shrink tool failed (exit code {}): {detail}", display_code(.exit_code))]
    ToolExecution {
        /// Exit code (None if terminated by signal or never spawned)
        exit_code: Option<i32>,
        detail: String,
    },

    /// Report load/save failures
    #[error("Conversion error: {0}")]
    Conversion(String),

    /// Configuration errors (loading, parsing, validation)
    #[error("Configuration error: {0}")]
    Config(String),

    /// External process could not be spawned, waited on, or timed out
    #[error("Process error: {0}")]
    Process(String),

    /// IO errors (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn display_code(code: &Option<i32>) -> String {
    code.map_or_else(|| "none".to_string(), |c| c.to_string())
}

/// Result type alias for workflow operations
pub type Result<T> = std::result::Result<T, WorkflowError>;

impl WorkflowError {
    /// Create a mount error
    pub fn mount(msg: impl Into<String>) -> Self {
        Self::Mount(msg.into())
    }

    /// Create a fetch error
    pub fn fetch(msg: impl Into<String>) -> Self {
        Self::Fetch(msg.into())
    }

    /// Create a tool execution error
    pub fn tool(exit_code: Option<i32>, detail: impl Into<String>) -> Self {
        Self::ToolExecution {
            exit_code,
            detail: detail.into(),
        }
    }

    /// Create a conversion error
    pub fn conversion(msg: impl Into<String>) -> Self {
        Self::Conversion(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a process error
    pub fn process(msg: impl Into<String>) -> Self {
        Self::Process(msg.into())
    }

    /// Process exit status for this error.
    ///
    /// Every fatal step failure exits with 1.
    pub fn exit_code(&self) -> i32 {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = WorkflowError::mount("Z: is mapped to \\\\other\\share");
        assert_eq!(err.to_string(), "Mount error: Z: is mapped to \\\\other\\share");

        let err = WorkflowError::config("drive must be a letter followed by ':'");
        assert_eq!(
            err.to_string(),
            "Configuration error: drive must be a letter followed by ':'"
        );
    }

    #[test]
    fn test_tool_error_display_includes_code() {
        let err = WorkflowError::tool(Some(2), "disk in use");
        assert_eq!(err.to_string(), "Shrink tool failed (exit code 2): disk in use");

        let err = WorkflowError::tool(None, "killed");
        assert!(err.to_string().contains("exit code none"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: WorkflowError = io_err.into();
        assert!(matches!(err, WorkflowError::Io(_)));
    }

    #[test]
    fn test_every_fatal_error_exits_one() {
        let errors = [
            WorkflowError::mount("m"),
            WorkflowError::fetch("f"),
            WorkflowError::tool(Some(2), "t"),
            WorkflowError::conversion("c"),
        ];
        for err in errors {
            assert_eq!(err.exit_code(), 1, "{err}");
        }
    }
}
