//! Error types for stage execution

use std::path::PathBuf;
use thiserror::Error;

/// Errors that prevent a stage from running its commands.
///
/// A command exiting non-zero is not an error; it is reported through
/// [`crate::StageResult`].
#[derive(Error, Debug)]
pub enum StageError {
    /// The stage log file could not be opened or written
    #[error("failed to write stage log {path}: {source}")]
    LogFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The shell for a command could not be started
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// IO error while waiting on or killing a command
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for stage operations
pub type Result<T> = std::result::Result<T, StageError>;
