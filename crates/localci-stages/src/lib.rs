//! localci stages - staged command execution
//!
//! Provides the building blocks used to test one revision:
//! - Named stages (setup, run, teardown, onSuccess, onFailure)
//! - A runner that executes a stage's shell commands with per-stage log files
//! - A pipeline that sequences the stages and picks the success/failure hook

pub mod error;
pub mod pipeline;
pub mod runner;
pub mod stage;

// Re-export key types
pub use error::{Result, StageError};
pub use pipeline::{PipelineReport, StagePipeline};
pub use runner::{StageResult, StageRunner};
pub use stage::{Stage, StageCommands, StageRunConfig};
