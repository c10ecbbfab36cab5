//! Error taxonomy for revision monitoring and testing.

use std::path::PathBuf;

/// Repository configuration rejected at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing repository url")]
    MissingUrl,

    #[error("unsupported repository url: {0}")]
    UnsupportedUrl(String),

    #[error("failed to parse refresh time '{value}': {reason}")]
    InvalidRefreshTime { value: String, reason: String },

    #[error("failed to parse stage timeout '{value}': {reason}")]
    InvalidStageTimeout { value: String, reason: String },

    #[error("missing run commands")]
    MissingRunCommands,

    #[error("missing comment trigger")]
    MissingCommentTrigger,

    #[error("missing log server ip")]
    MissingLogServerIp,

    #[error("missing pull request number in configuration")]
    MissingPullRequest,

    #[error(transparent)]
    Language(#[from] lang_env_manager::EnvError),

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to create log directory {path}: {source}")]
    LogDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Why a revision is not tested right now. Not a failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{reason}")]
pub struct Ineligible {
    pub reason: String,
}

impl Ineligible {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Errors produced while discovering, preparing or reporting revisions.
#[derive(Debug, thiserror::Error)]
pub enum CiError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("http error: {0}")]
    Http(String),

    #[error("git error: {0}")]
    Git(String),

    #[error("log shipping failed: {0}")]
    LogShipping(String),

    #[error("environment error: {0}")]
    Environment(#[from] lang_env_manager::EnvError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for CiError {
    fn from(err: reqwest::Error) -> Self {
        CiError::Http(err.to_string())
    }
}

/// Result type for localci operations.
pub type Result<T> = std::result::Result<T, CiError>;
