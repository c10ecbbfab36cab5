//! Error types for lang-env-manager

use thiserror::Error;

/// Errors that can occur while provisioning or releasing an environment
#[derive(Error, Debug)]
pub enum EnvError {
    /// Language identifier not supported
    #[error("unsupported language: {0}")]
    UnknownLanguage(String),

    /// Project slug cannot be used as a relative path
    #[error("invalid project slug: {0:?}")]
    InvalidSlug(String),

    /// Environment root could not be removed
    #[error("failed to remove environment {path}: {source}")]
    Release {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
