//! Lang-Env-Manager: isolated working environments for localci
//!
//! Every revision test gets its own throwaway directory tree laid out the way
//! the repository's language toolchain expects, plus the environment
//! variables pointing the toolchain at it.
//!
//! The environment is owned by exactly one in-flight test and must be handed
//! back to [`EnvironmentProvisioner::release`] once the test is over.

pub mod error;
pub mod language;
pub mod provisioner;

pub use error::EnvError;
pub use language::Language;
pub use provisioner::{EnvironmentProvisioner, HostProvisioner, LanguageEnvironment};

/// Result type for environment operations
pub type Result<T> = std::result::Result<T, EnvError>;
