//! localci core: watch repositories and test their revisions
//!
//! One [`RepositoryMonitor`] per repository polls its source-control
//! provider, reconciles the discovered revisions against the revisions it
//! already tested and hands new or changed ones to a [`RevisionTester`].
//!
//! ## Key Components
//!
//! - `ValidatedRepo`: repository configuration that passed validation
//! - `Revision`: branch heads and change requests behind one trait
//! - `RevisionTester`: provision, download, run stages, report, ship logs
//! - `DispatchPolicy`: serialized or concurrent scheduling of tests

pub mod config;
pub mod dispatch;
mod error;
pub mod fakes;
pub mod git;
pub mod log_server;
pub mod monitor;
pub mod obs;
pub mod orchestrator;
pub mod provider;
pub mod revision;
pub mod telemetry;

pub use config::{AgentConfig, CommentTrigger, LogServerConfig, RepoConfig, ValidatedRepo};
pub use dispatch::{DispatchMode, DispatchPolicy};
pub use error::{CiError, ConfigError, Ineligible, Result};
pub use log_server::{LogShipper, ScpLogShipper};
pub use monitor::{Decision, Discovery, RepositoryMonitor, TestedRevisions};
pub use orchestrator::RevisionTester;
pub use provider::{BranchHead, ChangeRequestInfo, Comment, GithubProvider, SourceProvider};
pub use revision::{Branch, ChangeRequest, ChangeRequestConfig, Revision};
pub use telemetry::init_tracing;
