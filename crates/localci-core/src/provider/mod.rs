//! Source-control provider boundary.
//!
//! The monitor never talks to a hosting service directly. Everything it needs
//! (branch heads, open change requests, their comments, downloads and result
//! comments) goes through [`SourceProvider`].

pub mod github;

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub use github::GithubProvider;

/// Latest commit of a branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchHead {
    pub name: String,
    pub commit: String,
}

/// A comment left on a change request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub author: String,
    pub body: String,
}

/// Snapshot of an open change request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRequestInfo {
    pub number: u64,

    /// Commit at the tip of the request.
    pub head_commit: String,

    /// Branch the request wants to merge into.
    pub base_branch: String,

    /// Login of the request's author.
    pub author: String,

    /// Conversation comments, oldest first.
    pub comments: Vec<Comment>,
}

/// Access to a hosted repository.
#[async_trait]
pub trait SourceProvider: Send + Sync + std::fmt::Debug {
    /// Stable project path, e.g. `github.com/org/repo`.
    fn project_slug(&self) -> String;

    /// Resolve the current head of `name`.
    async fn fetch_branch(&self, name: &str) -> Result<BranchHead>;

    /// Fetch a change request together with its comments.
    async fn fetch_change_request(&self, number: u64) -> Result<ChangeRequestInfo>;

    /// Numbers of the currently open change requests, in provider order.
    async fn list_open_change_requests(&self) -> Result<Vec<u64>>;

    /// Post `body` as a comment on change request `number`.
    async fn post_comment(&self, number: u64, body: &str) -> Result<()>;

    /// Check `head` out into the empty directory `dest`.
    async fn download_branch(&self, head: &BranchHead, dest: &Path) -> Result<()>;

    /// Check the request's head out into the empty directory `dest`,
    /// merged onto its base branch.
    async fn download_change_request(&self, info: &ChangeRequestInfo, dest: &Path)
        -> Result<()>;
}
