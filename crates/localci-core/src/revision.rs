//! Revisions: the units of code localci tests.
//!
//! Two kinds exist, the mainline [`Branch`] and an open [`ChangeRequest`].
//! Both are handled through the [`Revision`] trait so the monitor can
//! deduplicate, gate and dispatch them without knowing which is which.

use crate::config::CommentTrigger;
use crate::error::{Ineligible, Result};
use crate::provider::{BranchHead, ChangeRequestInfo, SourceProvider};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// A testable unit of code.
#[async_trait]
pub trait Revision: Send + Sync + std::fmt::Debug {
    /// Stable key of the logical revision, e.g. the branch name.
    fn identity(&self) -> String;

    /// Changes whenever the underlying code changes.
    fn fingerprint(&self) -> &str;

    /// Same logical revision with the same code.
    fn equal(&self, other: &dyn Revision) -> bool {
        self.identity() == other.identity() && self.fingerprint() == other.fingerprint()
    }

    /// `Ok` when the revision may be tested now.
    fn is_eligible(&self) -> std::result::Result<(), Ineligible>;

    /// Put the revision's code into the empty directory `dest`.
    async fn download(&self, dest: &Path) -> Result<()>;

    /// Name of the per-revision directory under the repository log root.
    fn log_dir_name(&self) -> String;

    /// Publish the test outcome to wherever the revision came from.
    async fn report(&self, passed: bool) -> Result<()>;
}

/// Turn an arbitrary ref name into a single path component.
///
/// Bytes outside `[A-Za-z0-9._-]` are percent-encoded, so distinct names
/// never share a directory.
fn sanitize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for byte in name.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.') {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

/// Identity and log directory name of change request `number`.
pub fn change_request_identity(number: u64) -> String {
    format!("pr-{number}")
}

/// The mainline branch of a repository.
#[derive(Debug, Clone)]
pub struct Branch {
    head: BranchHead,
    provider: Arc<dyn SourceProvider>,
}

impl Branch {
    /// Resolve the current head of `name`.
    pub async fn fetch(provider: Arc<dyn SourceProvider>, name: &str) -> Result<Self> {
        let head = provider.fetch_branch(name).await?;
        Ok(Self { head, provider })
    }

    /// Head this revision points at.
    pub fn head(&self) -> &BranchHead {
        &self.head
    }
}

#[async_trait]
impl Revision for Branch {
    fn identity(&self) -> String {
        self.head.name.clone()
    }

    fn fingerprint(&self) -> &str {
        &self.head.commit
    }

    fn is_eligible(&self) -> std::result::Result<(), Ineligible> {
        Ok(())
    }

    async fn download(&self, dest: &Path) -> Result<()> {
        self.provider.download_branch(&self.head, dest).await
    }

    fn log_dir_name(&self) -> String {
        sanitize(&self.head.name)
    }

    async fn report(&self, passed: bool) -> Result<()> {
        debug!(branch = %self.head.name, passed, "Branch results are not posted");
        Ok(())
    }
}

/// Gating and reporting settings for change requests of one repository.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeRequestConfig {
    /// Authors allowed to have their requests tested. Empty allows everyone.
    pub whitelist: Vec<String>,

    /// Comment required before testing.
    pub comment_trigger: Option<CommentTrigger>,

    /// Comment posted when the test passes. Empty posts nothing.
    pub post_on_success: String,

    /// Comment posted when the test fails. Empty posts nothing.
    pub post_on_failure: String,
}

/// An open change request (pull request).
#[derive(Debug, Clone)]
pub struct ChangeRequest {
    info: ChangeRequestInfo,
    config: Arc<ChangeRequestConfig>,
    provider: Arc<dyn SourceProvider>,
}

impl ChangeRequest {
    /// Fetch request `number` and its comments.
    pub async fn fetch(
        provider: Arc<dyn SourceProvider>,
        number: u64,
        config: Arc<ChangeRequestConfig>,
    ) -> Result<Self> {
        let info = provider.fetch_change_request(number).await?;
        Ok(Self {
            info,
            config,
            provider,
        })
    }

    /// Snapshot this revision was built from.
    pub fn info(&self) -> &ChangeRequestInfo {
        &self.info
    }

    fn has_trigger(&self, trigger: &CommentTrigger) -> bool {
        self.info.comments.iter().any(|comment| {
            comment.body.contains(&trigger.comment)
                && (trigger.user.is_empty() || comment.author == trigger.user)
        })
    }
}

#[async_trait]
impl Revision for ChangeRequest {
    fn identity(&self) -> String {
        change_request_identity(self.info.number)
    }

    fn fingerprint(&self) -> &str {
        &self.info.head_commit
    }

    fn is_eligible(&self) -> std::result::Result<(), Ineligible> {
        if !self.config.whitelist.is_empty()
            && !self.config.whitelist.iter().any(|user| *user == self.info.author)
        {
            return Err(Ineligible::new(format!(
                "author {} is not in the whitelist",
                self.info.author
            )));
        }

        if let Some(trigger) = &self.config.comment_trigger {
            if !self.has_trigger(trigger) {
                return Err(Ineligible::new(format!(
                    "trigger comment {:?} not found",
                    trigger.comment
                )));
            }
        }

        Ok(())
    }

    async fn download(&self, dest: &Path) -> Result<()> {
        self.provider.download_change_request(&self.info, dest).await
    }

    fn log_dir_name(&self) -> String {
        change_request_identity(self.info.number)
    }

    async fn report(&self, passed: bool) -> Result<()> {
        let body = if passed {
            &self.config.post_on_success
        } else {
            &self.config.post_on_failure
        };
        if body.is_empty() {
            return Ok(());
        }
        self.provider.post_comment(self.info.number, body).await
    }
}
