//! In-memory fakes for the monitor's collaborators (testing only)
//!
//! `FakeProvider` serves branches and change requests from memory,
//! `CountingProvisioner` counts provision/release calls around real host
//! environments and `RecordingShipper` remembers which log directories it
//! was asked to copy.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use lang_env_manager::{
    EnvError, EnvironmentProvisioner, HostProvisioner, Language, LanguageEnvironment,
};

use crate::error::{CiError, Result};
use crate::log_server::LogShipper;
use crate::provider::{BranchHead, ChangeRequestInfo, Comment, SourceProvider};

// ---------------------------------------------------------------------------
// FakeProvider
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct ProviderState {
    branches: HashMap<String, String>,
    open: Vec<ChangeRequestInfo>,
    broken: HashSet<u64>,
    fail_branch_fetch: bool,
    fail_listing: bool,
    fail_downloads: bool,
    posted: Vec<(u64, String)>,
    downloads: Vec<String>,
}

/// Source provider backed by a `Mutex`-guarded in-memory state.
///
/// Downloads write a `REVISION` file holding the downloaded commit.
#[derive(Debug, Default)]
pub struct FakeProvider {
    state: Mutex<ProviderState>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Point `name` at `commit`.
    pub fn set_branch(&self, name: &str, commit: &str) {
        let mut state = self.state.lock().unwrap();
        state.branches.insert(name.to_string(), commit.to_string());
    }

    /// Open a request, or replace the open request with the same number.
    pub fn open_request(&self, info: ChangeRequestInfo) {
        let mut state = self.state.lock().unwrap();
        match state.open.iter_mut().find(|cr| cr.number == info.number) {
            Some(existing) => *existing = info,
            None => state.open.push(info),
        }
    }

    pub fn close_request(&self, number: u64) {
        let mut state = self.state.lock().unwrap();
        state.open.retain(|cr| cr.number != number);
    }

    pub fn add_comment(&self, number: u64, comment: Comment) {
        let mut state = self.state.lock().unwrap();
        if let Some(cr) = state.open.iter_mut().find(|cr| cr.number == number) {
            cr.comments.push(comment);
        }
    }

    /// Make fetching request `number` fail while it stays listed as open.
    pub fn break_request(&self, number: u64) {
        self.state.lock().unwrap().broken.insert(number);
    }

    pub fn fail_branch_fetch(&self, fail: bool) {
        self.state.lock().unwrap().fail_branch_fetch = fail;
    }

    pub fn fail_listing(&self, fail: bool) {
        self.state.lock().unwrap().fail_listing = fail;
    }

    pub fn fail_downloads(&self, fail: bool) {
        self.state.lock().unwrap().fail_downloads = fail;
    }

    /// Comments posted so far as `(request, body)`.
    pub fn posted_comments(&self) -> Vec<(u64, String)> {
        self.state.lock().unwrap().posted.clone()
    }

    /// Commits downloaded so far, in order.
    pub fn downloads(&self) -> Vec<String> {
        self.state.lock().unwrap().downloads.clone()
    }

    fn record_download(&self, commit: &str, dest: &Path) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_downloads {
            return Err(CiError::Git(format!("download of {commit} failed")));
        }
        state.downloads.push(commit.to_string());
        std::fs::write(dest.join("REVISION"), commit)?;
        Ok(())
    }
}

#[async_trait]
impl SourceProvider for FakeProvider {
    fn project_slug(&self) -> String {
        "github.com/fake/project".to_string()
    }

    async fn fetch_branch(&self, name: &str) -> Result<BranchHead> {
        let state = self.state.lock().unwrap();
        if state.fail_branch_fetch {
            return Err(CiError::Provider(format!("branch {name} unavailable")));
        }
        state
            .branches
            .get(name)
            .map(|commit| BranchHead {
                name: name.to_string(),
                commit: commit.clone(),
            })
            .ok_or_else(|| CiError::Provider(format!("branch {name} not found")))
    }

    async fn fetch_change_request(&self, number: u64) -> Result<ChangeRequestInfo> {
        let state = self.state.lock().unwrap();
        if state.broken.contains(&number) {
            return Err(CiError::Provider(format!("change request {number} unavailable")));
        }
        state
            .open
            .iter()
            .find(|cr| cr.number == number)
            .cloned()
            .ok_or_else(|| CiError::Provider(format!("change request {number} not found")))
    }

    async fn list_open_change_requests(&self) -> Result<Vec<u64>> {
        let state = self.state.lock().unwrap();
        if state.fail_listing {
            return Err(CiError::Provider("listing unavailable".to_string()));
        }
        Ok(state.open.iter().map(|cr| cr.number).collect())
    }

    async fn post_comment(&self, number: u64, body: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.posted.push((number, body.to_string()));
        Ok(())
    }

    async fn download_branch(&self, head: &BranchHead, dest: &Path) -> Result<()> {
        self.record_download(&head.commit, dest)
    }

    async fn download_change_request(&self, info: &ChangeRequestInfo, dest: &Path) -> Result<()> {
        self.record_download(&info.head_commit, dest)
    }
}

// ---------------------------------------------------------------------------
// CountingProvisioner
// ---------------------------------------------------------------------------

/// Host provisioner that counts calls. Clones share the counters.
#[derive(Debug, Clone)]
pub struct CountingProvisioner {
    inner: HostProvisioner,
    provisioned: Arc<AtomicUsize>,
    released: Arc<AtomicUsize>,
    fail: Arc<AtomicBool>,
}

impl Default for CountingProvisioner {
    fn default() -> Self {
        Self {
            inner: HostProvisioner::new(Language::Generic),
            provisioned: Arc::default(),
            released: Arc::default(),
            fail: Arc::default(),
        }
    }
}

impl CountingProvisioner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following `provision` fail.
    pub fn fail_provisioning(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn provisioned(&self) -> usize {
        self.provisioned.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EnvironmentProvisioner for CountingProvisioner {
    async fn provision(&self, project_slug: &str) -> lang_env_manager::Result<LanguageEnvironment> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(EnvError::Io(std::io::Error::other("provisioning disabled")));
        }
        let env = self.inner.provision(project_slug).await?;
        self.provisioned.fetch_add(1, Ordering::SeqCst);
        Ok(env)
    }

    async fn release(&self, env: LanguageEnvironment) -> lang_env_manager::Result<()> {
        self.released.fetch_add(1, Ordering::SeqCst);
        self.inner.release(env).await
    }
}

// ---------------------------------------------------------------------------
// RecordingShipper
// ---------------------------------------------------------------------------

/// Log shipper that records directories instead of copying them.
#[derive(Debug, Default)]
pub struct RecordingShipper {
    copied: Mutex<Vec<PathBuf>>,
    fail: AtomicBool,
}

impl RecordingShipper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the call, then fail it.
    pub fn failing() -> Self {
        Self {
            copied: Mutex::default(),
            fail: AtomicBool::new(true),
        }
    }

    pub fn copied(&self) -> Vec<PathBuf> {
        self.copied.lock().unwrap().clone()
    }
}

#[async_trait]
impl LogShipper for RecordingShipper {
    async fn copy(&self, local_dir: &Path) -> Result<()> {
        self.copied.lock().unwrap().push(local_dir.to_path_buf());
        if self.fail.load(Ordering::SeqCst) {
            return Err(CiError::LogShipping("log server unreachable".to_string()));
        }
        Ok(())
    }
}
