//! Environment provisioning and release.

use crate::error::EnvError;
use crate::language::{validate_slug, Language};
use crate::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info};

/// A provisioned working environment.
///
/// Owns its root directory. Dropping it removes the directory as a last
/// resort, but callers are expected to go through
/// [`EnvironmentProvisioner::release`] so failures get reported.
#[derive(Debug)]
pub struct LanguageEnvironment {
    root: TempDir,
    working_dir: PathBuf,
    env: Vec<(String, String)>,
}

impl LanguageEnvironment {
    /// Wrap an already prepared directory tree.
    pub fn new(root: TempDir, working_dir: PathBuf, env: Vec<(String, String)>) -> Self {
        Self {
            root,
            working_dir,
            env,
        }
    }

    /// Root of the environment.
    pub fn root(&self) -> &Path {
        self.root.path()
    }

    /// Empty directory the revision gets downloaded into.
    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Variables to add to every stage command.
    pub fn env(&self) -> &[(String, String)] {
        &self.env
    }

    /// Remove the environment from disk.
    pub fn remove(self) -> Result<()> {
        let path = self.root.path().display().to_string();
        self.root
            .close()
            .map_err(|source| EnvError::Release { path, source })
    }
}

/// Produces and reclaims per-revision environments.
///
/// `release` takes the environment by value, so it can run at most once per
/// successful `provision`.
#[async_trait]
pub trait EnvironmentProvisioner: Send + Sync + std::fmt::Debug {
    /// Create a fresh environment for the project identified by `project_slug`.
    async fn provision(&self, project_slug: &str) -> Result<LanguageEnvironment>;

    /// Tear the environment down.
    async fn release(&self, env: LanguageEnvironment) -> Result<()>;
}

/// Provisioner creating environments as temporary directories on the host.
#[derive(Debug, Clone)]
pub struct HostProvisioner {
    language: Language,
    base_dir: Option<PathBuf>,
}

impl HostProvisioner {
    /// Create a provisioner for `language` using the system temp directory.
    pub fn new(language: Language) -> Self {
        Self {
            language,
            base_dir: None,
        }
    }

    /// Place environments under `base_dir` instead of the system temp directory.
    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(base_dir.into());
        self
    }

    /// Language environments are laid out for.
    pub fn language(&self) -> Language {
        self.language
    }
}

#[async_trait]
impl EnvironmentProvisioner for HostProvisioner {
    async fn provision(&self, project_slug: &str) -> Result<LanguageEnvironment> {
        validate_slug(project_slug)?;

        let prefix = format!("localci-{}-", self.language);
        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix);
        let root = match &self.base_dir {
            Some(base) => {
                tokio::fs::create_dir_all(base).await?;
                builder.tempdir_in(base)?
            }
            None => builder.tempdir()?,
        };

        let working_dir = self.language.working_dir(root.path(), project_slug);
        tokio::fs::create_dir_all(&working_dir).await?;
        let env = self.language.env(root.path());

        info!(
            language = %self.language,
            root = %root.path().display(),
            "Provisioned environment"
        );

        Ok(LanguageEnvironment::new(root, working_dir, env))
    }

    async fn release(&self, env: LanguageEnvironment) -> Result<()> {
        debug!(root = %env.root().display(), "Releasing environment");
        env.remove()
    }
}
