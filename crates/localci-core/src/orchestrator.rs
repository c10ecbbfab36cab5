//! Testing one revision end to end.
//!
//! [`RevisionTester::dispatch`] owns the whole life of a test: provision a
//! language environment, download the revision, reset its log directory,
//! run the stage pipeline, report the outcome, ship the logs and release
//! the environment. The environment is released exactly once on every path.

use crate::config::ValidatedRepo;
use crate::error::Result;
use crate::log_server::LogShipper;
use crate::obs;
use crate::provider::SourceProvider;
use crate::revision::Revision;
use lang_env_manager::{EnvironmentProvisioner, LanguageEnvironment};
use localci_stages::{PipelineReport, StagePipeline, StageRunConfig};
use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info_span, warn, Instrument};

/// Keep the variables that are valid UTF-8; the rest cannot be handed to
/// the stage runner and are skipped with a warning.
fn utf8_vars(vars: impl IntoIterator<Item = (OsString, OsString)>) -> Vec<(String, String)> {
    vars.into_iter()
        .filter_map(|(key, value)| match (key.into_string(), value.into_string()) {
            (Ok(key), Ok(value)) => Some((key, value)),
            (key, _) => {
                let key = match key {
                    Ok(key) => key,
                    Err(key) => key.to_string_lossy().into_owned(),
                };
                warn!(var = %key, "Skipping environment variable that is not valid UTF-8");
                None
            }
        })
        .collect()
}

/// Runs revisions of one repository through the stage pipeline.
#[derive(Debug, Clone)]
pub struct RevisionTester {
    repo: Arc<ValidatedRepo>,
    provider: Arc<dyn SourceProvider>,
    provisioner: Arc<dyn EnvironmentProvisioner>,
    shipper: Option<Arc<dyn LogShipper>>,
}

impl RevisionTester {
    pub fn new(
        repo: Arc<ValidatedRepo>,
        provider: Arc<dyn SourceProvider>,
        provisioner: Arc<dyn EnvironmentProvisioner>,
    ) -> Self {
        Self {
            repo,
            provider,
            provisioner,
            shipper: None,
        }
    }

    /// Copy every revision's log directory with `shipper` after its test.
    pub fn with_log_shipper(mut self, shipper: Arc<dyn LogShipper>) -> Self {
        self.shipper = Some(shipper);
        self
    }

    pub fn repo(&self) -> &Arc<ValidatedRepo> {
        &self.repo
    }

    pub fn provider(&self) -> &Arc<dyn SourceProvider> {
        &self.provider
    }

    /// Log directory of `rev`.
    pub fn log_dir_for(&self, rev: &dyn Revision) -> PathBuf {
        self.repo.log_dir.join(rev.log_dir_name())
    }

    /// Download `rev` into the environment and reset its log directory.
    pub async fn setup_revision(&self, rev: &dyn Revision, env: &LanguageEnvironment) -> Result<()> {
        rev.download(env.working_dir()).await?;

        let log_dir = self.log_dir_for(rev);
        if let Err(e) = tokio::fs::remove_dir_all(&log_dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                debug!(dir = %log_dir.display(), error = %e, "Could not clear old logs");
            }
        }
        tokio::fs::create_dir_all(&log_dir).await?;
        Ok(())
    }

    /// Run the stage pipeline for a revision that was already set up.
    ///
    /// Reporting and log shipping failures are logged and never change the
    /// returned outcome.
    pub async fn test_revision(
        &self,
        rev: &dyn Revision,
        env: &LanguageEnvironment,
    ) -> Result<PipelineReport> {
        let log_dir = self.log_dir_for(rev);
        let vars: Vec<(String, String)> = utf8_vars(std::env::vars_os())
            .into_iter()
            .chain(self.repo.default_env(&self.provider.project_slug()))
            .chain(env.env().iter().cloned())
            .collect();

        let config = StageRunConfig::new(env.working_dir().to_path_buf(), log_dir.clone())
            .with_env(vars)
            .with_tty(self.repo.tty)
            .with_timeout(self.repo.stage_timeout);

        let report = StagePipeline::run(&self.repo.stages, &config).await;
        obs::emit_test_finished(&rev.identity(), report.success, report.duration_ms);

        if let Err(e) = rev.report(report.success).await {
            error!(revision = %rev.identity(), error = %e, "Failed to report test result");
        }

        if let Some(shipper) = &self.shipper {
            if let Err(e) = shipper.copy(&log_dir).await {
                error!(dir = %log_dir.display(), error = %e, "Failed to copy logs to log server");
            }
        }

        Ok(report)
    }

    /// Provision, set up, test and release.
    pub async fn dispatch(&self, rev: Arc<dyn Revision>) -> Result<PipelineReport> {
        let span = info_span!("localci.test", revision = %rev.identity());
        async move {
            let env = self
                .provisioner
                .provision(&self.provider.project_slug())
                .await?;

            let outcome = match self.setup_revision(rev.as_ref(), &env).await {
                Ok(()) => self.test_revision(rev.as_ref(), &env).await,
                Err(e) => Err(e),
            };

            if let Err(e) = self.provisioner.release(env).await {
                error!(error = %e, "Failed to release environment");
            }

            if let Err(e) = &outcome {
                obs::emit_test_error(&rev.identity(), e);
            }
            outcome
        }
        .instrument(span)
        .await
    }
}
