//! Repository configuration: raw file format and validated form.
//!
//! A configuration file holds a global `parallel` switch and one
//! `[[repos]]` table per monitored repository:
//!
//! ```toml
//! parallel = false
//!
//! [[repos]]
//! url = "https://github.com/org/project"
//! token = "..."
//! refresh_time = "1m"
//! language = "go"
//! run = ["make check"]
//! on_failure = ["make collect-logs"]
//! post_on_failure = "localci: tests failed"
//! whitelist = "alice,bob"
//!
//! [repos.log_server]
//! ip = "10.0.0.5"
//! ```

use crate::error::ConfigError;
use crate::revision::ChangeRequestConfig;
use lang_env_manager::Language;
use localci_stages::StageCommands;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default mainline branch.
pub const DEFAULT_MASTER_BRANCH: &str = "master";

/// Default polling interval.
pub const DEFAULT_REFRESH_TIME: &str = "30s";

/// Default root for local logs and for logs on the log server.
pub const DEFAULT_LOG_DIR: &str = "/var/log/localci";

/// Default user on the log server.
pub const DEFAULT_LOG_SERVER_USER: &str = "root";

/// Variables every stage command sees, on top of the process environment.
pub const DEFAULT_ENV: [(&str, &str); 2] = [("CI", "true"), ("LOCALCI", "true")];

fn default_master_branch() -> String {
    DEFAULT_MASTER_BRANCH.to_string()
}

fn default_refresh_time() -> String {
    DEFAULT_REFRESH_TIME.to_string()
}

fn default_log_dir() -> PathBuf {
    PathBuf::from(DEFAULT_LOG_DIR)
}

/// Comment that must be present on a change request before it is tested.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommentTrigger {
    /// Only comments by this user count. Empty means anyone.
    #[serde(default)]
    pub user: String,

    /// Text the comment must contain.
    #[serde(default)]
    pub comment: String,
}

/// Remote host receiving the log directory of every test.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogServerConfig {
    #[serde(default)]
    pub ip: String,

    #[serde(default)]
    pub user: String,

    #[serde(default)]
    pub dir: String,
}

/// One repository as written in the configuration file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RepoConfig {
    pub url: String,

    #[serde(default)]
    pub token: Option<String>,

    #[serde(default = "default_master_branch")]
    pub master_branch: String,

    /// Monitor only this pull request. 0 disables pinning.
    #[serde(default)]
    pub pr: u64,

    #[serde(default = "default_refresh_time")]
    pub refresh_time: String,

    #[serde(flatten)]
    pub stages: StageCommands,

    #[serde(default)]
    pub tty: bool,

    #[serde(default)]
    pub post_on_success: String,

    #[serde(default)]
    pub post_on_failure: String,

    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    #[serde(default)]
    pub language: String,

    #[serde(default)]
    pub comment_trigger: Option<CommentTrigger>,

    #[serde(default)]
    pub log_server: Option<LogServerConfig>,

    /// Comma-separated list of authors whose change requests may be tested.
    #[serde(default)]
    pub whitelist: String,

    /// Optional per-command time limit, e.g. `"2h"`.
    #[serde(default)]
    pub stage_timeout: Option<String>,
}

impl RepoConfig {
    /// Minimal configuration for `url` running `run`, everything else defaulted.
    pub fn new(url: impl Into<String>, run: Vec<String>) -> Self {
        Self {
            url: url.into(),
            token: None,
            master_branch: default_master_branch(),
            pr: 0,
            refresh_time: default_refresh_time(),
            stages: StageCommands {
                run,
                ..Default::default()
            },
            tty: false,
            post_on_success: String::new(),
            post_on_failure: String::new(),
            log_dir: default_log_dir(),
            language: String::new(),
            comment_trigger: None,
            log_server: None,
            whitelist: String::new(),
            stage_timeout: None,
        }
    }

    /// Check the invariants and produce the immutable form.
    ///
    /// Does not touch the filesystem; see [`ValidatedRepo::prepare_log_dir`].
    pub fn validate(self) -> Result<ValidatedRepo, ConfigError> {
        let url = self.url.trim().to_string();
        if url.is_empty() {
            return Err(ConfigError::MissingUrl);
        }

        let refresh = parse_positive_duration(&self.refresh_time).map_err(|reason| {
            ConfigError::InvalidRefreshTime {
                value: self.refresh_time.clone(),
                reason,
            }
        })?;

        let stage_timeout = match self.stage_timeout.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(value) => Some(parse_positive_duration(value).map_err(|reason| {
                ConfigError::InvalidStageTimeout {
                    value: value.to_string(),
                    reason,
                }
            })?),
        };

        let log_server = match self.log_server {
            None => None,
            Some(server) if server == LogServerConfig::default() => None,
            Some(mut server) => {
                if server.ip.trim().is_empty() {
                    return Err(ConfigError::MissingLogServerIp);
                }
                if server.user.is_empty() {
                    server.user = DEFAULT_LOG_SERVER_USER.to_string();
                }
                if server.dir.is_empty() {
                    server.dir = DEFAULT_LOG_DIR.to_string();
                }
                Some(server)
            }
        };

        let comment_trigger = match self.comment_trigger {
            None => None,
            Some(trigger) if trigger == CommentTrigger::default() => None,
            Some(trigger) => {
                if trigger.comment.trim().is_empty() {
                    return Err(ConfigError::MissingCommentTrigger);
                }
                Some(trigger)
            }
        };

        let language = self.language.parse::<Language>()?;

        if self.stages.run.is_empty() {
            return Err(ConfigError::MissingRunCommands);
        }

        let whitelist = self
            .whitelist
            .split(',')
            .map(str::trim)
            .filter(|user| !user.is_empty())
            .map(str::to_string)
            .collect();

        let master_branch = match self.master_branch.trim() {
            "" => default_master_branch(),
            branch => branch.to_string(),
        };

        Ok(ValidatedRepo {
            url,
            token: self.token.filter(|t| !t.is_empty()),
            master_branch,
            pinned_pr: (self.pr != 0).then_some(self.pr),
            refresh,
            stages: self.stages,
            tty: self.tty,
            post_on_success: self.post_on_success,
            post_on_failure: self.post_on_failure,
            log_dir: self.log_dir,
            language,
            comment_trigger,
            log_server,
            whitelist,
            stage_timeout,
        })
    }
}

fn parse_positive_duration(value: &str) -> Result<Duration, String> {
    let duration = humantime::parse_duration(value.trim()).map_err(|e| e.to_string())?;
    if duration.is_zero() {
        return Err("duration must be positive".to_string());
    }
    Ok(duration)
}

/// A repository whose configuration passed validation.
#[derive(Debug, Clone)]
pub struct ValidatedRepo {
    pub url: String,
    pub token: Option<String>,
    pub master_branch: String,
    pub pinned_pr: Option<u64>,
    pub refresh: Duration,
    pub stages: StageCommands,
    pub tty: bool,
    pub post_on_success: String,
    pub post_on_failure: String,
    pub log_dir: PathBuf,
    pub language: Language,
    pub comment_trigger: Option<CommentTrigger>,
    pub log_server: Option<LogServerConfig>,
    pub whitelist: Vec<String>,
    pub stage_timeout: Option<Duration>,
}

impl ValidatedRepo {
    /// Create the root log directory.
    pub fn prepare_log_dir(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.log_dir).map_err(|source| ConfigError::LogDir {
            path: self.log_dir.clone(),
            source,
        })
    }

    /// Variables added by localci itself for this repository.
    pub fn default_env(&self, project_slug: &str) -> Vec<(String, String)> {
        DEFAULT_ENV
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .chain(std::iter::once((
                "LOCALCI_REPO_SLUG".to_string(),
                project_slug.to_string(),
            )))
            .collect()
    }

    /// Gating and reporting settings shared by all change requests.
    pub fn change_request_config(&self) -> ChangeRequestConfig {
        ChangeRequestConfig {
            whitelist: self.whitelist.clone(),
            comment_trigger: self.comment_trigger.clone(),
            post_on_success: self.post_on_success.clone(),
            post_on_failure: self.post_on_failure.clone(),
        }
    }
}

/// The whole configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentConfig {
    /// Run revision tests concurrently instead of one at a time.
    #[serde(default)]
    pub parallel: bool,

    #[serde(default)]
    pub repos: Vec<RepoConfig>,
}

impl AgentConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Read and parse a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }
}
