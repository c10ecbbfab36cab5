//! Stage definitions and run configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// The named phases of a revision test.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum Stage {
    /// Prepares the environment.
    Setup,

    /// Runs the tests. Must never be empty for a valid repository.
    Run,

    /// Cleans up after `Run`, executed whatever the previous outcome.
    Teardown,

    /// Executed when setup, run and teardown all passed.
    OnSuccess,

    /// Executed when any of setup, run or teardown failed.
    OnFailure,
}

impl Stage {
    /// Stages executed unconditionally, in order.
    pub const MAIN: [Stage; 3] = [Stage::Setup, Stage::Run, Stage::Teardown];

    /// Get the stage name as a string. Also used as the log file stem.
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Setup => "setup",
            Stage::Run => "run",
            Stage::Teardown => "teardown",
            Stage::OnSuccess => "onSuccess",
            Stage::OnFailure => "onFailure",
        }
    }

    /// The hook that follows the main stages for a given outcome.
    pub fn hook_for(passed: bool) -> Stage {
        if passed {
            Stage::OnSuccess
        } else {
            Stage::OnFailure
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Shell commands for every stage of a repository.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageCommands {
    #[serde(default)]
    pub setup: Vec<String>,

    #[serde(default)]
    pub run: Vec<String>,

    #[serde(default)]
    pub teardown: Vec<String>,

    #[serde(default)]
    pub on_success: Vec<String>,

    #[serde(default)]
    pub on_failure: Vec<String>,
}

impl StageCommands {
    /// Commands configured for `stage`, possibly empty.
    pub fn commands(&self, stage: Stage) -> &[String] {
        match stage {
            Stage::Setup => &self.setup,
            Stage::Run => &self.run,
            Stage::Teardown => &self.teardown,
            Stage::OnSuccess => &self.on_success,
            Stage::OnFailure => &self.on_failure,
        }
    }
}

/// Per-test execution settings, created fresh for every revision test.
#[derive(Debug, Clone)]
pub struct StageRunConfig {
    /// Directory the commands run in.
    pub working_dir: PathBuf,

    /// Full environment of the commands. Later entries win on duplicate keys.
    pub env: Vec<(String, String)>,

    /// Allocate a pseudo terminal for every command.
    pub tty: bool,

    /// Directory receiving `<stage>.log` files.
    pub log_dir: PathBuf,

    /// Per-command time limit. `None` lets a command run forever.
    pub timeout: Option<Duration>,
}

impl StageRunConfig {
    /// Create a configuration with no extra environment, no TTY and no timeout.
    pub fn new(working_dir: PathBuf, log_dir: PathBuf) -> Self {
        Self {
            working_dir,
            env: Vec::new(),
            tty: false,
            log_dir,
            timeout: None,
        }
    }

    /// Append environment variables.
    pub fn with_env<I>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.env.extend(vars);
        self
    }

    /// Request a pseudo terminal.
    pub fn with_tty(mut self, tty: bool) -> Self {
        self.tty = tty;
        self
    }

    /// Limit how long a single command may run.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Path of the log file for `stage`.
    pub fn log_file(&self, stage: Stage) -> PathBuf {
        self.log_dir.join(format!("{}.log", stage.name()))
    }
}
