//! Stage execution with per-stage log files.

use crate::error::{Result, StageError};
use crate::stage::{Stage, StageRunConfig};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;
use tracing::{debug, warn};

/// Result of a stage execution.
#[derive(Debug, Clone)]
pub struct StageResult {
    /// Stage that ran.
    pub stage: Stage,

    /// Number of commands started (the failing one included).
    pub commands_run: usize,

    /// The first command that failed, if any.
    pub failed_command: Option<String>,

    /// Exit code of the last command started, `None` if killed or nothing ran.
    pub exit_code: Option<i32>,

    /// Duration in milliseconds.
    pub duration_ms: u64,

    /// Whether every command succeeded.
    pub success: bool,
}

impl StageResult {
    /// Whether this stage passed.
    pub fn passed(&self) -> bool {
        self.success
    }

    pub(crate) fn errored(stage: Stage, error: &StageError) -> Self {
        Self {
            stage,
            commands_run: 0,
            failed_command: Some(error.to_string()),
            exit_code: None,
            duration_ms: 0,
            success: false,
        }
    }
}

/// Outcome of one command inside a stage.
enum CommandOutcome {
    Exited(Option<i32>),
    TimedOut,
}

/// Executes the commands of a single stage.
pub struct StageRunner;

impl StageRunner {
    /// Execute every command of `stage` in order, stopping at the first failure.
    ///
    /// Combined stdout/stderr goes to `<log_dir>/<stage>.log`. An empty
    /// command list is a successful no-op and does not create a log file.
    /// Later stages are never started from here.
    pub async fn run(
        stage: Stage,
        commands: &[String],
        config: &StageRunConfig,
    ) -> Result<StageResult> {
        let start = Instant::now();

        if commands.is_empty() {
            debug!(stage = %stage, "No commands configured, skipping");
            return Ok(StageResult {
                stage,
                commands_run: 0,
                failed_command: None,
                exit_code: None,
                duration_ms: 0,
                success: true,
            });
        }

        let log_path = config.log_file(stage);
        let mut log = open_log(&log_path)?;
        write_log(
            &mut log,
            &log_path,
            &format!("# stage {} started at {}\n", stage, chrono::Utc::now().to_rfc3339()),
        )?;

        let mut commands_run = 0;
        let mut exit_code = None;
        let mut failed_command = None;

        for command in commands {
            commands_run += 1;
            debug!(stage = %stage, command = %command, "Executing command");
            write_log(&mut log, &log_path, &format!("$ {command}\n"))?;

            match run_command(command, config, &log, &log_path).await? {
                CommandOutcome::Exited(code) => {
                    exit_code = code;
                    write_log(
                        &mut log,
                        &log_path,
                        &format!("# exit status: {}\n", describe_exit(code)),
                    )?;
                    if code != Some(0) {
                        failed_command = Some(command.clone());
                        break;
                    }
                }
                CommandOutcome::TimedOut => {
                    exit_code = None;
                    let limit = config.timeout.unwrap_or_default();
                    warn!(stage = %stage, command = %command, ?limit, "Command timed out");
                    write_log(
                        &mut log,
                        &log_path,
                        &format!("# killed after {} seconds\n", limit.as_secs()),
                    )?;
                    failed_command = Some(command.clone());
                    break;
                }
            }
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        let success = failed_command.is_none();

        Ok(StageResult {
            stage,
            commands_run,
            failed_command,
            exit_code,
            duration_ms,
            success,
        })
    }
}

fn open_log(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| StageError::LogFile {
            path: path.to_path_buf(),
            source,
        })
}

fn write_log(log: &mut File, path: &Path, line: &str) -> Result<()> {
    log.write_all(line.as_bytes())
        .map_err(|source| StageError::LogFile {
            path: path.to_path_buf(),
            source,
        })
}

fn describe_exit(code: Option<i32>) -> String {
    code.map(|c| c.to_string())
        .unwrap_or_else(|| "terminated by signal".to_string())
}

/// Build the shell invocation for one command.
///
/// With a TTY the command runs under `script`, which allocates a pseudo
/// terminal and forwards its output.
fn shell_command(command: &str, tty: bool) -> Command {
    if tty {
        let mut cmd = Command::new("script");
        cmd.args(["-qec", command, "/dev/null"]);
        cmd
    } else {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", command]);
        cmd
    }
}

async fn run_command(
    command: &str,
    config: &StageRunConfig,
    log: &File,
    log_path: &Path,
) -> Result<CommandOutcome> {
    let stdout = log.try_clone().map_err(|source| StageError::LogFile {
        path: log_path.to_path_buf(),
        source,
    })?;
    let stderr = log.try_clone().map_err(|source| StageError::LogFile {
        path: log_path.to_path_buf(),
        source,
    })?;

    let mut child = shell_command(command, config.tty)
        .current_dir(&config.working_dir)
        .env_clear()
        .envs(config.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr))
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| StageError::Spawn {
            command: command.to_string(),
            source,
        })?;

    let status = match config.timeout {
        Some(limit) if !limit.is_zero() => {
            match tokio::time::timeout(limit, child.wait()).await {
                Ok(status) => status?,
                Err(_) => {
                    child.kill().await?;
                    return Ok(CommandOutcome::TimedOut);
                }
            }
        }
        _ => child.wait().await?,
    };

    Ok(CommandOutcome::Exited(status.code()))
}
