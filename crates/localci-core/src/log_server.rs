//! Copying per-revision log directories to a remote log server.

use crate::config::LogServerConfig;
use crate::error::{CiError, Result};
use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, info};

/// Destination for finished test logs.
#[async_trait]
pub trait LogShipper: Send + Sync + std::fmt::Debug {
    /// Copy `local_dir` recursively to the log server.
    async fn copy(&self, local_dir: &Path) -> Result<()>;
}

/// Ships logs with `scp -r`.
#[derive(Debug, Clone)]
pub struct ScpLogShipper {
    target: String,
}

impl ScpLogShipper {
    pub fn new(server: &LogServerConfig) -> Self {
        Self {
            target: format!("{}@{}:{}", server.user, server.ip, server.dir),
        }
    }

    /// `user@ip:dir` passed to scp.
    pub fn target(&self) -> &str {
        &self.target
    }

    fn command(&self, local_dir: &Path) -> Command {
        let mut cmd = Command::new("scp");
        cmd.arg("-r")
            .args(["-o", "StrictHostKeyChecking=no"])
            .arg(local_dir)
            .arg(&self.target)
            .stdin(std::process::Stdio::null());
        cmd
    }
}

#[async_trait]
impl LogShipper for ScpLogShipper {
    async fn copy(&self, local_dir: &Path) -> Result<()> {
        debug!(dir = %local_dir.display(), target = %self.target, "Copying logs");
        let output = self
            .command(local_dir)
            .output()
            .await
            .map_err(|e| CiError::LogShipping(format!("failed to run scp: {e}")))?;

        if !output.status.success() {
            return Err(CiError::LogShipping(format!(
                "scp to {} failed: {}",
                self.target,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        info!(dir = %local_dir.display(), target = %self.target, "Logs copied");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server() -> LogServerConfig {
        LogServerConfig {
            ip: "10.0.0.5".to_string(),
            user: "logs".to_string(),
            dir: "/srv/localci".to_string(),
        }
    }

    #[test]
    fn test_target_format() {
        let shipper = ScpLogShipper::new(&server());
        assert_eq!(shipper.target(), "logs@10.0.0.5:/srv/localci");
    }

    #[test]
    fn test_command_arguments() {
        let shipper = ScpLogShipper::new(&server());
        let cmd = shipper.command(Path::new("/var/log/localci/pr-3"));
        let std_cmd = cmd.as_std();
        let args: Vec<_> = std_cmd
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();

        assert_eq!(std_cmd.get_program(), "scp");
        assert_eq!(
            args,
            vec![
                "-r",
                "-o",
                "StrictHostKeyChecking=no",
                "/var/log/localci/pr-3",
                "logs@10.0.0.5:/srv/localci",
            ]
        );
    }
}
