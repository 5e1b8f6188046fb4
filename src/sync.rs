//! Mirror a target's resource directory to remote storage after a clean run.

use std::path::Path;
use std::process::ExitStatus;
use std::str::FromStr;
use thiserror::Error;
use tracing::{error, info};

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("sync command is empty")]
    Empty,

    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("sync command exited with {0}")]
    Failed(ExitStatus),
}

/// External command such as `rclone sync {dir} remote:crawls/{target}`.
///
/// Split on whitespace; `{dir}` and `{target}` are substituted per argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncCommand {
    program: String,
    args: Vec<String>,
}

impl FromStr for SyncCommand {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split_whitespace().map(str::to_string);
        let program = parts.next().ok_or(SyncError::Empty)?;
        Ok(Self {
            program,
            args: parts.collect(),
        })
    }
}

impl SyncCommand {
    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn render_args(&self, dir: &Path, target: &str) -> Vec<String> {
        let dir = dir.display().to_string();
        self.args
            .iter()
            .map(|arg| arg.replace("{dir}", &dir).replace("{target}", target))
            .collect()
    }

    pub async fn run(&self, dir: &Path, target: &str) -> Result<(), SyncError> {
        let args = self.render_args(dir, target);
        info!(program = %self.program, ?args, "syncing resources");

        let status = tokio::process::Command::new(&self.program)
            .args(&args)
            .status()
            .await
            .map_err(|source| SyncError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !status.success() {
            return Err(SyncError::Failed(status));
        }
        info!(program = %self.program, "sync finished");
        Ok(())
    }

    /// Run and log any failure. The crawl that preceded it already succeeded,
    /// so a failed sync never changes the outcome.
    pub async fn run_logged(&self, dir: &Path, target: &str) -> bool {
        match self.run(dir, target).await {
            Ok(()) => true,
            Err(e) => {
                error!(program = %self.program, error = %e, "resource sync failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_render() {
        let command: SyncCommand = "rclone sync {dir} remote:crawls/{target}".parse().unwrap();
        assert_eq!(command.program(), "rclone");
        assert_eq!(
            command.render_args(Path::new("/data/nexus"), "nexus"),
            vec!["sync", "/data/nexus", "remote:crawls/nexus"]
        );
    }

    #[test]
    fn test_empty_command_rejected() {
        assert!(matches!("   ".parse::<SyncCommand>(), Err(SyncError::Empty)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_successful_command() {
        let dir = tempfile::TempDir::new().unwrap();
        let marker = dir.path().join("synced");
        let command: SyncCommand = format!("touch {}", marker.display()).parse().unwrap();

        command.run(dir.path(), "nexus").await.unwrap();
        assert!(marker.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_zero_exit_is_reported_not_fatal() {
        let command: SyncCommand = "false".parse().unwrap();
        assert!(matches!(
            command.run(Path::new("."), "nexus").await,
            Err(SyncError::Failed(_))
        ));
        assert!(!command.run_logged(Path::new("."), "nexus").await);
    }

    #[tokio::test]
    async fn test_missing_program() {
        let command: SyncCommand = "crawl-scout-no-such-program-x".parse().unwrap();
        assert!(matches!(
            command.run(Path::new("."), "nexus").await,
            Err(SyncError::Spawn { .. })
        ));
    }
}
