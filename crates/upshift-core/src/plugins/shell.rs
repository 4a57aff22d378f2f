//! `shell` resource kind: delegate a stage to an arbitrary command.
//!
//! Commands run through `sh -c` inside the node's working directory. The
//! resolved source value reaches the command via the `UPSHIFT_INPUT`
//! environment variable, dry-run mode via `UPSHIFT_DRY_RUN`.

use crate::resource::{
    Condition, ConditionOutcome, ResourceError, Source, SourceOutput, Target, TargetOutcome,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

const DEFAULT_TIMEOUT_SECS: u64 = 300;

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

/// Kind-specific configuration for `shell` resources.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShellSpec {
    /// Command line passed to `sh -c`.
    pub command: String,

    /// Command timeout in seconds.
    #[serde(default = "default_timeout", rename = "timeout")]
    pub timeout_secs: u64,
}

/// The `shell` resource.
#[derive(Debug, Clone)]
pub struct ShellResource {
    spec: ShellSpec,
}

/// Captured command execution.
#[derive(Debug)]
struct ShellExecution {
    exit_code: i32,
    stdout: String,
    stderr: String,
}

impl ShellResource {
    /// Build a shell resource from its raw spec value.
    pub fn from_spec(spec: &serde_yaml::Value) -> Result<Self, ResourceError> {
        let spec: ShellSpec =
            serde_yaml::from_value(spec.clone()).map_err(|e| ResourceError::WrongConfig {
                kind: "shell".to_string(),
                reason: e.to_string(),
            })?;
        if spec.command.is_empty() {
            return Err(ResourceError::WrongConfig {
                kind: "shell".to_string(),
                reason: "missing value for parameter 'command'".to_string(),
            });
        }
        Ok(Self { spec })
    }

    async fn execute(
        &self,
        working_dir: &Path,
        input: &str,
        dry_run: bool,
    ) -> anyhow::Result<ShellExecution> {
        debug!(command = %self.spec.command, "running shell command");

        let child = Command::new("sh")
            .arg("-c")
            .arg(&self.spec.command)
            .current_dir(working_dir)
            .env("UPSHIFT_INPUT", input)
            .env("UPSHIFT_DRY_RUN", if dry_run { "true" } else { "false" })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let output = tokio::time::timeout(
            Duration::from_secs(self.spec.timeout_secs),
            child.wait_with_output(),
        )
        .await
        .map_err(|_| {
            anyhow::anyhow!(
                "command {:?} timed out after {} seconds",
                self.spec.command,
                self.spec.timeout_secs
            )
        })??;

        Ok(ShellExecution {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

#[async_trait]
impl Source for ShellResource {
    async fn source(&self, working_dir: &Path) -> anyhow::Result<SourceOutput> {
        let exec = self.execute(working_dir, "", false).await?;
        if exec.exit_code != 0 {
            anyhow::bail!(
                "command {:?} exited with code {}: {}",
                self.spec.command,
                exec.exit_code,
                exec.stderr
            );
        }
        Ok(SourceOutput {
            description: format!("value {:?} retrieved by command", exec.stdout),
            value: exec.stdout,
        })
    }
}

#[async_trait]
impl Condition for ShellResource {
    async fn condition(&self, input: &str, working_dir: &Path) -> anyhow::Result<ConditionOutcome> {
        let exec = self.execute(working_dir, input, false).await?;
        if exec.exit_code == 0 {
            Ok(ConditionOutcome {
                pass: true,
                description: format!("command {:?} passed", self.spec.command),
            })
        } else {
            Ok(ConditionOutcome {
                pass: false,
                description: format!(
                    "command {:?} exited with code {}: {}",
                    self.spec.command, exec.exit_code, exec.stderr
                ),
            })
        }
    }
}

#[async_trait]
impl Target for ShellResource {
    async fn target(
        &self,
        input: &str,
        working_dir: &Path,
        dry_run: bool,
    ) -> anyhow::Result<TargetOutcome> {
        let exec = self.execute(working_dir, input, dry_run).await?;
        if exec.exit_code != 0 {
            anyhow::bail!(
                "command {:?} exited with code {}: {}",
                self.spec.command,
                exec.exit_code,
                exec.stderr
            );
        }

        // The contract mirrors the source one: printing something on stdout
        // means the target changed (or would change) external state.
        let changed = !exec.stdout.is_empty();
        let description = if changed {
            exec.stdout.lines().next().unwrap_or_default().to_string()
        } else {
            format!("command {:?} made no change", self.spec.command)
        };

        Ok(TargetOutcome {
            changed,
            description,
            files: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{Condition as _, Source as _, Target as _};

    fn resource(command: &str) -> ShellResource {
        ShellResource {
            spec: ShellSpec {
                command: command.to_string(),
                timeout_secs: 60,
            },
        }
    }

    #[test]
    fn test_from_spec_requires_command() {
        let spec: serde_yaml::Value = serde_yaml::from_str("timeout: 10").unwrap();
        assert!(matches!(
            ShellResource::from_spec(&spec),
            Err(ResourceError::WrongConfig { .. })
        ));
    }

    #[tokio::test]
    async fn test_source_captures_trimmed_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let out = resource("printf '  1.2.3\\n'").source(dir.path()).await.unwrap();
        assert_eq!(out.value, "1.2.3");
    }

    #[tokio::test]
    async fn test_source_fails_on_nonzero_exit() {
        let dir = tempfile::tempdir().unwrap();
        assert!(resource("exit 3").source(dir.path()).await.is_err());
    }

    #[tokio::test]
    async fn test_condition_is_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        assert!(resource("true").condition("", dir.path()).await.unwrap().pass);
        assert!(!resource("false").condition("", dir.path()).await.unwrap().pass);
    }

    #[tokio::test]
    async fn test_target_receives_input_and_reports_change() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = resource("echo updated to $UPSHIFT_INPUT")
            .target("2.0.0", dir.path(), false)
            .await
            .unwrap();
        assert!(outcome.changed);
        assert_eq!(outcome.description, "updated to 2.0.0");
    }

    #[tokio::test]
    async fn test_target_silent_command_is_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = resource("true").target("", dir.path(), false).await.unwrap();
        assert!(!outcome.changed);
    }

    #[tokio::test]
    async fn test_command_timeout_errors() {
        let dir = tempfile::tempdir().unwrap();
        let r = ShellResource {
            spec: ShellSpec {
                command: "sleep 5".to_string(),
                timeout_secs: 1,
            },
        };
        assert!(r.source(dir.path()).await.is_err());
    }
}
