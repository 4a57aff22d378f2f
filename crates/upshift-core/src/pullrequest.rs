//! Pull-request reconciliation: one review request per target group.
//!
//! Targets sharing a pull-request configuration form a group. After the
//! targets stage, each group is collapsed into at most one create or update
//! call against the review system. The `shell` backend delegates those
//! calls to configured commands (e.g. a `gh pr` wrapper), keeping forge API
//! clients out of the orchestration core.

use crate::manifest::PullRequestConfig;
use crate::pipeline::Pipeline;
use crate::result::ResourceResult;
use crate::scm::Scm;
use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, error, info};

/// Errors raised while building a pull-request handler.
#[derive(Debug, thiserror::Error)]
pub enum PullRequestError {
    #[error("pullrequest of kind {0:?} is not supported")]
    UnsupportedKind(String),

    #[error("pullrequest of kind {pr_kind:?} is not compatible with scm of kind {scm_kind:?}")]
    IncompatibleScm { pr_kind: String, scm_kind: String },

    #[error("wrong pullrequest configuration: {0}")]
    WrongConfig(String),
}

/// Review-system operations consumed by the reconciler.
#[async_trait]
pub trait PullRequestHandler: Send + Sync {
    /// Open a new review request.
    async fn create_pull_request(
        &self,
        title: &str,
        changelog: &str,
        report: &str,
    ) -> anyhow::Result<()>;

    /// Refresh an existing review request.
    async fn update_pull_request(&self, id: &str) -> anyhow::Result<()>;

    /// Identifier of the open review request for this branch, if any.
    async fn is_pull_request(&self) -> anyhow::Result<Option<String>>;
}

/// Build the handler for a pull-request configuration.
pub fn new_pullrequest(
    config: &PullRequestConfig,
    scm: &Scm,
) -> Result<Box<dyn PullRequestHandler>, PullRequestError> {
    match config.kind.as_str() {
        "shell" => Ok(Box::new(ShellPullRequest::from_spec(&config.spec, scm)?)),
        other => Err(PullRequestError::UnsupportedKind(other.to_string())),
    }
}

/// Whether a pull-request kind can drive review requests for an SCM kind.
pub fn compatible(pr_kind: &str, scm_kind: &str) -> bool {
    pr_kind == "shell" || pr_kind == scm_kind
}

const DEFAULT_TIMEOUT_SECS: u64 = 120;

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

/// Kind-specific configuration for the `shell` pull-request backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShellPullRequestSpec {
    /// Command opening a review request.
    #[serde(rename = "createcommand")]
    pub create_command: String,

    /// Command refreshing an existing review request.
    #[serde(default, rename = "updatecommand")]
    pub update_command: String,

    /// Command printing the open review-request identifier, empty output
    /// meaning none.
    #[serde(default, rename = "querycommand")]
    pub query_command: String,

    /// Command timeout in seconds.
    #[serde(default = "default_timeout", rename = "timeout")]
    pub timeout_secs: u64,
}

/// Pull-request backend delegating to configured commands.
///
/// The commands receive the request content through `UPSHIFT_PR_*`
/// environment variables and run inside the SCM working copy.
pub struct ShellPullRequest {
    spec: ShellPullRequestSpec,
    scm: Scm,
}

impl ShellPullRequest {
    /// Build the backend from its raw spec value.
    pub fn from_spec(spec: &serde_yaml::Value, scm: &Scm) -> Result<Self, PullRequestError> {
        let spec: ShellPullRequestSpec = serde_yaml::from_value(spec.clone())
            .map_err(|e| PullRequestError::WrongConfig(e.to_string()))?;
        if spec.create_command.is_empty() {
            return Err(PullRequestError::WrongConfig(
                "missing value for parameter 'createcommand'".to_string(),
            ));
        }
        Ok(Self {
            spec,
            scm: scm.clone(),
        })
    }

    async fn run(&self, command: &str, envs: &[(&str, &str)]) -> anyhow::Result<String> {
        let branches = self.scm.handler.get_branches();
        let child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(self.scm.handler.get_directory())
            .env("UPSHIFT_PR_URL", self.scm.handler.get_url())
            .env("UPSHIFT_PR_BRANCH", &branches.working)
            .env("UPSHIFT_PR_TARGET_BRANCH", &branches.target)
            .envs(envs.iter().copied())
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
                command,
                self.spec.timeout_secs
            )
        })??;

        if !output.status.success() {
            anyhow::bail!(
                "command {:?} exited with code {}: {}",
                command,
                output.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl PullRequestHandler for ShellPullRequest {
    async fn create_pull_request(
        &self,
        title: &str,
        changelog: &str,
        report: &str,
    ) -> anyhow::Result<()> {
        self.run(
            &self.spec.create_command,
            &[
                ("UPSHIFT_PR_TITLE", title),
                ("UPSHIFT_PR_CHANGELOG", changelog),
                ("UPSHIFT_PR_REPORT", report),
            ],
        )
        .await?;
        Ok(())
    }

    async fn update_pull_request(&self, id: &str) -> anyhow::Result<()> {
        if self.spec.update_command.is_empty() {
            debug!(id, "no update command configured, leaving review request as is");
            return Ok(());
        }
        self.run(&self.spec.update_command, &[("UPSHIFT_PR_ID", id)])
            .await?;
        Ok(())
    }

    async fn is_pull_request(&self) -> anyhow::Result<Option<String>> {
        if self.spec.query_command.is_empty() {
            return Ok(None);
        }
        let id = self.run(&self.spec.query_command, &[]).await?;
        if id.is_empty() {
            Ok(None)
        } else {
            Ok(Some(id))
        }
    }
}

impl Pipeline {
    /// Reconcile every pull-request group after the targets stage.
    pub async fn run_pull_requests(&mut self) -> anyhow::Result<()> {
        let configs = self.rendered_pullrequests();
        if configs.is_empty() {
            return Ok(());
        }
        if self.targets.is_empty() {
            debug!(pipeline = %self.name, "no target, skipping pull requests");
            return Ok(());
        }

        for (id, config) in &configs {
            self.run_pull_request(id, config)
                .await
                .with_context(|| format!("pullrequest {:?}", id))?;
        }
        Ok(())
    }

    async fn run_pull_request(
        &mut self,
        id: &str,
        config: &PullRequestConfig,
    ) -> anyhow::Result<()> {
        let scm = self
            .scms
            .get(&config.scm_id)
            .ok_or_else(|| anyhow::anyhow!("scm id {:?} couldn't be found", config.scm_id))?
            .clone();

        if !compatible(&config.kind, &scm.config.kind) {
            return Err(PullRequestError::IncompatibleScm {
                pr_kind: config.kind.clone(),
                scm_kind: scm.config.kind.clone(),
            }
            .into());
        }

        let (failed, attention, success, skipped) = self.targets_by_result(&config.targets);

        // An incomplete group must not produce an incomplete review
        // request: skip the whole group, loudly.
        if !skipped.is_empty() {
            error!(
                pullrequest = id,
                "{} target(s) ({}) skipped, not reconciling an incomplete review request",
                skipped.len(),
                skipped.join(",")
            );
            return Ok(());
        }

        if !failed.is_empty() {
            error!(
                pullrequest = id,
                "{} target(s) ({}) failed",
                failed.len(),
                failed.join(",")
            );
        }

        let title = self.pullrequest_title(config);
        let changelog = self.aggregate_changelog(&attention, &success);
        let body = format!(
            "{}\n{}\n{}",
            self.report.render("sources"),
            self.report.render("conditions"),
            self.report.render("targets")
        );

        if self.options.dry_run {
            info!(
                pullrequest = id,
                "[dry run] a review request would be reconciled with title {:?}\n{}\n{}",
                title,
                changelog,
                body
            );
            return Ok(());
        }

        let handler = new_pullrequest(config, &scm)?;

        match handler.is_pull_request().await? {
            Some(existing) => {
                // Keep description and metadata current even when nothing
                // changed this run.
                info!(pullrequest = id, existing = %existing, "updating review request");
                handler.update_pull_request(&existing).await?;
            }
            None if !attention.is_empty() => {
                info!(pullrequest = id, title = %title, "opening review request");
                handler.create_pull_request(&title, &changelog, &body).await?;
            }
            None => {
                debug!(pullrequest = id, "nothing changed, no review request needed");
            }
        }

        Ok(())
    }

    /// Partition member targets by result, preserving declaration order.
    fn targets_by_result(
        &self,
        target_ids: &[String],
    ) -> (Vec<String>, Vec<String>, Vec<String>, Vec<String>) {
        let mut failed = Vec::new();
        let mut attention = Vec::new();
        let mut success = Vec::new();
        let mut skipped = Vec::new();

        for id in target_ids {
            let Some(target) = self.targets.get(id) else {
                // Unresolved entities never pass silently.
                failed.push(id.clone());
                continue;
            };
            match target.result {
                ResourceResult::Failure => failed.push(id.clone()),
                ResourceResult::Attention => attention.push(id.clone()),
                ResourceResult::Success => success.push(id.clone()),
                ResourceResult::Skipped => skipped.push(id.clone()),
            }
        }

        (failed, attention, success, skipped)
    }

    /// Explicit title, or one derived from the first member target.
    fn pullrequest_title(&self, config: &PullRequestConfig) -> String {
        if !config.title.is_empty() {
            return config.title.clone();
        }

        for target_id in &config.targets {
            if let Some(target) = self.targets.get(target_id) {
                if !target.config.resource.name.is_empty() {
                    return target.config.resource.name.clone();
                }
                if !target.description.is_empty() {
                    return target.description.clone();
                }
            }
        }
        self.name.clone()
    }

    /// Concatenate each unique contributing source's changelog, in member
    /// declaration order.
    fn aggregate_changelog(&self, attention: &[String], success: &[String]) -> String {
        let mut changelog = String::new();
        let mut processed: Vec<&str> = Vec::new();

        for target_id in attention.iter().chain(success.iter()) {
            let Some(target) = self.targets.get(target_id) else {
                continue;
            };
            let source_id = target.config.source_id.as_str();
            if source_id.is_empty() || processed.contains(&source_id) {
                continue;
            }
            processed.push(source_id);

            if let Some(source) = self.sources.get(source_id) {
                if !source.changelog.is_empty() {
                    changelog.push_str(&source.changelog);
                    changelog.push('\n');
                }
            }
        }

        changelog
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scm::ScmConfig;

    fn git_scm(dir: &std::path::Path) -> Scm {
        let spec: serde_yaml::Value = serde_yaml::from_str(&format!(
            "url: https://example.com/repo.git\ndirectory: {}",
            dir.display()
        ))
        .unwrap();
        let config = ScmConfig {
            kind: "git".to_string(),
            spec,
            disabled: false,
        };
        Scm::new(&config, "test").unwrap().unwrap()
    }

    fn shell_pr(dir: &std::path::Path, create: &str, query: &str) -> ShellPullRequest {
        ShellPullRequest {
            spec: ShellPullRequestSpec {
                create_command: create.to_string(),
                update_command: String::new(),
                query_command: query.to_string(),
                timeout_secs: 60,
            },
            scm: git_scm(dir),
        }
    }

    #[test]
    fn test_compatibility_matrix() {
        assert!(compatible("shell", "git"));
        assert!(compatible("github", "github"));
        assert!(!compatible("github", "git"));
    }

    #[test]
    fn test_from_spec_requires_create_command() {
        let dir = tempfile::tempdir().unwrap();
        let spec: serde_yaml::Value = serde_yaml::from_str("querycommand: echo 1").unwrap();
        assert!(matches!(
            ShellPullRequest::from_spec(&spec, &git_scm(dir.path())),
            Err(PullRequestError::WrongConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_query_empty_output_means_no_pull_request() {
        let dir = tempfile::tempdir().unwrap();
        let pr = shell_pr(dir.path(), "true", "true");
        assert_eq!(pr.is_pull_request().await.unwrap(), None);

        let pr = shell_pr(dir.path(), "true", "echo 42");
        assert_eq!(pr.is_pull_request().await.unwrap(), Some("42".to_string()));
    }

    #[tokio::test]
    async fn test_create_receives_content_via_environment() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("created");
        let pr = shell_pr(
            dir.path(),
            &format!("echo \"$UPSHIFT_PR_TITLE\" > {}", out.display()),
            "",
        );
        pr.create_pull_request("Bump nginx to 1.25.3", "changelog", "report")
            .await
            .unwrap();
        let content = std::fs::read_to_string(&out).unwrap();
        assert_eq!(content.trim(), "Bump nginx to 1.25.3");
    }

    #[tokio::test]
    async fn test_update_without_command_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let pr = shell_pr(dir.path(), "true", "");
        pr.update_pull_request("42").await.unwrap();
    }
}
