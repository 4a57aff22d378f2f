//! Git SCM handler shelling out to the `git` binary.

use super::{scm_digest, Branches, ScmError, ScmHandler};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::debug;

/// Kind-specific configuration for the `git` SCM.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GitSpec {
    /// Remote repository URL (or local path).
    pub url: String,

    /// Branch to clone and merge into.
    #[serde(default)]
    pub branch: String,

    /// Working-copy directory. Derived from the URL+branch digest under the
    /// system temp directory when unset.
    #[serde(default)]
    pub directory: String,

    /// Commit author name.
    #[serde(default)]
    pub user: String,

    /// Commit author email.
    #[serde(default)]
    pub email: String,

    /// Commit to an isolated `upshift_<pipelineid>` branch instead of the
    /// base branch, so review requests have a head branch of their own.
    #[serde(default, rename = "workingbranch")]
    pub working_branch: bool,
}

/// Git working-copy handler.
#[derive(Debug, Clone)]
pub struct GitScm {
    url: String,
    source_branch: String,
    working_branch: String,
    directory: PathBuf,
    user: String,
    email: String,
}

impl GitScm {
    /// Build a handler from the raw spec value.
    pub fn new(spec: &serde_yaml::Value, pipeline_id: &str) -> Result<Self, ScmError> {
        let spec: GitSpec = serde_yaml::from_value(spec.clone())
            .map_err(|e| ScmError::WrongConfig(e.to_string()))?;

        if spec.url.is_empty() {
            return Err(ScmError::WrongConfig(
                "missing value for parameter 'url'".to_string(),
            ));
        }

        let source_branch = if spec.branch.is_empty() {
            "main".to_string()
        } else {
            spec.branch
        };

        let working_branch = if spec.working_branch {
            if pipeline_id.is_empty() {
                "upshift".to_string()
            } else {
                format!("upshift_{}", pipeline_id)
            }
        } else {
            source_branch.clone()
        };

        let directory = if spec.directory.is_empty() {
            let digest = scm_digest(&spec.url, &source_branch, "");
            std::env::temp_dir().join("upshift").join(&digest[..12])
        } else {
            PathBuf::from(spec.directory)
        };

        Ok(Self {
            url: spec.url,
            source_branch,
            working_branch,
            directory,
            user: if spec.user.is_empty() {
                "upshift".to_string()
            } else {
                spec.user
            },
            email: if spec.email.is_empty() {
                "upshift@localhost".to_string()
            } else {
                spec.email
            },
        })
    }

    async fn git(&self, args: &[&str], in_working_copy: bool) -> Result<String, ScmError> {
        let mut cmd = Command::new("git");
        if in_working_copy {
            cmd.current_dir(&self.directory);
        }
        let output = cmd
            .args(args)
            .output()
            .await
            .map_err(|e| ScmError::Git(format!("failed to run git: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ScmError::Git(format!(
                "git {} failed: {}",
                args.join(" "),
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn git_ok(&self, args: &[&str]) -> bool {
        Command::new("git")
            .args(args)
            .current_dir(&self.directory)
            .output()
            .await
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    async fn local_branch_exists(&self, branch: &str) -> bool {
        self.git_ok(&["rev-parse", "--verify", "--quiet", branch]).await
    }

    async fn remote_branch_exists(&self, branch: &str) -> bool {
        self.git_ok(&[
            "rev-parse",
            "--verify",
            "--quiet",
            &format!("origin/{}", branch),
        ])
        .await
    }
}

#[async_trait]
impl ScmHandler for GitScm {
    async fn clone_repository(&self) -> Result<PathBuf, ScmError> {
        if self.directory.join(".git").exists() {
            debug!(directory = %self.directory.display(), "refreshing existing working copy");
            self.git(&["fetch", "origin", "--prune"], true).await?;
            return Ok(self.directory.clone());
        }

        if let Some(parent) = self.directory.parent() {
            std::fs::create_dir_all(parent)?;
        }

        debug!(url = %self.url, directory = %self.directory.display(), "cloning repository");
        self.git(
            &["clone", &self.url, &self.directory.to_string_lossy()],
            false,
        )
        .await?;

        // The requested base branch may differ from the remote default.
        if !self.local_branch_exists(&self.source_branch).await {
            if self.remote_branch_exists(&self.source_branch).await {
                self.git(&["checkout", &self.source_branch], true).await?;
            } else {
                self.git(&["checkout", "-b", &self.source_branch], true).await?;
            }
        }

        Ok(self.directory.clone())
    }

    async fn checkout(&self) -> Result<(), ScmError> {
        if self.local_branch_exists(&self.working_branch).await {
            self.git(&["checkout", &self.working_branch], true).await?;
            return Ok(());
        }

        self.git(&["checkout", &self.source_branch], true).await?;
        if self.working_branch != self.source_branch {
            self.git(&["checkout", "-b", &self.working_branch], true).await?;
        }
        Ok(())
    }

    async fn add(&self, files: &[String]) -> Result<(), ScmError> {
        if files.is_empty() {
            return Ok(());
        }
        let mut args = vec!["add", "--"];
        args.extend(files.iter().map(String::as_str));
        self.git(&args, true).await?;
        Ok(())
    }

    async fn commit(&self, message: &str) -> Result<(), ScmError> {
        // Clean index: nothing to commit, not an error.
        if self.git_ok(&["diff", "--cached", "--quiet"]).await {
            debug!("no staged change to commit");
            return Ok(());
        }

        let user = format!("user.name={}", self.user);
        let email = format!("user.email={}", self.email);
        self.git(&["-c", &user, "-c", &email, "commit", "-m", message], true)
            .await?;
        Ok(())
    }

    async fn push(&self) -> Result<bool, ScmError> {
        self.git(&["push", "-u", "origin", &self.working_branch], true)
            .await?;
        Ok(true)
    }

    async fn is_remote_branch_up_to_date(&self) -> Result<bool, ScmError> {
        if !self.local_branch_exists(&self.working_branch).await {
            // Nothing committed locally, nothing to push.
            return Ok(true);
        }

        self.git(&["fetch", "origin"], true).await?;

        if !self.remote_branch_exists(&self.working_branch).await {
            return Ok(false);
        }

        let range = format!("origin/{0}..{0}", self.working_branch);
        let ahead = self.git(&["rev-list", "--count", &range], true).await?;
        Ok(ahead == "0")
    }

    fn get_directory(&self) -> PathBuf {
        self.directory.clone()
    }

    fn get_url(&self) -> String {
        self.url.clone()
    }

    fn get_branches(&self) -> Branches {
        Branches {
            source: self.source_branch.clone(),
            working: self.working_branch.clone(),
            target: self.source_branch.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command as StdCommand;

    fn run_git(dir: &Path, args: &[&str]) {
        let output = StdCommand::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .unwrap();
        assert!(
            output.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
    }

    /// Bare remote seeded with one commit on `main`.
    fn make_remote() -> tempfile::TempDir {
        let remote = tempfile::tempdir().unwrap();
        run_git(remote.path(), &["init", "--bare", "--initial-branch=main", "."]);

        let seed = tempfile::tempdir().unwrap();
        run_git(seed.path(), &["init", "--initial-branch=main", "."]);
        run_git(seed.path(), &["config", "user.name", "seed"]);
        run_git(seed.path(), &["config", "user.email", "seed@example.com"]);
        std::fs::write(seed.path().join("VERSION"), "1.0.0\n").unwrap();
        run_git(seed.path(), &["add", "VERSION"]);
        run_git(seed.path(), &["commit", "-m", "initial"]);
        run_git(
            seed.path(),
            &["remote", "add", "origin", &remote.path().to_string_lossy()],
        );
        run_git(seed.path(), &["push", "-u", "origin", "main"]);

        remote
    }

    fn make_scm(remote: &Path, workdir: &Path, working_branch: bool) -> GitScm {
        let spec = serde_yaml::to_value(GitSpec {
            url: remote.to_string_lossy().to_string(),
            branch: "main".to_string(),
            directory: workdir.to_string_lossy().to_string(),
            user: "tester".to_string(),
            email: "tester@example.com".to_string(),
            working_branch,
        })
        .unwrap();
        GitScm::new(&spec, "pipeline-1").unwrap()
    }

    #[test]
    fn test_new_requires_url() {
        let spec: serde_yaml::Value = serde_yaml::from_str("branch: main").unwrap();
        assert!(matches!(
            GitScm::new(&spec, ""),
            Err(ScmError::WrongConfig(_))
        ));
    }

    #[test]
    fn test_working_branch_derives_from_pipeline_id() {
        let spec: serde_yaml::Value =
            serde_yaml::from_str("url: https://example.com/repo.git\nworkingbranch: true").unwrap();
        let scm = GitScm::new(&spec, "nginx").unwrap();
        let branches = scm.get_branches();
        assert_eq!(branches.source, "main");
        assert_eq!(branches.working, "upshift_nginx");
        assert_eq!(branches.target, "main");
    }

    #[tokio::test]
    async fn test_clone_commit_push_round_trip() {
        let remote = make_remote();
        let workdir = tempfile::tempdir().unwrap();
        let scm = make_scm(remote.path(), &workdir.path().join("copy"), false);

        let dir = scm.clone_repository().await.unwrap();
        assert!(dir.join("VERSION").exists());

        scm.checkout().await.unwrap();
        assert!(scm.is_remote_branch_up_to_date().await.unwrap());

        std::fs::write(dir.join("VERSION"), "2.0.0\n").unwrap();
        scm.add(&["VERSION".to_string()]).await.unwrap();
        scm.commit("bump VERSION to 2.0.0").await.unwrap();
        assert!(!scm.is_remote_branch_up_to_date().await.unwrap());

        assert!(scm.push().await.unwrap());
        assert!(scm.is_remote_branch_up_to_date().await.unwrap());
    }

    #[tokio::test]
    async fn test_checkout_creates_isolated_working_branch() {
        let remote = make_remote();
        let workdir = tempfile::tempdir().unwrap();
        let scm = make_scm(remote.path(), &workdir.path().join("copy"), true);

        scm.clone_repository().await.unwrap();
        scm.checkout().await.unwrap();

        let head = scm.git(&["rev-parse", "--abbrev-ref", "HEAD"], true).await.unwrap();
        assert_eq!(head, "upshift_pipeline-1");

        // The isolated branch has no remote counterpart yet, so it counts
        // as needing a push.
        assert!(!scm.is_remote_branch_up_to_date().await.unwrap());
    }

    #[tokio::test]
    async fn test_commit_with_clean_index_is_a_noop() {
        let remote = make_remote();
        let workdir = tempfile::tempdir().unwrap();
        let scm = make_scm(remote.path(), &workdir.path().join("copy"), false);

        scm.clone_repository().await.unwrap();
        scm.checkout().await.unwrap();
        scm.commit("nothing to do").await.unwrap();
        assert!(scm.is_remote_branch_up_to_date().await.unwrap());
    }

    #[tokio::test]
    async fn test_clone_twice_refreshes_instead_of_failing() {
        let remote = make_remote();
        let workdir = tempfile::tempdir().unwrap();
        let scm = make_scm(remote.path(), &workdir.path().join("copy"), false);

        scm.clone_repository().await.unwrap();
        scm.clone_repository().await.unwrap();
    }
}
