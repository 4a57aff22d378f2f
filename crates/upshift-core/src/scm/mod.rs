//! Source-control abstraction: configuration, handler interface and the
//! deduplication digest shared by the clone manager and push reconciler.

pub mod git;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::Arc;

/// Errors raised by SCM configuration or git plumbing.
#[derive(Debug, thiserror::Error)]
pub enum ScmError {
    #[error("wrong scm configuration: {0}")]
    WrongConfig(String),

    #[error("scm of kind {0:?} is not supported")]
    UnsupportedKind(String),

    #[error("git error: {0}")]
    Git(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// SCM configuration as declared in a manifest.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScmConfig {
    /// SCM kind, currently only `git`.
    #[serde(default)]
    pub kind: String,

    /// Kind-specific configuration.
    #[serde(default)]
    pub spec: serde_yaml::Value,

    /// Disable this SCM without removing its configuration.
    #[serde(default)]
    pub disabled: bool,
}

impl ScmConfig {
    /// Validate mandatory parameters.
    pub fn validate(&self) -> Result<(), ScmError> {
        if self.disabled {
            return Ok(());
        }
        if self.kind.is_empty() {
            return Err(ScmError::WrongConfig(
                "missing value for parameter 'kind'".to_string(),
            ));
        }
        Ok(())
    }
}

/// Branch triple of a working copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Branches {
    /// Branch the working copy is cloned from.
    pub source: String,
    /// Branch commits land on.
    pub working: String,
    /// Branch review requests merge into.
    pub target: String,
}

/// Common operations of a source-control manager.
#[async_trait]
pub trait ScmHandler: Send + Sync {
    /// Retrieve the working copy, cloning or refreshing as needed. Returns
    /// the working-copy directory.
    async fn clone_repository(&self) -> Result<PathBuf, ScmError>;

    /// Switch the working copy to the working branch, creating it if
    /// needed.
    async fn checkout(&self) -> Result<(), ScmError>;

    /// Stage files for the next commit.
    async fn add(&self, files: &[String]) -> Result<(), ScmError>;

    /// Commit staged files. A clean index is not an error.
    async fn commit(&self, message: &str) -> Result<(), ScmError>;

    /// Push the working branch to the remote. Returns whether anything was
    /// pushed.
    async fn push(&self) -> Result<bool, ScmError>;

    /// Whether the remote working branch already contains every local
    /// commit.
    async fn is_remote_branch_up_to_date(&self) -> Result<bool, ScmError>;

    /// Local working-copy directory.
    fn get_directory(&self) -> PathBuf;

    /// Remote URL.
    fn get_url(&self) -> String;

    /// Branch triple.
    fn get_branches(&self) -> Branches;

    /// One-line identification used in log lines.
    fn summary(&self) -> String {
        format!("{} ({})", self.get_url(), self.get_branches().working)
    }
}

/// One SCM handle owned by a pipeline: configuration plus the kind-specific
/// handler behind it.
#[derive(Clone)]
pub struct Scm {
    pub config: ScmConfig,
    pub handler: Arc<dyn ScmHandler>,
}

impl std::fmt::Debug for Scm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scm")
            .field("kind", &self.config.kind)
            .field("url", &self.handler.get_url())
            .finish()
    }
}

impl Scm {
    /// Build the handler for a configuration. Returns `None` when the SCM
    /// is disabled.
    pub fn new(config: &ScmConfig, pipeline_id: &str) -> Result<Option<Scm>, ScmError> {
        config.validate()?;
        if config.disabled {
            return Ok(None);
        }

        let handler: Arc<dyn ScmHandler> = match config.kind.as_str() {
            "git" => Arc::new(git::GitScm::new(&config.spec, pipeline_id)?),
            other => return Err(ScmError::UnsupportedKind(other.to_string())),
        };

        Ok(Some(Scm {
            config: config.clone(),
            handler,
        }))
    }

    /// Content digest identifying one distinct (URL, branch, directory)
    /// combination across all pipelines.
    ///
    /// The serialization is explicit and versioned so the key stays stable
    /// regardless of configuration field layout.
    pub fn digest(&self) -> String {
        let branches = self.handler.get_branches();
        scm_digest(
            &self.handler.get_url(),
            &branches.working,
            &self.handler.get_directory().to_string_lossy(),
        )
    }
}

/// Digest of the versioned `url|branch|directory` serialization.
pub fn scm_digest(url: &str, branch: &str, directory: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("v1|{}|{}|{}", url, branch, directory).as_bytes());
    hex::encode(hasher.finalize())
}
