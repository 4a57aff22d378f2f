//! Resource plugin interfaces and the kind registry.
//!
//! Stage nodes carry a `kind` tag; the registry maps it to a concrete
//! implementation of the [`Source`], [`Condition`] or [`Target`] capability.
//! The orchestration core only ever talks to these traits, keeping the
//! plugin surface decoupled from the executor.

use crate::plugins::file::FileResource;
use crate::plugins::shell::ShellResource;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration shared by every stage node, regardless of kind.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// Human-readable name, defaults to the node identifier.
    #[serde(default)]
    pub name: String,

    /// Resource kind tag, e.g. `file` or `shell`.
    #[serde(default)]
    pub kind: String,

    /// Raw `(kind#)id(:operator)` dependency references.
    #[serde(default, rename = "dependson")]
    pub depends_on: Vec<String>,

    /// Identifier of the SCM working copy this node operates in.
    #[serde(default, rename = "scmid")]
    pub scm_id: String,

    /// Kind-specific configuration, opaque to the orchestration core.
    #[serde(default)]
    pub spec: serde_yaml::Value,
}

/// Errors raised while constructing a resource from its configuration.
#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    #[error("resource of kind {0:?} is not supported")]
    UnsupportedKind(String),

    #[error("wrong {kind} configuration: {reason}")]
    WrongConfig { kind: String, reason: String },
}

/// Value produced by a source run.
#[derive(Debug, Clone, Default)]
pub struct SourceOutput {
    /// Retrieved value, consumed by downstream conditions and targets.
    pub value: String,
    /// One-line description for the report.
    pub description: String,
}

/// Verdict produced by a condition run.
#[derive(Debug, Clone, Default)]
pub struct ConditionOutcome {
    pub pass: bool,
    pub description: String,
}

/// Effect of a target run.
#[derive(Debug, Clone, Default)]
pub struct TargetOutcome {
    /// Whether external state was (or would be, in dry-run) modified.
    pub changed: bool,
    pub description: String,
    /// Paths touched inside the working copy, staged for commit.
    pub files: Vec<String>,
}

/// A place a value is read from.
#[async_trait]
pub trait Source: Send + Sync {
    /// Retrieve the value, executing inside `working_dir`.
    async fn source(&self, working_dir: &Path) -> anyhow::Result<SourceOutput>;

    /// Changelog attached to the retrieved value, empty when the kind has
    /// none.
    fn changelog(&self) -> String {
        String::new()
    }
}

/// A predicate gating pipeline execution.
#[async_trait]
pub trait Condition: Send + Sync {
    /// Evaluate the predicate. `input` is the resolved source value, empty
    /// when source input is disabled.
    async fn condition(&self, input: &str, working_dir: &Path) -> anyhow::Result<ConditionOutcome>;
}

/// A file or resource to update.
#[async_trait]
pub trait Target: Send + Sync {
    /// Apply the update. In dry-run mode the outcome reports what would
    /// change without touching anything.
    async fn target(
        &self,
        input: &str,
        working_dir: &Path,
        dry_run: bool,
    ) -> anyhow::Result<TargetOutcome>;
}

/// Instantiate the source implementation for a node configuration.
pub fn new_source(config: &ResourceConfig) -> Result<Box<dyn Source>, ResourceError> {
    match config.kind.as_str() {
        "file" => Ok(Box::new(FileResource::from_spec(&config.spec)?)),
        "shell" => Ok(Box::new(ShellResource::from_spec(&config.spec)?)),
        other => Err(ResourceError::UnsupportedKind(other.to_string())),
    }
}

/// Instantiate the condition implementation for a node configuration.
pub fn new_condition(config: &ResourceConfig) -> Result<Box<dyn Condition>, ResourceError> {
    match config.kind.as_str() {
        "file" => Ok(Box::new(FileResource::from_spec(&config.spec)?)),
        "shell" => Ok(Box::new(ShellResource::from_spec(&config.spec)?)),
        other => Err(ResourceError::UnsupportedKind(other.to_string())),
    }
}

/// Instantiate the target implementation for a node configuration.
pub fn new_target(config: &ResourceConfig) -> Result<Box<dyn Target>, ResourceError> {
    match config.kind.as_str() {
        "file" => Ok(Box::new(FileResource::from_spec(&config.spec)?)),
        "shell" => Ok(Box::new(ShellResource::from_spec(&config.spec)?)),
        other => Err(ResourceError::UnsupportedKind(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(kind: &str, spec: serde_yaml::Value) -> ResourceConfig {
        ResourceConfig {
            kind: kind.to_string(),
            spec,
            ..Default::default()
        }
    }

    #[test]
    fn test_registry_rejects_unknown_kind() {
        let cfg = config("carrier-pigeon", serde_yaml::Value::Null);
        assert!(matches!(
            new_source(&cfg),
            Err(ResourceError::UnsupportedKind(_))
        ));
        assert!(matches!(
            new_condition(&cfg),
            Err(ResourceError::UnsupportedKind(_))
        ));
        assert!(matches!(
            new_target(&cfg),
            Err(ResourceError::UnsupportedKind(_))
        ));
    }

    #[test]
    fn test_registry_builds_builtin_kinds() {
        let file_spec: serde_yaml::Value = serde_yaml::from_str("file: VERSION").unwrap();
        assert!(new_source(&config("file", file_spec)).is_ok());

        let shell_spec: serde_yaml::Value = serde_yaml::from_str("command: echo ok").unwrap();
        assert!(new_target(&config("shell", shell_spec)).is_ok());
    }

    #[test]
    fn test_resource_config_yaml_aliases() {
        let cfg: ResourceConfig = serde_yaml::from_str(
            r#"
name: Update compose file
kind: file
dependson:
  - "othertarget:or"
scmid: default
spec:
  file: docker-compose.yaml
"#,
        )
        .unwrap();
        assert_eq!(cfg.kind, "file");
        assert_eq!(cfg.depends_on, vec!["othertarget:or".to_string()]);
        assert_eq!(cfg.scm_id, "default");
    }
}
