//! `file` resource kind: read, check and update plain files.

use crate::resource::{
    Condition, ConditionOutcome, ResourceError, Source, SourceOutput, Target, TargetOutcome,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Kind-specific configuration for `file` resources.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileSpec {
    /// Path to the file, relative to the working copy.
    pub file: String,

    /// Content to compare against (condition) or to write (target).
    /// When empty the source input is used instead.
    #[serde(default)]
    pub content: String,
}

/// The `file` resource.
#[derive(Debug, Clone)]
pub struct FileResource {
    spec: FileSpec,
}

impl FileResource {
    /// Build a file resource from its raw spec value.
    pub fn from_spec(spec: &serde_yaml::Value) -> Result<Self, ResourceError> {
        let spec: FileSpec =
            serde_yaml::from_value(spec.clone()).map_err(|e| ResourceError::WrongConfig {
                kind: "file".to_string(),
                reason: e.to_string(),
            })?;
        if spec.file.is_empty() {
            return Err(ResourceError::WrongConfig {
                kind: "file".to_string(),
                reason: "missing value for parameter 'file'".to_string(),
            });
        }
        Ok(Self { spec })
    }

    fn path(&self, working_dir: &Path) -> PathBuf {
        let p = Path::new(&self.spec.file);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            working_dir.join(p)
        }
    }
}

#[async_trait]
impl Source for FileResource {
    async fn source(&self, working_dir: &Path) -> anyhow::Result<SourceOutput> {
        let path = self.path(working_dir);
        let content = tokio::fs::read_to_string(&path).await?;
        let value = content.trim().to_string();
        Ok(SourceOutput {
            description: format!("value {:?} read from file {:?}", value, self.spec.file),
            value,
        })
    }
}

#[async_trait]
impl Condition for FileResource {
    async fn condition(&self, input: &str, working_dir: &Path) -> anyhow::Result<ConditionOutcome> {
        let path = self.path(working_dir);

        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(ConditionOutcome {
                    pass: false,
                    description: format!("file {:?} does not exist", self.spec.file),
                });
            }
            Err(e) => return Err(e.into()),
        };

        let expected = if !self.spec.content.is_empty() {
            self.spec.content.as_str()
        } else {
            input
        };

        // No expected content configured: existence is enough.
        if expected.is_empty() {
            return Ok(ConditionOutcome {
                pass: true,
                description: format!("file {:?} exists", self.spec.file),
            });
        }

        if content.trim() == expected.trim() {
            Ok(ConditionOutcome {
                pass: true,
                description: format!("file {:?} matches expected content", self.spec.file),
            })
        } else {
            Ok(ConditionOutcome {
                pass: false,
                description: format!("file {:?} does not match expected content", self.spec.file),
            })
        }
    }
}

#[async_trait]
impl Target for FileResource {
    async fn target(
        &self,
        input: &str,
        working_dir: &Path,
        dry_run: bool,
    ) -> anyhow::Result<TargetOutcome> {
        let path = self.path(working_dir);

        let desired = if !self.spec.content.is_empty() {
            self.spec.content.clone()
        } else {
            input.to_string()
        };

        let current = match tokio::fs::read_to_string(&path).await {
            Ok(content) => Some(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        if current.as_deref().map(str::trim) == Some(desired.trim()) {
            debug!(file = %self.spec.file, "file already up to date");
            return Ok(TargetOutcome {
                changed: false,
                description: format!("file {:?} already up to date", self.spec.file),
                files: Vec::new(),
            });
        }

        if dry_run {
            return Ok(TargetOutcome {
                changed: true,
                description: format!("file {:?} should be updated to {:?}", self.spec.file, desired),
                files: vec![self.spec.file.clone()],
            });
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, format!("{}\n", desired.trim())).await?;

        Ok(TargetOutcome {
            changed: true,
            description: format!("file {:?} updated to {:?}", self.spec.file, desired),
            files: vec![self.spec.file.clone()],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{Condition as _, Source as _, Target as _};

    fn resource(file: &str, content: &str) -> FileResource {
        FileResource {
            spec: FileSpec {
                file: file.to_string(),
                content: content.to_string(),
            },
        }
    }

    #[test]
    fn test_from_spec_requires_file() {
        let spec: serde_yaml::Value = serde_yaml::from_str("content: 1.2.3").unwrap();
        assert!(matches!(
            FileResource::from_spec(&spec),
            Err(ResourceError::WrongConfig { .. })
        ));
    }

    #[tokio::test]
    async fn test_source_reads_trimmed_value() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("VERSION"), "1.2.3\n").unwrap();

        let out = resource("VERSION", "").source(dir.path()).await.unwrap();
        assert_eq!(out.value, "1.2.3");
    }

    #[tokio::test]
    async fn test_condition_checks_input_content() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("VERSION"), "1.2.3\n").unwrap();

        let r = resource("VERSION", "");
        assert!(r.condition("1.2.3", dir.path()).await.unwrap().pass);
        assert!(!r.condition("9.9.9", dir.path()).await.unwrap().pass);
    }

    #[tokio::test]
    async fn test_condition_fails_on_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = resource("VERSION", "").condition("", dir.path()).await.unwrap();
        assert!(!outcome.pass);
    }

    #[tokio::test]
    async fn test_target_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let r = resource("VERSION", "");

        let first = r.target("2.0.0", dir.path(), false).await.unwrap();
        assert!(first.changed);
        assert_eq!(first.files, vec!["VERSION".to_string()]);

        let second = r.target("2.0.0", dir.path(), false).await.unwrap();
        assert!(!second.changed);
        assert!(second.files.is_empty());
    }

    #[tokio::test]
    async fn test_target_dry_run_does_not_write() {
        let dir = tempfile::tempdir().unwrap();
        let r = resource("VERSION", "");

        let outcome = r.target("2.0.0", dir.path(), true).await.unwrap();
        assert!(outcome.changed);
        assert!(!dir.path().join("VERSION").exists());
    }
}
