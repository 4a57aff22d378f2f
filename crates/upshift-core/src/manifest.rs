//! Manifest model, validation and `{{ source "id" }}` rendering.
//!
//! A manifest is one YAML document declaring sources, conditions, targets,
//! SCM working copies and pull requests. The engine loads one pipeline per
//! manifest. Rendering is re-applied between stage runs so later stages can
//! reference the outputs of earlier sources.

use crate::dependson::{Dependency, DependsOnError, ResourceKind};
use crate::resource::ResourceConfig;
use crate::scm::ScmConfig;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;

/// Manifest loading and validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("reading manifest {path:?}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("parsing manifest {path:?}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },

    #[error("missing value for parameter 'kind' in {kind} {id:?}")]
    MissingKind { kind: ResourceKind, id: String },

    #[error("scm id {scm_id:?} referenced by {node:?} does not exist")]
    UnknownScm { scm_id: String, node: String },

    #[error("source id {source_id:?} referenced by {node:?} does not exist")]
    UnknownSource { source_id: String, node: String },

    #[error("target id {target_id:?} referenced by pullrequest {pullrequest:?} does not exist")]
    UnknownTarget {
        target_id: String,
        pullrequest: String,
    },

    #[error("pullrequest {0:?} has no target")]
    EmptyTargets(String),

    #[error("invalid dependson reference on {node:?}: {source}")]
    DependsOn {
        node: String,
        source: DependsOnError,
    },

    #[error("no valid dependson value: {reference:?} referenced by {node:?} does not exist")]
    InvalidDependsOn { node: String, reference: String },
}

/// Source stage configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(flatten)]
    pub resource: ResourceConfig,
}

/// Condition stage configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConditionConfig {
    #[serde(flatten)]
    pub resource: ResourceConfig,

    /// Source feeding this condition its input value.
    #[serde(default, rename = "sourceid")]
    pub source_id: String,

    /// Evaluate without any source input.
    #[serde(default, rename = "disablesourceinput")]
    pub disable_source_input: bool,
}

/// Target stage configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetConfig {
    #[serde(flatten)]
    pub resource: ResourceConfig,

    /// Source feeding this target its input value.
    #[serde(default, rename = "sourceid")]
    pub source_id: String,

    /// Update without any source input.
    #[serde(default, rename = "disablesourceinput")]
    pub disable_source_input: bool,

    /// Only run when the depended-on target(s) actually changed.
    #[serde(default, rename = "dependsonchange")]
    pub depends_on_change: bool,

    /// Run even when the condition aggregate is not satisfied.
    #[serde(default, rename = "disableconditions")]
    pub disable_conditions: bool,
}

/// Pull-request group configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PullRequestConfig {
    /// Explicit title. Derived from the first member target when empty.
    #[serde(default)]
    pub title: String,

    /// Review-system kind, e.g. `shell`.
    #[serde(default)]
    pub kind: String,

    /// SCM whose working branch the review request is opened from.
    #[serde(default, rename = "scmid")]
    pub scm_id: String,

    /// Member target identifiers.
    #[serde(default)]
    pub targets: Vec<String>,

    /// Kind-specific configuration.
    #[serde(default)]
    pub spec: serde_yaml::Value,
}

/// One parsed manifest.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManifestSpec {
    /// Pipeline name, used in reports and log lines.
    #[serde(default)]
    pub name: String,

    /// Stable pipeline identifier, propagated into working-branch names.
    #[serde(default, rename = "pipelineid")]
    pub pipeline_id: String,

    #[serde(default)]
    pub scms: BTreeMap<String, ScmConfig>,

    #[serde(default)]
    pub sources: BTreeMap<String, SourceConfig>,

    #[serde(default)]
    pub conditions: BTreeMap<String, ConditionConfig>,

    #[serde(default)]
    pub targets: BTreeMap<String, TargetConfig>,

    #[serde(default)]
    pub pullrequests: BTreeMap<String, PullRequestConfig>,
}

impl ManifestSpec {
    /// Load and validate one manifest file.
    pub fn from_file(path: &Path) -> Result<Self, ManifestError> {
        let content = std::fs::read_to_string(path).map_err(|source| ManifestError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_str_named(&content, &path.display().to_string())
    }

    /// Parse and validate a manifest from a string.
    pub fn from_str_named(content: &str, path: &str) -> Result<Self, ManifestError> {
        let mut spec: ManifestSpec =
            serde_yaml::from_str(content).map_err(|source| ManifestError::Parse {
                path: path.to_string(),
                source,
            })?;
        spec.apply_defaults();
        spec.validate()?;
        Ok(spec)
    }

    /// Fill derivable defaults before validation.
    ///
    /// When exactly one source is declared, conditions and targets that did
    /// not disable source input inherit it as their `sourceid`.
    pub fn apply_defaults(&mut self) {
        if self.name.is_empty() {
            self.name = self.pipeline_id.clone();
        }

        if self.sources.len() == 1 {
            let only = self.sources.keys().next().cloned().unwrap_or_default();
            for condition in self.conditions.values_mut() {
                if condition.source_id.is_empty() && !condition.disable_source_input {
                    condition.source_id = only.clone();
                }
            }
            for target in self.targets.values_mut() {
                if target.source_id.is_empty() && !target.disable_source_input {
                    target.source_id = only.clone();
                }
            }
        }
    }

    /// Validate identifiers and references across collections.
    pub fn validate(&self) -> Result<(), ManifestError> {
        for (id, source) in &self.sources {
            self.validate_resource(ResourceKind::Source, id, &source.resource)?;
        }
        for (id, condition) in &self.conditions {
            self.validate_resource(ResourceKind::Condition, id, &condition.resource)?;
            self.validate_source_ref(ResourceKind::Condition, id, &condition.source_id)?;
        }
        for (id, target) in &self.targets {
            self.validate_resource(ResourceKind::Target, id, &target.resource)?;
            self.validate_source_ref(ResourceKind::Target, id, &target.source_id)?;
        }

        for (id, pr) in &self.pullrequests {
            if pr.targets.is_empty() {
                return Err(ManifestError::EmptyTargets(id.clone()));
            }
            for target_id in &pr.targets {
                if !self.targets.contains_key(target_id) {
                    return Err(ManifestError::UnknownTarget {
                        target_id: target_id.clone(),
                        pullrequest: id.clone(),
                    });
                }
            }
            if !self.scms.contains_key(&pr.scm_id) {
                return Err(ManifestError::UnknownScm {
                    scm_id: pr.scm_id.clone(),
                    node: format!("pullrequest {:?}", id),
                });
            }
        }

        Ok(())
    }

    fn validate_resource(
        &self,
        kind: ResourceKind,
        id: &str,
        resource: &ResourceConfig,
    ) -> Result<(), ManifestError> {
        let node = format!("{} {:?}", kind, id);

        if resource.kind.is_empty() {
            return Err(ManifestError::MissingKind {
                kind,
                id: id.to_string(),
            });
        }

        if !resource.scm_id.is_empty() && !self.scms.contains_key(&resource.scm_id) {
            return Err(ManifestError::UnknownScm {
                scm_id: resource.scm_id.clone(),
                node,
            });
        }

        for raw in &resource.depends_on {
            let dep = Dependency::parse(raw).map_err(|source| ManifestError::DependsOn {
                node: node.clone(),
                source,
            })?;
            let exists = match dep.kind.unwrap_or(kind) {
                ResourceKind::Source => self.sources.contains_key(&dep.id),
                ResourceKind::Condition => self.conditions.contains_key(&dep.id),
                ResourceKind::Target => self.targets.contains_key(&dep.id),
            };
            if !exists {
                return Err(ManifestError::InvalidDependsOn {
                    node,
                    reference: raw.clone(),
                });
            }
        }

        Ok(())
    }

    fn validate_source_ref(
        &self,
        kind: ResourceKind,
        id: &str,
        source_id: &str,
    ) -> Result<(), ManifestError> {
        if source_id.is_empty() || self.sources.contains_key(source_id) {
            return Ok(());
        }
        Err(ManifestError::UnknownSource {
            source_id: source_id.to_string(),
            node: format!("{} {:?}", kind, id),
        })
    }

    /// Re-render every templated string against the current source outputs.
    ///
    /// SCM configurations are deliberately left untouched: their identity
    /// feeds the cross-pipeline deduplication digest and must stay stable
    /// for the whole run.
    pub fn rendered(&self, outputs: &BTreeMap<String, String>) -> ManifestSpec {
        let mut spec = self.clone();

        for source in spec.sources.values_mut() {
            render_resource(&mut source.resource, outputs);
        }
        for condition in spec.conditions.values_mut() {
            render_resource(&mut condition.resource, outputs);
        }
        for target in spec.targets.values_mut() {
            render_resource(&mut target.resource, outputs);
        }
        for pr in spec.pullrequests.values_mut() {
            pr.title = interpolate(&pr.title, outputs);
            render_value(&mut pr.spec, outputs);
        }

        spec
    }
}

fn render_resource(resource: &mut ResourceConfig, outputs: &BTreeMap<String, String>) {
    resource.name = interpolate(&resource.name, outputs);
    render_value(&mut resource.spec, outputs);
}

fn render_value(value: &mut serde_yaml::Value, outputs: &BTreeMap<String, String>) {
    match value {
        serde_yaml::Value::String(s) => *s = interpolate(s, outputs),
        serde_yaml::Value::Sequence(seq) => {
            for item in seq {
                render_value(item, outputs);
            }
        }
        serde_yaml::Value::Mapping(map) => {
            for (_, item) in map.iter_mut() {
                render_value(item, outputs);
            }
        }
        _ => {}
    }
}

fn template_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"\{\{\s*source\s+"([^"]+)"\s*\}\}"#).unwrap_or_else(|e| panic!("{e}"))
    })
}

/// Substitute `{{ source "id" }}` occurrences with the source's output.
///
/// References to sources without an output yet are left untouched so a
/// later rendering pass can still resolve them.
pub fn interpolate(input: &str, outputs: &BTreeMap<String, String>) -> String {
    template_regex()
        .replace_all(input, |caps: &Captures| {
            outputs
                .get(&caps[1])
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"
name: Bump nginx version
pipelineid: nginx
scms:
  default:
    kind: git
    spec:
      url: https://example.com/infra.git
      branch: main
sources:
  latest:
    name: Get latest nginx version
    kind: shell
    spec:
      command: cat latest.txt
conditions:
  compose-exists:
    kind: file
    scmid: default
    spec:
      file: docker-compose.yaml
targets:
  compose:
    name: 'Bump nginx to {{ source "latest" }}'
    kind: file
    scmid: default
    spec:
      file: VERSION
pullrequests:
  default:
    kind: shell
    scmid: default
    targets:
      - compose
"#;

    #[test]
    fn test_parse_full_manifest() {
        let spec = ManifestSpec::from_str_named(MANIFEST, "test.yaml").unwrap();
        assert_eq!(spec.name, "Bump nginx version");
        assert_eq!(spec.pipeline_id, "nginx");
        assert_eq!(spec.sources.len(), 1);
        assert_eq!(spec.conditions.len(), 1);
        assert_eq!(spec.targets.len(), 1);
        assert_eq!(spec.pullrequests.len(), 1);
    }

    #[test]
    fn test_single_source_becomes_default_input() {
        let spec = ManifestSpec::from_str_named(MANIFEST, "test.yaml").unwrap();
        assert_eq!(spec.conditions["compose-exists"].source_id, "latest");
        assert_eq!(spec.targets["compose"].source_id, "latest");
    }

    #[test]
    fn test_unknown_scm_reference_is_rejected() {
        let manifest = r#"
targets:
  compose:
    kind: file
    scmid: ghost
    spec:
      file: VERSION
"#;
        let err = ManifestSpec::from_str_named(manifest, "test.yaml").unwrap_err();
        assert!(matches!(err, ManifestError::UnknownScm { .. }));
    }

    #[test]
    fn test_missing_kind_is_rejected() {
        let manifest = r#"
sources:
  latest:
    spec:
      command: echo 1
"#;
        let err = ManifestSpec::from_str_named(manifest, "test.yaml").unwrap_err();
        assert!(matches!(err, ManifestError::MissingKind { .. }));
    }

    #[test]
    fn test_cross_collection_dependson_is_validated() {
        let manifest = r#"
targets:
  compose:
    kind: file
    dependson:
      - "condition#ghost"
    spec:
      file: VERSION
"#;
        let err = ManifestSpec::from_str_named(manifest, "test.yaml").unwrap_err();
        assert!(matches!(err, ManifestError::InvalidDependsOn { .. }));
    }

    #[test]
    fn test_pullrequest_must_reference_existing_targets() {
        let manifest = r#"
scms:
  default:
    kind: git
    spec:
      url: https://example.com/infra.git
pullrequests:
  default:
    kind: shell
    scmid: default
    targets:
      - ghost
"#;
        let err = ManifestSpec::from_str_named(manifest, "test.yaml").unwrap_err();
        assert!(matches!(err, ManifestError::UnknownTarget { .. }));
    }

    #[test]
    fn test_interpolate_known_and_unknown_references() {
        let outputs = BTreeMap::from([("latest".to_string(), "1.25.3".to_string())]);
        assert_eq!(
            interpolate(r#"Bump to {{ source "latest" }}"#, &outputs),
            "Bump to 1.25.3"
        );
        assert_eq!(
            interpolate(r#"Bump to {{ source "pending" }}"#, &outputs),
            r#"Bump to {{ source "pending" }}"#
        );
    }

    #[test]
    fn test_rendered_reaches_nested_spec_values() {
        let spec = ManifestSpec::from_str_named(MANIFEST, "test.yaml").unwrap();
        let outputs = BTreeMap::from([("latest".to_string(), "1.25.3".to_string())]);

        let rendered = spec.rendered(&outputs);
        assert_eq!(
            rendered.targets["compose"].resource.name,
            "Bump nginx to 1.25.3"
        );
        // The pristine spec is untouched.
        assert!(spec.targets["compose"].resource.name.contains("{{ source"));
    }
}
