//! Source stage execution.

use super::Pipeline;
use crate::dependson::ResourceKind;
use crate::manifest::SourceConfig;
use crate::resource;
use crate::result::ResourceResult;
use tracing::{debug, info, warn};

/// One source node: configuration plus its current run state.
#[derive(Debug, Clone)]
pub struct SourceNode {
    pub config: SourceConfig,
    pub result: ResourceResult,

    /// Retrieved value, consumed by downstream stages.
    pub output: String,

    /// Changelog attached to the retrieved value.
    pub changelog: String,

    pub description: String,
}

impl SourceNode {
    pub fn new(config: SourceConfig) -> Self {
        Self {
            config,
            result: ResourceResult::Skipped,
            output: String::new(),
            changelog: String::new(),
            description: String::new(),
        }
    }
}

impl Pipeline {
    pub(super) async fn run_source(&mut self, id: &str) {
        let config = self.sources[id].config.clone();

        let gate = match self.gate(&config.resource.depends_on, ResourceKind::Source, false) {
            Ok(gate) => gate,
            Err(e) => {
                self.mark_errored();
                self.record(
                    ResourceKind::Source,
                    id,
                    ResourceResult::Failure,
                    false,
                    &format!("{e:#}"),
                );
                return;
            }
        };

        if !gate.run {
            let reason = gate.unmet.unwrap_or_default();
            debug!(source = id, %reason, "skipping source");
            self.record(ResourceKind::Source, id, ResourceResult::Skipped, false, &reason);
            return;
        }

        info!(source = id, kind = %config.resource.kind, "running source");

        match self.execute_source(&config).await {
            Ok((output, changelog)) => {
                self.source_outputs.insert(id.to_string(), output.value.clone());
                if let Some(node) = self.sources.get_mut(id) {
                    node.result = ResourceResult::Success;
                    node.output = output.value;
                    node.changelog = changelog;
                    node.description = output.description.clone();
                }
                self.record(
                    ResourceKind::Source,
                    id,
                    ResourceResult::Success,
                    false,
                    &output.description,
                );
            }
            Err(e) => {
                warn!(source = id, "source failed: {e:#}");
                self.mark_errored();
                if let Some(node) = self.sources.get_mut(id) {
                    node.result = ResourceResult::Failure;
                    node.description = format!("{e:#}");
                }
                self.record(
                    ResourceKind::Source,
                    id,
                    ResourceResult::Failure,
                    false,
                    &format!("{e:#}"),
                );
            }
        }
    }

    async fn execute_source(
        &self,
        config: &SourceConfig,
    ) -> anyhow::Result<(resource::SourceOutput, String)> {
        let source = resource::new_source(&config.resource)?;
        let working_dir = self.working_dir(&config.resource.scm_id).await?;
        let output = source.source(&working_dir).await?;
        Ok((output, source.changelog()))
    }
}
