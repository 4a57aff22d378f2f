//! Condition stage execution.
//!
//! Every condition runs, independent of earlier condition failures; the
//! aggregate over the collection is what gates the targets stage.

use super::Pipeline;
use crate::dependson::ResourceKind;
use crate::manifest::ConditionConfig;
use crate::resource;
use crate::result::ResourceResult;
use tracing::{debug, info, warn};

/// One condition node: configuration plus its current run state.
#[derive(Debug, Clone)]
pub struct ConditionNode {
    pub config: ConditionConfig,
    pub result: ResourceResult,
    pub description: String,
}

impl ConditionNode {
    pub fn new(config: ConditionConfig) -> Self {
        Self {
            config,
            result: ResourceResult::Skipped,
            description: String::new(),
        }
    }
}

impl Pipeline {
    pub(super) async fn run_condition(&mut self, id: &str) {
        let config = self.conditions[id].config.clone();

        let gate = match self.gate(&config.resource.depends_on, ResourceKind::Condition, false) {
            Ok(gate) => gate,
            Err(e) => {
                self.mark_errored();
                self.finish_condition(id, ResourceResult::Failure, &format!("{e:#}"));
                return;
            }
        };

        if !gate.run {
            let reason = gate.unmet.unwrap_or_default();
            debug!(condition = id, %reason, "skipping condition");
            self.finish_condition(id, ResourceResult::Skipped, &reason);
            return;
        }

        // A condition consuming a source value only runs once that source
        // succeeded.
        let mut input = String::new();
        if !config.disable_source_input && !config.source_id.is_empty() {
            if self.sources[&config.source_id].result != ResourceResult::Success {
                let reason = format!(
                    "source {:?} did not succeed, skipping condition",
                    config.source_id
                );
                debug!(condition = id, %reason, "skipping condition");
                self.finish_condition(id, ResourceResult::Skipped, &reason);
                return;
            }
            input = self.sources[&config.source_id].output.clone();
        }

        info!(condition = id, kind = %config.resource.kind, "running condition");

        match self.execute_condition(&config, &input).await {
            Ok(outcome) => {
                let result = if outcome.pass {
                    ResourceResult::Success
                } else {
                    ResourceResult::Failure
                };
                self.finish_condition(id, result, &outcome.description);
            }
            Err(e) => {
                warn!(condition = id, "condition failed: {e:#}");
                self.mark_errored();
                self.finish_condition(id, ResourceResult::Failure, &format!("{e:#}"));
            }
        }
    }

    async fn execute_condition(
        &self,
        config: &ConditionConfig,
        input: &str,
    ) -> anyhow::Result<resource::ConditionOutcome> {
        let condition = resource::new_condition(&config.resource)?;
        let working_dir = self.working_dir(&config.resource.scm_id).await?;
        condition.condition(input, &working_dir).await
    }

    fn finish_condition(&mut self, id: &str, result: ResourceResult, description: &str) {
        if let Some(node) = self.conditions.get_mut(id) {
            node.result = result;
            node.description = description.to_string();
        }
        self.record(ResourceKind::Condition, id, result, false, description);
    }
}
