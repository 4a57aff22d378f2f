//! Target stage execution.
//!
//! Targets apply updates, optionally inside an SCM working copy. A target
//! bound to an SCM stages its changed files during the run; committing and
//! pushing happen once per (URL, branch) in the engine's reconciliation
//! pass.

use super::Pipeline;
use crate::dependson::ResourceKind;
use crate::manifest::TargetConfig;
use crate::resource;
use crate::result::ResourceResult;
use tracing::{debug, info, warn};

/// One target node: configuration plus its current run state.
#[derive(Debug, Clone)]
pub struct TargetNode {
    pub config: TargetConfig,
    pub result: ResourceResult,

    /// Whether external state was (or would be) modified.
    pub changed: bool,

    pub description: String,

    /// Files staged in the working copy.
    pub files: Vec<String>,

    /// Message for the reconciliation commit.
    pub commit_message: String,

    /// Set when the reconciliation pass must push this target's branch.
    pub to_push: bool,
}

impl TargetNode {
    pub fn new(config: TargetConfig) -> Self {
        Self {
            config,
            result: ResourceResult::Skipped,
            changed: false,
            description: String::new(),
            files: Vec::new(),
            commit_message: String::new(),
            to_push: false,
        }
    }
}

impl Pipeline {
    pub(super) async fn run_target(&mut self, id: &str) {
        let config = self.targets[id].config.clone();

        // Conditions gate every target unless explicitly disabled.
        if !config.disable_conditions && !self.conditions_satisfied() {
            let reason = format!(
                "conditions {:?} not met, skipping target",
                self.unsatisfied_conditions()
            );
            info!(target = id, %reason, "skipping target");
            self.finish_target(id, ResourceResult::Skipped, false, &reason);
            return;
        }

        let gate = match self.gate(
            &config.resource.depends_on,
            ResourceKind::Target,
            config.depends_on_change,
        ) {
            Ok(gate) => gate,
            Err(e) => {
                self.mark_errored();
                self.finish_target(id, ResourceResult::Failure, false, &format!("{e:#}"));
                return;
            }
        };

        if !gate.run {
            let reason = gate.unmet.unwrap_or_default();
            debug!(target = id, %reason, "skipping target");
            self.finish_target(id, ResourceResult::Skipped, false, &reason);
            return;
        }

        let mut input = String::new();
        if !config.disable_source_input && !config.source_id.is_empty() {
            if self.sources[&config.source_id].result != ResourceResult::Success {
                let reason = format!(
                    "source {:?} did not succeed, skipping target",
                    config.source_id
                );
                debug!(target = id, %reason, "skipping target");
                self.finish_target(id, ResourceResult::Skipped, false, &reason);
                return;
            }
            input = self.sources[&config.source_id].output.clone();
        }

        info!(target = id, kind = %config.resource.kind, "running target");

        let outcome = match self.execute_target(&config, &input).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(target = id, "target failed: {e:#}");
                self.mark_errored();
                self.finish_target(id, ResourceResult::Failure, false, &format!("{e:#}"));
                return;
            }
        };

        let result = if outcome.changed {
            ResourceResult::Attention
        } else {
            ResourceResult::Success
        };

        // Stage changed files for the reconciliation commit.
        if outcome.changed
            && !self.options.dry_run
            && self.options.commit
            && !config.resource.scm_id.is_empty()
        {
            if let Err(e) = self.stage_target(id, &config, &outcome).await {
                warn!(target = id, "staging failed: {e:#}");
                self.mark_errored();
                self.finish_target(id, ResourceResult::Failure, true, &format!("{e:#}"));
                return;
            }
        }

        if let Some(node) = self.targets.get_mut(id) {
            node.files = outcome.files.clone();
        }
        self.finish_target(id, result, outcome.changed, &outcome.description);
    }

    async fn execute_target(
        &self,
        config: &TargetConfig,
        input: &str,
    ) -> anyhow::Result<resource::TargetOutcome> {
        let target = resource::new_target(&config.resource)?;
        let working_dir = self.working_dir(&config.resource.scm_id).await?;
        target.target(input, &working_dir, self.options.dry_run).await
    }

    async fn stage_target(
        &mut self,
        id: &str,
        config: &TargetConfig,
        outcome: &resource::TargetOutcome,
    ) -> anyhow::Result<()> {
        let scm = self
            .scms
            .get(&config.resource.scm_id)
            .ok_or_else(|| anyhow::anyhow!("scm id {:?} doesn't exist", config.resource.scm_id))?;

        if !outcome.files.is_empty() {
            scm.handler.add(&outcome.files).await?;
        }

        // Not every target has a name, the change description is the
        // fallback commit message.
        let message = if config.resource.name.is_empty() {
            outcome.description.clone()
        } else {
            config.resource.name.clone()
        };

        if let Some(node) = self.targets.get_mut(id) {
            node.commit_message = message;
            node.to_push = self.options.push;
        }
        Ok(())
    }

    fn finish_target(&mut self, id: &str, result: ResourceResult, changed: bool, description: &str) {
        if let Some(node) = self.targets.get_mut(id) {
            node.result = result;
            node.changed = changed;
            node.description = description.to_string();
        }
        self.record(ResourceKind::Target, id, result, changed, description);
    }
}
