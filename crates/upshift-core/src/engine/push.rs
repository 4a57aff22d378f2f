//! Push reconciliation: one commit and at most one push per distinct
//! (remote URL, branch) pair, across every pipeline of the run.

use super::Engine;
use crate::result::ResourceResult;
use crate::scm::ScmHandler;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

impl Engine {
    /// Collapse all per-target push requests into the minimum number of
    /// actual pushes.
    ///
    /// Phase one commits the staged files of each target requesting a push,
    /// at most once per (URL, branch) pair. Phase two checks every distinct
    /// pair — pushed or not — against the remote and pushes only when the
    /// remote branch is behind.
    pub(crate) async fn reconcile_pushes(&mut self) -> anyhow::Result<()> {
        info!("pushing git changes");

        let mut errs: Vec<String> = Vec::new();
        let mut committed: HashSet<(String, String)> = HashSet::new();
        let mut all_scm: BTreeMap<(String, String), Arc<dyn ScmHandler>> = BTreeMap::new();

        for pipeline in &mut self.pipelines {
            for (target_id, target) in &mut pipeline.targets {
                let scm_id = &target.config.resource.scm_id;
                if scm_id.is_empty() {
                    continue;
                }
                let Some(scm) = pipeline.scms.get(scm_id) else {
                    continue;
                };

                let url = scm.handler.get_url();
                let branch = scm.handler.get_branches().working;
                let key = (url, branch);
                all_scm
                    .entry(key.clone())
                    .or_insert_with(|| scm.handler.clone());

                if !target.to_push {
                    continue;
                }
                if committed.contains(&key) {
                    debug!(
                        target = %target_id,
                        url = %key.0,
                        branch = %key.1,
                        "changes already committed for this branch, skipping"
                    );
                    continue;
                }

                match scm.handler.commit(&target.commit_message).await {
                    Ok(()) => {
                        committed.insert(key);
                    }
                    Err(e) => {
                        errs.push(format!(
                            "committing changes for target {:?}: {}",
                            target_id, e
                        ));
                        target.result = ResourceResult::Failure;
                        if let Some(stage) = pipeline.report.targets.get_mut(target_id) {
                            stage.result = ResourceResult::Failure;
                        }
                        pipeline.report.result = ResourceResult::Failure;
                    }
                }
            }
        }

        let mut pushed = 0;
        for ((url, branch), handler) in &all_scm {
            match handler.is_remote_branch_up_to_date().await {
                Ok(true) => {
                    debug!(url = %url, branch = %branch, "remote branch already up to date");
                }
                Ok(false) => {
                    info!(url = %url, branch = %branch, "pushing commits");
                    match handler.push().await {
                        Ok(_) => pushed += 1,
                        Err(e) => errs.push(format!(
                            "pushing commits to {:?} on branch {:?}: {}",
                            url, branch, e
                        )),
                    }
                }
                Err(e) => errs.push(format!(
                    "checking remote branch status for {:?} on branch {:?}: {}",
                    url, branch, e
                )),
            }
        }

        if pushed == 0 {
            info!("no SCM repository to push");
        } else {
            info!("pushed changes to {} of {} SCM repositories", pushed, all_scm.len());
        }

        if !errs.is_empty() {
            anyhow::bail!(
                "errors occurred while pushing SCM commits:\n\t* {}",
                errs.join("\n\t* ")
            );
        }

        Ok(())
    }
}
