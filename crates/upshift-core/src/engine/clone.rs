//! SCM deduplication and the bounded concurrent clone pass.
//!
//! Many stage nodes across many pipelines may reference logically identical
//! SCM configurations. Each distinct configuration — identified by its
//! content digest — is cloned exactly once, through a bounded pool of
//! background tasks. The clone phase runs to completion before any pipeline
//! executes.

use super::Engine;
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, error, info};

/// Ceiling on simultaneously running clone tasks, independent of how many
/// pipelines are loaded.
pub const MAX_CONCURRENT_CLONES: usize = 20;

impl Engine {
    /// Clone every distinct SCM configuration referenced by the loaded
    /// pipelines. Returns the number of distinct working copies retrieved.
    ///
    /// A clone failure is logged and does not abort sibling clones; it
    /// surfaces later as a failure of the targets needing that working
    /// copy.
    pub async fn init_scm(&self) -> usize {
        let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_CLONES));
        let mut seen: HashSet<String> = HashSet::new();
        let mut tasks = Vec::new();

        for pipeline in &self.pipelines {
            for (scm_id, scm) in &pipeline.scms {
                let digest = scm.digest();
                if !seen.insert(digest) {
                    debug!(scm = scm_id, "working copy already scheduled, skipping");
                    continue;
                }

                let handler = scm.handler.clone();
                let semaphore = semaphore.clone();
                let scm_id = scm_id.clone();
                let pipeline_name = pipeline.name.clone();

                tasks.push(tokio::spawn(async move {
                    let _permit = semaphore.acquire_owned().await.ok();
                    match handler.clone_repository().await {
                        Ok(directory) => {
                            debug!(
                                scm = %scm_id,
                                directory = %directory.display(),
                                "working copy retrieved"
                            );
                            true
                        }
                        Err(e) => {
                            error!(
                                scm = %scm_id,
                                pipeline = %pipeline_name,
                                "clone failed: {e}"
                            );
                            false
                        }
                    }
                }));
            }
        }

        let retrieved = join_all(tasks)
            .await
            .into_iter()
            .filter(|r| *r.as_ref().unwrap_or(&false))
            .count();

        info!("SCM repositories retrieved: {}", retrieved);
        retrieved
    }
}
