//! Cross-pipeline engine: manifest discovery, clone deduplication, the
//! sequential run loop and push reconciliation.

mod clone;
mod push;

pub use clone::MAX_CONCURRENT_CLONES;

use crate::manifest::ManifestSpec;
use crate::pipeline::{Pipeline, PipelineOptions};
use crate::report::{Reports, RunSummary};
use anyhow::Context;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Default manifest file looked up when none is given.
pub const DEFAULT_MANIFEST_FILE: &str = "upshift.yaml";

/// Default manifest directory looked up when none is given.
pub const DEFAULT_MANIFEST_DIR: &str = "upshift.d";

/// Engine run parameters.
#[derive(Debug, Clone, Default)]
pub struct EngineOptions {
    /// Explicit manifest files. Defaults are probed when empty.
    pub manifests: Vec<PathBuf>,

    /// Options shared by every pipeline.
    pub pipeline: PipelineOptions,
}

/// One engine run over every loaded pipeline.
pub struct Engine {
    pub options: EngineOptions,
    pub pipelines: Vec<Pipeline>,
    pub reports: Reports,
}

impl Engine {
    pub fn new(options: EngineOptions) -> Self {
        Self {
            options,
            pipelines: Vec::new(),
            reports: Reports::default(),
        }
    }

    /// Load manifests and clone every distinct SCM configuration.
    pub async fn prepare(&mut self) -> anyhow::Result<()> {
        info!("preparing engine");

        self.load_pipelines()?;
        if self.pipelines.is_empty() {
            anyhow::bail!("no valid pipeline found");
        }
        info!("{} pipeline(s) successfully loaded", self.pipelines.len());

        self.init_scm().await;
        Ok(())
    }

    /// Execute every pipeline, reconcile pushes, render reports.
    ///
    /// Returns an error when at least one pipeline aggregate is a failure,
    /// so callers can map it to a non-zero exit status.
    pub async fn run(&mut self) -> anyhow::Result<RunSummary> {
        let mut push_error = None;

        for pipeline in &mut self.pipelines {
            if let Err(e) = pipeline.run().await {
                warn!(pipeline = %pipeline.name, "pipeline failed, skipping due to: {e:#}");
                continue;
            }
        }

        if !self.options.pipeline.dry_run && self.options.pipeline.push {
            if let Err(e) = self.reconcile_pushes().await {
                error!("push reconciliation failed: {e:#}");
                push_error = Some(e);
            }
        }

        self.reports = Reports(self.pipelines.iter().map(|p| p.report.clone()).collect());
        info!("{}", self.reports.render());

        let summary = self.reports.summary();
        info!("Run summary");
        info!("  * Changed:\t{}", summary.changed);
        info!("  * Failed:\t{}", summary.failed);
        info!("  * Skipped:\t{}", summary.skipped);
        info!("  * Succeeded:\t{}", summary.succeeded);
        info!("  * Total:\t{}", summary.total());

        if let Some(e) = push_error {
            return Err(e);
        }
        if summary.failed > 0 {
            anyhow::bail!("{} over {} pipeline(s) failed", summary.failed, summary.total());
        }

        Ok(summary)
    }

    /// Load one pipeline per manifest. Individual load failures are logged
    /// and do not prevent the remaining manifests from loading.
    pub fn load_pipelines(&mut self) -> anyhow::Result<()> {
        let cwd = std::env::current_dir().context("resolving current directory")?;
        let files = discover_manifest_files(&self.options.manifests, &cwd);
        if files.is_empty() {
            anyhow::bail!("no manifest detected");
        }

        let mut errs: Vec<String> = Vec::new();
        for file in files {
            let spec = match ManifestSpec::from_file(&file) {
                Ok(spec) => spec,
                Err(e) => {
                    errs.push(format!("{:?} - {}", file.display().to_string(), e));
                    continue;
                }
            };
            match Pipeline::new(spec, self.options.pipeline) {
                Ok(pipeline) => self.pipelines.push(pipeline),
                Err(e) => errs.push(format!("{:?} - {:#}", file.display().to_string(), e)),
            }
        }

        if !errs.is_empty() {
            error!("failed loading pipeline(s):");
            for e in &errs {
                error!("\t* {}", e);
            }
        }

        Ok(())
    }
}

/// Resolve the manifest file set: the explicit list, else the default
/// file, else every manifest under the default directory.
pub(crate) fn discover_manifest_files(explicit: &[PathBuf], base: &Path) -> Vec<PathBuf> {
    if !explicit.is_empty() {
        return explicit.to_vec();
    }

    let default_file = base.join(DEFAULT_MANIFEST_FILE);
    if default_file.is_file() {
        debug!(file = %default_file.display(), "default manifest detected");
        return vec![default_file];
    }

    let default_dir = base.join(DEFAULT_MANIFEST_DIR);
    if default_dir.is_dir() {
        debug!(dir = %default_dir.display(), "default manifest directory detected");
        let mut files = Vec::new();
        collect_manifest_files(&default_dir, &mut files);
        files.sort();
        return files;
    }

    Vec::new()
}

fn collect_manifest_files(dir: &Path, files: &mut Vec<PathBuf>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %dir.display(), "reading manifest directory: {e}");
            return;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_manifest_files(&path, files);
        } else if matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        ) {
            files.push(path);
        }
    }
}
