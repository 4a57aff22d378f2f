//! Per-pipeline run reports and cross-run summaries.
//!
//! A [`Report`] accumulates the result and textual detail of every stage
//! node in one pipeline. Collections render to plain text sections that are
//! reused verbatim as pull-request body content.

use crate::result::ResourceResult;
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Result record for a single stage node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageReport {
    /// Human-readable stage name (falls back to the identifier).
    pub name: String,

    /// Resource kind tag, e.g. `file` or `shell`.
    pub kind: String,

    /// Stage outcome.
    pub result: ResourceResult,

    /// One-line description of what happened.
    pub description: String,

    /// Whether the stage produced a change (targets only).
    pub changed: bool,

    /// Identifier of the source feeding this stage, when any.
    pub source_id: Option<String>,
}

impl StageReport {
    /// Create a pending record for a stage that has not run yet.
    pub fn pending(name: &str, kind: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: kind.to_string(),
            result: ResourceResult::Skipped,
            ..Default::default()
        }
    }
}

/// Report for one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    /// Pipeline name.
    pub name: String,

    /// Pipeline identifier shared across runs.
    pub pipeline_id: String,

    /// Aggregated pipeline result.
    pub result: ResourceResult,

    /// Fatal error message when the pipeline aborted, empty otherwise.
    pub err: String,

    /// When this report was created.
    pub created_at: DateTime<Utc>,

    /// Per-source results, keyed by identifier.
    pub sources: BTreeMap<String, StageReport>,

    /// Per-condition results, keyed by identifier.
    pub conditions: BTreeMap<String, StageReport>,

    /// Per-target results, keyed by identifier.
    pub targets: BTreeMap<String, StageReport>,
}

impl Report {
    /// Create an empty report for a named pipeline.
    pub fn new(name: &str, pipeline_id: &str) -> Self {
        Self {
            name: name.to_string(),
            pipeline_id: pipeline_id.to_string(),
            result: ResourceResult::Skipped,
            err: String::new(),
            created_at: Utc::now(),
            sources: BTreeMap::new(),
            conditions: BTreeMap::new(),
            targets: BTreeMap::new(),
        }
    }

    fn render_collection(out: &mut String, title: &str, stages: &BTreeMap<String, StageReport>) {
        out.push_str(&format!("{}:\n", title));
        for (id, stage) in stages {
            let name = if stage.name.is_empty() { id } else { &stage.name };
            out.push_str(&format!("\t{}  {} ({})\n", stage.result, name, stage.kind));
        }
    }

    /// Render one collection (`"sources"`, `"conditions"` or `"targets"`)
    /// or the full report (`"all"`) as plain text.
    pub fn render(&self, section: &str) -> String {
        let mut out = String::new();
        match section {
            "sources" => Self::render_collection(&mut out, "Sources", &self.sources),
            "conditions" => Self::render_collection(&mut out, "Conditions", &self.conditions),
            "targets" => Self::render_collection(&mut out, "Targets", &self.targets),
            "all" => {
                out.push_str(&format!("{} {}\n", self.result, self.name));
                if !self.err.is_empty() {
                    out.push_str(&format!("\tError: {}\n", self.err));
                    return out;
                }
                for (title, stages) in [
                    ("Sources", &self.sources),
                    ("Conditions", &self.conditions),
                    ("Targets", &self.targets),
                ] {
                    if stages.is_empty() {
                        continue;
                    }
                    let mut section = String::new();
                    Self::render_collection(&mut section, title, stages);
                    for line in section.lines() {
                        out.push_str(&format!("\t{}\n", line));
                    }
                }
            }
            other => {
                tracing::warn!(section = other, "unknown report section requested");
            }
        }
        out
    }
}

/// All pipeline reports of one engine run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Reports(pub Vec<Report>);

/// Count of pipelines per aggregate result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub succeeded: usize,
    pub changed: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl RunSummary {
    /// Total number of pipelines run.
    pub fn total(&self) -> usize {
        self.succeeded + self.changed + self.failed + self.skipped
    }
}

impl Reports {
    /// Append a pipeline report.
    pub fn push(&mut self, report: Report) {
        self.0.push(report);
    }

    /// Render every report in full.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str("\n=============================\n\nREPORTS:\n\n");
        for report in &self.0 {
            out.push_str(&report.render("all"));
            out.push('\n');
        }
        out
    }

    /// Write the run reports as pretty JSON for export to other tooling.
    pub fn write_json(&self, path: &Path) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self).context("serializing run reports")?;
        std::fs::write(path, content).with_context(|| format!("writing {:?}", path))?;
        Ok(())
    }

    /// Summarize pipeline outcomes for the run exit status.
    pub fn summary(&self) -> RunSummary {
        let mut summary = RunSummary::default();
        for report in &self.0 {
            match report.result {
                ResourceResult::Success => summary.succeeded += 1,
                ResourceResult::Attention => summary.changed += 1,
                ResourceResult::Failure => summary.failed += 1,
                ResourceResult::Skipped => summary.skipped += 1,
            }
        }
        summary
    }
}
