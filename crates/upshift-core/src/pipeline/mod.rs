//! Pipeline entity and the staged execution state machine.
//!
//! One pipeline is one manifest run: sources retrieve values, conditions
//! gate execution, targets apply updates. Each collection executes in its
//! resolved dependency order; templated configuration is re-rendered after
//! every source so later stages can reference earlier outputs.

mod condition;
mod source;
mod target;

pub use condition::ConditionNode;
pub use source::SourceNode;
pub use target::TargetNode;

use crate::dependson::{self, Dependency, DependencyOutcome, ResourceKind};
use crate::graph::DependencyGraph;
use crate::manifest::ManifestSpec;
use crate::report::{Report, StageReport};
use crate::result::ResourceResult;
use crate::scm::Scm;
use anyhow::Context;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Run options shared by every pipeline of an engine run.
#[derive(Debug, Clone, Copy)]
pub struct PipelineOptions {
    /// Report what would change without touching anything.
    pub dry_run: bool,

    /// Stage and commit target changes into their working copies.
    pub commit: bool,

    /// Push committed changes during reconciliation.
    pub push: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            commit: true,
            push: true,
        }
    }
}

/// One manifest execution unit.
pub struct Pipeline {
    /// Pipeline name, for humans.
    pub name: String,

    /// Stable pipeline identifier from the manifest.
    pub id: String,

    /// Unique identifier of this run.
    pub run_id: String,

    /// Pristine manifest, the rendering input.
    spec: ManifestSpec,

    /// SCM handles keyed by manifest identifier.
    pub scms: BTreeMap<String, Scm>,

    /// Source nodes keyed by identifier.
    pub sources: BTreeMap<String, SourceNode>,

    /// Condition nodes keyed by identifier.
    pub conditions: BTreeMap<String, ConditionNode>,

    /// Target nodes keyed by identifier.
    pub targets: BTreeMap<String, TargetNode>,

    /// Accumulated run report.
    pub report: Report,

    pub options: PipelineOptions,

    /// Outputs of successfully run sources, the rendering context.
    source_outputs: BTreeMap<String, String>,

    /// Results of already-run nodes, keyed by qualified `kind#id`.
    outcomes: BTreeMap<String, DependencyOutcome>,

    /// Set when any node's underlying operation errored.
    errored: bool,
}

impl Pipeline {
    /// Initialize a pipeline from a validated manifest.
    pub fn new(spec: ManifestSpec, options: PipelineOptions) -> anyhow::Result<Self> {
        let id = if spec.pipeline_id.is_empty() {
            spec.name.clone()
        } else {
            spec.pipeline_id.clone()
        };
        let name = if spec.name.is_empty() {
            id.clone()
        } else {
            spec.name.clone()
        };

        let mut scms = BTreeMap::new();
        for (scm_id, config) in &spec.scms {
            let scm = Scm::new(config, &id)
                .with_context(|| format!("initializing scm {:?}", scm_id))?;
            if let Some(scm) = scm {
                scms.insert(scm_id.clone(), scm);
            }
        }

        let mut report = Report::new(&name, &id);
        let mut outcomes = BTreeMap::new();

        let sources: BTreeMap<String, SourceNode> = spec
            .sources
            .iter()
            .map(|(id, config)| (id.clone(), SourceNode::new(config.clone())))
            .collect();
        let conditions: BTreeMap<String, ConditionNode> = spec
            .conditions
            .iter()
            .map(|(id, config)| (id.clone(), ConditionNode::new(config.clone())))
            .collect();
        let targets: BTreeMap<String, TargetNode> = spec
            .targets
            .iter()
            .map(|(id, config)| (id.clone(), TargetNode::new(config.clone())))
            .collect();

        for (id, node) in &sources {
            report
                .sources
                .insert(id.clone(), StageReport::pending(&node.config.resource.name, &node.config.resource.kind));
            outcomes.insert(
                format!("{}#{}", ResourceKind::Source, id),
                DependencyOutcome {
                    kind: ResourceKind::Source,
                    result: ResourceResult::Skipped,
                    changed: false,
                },
            );
        }
        for (id, node) in &conditions {
            report
                .conditions
                .insert(id.clone(), StageReport::pending(&node.config.resource.name, &node.config.resource.kind));
            outcomes.insert(
                format!("{}#{}", ResourceKind::Condition, id),
                DependencyOutcome {
                    kind: ResourceKind::Condition,
                    result: ResourceResult::Skipped,
                    changed: false,
                },
            );
        }
        for (id, node) in &targets {
            report
                .targets
                .insert(id.clone(), StageReport::pending(&node.config.resource.name, &node.config.resource.kind));
            outcomes.insert(
                format!("{}#{}", ResourceKind::Target, id),
                DependencyOutcome {
                    kind: ResourceKind::Target,
                    result: ResourceResult::Skipped,
                    changed: false,
                },
            );
        }

        Ok(Self {
            name,
            id,
            run_id: Uuid::new_v4().to_string(),
            spec,
            scms,
            sources,
            conditions,
            targets,
            report,
            options,
            source_outputs: BTreeMap::new(),
            outcomes,
            errored: false,
        })
    }

    /// The pull-request groups declared by the manifest, rendered against
    /// the current source outputs.
    pub(crate) fn rendered_pullrequests(
        &self,
    ) -> BTreeMap<String, crate::manifest::PullRequestConfig> {
        self.spec.rendered(&self.source_outputs).pullrequests
    }

    /// Re-render every node configuration against the current source
    /// outputs. Runs after each source completes.
    fn refresh(&mut self) {
        let rendered = self.spec.rendered(&self.source_outputs);

        for (id, config) in rendered.sources {
            if let Some(node) = self.sources.get_mut(&id) {
                node.config = config;
            }
        }
        for (id, config) in rendered.conditions {
            if let Some(node) = self.conditions.get_mut(&id) {
                node.config = config;
            }
        }
        for (id, config) in rendered.targets {
            if let Some(node) = self.targets.get_mut(&id) {
                node.config = config;
            }
        }
    }

    /// Output of a source, when it ran successfully.
    pub fn source_output(&self, id: &str) -> Option<&str> {
        self.source_outputs.get(id).map(String::as_str)
    }

    fn record(
        &mut self,
        kind: ResourceKind,
        id: &str,
        result: ResourceResult,
        changed: bool,
        description: &str,
    ) {
        self.outcomes.insert(
            format!("{}#{}", kind, id),
            DependencyOutcome {
                kind,
                result,
                changed,
            },
        );

        let (stages, name, stage_kind, source_id) = match kind {
            ResourceKind::Source => {
                let node = &self.sources[id];
                (
                    &mut self.report.sources,
                    node.config.resource.name.clone(),
                    node.config.resource.kind.clone(),
                    None,
                )
            }
            ResourceKind::Condition => {
                let node = &self.conditions[id];
                (
                    &mut self.report.conditions,
                    node.config.resource.name.clone(),
                    node.config.resource.kind.clone(),
                    Some(node.config.source_id.clone()),
                )
            }
            ResourceKind::Target => {
                let node = &self.targets[id];
                (
                    &mut self.report.targets,
                    node.config.resource.name.clone(),
                    node.config.resource.kind.clone(),
                    Some(node.config.source_id.clone()),
                )
            }
        };

        stages.insert(
            id.to_string(),
            StageReport {
                name: if name.is_empty() { id.to_string() } else { name },
                kind: stage_kind,
                result,
                description: description.to_string(),
                changed,
                source_id: source_id.filter(|s| !s.is_empty()),
            },
        );
    }

    /// Gate decision for a node, from its parsed `dependson` entries.
    fn gate(
        &self,
        depends_on: &[String],
        own_kind: ResourceKind,
        depends_on_change: bool,
    ) -> anyhow::Result<dependson::Evaluation> {
        let entries: Vec<Dependency> = depends_on
            .iter()
            .map(|raw| Dependency::parse(raw))
            .collect::<Result<_, _>>()
            .context("parsing dependson reference")?;
        Ok(dependson::evaluate(
            &entries,
            own_kind,
            depends_on_change,
            &self.outcomes,
        ))
    }

    /// Working directory for a node: its SCM working copy after checkout,
    /// or the process working directory.
    async fn working_dir(&self, scm_id: &str) -> anyhow::Result<PathBuf> {
        if scm_id.is_empty() {
            return std::env::current_dir().context("resolving current directory");
        }
        let scm = self
            .scms
            .get(scm_id)
            .with_context(|| format!("scm id {:?} doesn't exist", scm_id))?;
        scm.handler.checkout().await?;
        Ok(scm.handler.get_directory())
    }

    fn collection_order(
        nodes: BTreeMap<String, Vec<String>>,
    ) -> Result<Vec<String>, crate::graph::GraphError> {
        DependencyGraph::resolve(&nodes)
    }

    fn same_kind_deps(depends_on: &[String], own: ResourceKind) -> anyhow::Result<Vec<String>> {
        let mut out = Vec::new();
        for raw in depends_on {
            let dep = Dependency::parse(raw).context("parsing dependson reference")?;
            if dep.kind.is_none() || dep.kind == Some(own) {
                out.push(dep.id);
            }
        }
        Ok(out)
    }

    fn resolve_orders(&self) -> anyhow::Result<(Vec<String>, Vec<String>, Vec<String>)> {
        let sources = self
            .sources
            .iter()
            .map(|(id, n)| {
                Self::same_kind_deps(&n.config.resource.depends_on, ResourceKind::Source)
                    .map(|deps| (id.clone(), deps))
            })
            .collect::<anyhow::Result<_>>()?;
        let conditions = self
            .conditions
            .iter()
            .map(|(id, n)| {
                Self::same_kind_deps(&n.config.resource.depends_on, ResourceKind::Condition)
                    .map(|deps| (id.clone(), deps))
            })
            .collect::<anyhow::Result<_>>()?;
        let targets = self
            .targets
            .iter()
            .map(|(id, n)| {
                Self::same_kind_deps(&n.config.resource.depends_on, ResourceKind::Target)
                    .map(|deps| (id.clone(), deps))
            })
            .collect::<anyhow::Result<_>>()?;

        Ok((
            Self::collection_order(sources).context("resolving sources order")?,
            Self::collection_order(conditions).context("resolving conditions order")?,
            Self::collection_order(targets).context("resolving targets order")?,
        ))
    }

    /// Aggregate result of the condition collection; targets only run when
    /// it is satisfied.
    fn conditions_satisfied(&self) -> bool {
        if self.conditions.is_empty() {
            return true;
        }
        ResourceResult::aggregate(self.conditions.values().map(|c| c.result))
            == ResourceResult::Success
    }

    fn unsatisfied_conditions(&self) -> Vec<String> {
        self.conditions
            .iter()
            .filter(|(_, c)| c.result != ResourceResult::Success)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Execute the pipeline: sources, then conditions, then targets, then
    /// pull-request reconciliation.
    ///
    /// A graph-resolution failure aborts this pipeline only; stage
    /// execution failures are recorded per node and sibling nodes keep
    /// running.
    pub async fn run(&mut self) -> anyhow::Result<()> {
        info!(pipeline = %self.name, run_id = %self.run_id, "running pipeline");

        let (source_order, condition_order, target_order) = match self.resolve_orders() {
            Ok(orders) => orders,
            Err(e) => {
                self.report.result = ResourceResult::Failure;
                self.report.err = e.to_string();
                return Err(e);
            }
        };

        debug!(
            sources = ?source_order,
            conditions = ?condition_order,
            targets = ?target_order,
            "resolved execution order"
        );

        for id in &source_order {
            self.refresh();
            self.run_source(id).await;
        }

        for id in &condition_order {
            self.refresh();
            self.run_condition(id).await;
        }

        for id in &target_order {
            self.refresh();
            self.run_target(id).await;
        }

        self.report.result = self.aggregate();

        if let Err(e) = self.run_pull_requests().await {
            error!(pipeline = %self.name, "pull request reconciliation failed: {e:#}");
            self.report.result = ResourceResult::Failure;
            self.report.err = format!("{e:#}");
            return Err(e);
        }

        Ok(())
    }

    fn aggregate(&self) -> ResourceResult {
        if self.errored {
            return ResourceResult::Failure;
        }
        if !self.targets.is_empty() {
            return ResourceResult::aggregate(self.targets.values().map(|t| t.result));
        }
        // No target: the retrieval/check stages decide.
        ResourceResult::aggregate(
            self.sources
                .values()
                .map(|s| s.result)
                .chain(self.conditions.values().map(|c| c.result)),
        )
    }

    pub(crate) fn mark_errored(&mut self) {
        self.errored = true;
    }

    /// Render the pipeline's dependency graph in DOT format.
    pub fn graph_dot(&self) -> anyhow::Result<String> {
        let mut out = String::new();
        out.push_str("digraph G {\n");

        let style = |kind: ResourceKind| match kind {
            ResourceKind::Source => ("ellipse", "lightblue"),
            ResourceKind::Condition => ("diamond", "orange"),
            ResourceKind::Target => ("box", "lightyellow"),
        };

        let mut edges: Vec<(String, String)> = Vec::new();

        let mut write_node = |out: &mut String,
                              kind: ResourceKind,
                              id: &str,
                              name: &str,
                              resource_kind: &str| {
            let (shape, color) = style(kind);
            let label = if name.is_empty() { id } else { name };
            out.push_str(&format!(
                "    \"{}#{}\" [label=\"{} ({})\", shape={}, style=filled, color={}];\n",
                kind,
                id,
                label.replace('"', "\\\""),
                resource_kind,
                shape,
                color
            ));
        };

        for (id, node) in &self.sources {
            write_node(
                &mut out,
                ResourceKind::Source,
                id,
                &node.config.resource.name,
                &node.config.resource.kind,
            );
            for raw in &node.config.resource.depends_on {
                let dep = Dependency::parse(raw)?;
                edges.push((
                    dep.qualified_id(ResourceKind::Source),
                    format!("{}#{}", ResourceKind::Source, id),
                ));
            }
        }
        for (id, node) in &self.conditions {
            write_node(
                &mut out,
                ResourceKind::Condition,
                id,
                &node.config.resource.name,
                &node.config.resource.kind,
            );
            for raw in &node.config.resource.depends_on {
                let dep = Dependency::parse(raw)?;
                edges.push((
                    dep.qualified_id(ResourceKind::Condition),
                    format!("{}#{}", ResourceKind::Condition, id),
                ));
            }
        }
        for (id, node) in &self.targets {
            write_node(
                &mut out,
                ResourceKind::Target,
                id,
                &node.config.resource.name,
                &node.config.resource.kind,
            );
            for raw in &node.config.resource.depends_on {
                let dep = Dependency::parse(raw)?;
                edges.push((
                    dep.qualified_id(ResourceKind::Target),
                    format!("{}#{}", ResourceKind::Target, id),
                ));
            }
        }

        for (from, to) in edges {
            out.push_str(&format!("    \"{}\" -> \"{}\";\n", from, to));
        }

        out.push_str("}\n");
        Ok(out)
    }
}

impl std::fmt::Display for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\"Name\": {:?}", self.name)?;
        writeln!(f, "\"ID\": {:?}", self.id)?;

        writeln!(f, "\"Sources\":")?;
        for (id, node) in &self.sources {
            writeln!(f, "\t{:?}:", id)?;
            writeln!(f, "\t\t\"Kind\": {:?}", node.config.resource.kind)?;
            writeln!(f, "\t\t\"Result\": {:?}", node.result.glyph())?;
        }
        writeln!(f, "\"Conditions\":")?;
        for (id, node) in &self.conditions {
            writeln!(f, "\t{:?}:", id)?;
            writeln!(f, "\t\t\"Kind\": {:?}", node.config.resource.kind)?;
            writeln!(f, "\t\t\"Result\": {:?}", node.result.glyph())?;
        }
        writeln!(f, "\"Targets\":")?;
        for (id, node) in &self.targets {
            writeln!(f, "\t{:?}:", id)?;
            writeln!(f, "\t\t\"Kind\": {:?}", node.config.resource.kind)?;
            writeln!(f, "\t\t\"Result\": {:?}", node.result.glyph())?;
        }
        Ok(())
    }
}
