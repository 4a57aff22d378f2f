//! upshift core library
//!
//! Declarative dependency-update automation: manifests describe sources
//! (where to read a value), conditions (predicates gating execution) and
//! targets (files or resources to update). The engine resolves a
//! per-collection dependency graph, drives every pipeline through
//! sources → conditions → targets, and reconciles the results into
//! deduplicated git pushes and pull requests.

pub mod dependson;
pub mod engine;
pub mod graph;
pub mod manifest;
pub mod pipeline;
pub mod plugins;
pub mod pullrequest;
pub mod report;
pub mod resource;
pub mod result;
pub mod scm;
pub mod telemetry;

pub use dependson::{Dependency, DependencyOutcome, DependsOnError, Operator, ResourceKind};

pub use engine::{Engine, EngineOptions, DEFAULT_MANIFEST_DIR, DEFAULT_MANIFEST_FILE};

pub use graph::{DependencyGraph, GraphError};

pub use manifest::{
    ConditionConfig, ManifestError, ManifestSpec, PullRequestConfig, SourceConfig, TargetConfig,
};

pub use pipeline::{ConditionNode, Pipeline, PipelineOptions, SourceNode, TargetNode};

pub use pullrequest::{PullRequestError, PullRequestHandler};

pub use report::{Report, Reports, RunSummary, StageReport};

pub use resource::{
    Condition, ConditionOutcome, ResourceConfig, ResourceError, Source, SourceOutput, Target,
    TargetOutcome,
};

pub use result::ResourceResult;

pub use scm::{Branches, Scm, ScmConfig, ScmError, ScmHandler};

pub use telemetry::init_tracing;
