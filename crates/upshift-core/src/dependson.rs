//! `dependson` reference grammar and run/skip evaluation.
//!
//! A reference follows `(kind#)identifier(:operator)`:
//!
//! - `kind` is `source`, `condition` or `target` and defaults to the
//!   declaring node's own collection,
//! - `operator` is `and` (default) or `or`.
//!
//! `and` entries must all hold for the node to run, unless at least one
//! `or` entry holds. An unrecognized operator behaves as a failing `and`
//! entry, so a typo can only ever skip work, never run it.

use crate::result::ResourceResult;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Collection a stage node belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Source,
    Condition,
    Target,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResourceKind::Source => "source",
            ResourceKind::Condition => "condition",
            ResourceKind::Target => "target",
        };
        f.write_str(s)
    }
}

impl FromStr for ResourceKind {
    type Err = DependsOnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "source" => Ok(ResourceKind::Source),
            "condition" => Ok(ResourceKind::Condition),
            "target" => Ok(ResourceKind::Target),
            other => Err(DependsOnError::UnknownKind(other.to_string())),
        }
    }
}

/// Malformed `dependson` references. These are configuration errors and
/// abort the owning pipeline.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DependsOnError {
    #[error("empty dependson reference")]
    Empty,

    #[error("unknown resource kind {0:?} in dependson reference")]
    UnknownKind(String),
}

/// Boolean operator attached to a `dependson` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operator {
    And,
    Or,
    /// Anything else. Kept verbatim for the report, treated as a failing
    /// `and` entry.
    Unknown(String),
}

/// One parsed `dependson` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    /// Referenced collection; `None` means the declaring node's own.
    pub kind: Option<ResourceKind>,
    /// Referenced identifier within that collection.
    pub id: String,
    pub operator: Operator,
}

impl Dependency {
    /// Parse a raw `(kind#)id(:operator)` reference.
    pub fn parse(raw: &str) -> Result<Self, DependsOnError> {
        let (prefix, rest) = match raw.split_once('#') {
            Some((kind, rest)) => (Some(kind.parse::<ResourceKind>()?), rest),
            None => (None, raw),
        };

        let (id, operator) = match rest.rsplit_once(':') {
            Some((id, "and")) => (id, Operator::And),
            Some((id, "or")) => (id, Operator::Or),
            Some((id, other)) => (id, Operator::Unknown(other.to_string())),
            None => (rest, Operator::And),
        };

        if id.is_empty() {
            return Err(DependsOnError::Empty);
        }

        Ok(Dependency {
            kind: prefix,
            id: id.to_string(),
            operator,
        })
    }

    /// Qualified `kind#id` key, with `own_kind` filling an absent prefix.
    pub fn qualified_id(&self, own_kind: ResourceKind) -> String {
        format!("{}#{}", self.kind.unwrap_or(own_kind), self.id)
    }
}

/// Result snapshot of an already-evaluated dependency.
#[derive(Debug, Clone, Copy)]
pub struct DependencyOutcome {
    pub kind: ResourceKind,
    pub result: ResourceResult,
    pub changed: bool,
}

/// Decision produced by [`evaluate`].
#[derive(Debug, Clone)]
pub struct Evaluation {
    /// Whether the node should run.
    pub run: bool,
    /// Human-readable description of the unmet entries when skipping.
    pub unmet: Option<String>,
}

impl Evaluation {
    fn run() -> Self {
        Evaluation {
            run: true,
            unmet: None,
        }
    }
}

/// Decide whether a node may run given the outcomes of its dependencies.
///
/// `outcomes` is keyed by qualified `kind#id`. A reference missing from the
/// map counts as a failed dependency: an unresolved entity never turns into
/// a false success.
pub fn evaluate(
    entries: &[Dependency],
    own_kind: ResourceKind,
    depends_on_change: bool,
    outcomes: &BTreeMap<String, DependencyOutcome>,
) -> Evaluation {
    if entries.is_empty() {
        return Evaluation::run();
    }

    let mut has_and = false;
    let mut all_and_met = true;
    let mut any_or_met = false;
    let mut reasons: Vec<String> = Vec::new();

    for entry in entries {
        let key = entry.qualified_id(own_kind);
        let outcome = outcomes.get(&key).copied();

        match &entry.operator {
            Operator::And => {
                has_and = true;
                if !and_entry_met(outcome, depends_on_change) {
                    all_and_met = false;
                    reasons.push(format!("required dependency {:?} not met", key));
                }
            }
            Operator::Or => {
                if or_entry_met(outcome, depends_on_change) {
                    any_or_met = true;
                } else {
                    reasons.push(format!("optional dependency {:?} not met", key));
                }
            }
            Operator::Unknown(op) => {
                has_and = true;
                all_and_met = false;
                reasons.push(format!("invalid boolean operator {:?} on {:?}", op, key));
            }
        }
    }

    if any_or_met || (has_and && all_and_met) {
        return Evaluation::run();
    }

    Evaluation {
        run: false,
        unmet: Some(reasons.join(", ")),
    }
}

fn and_entry_met(outcome: Option<DependencyOutcome>, depends_on_change: bool) -> bool {
    let Some(outcome) = outcome else {
        return false;
    };
    if depends_on_change && outcome.kind == ResourceKind::Target {
        return outcome.changed;
    }
    outcome.result != ResourceResult::Failure
}

fn or_entry_met(outcome: Option<DependencyOutcome>, depends_on_change: bool) -> bool {
    let Some(outcome) = outcome else {
        return false;
    };
    if depends_on_change && outcome.kind == ResourceKind::Target {
        return outcome.changed;
    }
    outcome.result.ran_successfully()
}
