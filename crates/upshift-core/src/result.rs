//! Stage result states and worst-of aggregation.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of one stage node (source, condition or target) run.
///
/// Aggregation ordering: `Failure` dominates, then `Attention` (something
/// changed and needs a review), then `Skipped`, then `Success`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResourceResult {
    /// The node ran and nothing changed.
    Success,
    /// The node ran and failed.
    Failure,
    /// The node ran and produced a change requiring attention.
    Attention,
    /// The node was not run.
    #[default]
    Skipped,
}

impl ResourceResult {
    /// Severity rank used for worst-of aggregation (higher is worse).
    fn severity(self) -> u8 {
        match self {
            ResourceResult::Success => 0,
            ResourceResult::Skipped => 1,
            ResourceResult::Attention => 2,
            ResourceResult::Failure => 3,
        }
    }

    /// Combine two results, keeping the most significant one.
    pub fn worst(self, other: ResourceResult) -> ResourceResult {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }

    /// Fold a set of results into the collection aggregate: the most
    /// significant member present wins. An empty set aggregates to
    /// `Skipped` (nothing ran).
    pub fn aggregate<I>(results: I) -> ResourceResult
    where
        I: IntoIterator<Item = ResourceResult>,
    {
        let mut seen_any = false;
        let mut worst = ResourceResult::Success;

        for r in results {
            seen_any = true;
            worst = worst.worst(r);
        }

        if !seen_any {
            return ResourceResult::Skipped;
        }
        worst
    }

    /// True when the node ran without failing (`Success` or `Attention`).
    pub fn ran_successfully(self) -> bool {
        matches!(self, ResourceResult::Success | ResourceResult::Attention)
    }

    /// Console glyph used in reports and log lines.
    pub fn glyph(self) -> &'static str {
        match self {
            ResourceResult::Success => "\u{2714}",
            ResourceResult::Failure => "\u{2717}",
            ResourceResult::Attention => "\u{26a0}",
            ResourceResult::Skipped => "-",
        }
    }
}

impl fmt::Display for ResourceResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.glyph())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_dominates_aggregate() {
        let agg = ResourceResult::aggregate([
            ResourceResult::Success,
            ResourceResult::Attention,
            ResourceResult::Failure,
        ]);
        assert_eq!(agg, ResourceResult::Failure);
    }

    #[test]
    fn test_attention_beats_success() {
        let agg = ResourceResult::aggregate([ResourceResult::Success, ResourceResult::Attention]);
        assert_eq!(agg, ResourceResult::Attention);
    }

    #[test]
    fn test_all_skipped_aggregates_to_skipped() {
        let agg = ResourceResult::aggregate([ResourceResult::Skipped, ResourceResult::Skipped]);
        assert_eq!(agg, ResourceResult::Skipped);
    }

    #[test]
    fn test_skipped_outranks_success() {
        let agg = ResourceResult::aggregate([ResourceResult::Success, ResourceResult::Skipped]);
        assert_eq!(agg, ResourceResult::Skipped);
    }

    #[test]
    fn test_empty_set_is_skipped() {
        assert_eq!(ResourceResult::aggregate([]), ResourceResult::Skipped);
    }

    #[test]
    fn test_ran_successfully() {
        assert!(ResourceResult::Success.ran_successfully());
        assert!(ResourceResult::Attention.ran_successfully());
        assert!(!ResourceResult::Failure.ran_successfully());
        assert!(!ResourceResult::Skipped.ran_successfully());
    }

    #[test]
    fn test_glyphs_are_distinct() {
        let glyphs = [
            ResourceResult::Success.glyph(),
            ResourceResult::Failure.glyph(),
            ResourceResult::Attention.glyph(),
            ResourceResult::Skipped.glyph(),
        ];
        let unique: std::collections::HashSet<_> = glyphs.iter().collect();
        assert_eq!(unique.len(), glyphs.len());
    }
}
