//! Per-node results merged up the hierarchy into a run summary.

use serde::Serialize;
use std::fmt;
use std::time::Duration;

use notemirror_common::{Error, NodeKind};

/// Counters accumulated over a subtree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    /// Nodes whose metadata file was (re)written.
    pub nodes_written: usize,
    /// Nodes skipped because the mirror was already fresh.
    pub nodes_skipped: usize,
    /// Nodes left out this run after a transient failure.
    pub nodes_unavailable: usize,
    /// Nodes that failed fatally.
    pub nodes_failed: usize,
    /// Resources downloaded.
    pub resources_fetched: usize,
    /// Resources already on disk.
    pub resources_reused: usize,
    /// Resources left remote after a failed download.
    pub resources_failed: usize,
}

impl SyncStats {
    /// Add another subtree's counters.
    pub fn merge(&mut self, other: &SyncStats) {
        self.nodes_written += other.nodes_written;
        self.nodes_skipped += other.nodes_skipped;
        self.nodes_unavailable += other.nodes_unavailable;
        self.nodes_failed += other.nodes_failed;
        self.resources_fetched += other.resources_fetched;
        self.resources_reused += other.resources_reused;
        self.resources_failed += other.resources_failed;
    }
}

/// A node that was not mirrored this run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureRecord {
    pub kind: NodeKind,
    pub name: String,
    pub reason: String,
    /// Whether the next run is expected to succeed without intervention.
    pub transient: bool,
}

impl fmt::Display for FailureRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = if self.transient { "unavailable" } else { "failed" };
        write!(f, "{} '{}' {}: {}", self.kind, self.name, label, self.reason)
    }
}

/// Result of synchronizing one node and its subtree.
///
/// `success` is false once anything in the subtree failed fatally.
/// `complete` additionally requires that nothing was skipped as unavailable,
/// filtered out or cancelled; only a complete subtree may record its
/// container's metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeReport {
    pub success: bool,
    pub complete: bool,
    pub stats: SyncStats,
    pub failures: Vec<FailureRecord>,
}

impl Default for NodeReport {
    fn default() -> Self {
        Self {
            success: true,
            complete: true,
            stats: SyncStats::default(),
            failures: Vec::new(),
        }
    }
}

impl NodeReport {
    /// Node already fresh.
    pub fn fresh() -> Self {
        let mut report = Self::default();
        report.stats.nodes_skipped = 1;
        report
    }

    /// Node fully written.
    pub fn written() -> Self {
        let mut report = Self::default();
        report.stats.nodes_written = 1;
        report
    }

    /// Node abandoned because cancellation was observed.
    pub fn cancelled() -> Self {
        Self {
            complete: false,
            ..Self::default()
        }
    }

    /// Node left out after `error`, classified as unavailable or failed.
    pub fn from_error(kind: NodeKind, name: &str, error: &Error) -> Self {
        if matches!(error, Error::Cancelled) {
            return Self::cancelled();
        }

        let transient = error.is_transient();
        let mut report = Self {
            success: transient,
            complete: false,
            ..Self::default()
        };
        if transient {
            report.stats.nodes_unavailable = 1;
        } else {
            report.stats.nodes_failed = 1;
        }
        report.failures.push(FailureRecord {
            kind,
            name: name.to_string(),
            reason: error.to_string(),
            transient,
        });
        report
    }

    /// Fold a child's report into this one.
    pub fn merge(&mut self, child: NodeReport) {
        self.success &= child.success;
        self.complete &= child.complete;
        self.stats.merge(&child.stats);
        self.failures.extend(child.failures);
    }

    /// Mark the subtree as only partly mirrored.
    pub fn mark_partial(&mut self) {
        self.complete = false;
    }
}

/// Summary of a whole run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    /// Notebooks selected for this run.
    pub notebooks: usize,
    pub stats: SyncStats,
    pub failures: Vec<FailureRecord>,
    /// Whether the run was cancelled before finishing.
    pub cancelled: bool,
    /// Whether everything selected was mirrored.
    pub complete: bool,
    pub duration: Duration,
}

impl SyncReport {
    /// Build the run summary from the merged notebook reports.
    pub fn new(notebooks: usize, root: NodeReport, cancelled: bool, duration: Duration) -> Self {
        Self {
            notebooks,
            stats: root.stats,
            failures: root.failures,
            cancelled,
            complete: root.complete && !cancelled,
            duration,
        }
    }

    /// No node failed fatally and the run was not cancelled.
    pub fn is_success(&self) -> bool {
        self.stats.nodes_failed == 0 && !self.cancelled
    }

    /// One-line summary for logs and the CLI.
    pub fn summary(&self) -> String {
        format!(
            "{} notebooks in {:.1?}: {} written, {} fresh, {} unavailable, {} failed; resources {} fetched, {} reused, {} failed{}",
            self.notebooks,
            self.duration,
            self.stats.nodes_written,
            self.stats.nodes_skipped,
            self.stats.nodes_unavailable,
            self.stats.nodes_failed,
            self.stats.resources_fetched,
            self.stats.resources_reused,
            self.stats.resources_failed,
            if self.cancelled { " (cancelled)" } else { "" }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_propagates_failure() {
        let mut parent = NodeReport::default();
        parent.merge(NodeReport::written());
        parent.merge(NodeReport::from_error(
            NodeKind::Section,
            "B",
            &Error::Http {
                status: 403,
                message: "Forbidden".to_string(),
            },
        ));

        assert!(!parent.success);
        assert!(!parent.complete);
        assert_eq!(parent.stats.nodes_written, 1);
        assert_eq!(parent.stats.nodes_failed, 1);
        assert_eq!(parent.failures.len(), 1);
        assert!(!parent.failures[0].transient);
    }

    #[test]
    fn test_unavailable_is_incomplete_but_not_a_failure() {
        let mut parent = NodeReport::default();
        parent.merge(NodeReport::fresh());
        parent.merge(NodeReport::from_error(
            NodeKind::Page,
            "Draft",
            &Error::Unavailable("HTTP 504".to_string()),
        ));

        assert!(parent.success);
        assert!(!parent.complete);
        assert_eq!(parent.stats.nodes_unavailable, 1);
        assert!(parent.failures[0].to_string().contains("unavailable"));
    }

    #[test]
    fn test_cancelled_is_not_recorded() {
        let report = NodeReport::from_error(NodeKind::Notebook, "Work", &Error::Cancelled);
        assert!(report.success);
        assert!(!report.complete);
        assert!(report.failures.is_empty());
    }

    #[test]
    fn test_sync_report_success() {
        let mut root = NodeReport::default();
        root.merge(NodeReport::written());

        let report = SyncReport::new(1, root.clone(), false, Duration::from_millis(1500));
        assert!(report.is_success());
        assert!(report.complete);
        assert!(report.summary().starts_with("1 notebooks"));

        let cancelled = SyncReport::new(1, root, true, Duration::ZERO);
        assert!(!cancelled.is_success());
        assert!(cancelled.summary().ends_with("(cancelled)"));
    }
}
