//! Outcome reporting for single sources and whole runs.

use std::fmt;

use serde::Serialize;

use crate::occurrence::OccurrenceId;
use crate::source::{GroupId, SourceId};

/// What happened when a diff was applied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub created: Vec<OccurrenceId>,
    pub deleted: Vec<OccurrenceId>,
    pub failed_creates: Vec<OccurrenceId>,
    pub failed_deletes: Vec<OccurrenceId>,
    pub unchanged: usize,
    pub stale: usize,
    pub materialized_elsewhere: usize,
}

impl ReconcileReport {
    /// Nothing was changed and nothing failed.
    pub fn is_noop(&self) -> bool {
        self.created.is_empty()
            && self.deleted.is_empty()
            && self.failed_creates.is_empty()
            && self.failed_deletes.is_empty()
    }

    pub fn has_failures(&self) -> bool {
        !self.failed_creates.is_empty() || !self.failed_deletes.is_empty()
    }
}

impl fmt::Display for ReconcileReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} created, {} deleted, {} unchanged",
            self.created.len(),
            self.deleted.len(),
            self.unchanged
        )?;
        if self.has_failures() {
            write!(
                f,
                ", {} failed",
                self.failed_creates.len() + self.failed_deletes.len()
            )?;
        }
        Ok(())
    }
}

/// Where in the per-source pipeline processing stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SourceStage {
    Fetch,
    Parse,
    Expand,
    Reconcile,
}

impl fmt::Display for SourceStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SourceStage::Fetch => "fetch",
            SourceStage::Parse => "parse",
            SourceStage::Expand => "expand",
            SourceStage::Reconcile => "reconcile",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SourceOutcome {
    Reconciled(ReconcileReport),
    /// The target group no longer exists on the publisher.
    GroupMissing { group: GroupId },
    Failed { stage: SourceStage, error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceRunReport {
    pub source_id: SourceId,
    pub url: String,
    pub outcome: SourceOutcome,
}

/// Outcomes of every source processed in one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct RunReport(pub Vec<SourceRunReport>);

impl RunReport {
    /// `(reconciled, skipped, failed)` source counts.
    pub fn source_counts(&self) -> (usize, usize, usize) {
        let mut reconciled = 0;
        let mut skipped = 0;
        let mut failed = 0;

        for report in &self.0 {
            match report.outcome {
                SourceOutcome::Reconciled(_) => reconciled += 1,
                SourceOutcome::GroupMissing { .. } => skipped += 1,
                SourceOutcome::Failed { .. } => failed += 1,
            }
        }

        (reconciled, skipped, failed)
    }

    /// `(created, deleted, failed)` occurrence counts across all sources.
    pub fn occurrence_counts(&self) -> (usize, usize, usize) {
        self.reconciled()
            .fold((0, 0, 0), |(created, deleted, failed), r| {
                (
                    created + r.created.len(),
                    deleted + r.deleted.len(),
                    failed + r.failed_creates.len() + r.failed_deletes.len(),
                )
            })
    }

    pub fn reconciled(&self) -> impl Iterator<Item = &ReconcileReport> {
        self.0.iter().filter_map(|r| match &r.outcome {
            SourceOutcome::Reconciled(report) => Some(report),
            _ => None,
        })
    }

    pub fn get(&self, source_id: &SourceId) -> Option<&SourceRunReport> {
        self.0.iter().find(|r| &r.source_id == source_id)
    }
}
