//! Reconciliation of one source's occurrences against what is materialized.

mod diff_kind;
mod report;
mod source_diff;

pub use diff_kind::DiffKind;
pub use report::{ReconcileReport, RunReport, SourceOutcome, SourceRunReport, SourceStage};
pub use source_diff::{ApplyContext, SourceDiff, StaleOccurrence};
