//! Terminal rendering for feedsync types.

use feedsync_core::FeedSource;
use feedsync_core::occurrence::OccurrenceId;
use feedsync_core::sync::{DiffKind, ReconcileReport, RunReport, SourceOutcome, SourceRunReport};
use feedsync_core::upload::PreviewEvent;
use owo_colors::OwoColorize;

pub trait Render {
    fn render(&self) -> String;
}

impl Render for DiffKind {
    fn render(&self) -> String {
        let symbol = self.to_string();
        match self {
            DiffKind::Create => symbol.green().to_string(),
            DiffKind::Delete => symbol.red().to_string(),
            DiffKind::Stale => symbol.yellow().to_string(),
        }
    }
}

/// Show counts instead of individual occurrences above this
const COMPACT_THRESHOLD: usize = 5;

fn render_ids(kind: DiffKind, ids: &[OccurrenceId], lines: &mut Vec<String>) {
    if ids.len() <= COMPACT_THRESHOLD {
        for id in ids {
            lines.push(format!("   {} {}", kind.render(), id));
        }
        return;
    }

    let label = match kind {
        DiffKind::Create => format!("({} created)", ids.len()).green().to_string(),
        DiffKind::Delete => format!("({} deleted)", ids.len()).red().to_string(),
        DiffKind::Stale => format!("({} stale)", ids.len()).yellow().to_string(),
    };
    lines.push(format!("   {} {}", kind.render(), label));
}

impl Render for ReconcileReport {
    fn render(&self) -> String {
        if self.is_noop() {
            return format!("   No changes ({} unchanged)", self.unchanged)
                .dimmed()
                .to_string();
        }

        let mut lines = Vec::new();
        render_ids(DiffKind::Create, &self.created, &mut lines);
        render_ids(DiffKind::Delete, &self.deleted, &mut lines);

        for id in &self.failed_creates {
            lines.push(format!("   {} {}", "!".red(), format!("{id} (create failed)").red()));
        }
        for id in &self.failed_deletes {
            lines.push(format!("   {} {}", "!".red(), format!("{id} (delete failed)").red()));
        }
        if self.stale > 0 {
            lines.push(format!("   {} {}", DiffKind::Stale.render(), format!("({} changed upstream, not updated)", self.stale).yellow()));
        }
        if self.materialized_elsewhere > 0 {
            lines.push(format!("   ({} already published elsewhere)", self.materialized_elsewhere).dimmed().to_string());
        }

        lines.join("\n")
    }
}

impl Render for SourceRunReport {
    fn render(&self) -> String {
        let header = format!("{} {}", self.url.bold(), self.source_id.to_string().dimmed());

        let body = match &self.outcome {
            SourceOutcome::Reconciled(report) => report.render(),
            SourceOutcome::GroupMissing { group } => {
                format!("   Group {group} not found, skipped").yellow().to_string()
            }
            SourceOutcome::Failed { stage, error } => {
                format!("   Failed to {stage}: {error}").red().to_string()
            }
        };

        format!("{header}\n{body}")
    }
}

impl Render for RunReport {
    fn render(&self) -> String {
        if self.0.is_empty() {
            return "No active sources".dimmed().to_string();
        }

        let mut blocks: Vec<_> = self.0.iter().map(Render::render).collect();

        let (reconciled, skipped, failed) = self.source_counts();
        let (created, deleted, failed_occurrences) = self.occurrence_counts();
        let mut summary = format!(
            "\n{reconciled} reconciled, {skipped} skipped, {failed} failed: {created} created, {deleted} deleted"
        );
        if failed_occurrences > 0 {
            summary.push_str(&format!(", {failed_occurrences} occurrences failed"));
        }
        blocks.push(summary);

        blocks.join("\n")
    }
}

impl Render for FeedSource {
    fn render(&self) -> String {
        let state = if self.active {
            "active".green().to_string()
        } else {
            "inactive".dimmed().to_string()
        };

        format!(
            "{} {}\n   group {}  {}",
            self.url.bold(),
            self.id.to_string().dimmed(),
            self.group_id,
            state
        )
    }
}

impl Render for PreviewEvent {
    fn render(&self) -> String {
        let time = if self.all_day {
            self.dtstart.format("%Y-%m-%d").to_string()
        } else {
            format!("{} ({})", self.dtstart.format("%Y-%m-%d %H:%M"), self.duration)
        };

        let marker = if self.already_exists {
            "=".dimmed().to_string()
        } else {
            DiffKind::Create.render()
        };

        let mut line = format!("{} {} {}", marker, self.summary, time.dimmed());
        if !self.tags.is_empty() {
            line.push_str(&format!(" {}", format!("[{}]", self.tags.join(", ")).cyan()));
        }
        line.push_str(&format!("\n    {}", self.id.to_string().dimmed()));
        line
    }
}
