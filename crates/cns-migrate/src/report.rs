use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

use crate::types::{MigrationOutcome, OutcomeState};

/// Outcome of a whole migration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationReport {
    /// Source datastore name.
    pub source: String,
    /// Destination datastore name.
    pub destination: String,
    /// Number of volumes in the input list.
    pub requested: usize,
    /// One outcome per processed volume, in input order.
    pub outcomes: Vec<MigrationOutcome>,
    /// Whether the run stopped early on cancellation.
    pub cancelled: bool,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    pub finished_at: Option<DateTime<Utc>>,
}

impl MigrationReport {
    /// Empty report for a run that is about to start.
    pub fn new(source: String, destination: String, requested: usize) -> Self {
        Self {
            source,
            destination,
            requested,
            outcomes: Vec::new(),
            cancelled: false,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Records the outcomes and the finish time.
    pub fn finish(&mut self, outcomes: Vec<MigrationOutcome>) {
        self.outcomes = outcomes;
        self.finished_at = Some(Utc::now());
    }

    /// Number of volumes with an outcome.
    pub fn processed(&self) -> usize {
        self.outcomes.len()
    }

    /// Number of outcomes in `state`.
    pub fn count(&self, state: OutcomeState) -> usize {
        self.outcomes.iter().filter(|o| o.state == state).count()
    }

    /// Outcomes that ended in [`OutcomeState::Failed`].
    pub fn failures(&self) -> impl Iterator<Item = &MigrationOutcome> {
        self.outcomes
            .iter()
            .filter(|o| o.state == OutcomeState::Failed)
    }

    /// Whether any volume failed.
    pub fn has_failures(&self) -> bool {
        self.failures().next().is_some()
    }

    /// Wall-clock run time, once finished.
    pub fn duration_secs(&self) -> Option<i64> {
        self.finished_at
            .map(|end| (end - self.started_at).num_seconds())
    }

    /// Line-oriented summary: one row per requested volume, then totals.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Migration from datastore {} to {}",
            self.source, self.destination
        );
        let _ = writeln!(
            out,
            "{:<40} {:<22} {:<38} {}",
            "PV", "OUTCOME", "VOLUME ID", "DETAIL"
        );
        let _ = writeln!(out, "{}", "-".repeat(110));
        for o in &self.outcomes {
            let _ = writeln!(
                out,
                "{:<40} {:<22} {:<38} {}",
                o.pv_name,
                o.state.to_string(),
                o.volume_id.as_deref().unwrap_or("-"),
                o.detail()
            );
        }
        let _ = writeln!(out, "{}", "-".repeat(110));
        let _ = writeln!(
            out,
            "migrated: {}  already at destination: {}  in use: {}  not eligible: {}  failed: {}",
            self.count(OutcomeState::Migrated),
            self.count(OutcomeState::AlreadyAtDestination),
            self.count(OutcomeState::SkippedInUse),
            self.count(OutcomeState::SkippedNotEligible),
            self.count(OutcomeState::Failed),
        );
        if let Some(secs) = self.duration_secs() {
            let _ = writeln!(out, "finished in {}s", secs);
        }
        if self.cancelled {
            let _ = writeln!(
                out,
                "cancelled after {} of {} volumes",
                self.processed(),
                self.requested
            );
        }
        if self.has_failures() {
            let _ = writeln!(out, "failed volumes:");
            for o in self.failures() {
                let _ = writeln!(out, "  {}: {}", o.pv_name, o.detail());
            }
        }
        out
    }

    /// Serializes the report as pretty-printed JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
