//! Per-unit state machine records and the batch summary.

use econflow_core::domain::SourceId;
use econflow_core::transform::JoinedPanel;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, warn};

use crate::request::RequestError;

/// Stage a unit of work can fail in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Collecting,
    Standardizing,
    Aggregating,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Collecting => "collecting",
            Stage::Standardizing => "standardizing",
            Stage::Aggregating => "aggregating",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum UnitState {
    Pending,
    Collecting,
    Standardizing,
    Aggregating,
    Done,
    Failed { stage: Stage, reason: String },
}

impl UnitState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, UnitState::Done | UnitState::Failed { .. })
    }

    /// Legal successor states. A collect-only batch finishes straight
    /// after `Collecting`.
    pub fn can_move_to(&self, next: &UnitState) -> bool {
        match (self, next) {
            (UnitState::Pending, UnitState::Collecting)
            | (UnitState::Collecting, UnitState::Done)
            | (UnitState::Collecting, UnitState::Standardizing)
            | (UnitState::Standardizing, UnitState::Aggregating)
            | (UnitState::Aggregating, UnitState::Done) => true,
            (from, UnitState::Failed { .. }) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitState::Pending => f.write_str("pending"),
            UnitState::Collecting => f.write_str("collecting"),
            UnitState::Standardizing => f.write_str("standardizing"),
            UnitState::Aggregating => f.write_str("aggregating"),
            UnitState::Done => f.write_str("done"),
            UnitState::Failed { stage, reason } => write!(f, "failed while {stage}: {reason}"),
        }
    }
}

/// Record counts a unit produced along the way.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitCounts {
    pub raw_records: usize,
    pub standardized_records: usize,
    pub aggregated_records: usize,
    pub duplicates_dropped: usize,
    pub records_quarantined: usize,
    pub partitions_written: usize,
    pub partitions_unchanged: usize,
    pub partitions_removed: usize,
}

/// How one `(source, indicator)` unit ended up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitReport {
    pub source: SourceId,
    pub indicator_code: String,
    pub state: UnitState,
    /// Every state the unit passed through, starting with `Pending`.
    pub history: Vec<UnitState>,
    pub counts: UnitCounts,
}

impl UnitReport {
    pub fn new(source: SourceId, indicator_code: impl Into<String>) -> Self {
        Self {
            source,
            indicator_code: indicator_code.into(),
            state: UnitState::Pending,
            history: vec![UnitState::Pending],
            counts: UnitCounts::default(),
        }
    }

    /// Move to `next`, recording it. Illegal moves are ignored and logged.
    pub fn transition(&mut self, next: UnitState) {
        if !self.state.can_move_to(&next) {
            warn!(
                source = %self.source,
                indicator = %self.indicator_code,
                from = %self.state,
                to = %next,
                "ignoring illegal unit transition"
            );
            return;
        }
        self.history.push(next.clone());
        self.state = next;
    }

    pub fn fail(&mut self, stage: Stage, reason: impl Into<String>) {
        self.transition(UnitState::Failed {
            stage,
            reason: reason.into(),
        });
    }

    pub fn outcome(&self) -> UnitOutcome {
        match &self.state {
            UnitState::Done if self.counts.records_quarantined > 0 => UnitOutcome::Quarantined,
            UnitState::Done => UnitOutcome::Succeeded,
            UnitState::Failed { .. } => UnitOutcome::Failed,
            _ => UnitOutcome::NotStarted,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitOutcome {
    Succeeded,
    /// Finished, but some records were diverted to the rejected area.
    Quarantined,
    Failed,
    NotStarted,
}

/// A request rejected before any of its units ran.
#[derive(Debug, Clone)]
pub struct RequestFailure {
    /// Position of the request in the batch.
    pub index: usize,
    pub source: String,
    pub error: RequestError,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub quarantined: usize,
    pub not_started: usize,
    /// Requests that failed validation; they contribute no units.
    pub rejected_requests: usize,
}

impl BatchSummary {
    pub fn has_failures(&self) -> bool {
        self.failed > 0 || self.rejected_requests > 0
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} units: {} succeeded, {} quarantined, {} failed, {} not started",
            self.total, self.succeeded, self.quarantined, self.failed, self.not_started
        )?;
        if self.rejected_requests > 0 {
            write!(f, "; {} request(s) rejected", self.rejected_requests)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub units: Vec<UnitReport>,
    pub rejected_requests: Vec<RequestFailure>,
    /// Joined aggregated panel over succeeded units, when requested.
    pub panel: Option<JoinedPanel>,
}

impl BatchReport {
    pub fn summary(&self) -> BatchSummary {
        let mut summary = BatchSummary {
            total: self.units.len(),
            rejected_requests: self.rejected_requests.len(),
            ..BatchSummary::default()
        };
        for unit in &self.units {
            match unit.outcome() {
                UnitOutcome::Succeeded => summary.succeeded += 1,
                UnitOutcome::Quarantined => summary.quarantined += 1,
                UnitOutcome::Failed => summary.failed += 1,
                UnitOutcome::NotStarted => summary.not_started += 1,
            }
        }
        summary
    }

    pub fn unit(&self, source: SourceId, indicator_code: &str) -> Option<&UnitReport> {
        self.units
            .iter()
            .find(|u| u.source == source && u.indicator_code == indicator_code)
    }
}

// ─── Notification ─────────────────────────────────────────────────────

/// Receives the batch summary after a run.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, summary: &BatchSummary, report: &BatchReport);
}

/// Logs the summary and every unit that did not succeed cleanly.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl NotificationSink for LogNotifier {
    fn notify(&self, summary: &BatchSummary, report: &BatchReport) {
        info!(
            total = summary.total,
            succeeded = summary.succeeded,
            quarantined = summary.quarantined,
            failed = summary.failed,
            not_started = summary.not_started,
            rejected_requests = summary.rejected_requests,
            "batch finished"
        );
        for unit in &report.units {
            match unit.outcome() {
                UnitOutcome::Failed => warn!(
                    source = %unit.source,
                    indicator = %unit.indicator_code,
                    state = %unit.state,
                    "unit failed"
                ),
                UnitOutcome::Quarantined => warn!(
                    source = %unit.source,
                    indicator = %unit.indicator_code,
                    records = unit.counts.records_quarantined,
                    "unit quarantined records"
                ),
                _ => {}
            }
        }
        for rejected in &report.rejected_requests {
            warn!(
                request = rejected.index,
                source = %rejected.source,
                error = %rejected.error,
                "request rejected"
            );
        }
    }
}
