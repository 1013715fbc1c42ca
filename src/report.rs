//! Result aggregation
//!
//! Folds the per-task `TaskResult`s of a run into one `OrchestrationReport`
//! and derives the overall status and user-facing summary from them.

use crate::types::{RunKind, TaskStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use strum::Display;

/// Outcome of one task in a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,
    pub status: TaskStatus,
    pub items_affected: u64,
    pub bytes_freed_or_copied: u64,
    /// Human-readable outcome
    pub message: String,
    pub duration_ms: u64,
}

impl TaskResult {
    /// A failed result with nothing affected
    pub fn failed(
        task_id: impl Into<String>,
        message: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Failed,
            items_affected: 0,
            bytes_freed_or_copied: 0,
            message: message.into(),
            duration_ms,
        }
    }

    /// A task that never started because the run was cancelled
    pub fn cancelled(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Cancelled,
            items_affected: 0,
            bytes_freed_or_copied: 0,
            message: "Cancelled before start".to_string(),
            duration_ms: 0,
        }
    }
}

/// Overall status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OverallStatus {
    /// Every task succeeded
    Success,
    /// Some tasks did their work and some did not
    Partial,
    /// No task did any work
    Failed,
}

/// Message tone for the run summary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SummaryTone {
    Success,
    Warning,
    Error,
}

/// Aggregated result of one orchestration run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationReport {
    pub kind: RunKind,
    pub target_drive: String,
    pub results: Vec<TaskResult>,
    pub overall_status: OverallStatus,
    pub total_bytes_freed_or_copied: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// The run stopped before the end of the plan (drive lost or cancelled)
    pub stopped_early: bool,
    /// The user asked to cancel while this run was active, even if every
    /// task had already started
    #[serde(default)]
    pub cancel_requested: bool,
}

impl OrchestrationReport {
    pub fn result(&self, task_id: &str) -> Option<&TaskResult> {
        self.results.iter().find(|r| r.task_id == task_id)
    }

    pub fn count(&self, status: TaskStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }

    pub fn total_items(&self) -> u64 {
        self.results
            .iter()
            .filter(|r| r.status.made_progress())
            .map(|r| r.items_affected)
            .sum()
    }

    pub fn duration_ms(&self) -> u64 {
        (self.finished_at - self.started_at)
            .num_milliseconds()
            .max(0) as u64
    }

    pub fn tone(&self) -> SummaryTone {
        match self.overall_status {
            OverallStatus::Success => SummaryTone::Success,
            OverallStatus::Partial => SummaryTone::Warning,
            OverallStatus::Failed => SummaryTone::Error,
        }
    }

    /// One-line headline for the summary dialog
    pub fn headline(&self) -> String {
        let verb = match self.kind {
            RunKind::Backup => "Backup",
            RunKind::Restore => "Restore",
            RunKind::Cleanup => "Cleanup",
        };
        let amount = format_bytes(self.total_bytes_freed_or_copied);
        let done = match self.kind {
            RunKind::Cleanup => "freed",
            RunKind::Backup | RunKind::Restore => "copied",
        };

        match self.overall_status {
            OverallStatus::Success => {
                format!("{} completed successfully: {} {}", verb, amount, done)
            }
            OverallStatus::Partial => {
                let mut problems = Vec::new();
                let failed = self.count(TaskStatus::Failed);
                if failed > 0 {
                    problems.push(format!("{} of {} tasks failed", failed, self.results.len()));
                }
                let cancelled = self.count(TaskStatus::Cancelled);
                if cancelled > 0 {
                    problems.push(format!("{} cancelled", cancelled));
                }
                if problems.is_empty() {
                    problems.push("some tasks completed with errors".to_string());
                }
                format!(
                    "{} partially completed: {}, {} {}",
                    verb,
                    problems.join(", "),
                    amount,
                    done
                )
            }
            OverallStatus::Failed => format!("{} failed: no task completed", verb),
        }
    }

    /// One line per task for inspection
    pub fn detail_lines(&self) -> Vec<String> {
        self.results
            .iter()
            .map(|r| {
                format!(
                    "[{}] {}: {} ({} items, {}, {} ms)",
                    r.status,
                    r.task_id,
                    r.message,
                    r.items_affected,
                    format_bytes(r.bytes_freed_or_copied),
                    r.duration_ms
                )
            })
            .collect()
    }
}

impl fmt::Display for OrchestrationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.headline())?;
        for line in self.detail_lines() {
            writeln!(f, "  {}", line)?;
        }
        Ok(())
    }
}

/// Derive the overall status from task statuses.
///
/// Success iff every task succeeded; failed iff no task made progress;
/// partial otherwise. `Partial` task results count as progress but not as
/// full success.
pub fn overall_status(results: &[TaskResult]) -> OverallStatus {
    let all_succeeded = results.iter().all(|r| r.status == TaskStatus::Success);
    let any_progress = results.iter().any(|r| r.status.made_progress());

    if all_succeeded {
        OverallStatus::Success
    } else if any_progress {
        OverallStatus::Partial
    } else {
        OverallStatus::Failed
    }
}

/// Accumulates task results while a run is in flight
#[derive(Debug)]
pub struct ReportBuilder {
    kind: RunKind,
    target_drive: String,
    started_at: DateTime<Utc>,
    results: Vec<TaskResult>,
    stopped_early: bool,
    cancel_requested: bool,
}

impl ReportBuilder {
    pub fn new(kind: RunKind, target_drive: impl Into<String>) -> Self {
        Self {
            kind,
            target_drive: target_drive.into(),
            started_at: Utc::now(),
            results: Vec::new(),
            stopped_early: false,
            cancel_requested: false,
        }
    }

    pub fn push(&mut self, result: TaskResult) {
        self.results.push(result);
    }

    pub fn mark_stopped_early(&mut self) {
        self.stopped_early = true;
    }

    pub fn mark_cancel_requested(&mut self) {
        self.cancel_requested = true;
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Close the report. Bytes of tasks that made no progress are excluded.
    pub fn finish(self) -> OrchestrationReport {
        let total_bytes_freed_or_copied = self
            .results
            .iter()
            .filter(|r| r.status.made_progress())
            .map(|r| r.bytes_freed_or_copied)
            .sum();

        OrchestrationReport {
            kind: self.kind,
            target_drive: self.target_drive,
            overall_status: overall_status(&self.results),
            results: self.results,
            total_bytes_freed_or_copied,
            started_at: self.started_at,
            finished_at: Utc::now(),
            stopped_early: self.stopped_early,
            cancel_requested: self.cancel_requested,
        }
    }
}

/// Human-readable byte count (binary units)
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
