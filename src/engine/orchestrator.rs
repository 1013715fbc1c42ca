//! Orchestrator: runs a plan one task at a time and reports on it.
//!
//! # Pipeline
//!
//! ```text
//! for each task in plan order:
//!     cancelled?        → remaining tasks `cancelled`, stop
//!     target gone?      → remaining tasks `failed` (DriveUnavailable), stop
//!     safety check      → may block high-risk tasks (policy)
//!     executor.run()    → on a worker thread, bounded by the task timeout
//!     normalize         → TaskResult, size fallback for cleanup
//!     progress callback
//! ```
//!
//! A failing executor only fails its own task. The caller always gets a full
//! report for a run that started; `Err` means the run never started.

use crate::analyzer::{self, Analyzer};
use crate::catalog::{MaintenanceTask, TaskCatalog};
use crate::config_file::{EngineConfig, SafetyPolicy};
use crate::drive::{DriveEnumerator, DriveInfo, validate_target};
use crate::engine::cancel::CancelToken;
use crate::error::{EngineError, Result};
use crate::executor::{
    Executor, ExecutorError, ExecutorOutcome, ExecutorRegistry, NoSafetyCheck, SafetyChecker,
};
use crate::report::{OrchestrationReport, ReportBuilder, TaskResult};
use crate::types::{RiskLevel, RunKind, TaskStatus};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Message for a task whose executor failed
pub const SYSTEM_ERROR_MESSAGE: &str = "System error";

/// Message for tasks lost because the target drive went away
pub const DRIVE_UNAVAILABLE_MESSAGE: &str = "DriveUnavailable";

/// Progress after a task boundary
#[derive(Debug, Clone, Copy)]
pub struct Progress<'a> {
    pub completed: usize,
    pub total: usize,
    pub current: &'a MaintenanceTask,
}

/// Owned progress event for channel subscribers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub completed: usize,
    pub total: usize,
    pub task_id: String,
    pub task_name: String,
}

/// Adapt a channel sender into a progress callback.
///
/// A disconnected receiver is ignored; the run does not depend on its UI.
pub fn channel_progress(tx: Sender<ProgressEvent>) -> impl FnMut(Progress<'_>) {
    move |p: Progress<'_>| {
        let _ = tx.send(ProgressEvent {
            completed: p.completed,
            total: p.total,
            task_id: p.current.id.clone(),
            task_name: p.current.name.clone(),
        });
    }
}

/// Catalog refresh after cleanup runs
struct Reanalysis {
    catalog: Arc<TaskCatalog>,
    analyzer: Arc<dyn Analyzer>,
}

/// What the safety gate decided for a task
enum Gate {
    Proceed { warning: Option<String> },
    Block(String),
}

/// Clears the run-in-progress flag and any cancel request when a run ends
struct RunGuard<'a> {
    running: &'a AtomicBool,
    cancel: &'a CancelToken,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.cancel.reset();
        self.running.store(false, Ordering::SeqCst);
    }
}

/// Sequential task runner. At most one run is active per instance; share one
/// instance per process.
pub struct Orchestrator {
    config: EngineConfig,
    safety: Arc<dyn SafetyChecker>,
    drive_probe: Option<Arc<dyn DriveEnumerator>>,
    reanalysis: Option<Reanalysis>,
    running: AtomicBool,
    cancel: CancelToken,
    pending_reanalysis: Mutex<Option<JoinHandle<()>>>,
}

impl Orchestrator {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            safety: Arc::new(NoSafetyCheck),
            drive_probe: None,
            reanalysis: None,
            running: AtomicBool::new(false),
            cancel: CancelToken::new(),
            pending_reanalysis: Mutex::new(None),
        }
    }

    pub fn with_safety_checker(mut self, checker: Arc<dyn SafetyChecker>) -> Self {
        self.safety = checker;
        self
    }

    /// Re-check the target drive against this enumerator before every task
    pub fn with_drive_probe(mut self, enumerator: Arc<dyn DriveEnumerator>) -> Self {
        self.drive_probe = Some(enumerator);
        self
    }

    /// Refresh `catalog` estimates with `analyzer` after each cleanup run
    pub fn with_reanalysis(
        mut self,
        catalog: Arc<TaskCatalog>,
        analyzer: Arc<dyn Analyzer>,
    ) -> Self {
        self.reanalysis = Some(Reanalysis { catalog, analyzer });
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Handle for cancelling the active run at the next task boundary
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run a plan against a target drive.
    ///
    /// # Errors
    ///
    /// - `RunAlreadyInProgress` if another run on this instance is active,
    ///   checked before anything else
    /// - `NoTasksSelected` for an empty plan
    /// - `InvalidTarget` if the drive fails target validation
    ///
    /// Task and environment failures are reported inside the returned report.
    pub fn run<F>(
        &self,
        kind: RunKind,
        plan: &[MaintenanceTask],
        target: &DriveInfo,
        executors: &ExecutorRegistry,
        mut on_progress: F,
    ) -> Result<OrchestrationReport>
    where
        F: FnMut(Progress<'_>),
    {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("Rejected run: another run is in progress");
            return Err(EngineError::RunAlreadyInProgress);
        }
        let _guard = RunGuard {
            running: &self.running,
            cancel: &self.cancel,
        };

        if plan.is_empty() {
            return Err(EngineError::NoTasksSelected);
        }
        validate_target(target, self.config.min_free_space_bytes).into_result(target)?;

        info!(%kind, tasks = plan.len(), drive = %target, "Orchestration run started");

        let total = plan.len();
        let mut report = ReportBuilder::new(kind, &target.drive_id);

        for (index, task) in plan.iter().enumerate() {
            if self.cancel.is_cancelled() {
                info!(remaining = total - index, "Run cancelled at task boundary");
                for rest in &plan[index..] {
                    report.push(TaskResult::cancelled(&rest.id));
                }
                report.mark_stopped_early();
                on_progress(Progress {
                    completed: total,
                    total,
                    current: task,
                });
                break;
            }

            if !self.target_present(target) {
                error!(drive = %target, "Target drive no longer available");
                for rest in &plan[index..] {
                    report.push(TaskResult::failed(&rest.id, DRIVE_UNAVAILABLE_MESSAGE, 0));
                }
                report.mark_stopped_early();
                on_progress(Progress {
                    completed: total,
                    total,
                    current: task,
                });
                break;
            }

            let started = Instant::now();
            let result = match self.safety_gate(kind, task) {
                Gate::Block(reason) => {
                    warn!(task = %task.id, "Blocked by safety check: {}", reason);
                    TaskResult::failed(
                        &task.id,
                        format!("Blocked by safety check: {}", reason),
                        elapsed_ms(started),
                    )
                }
                Gate::Proceed { warning } => match executors.get(&task.id) {
                    None => {
                        error!(task = %task.id, "No executor registered");
                        TaskResult::failed(&task.id, "No executor registered for task", 0)
                    }
                    Some(executor) => match self.execute(task, executor, target) {
                        Ok(outcome) => {
                            let mut result =
                                self.normalize(kind, task, outcome, elapsed_ms(started));
                            if let Some(warning) = warning {
                                result.message =
                                    format!("{} (safety warning: {})", result.message, warning);
                            }
                            result
                        }
                        Err(e) if e.is_environmental() => {
                            error!(task = %task.id, "Executor lost the target drive: {}", e);
                            report.push(TaskResult::failed(
                                &task.id,
                                DRIVE_UNAVAILABLE_MESSAGE,
                                elapsed_ms(started),
                            ));
                            for rest in &plan[index + 1..] {
                                report.push(TaskResult::failed(
                                    &rest.id,
                                    DRIVE_UNAVAILABLE_MESSAGE,
                                    0,
                                ));
                            }
                            report.mark_stopped_early();
                            on_progress(Progress {
                                completed: total,
                                total,
                                current: task,
                            });
                            break;
                        }
                        Err(ExecutorError::TimedOut(limit)) => {
                            warn!(task = %task.id, ?limit, "Executor timed out");
                            TaskResult::failed(
                                &task.id,
                                format!("Timed out after {}s", limit.as_secs()),
                                elapsed_ms(started),
                            )
                        }
                        Err(e) => {
                            warn!(task = %task.id, "Executor failed: {}", e);
                            TaskResult::failed(&task.id, SYSTEM_ERROR_MESSAGE, elapsed_ms(started))
                        }
                    },
                },
            };

            debug!(
                task = %result.task_id,
                status = %result.status,
                bytes = result.bytes_freed_or_copied,
                "Task finished"
            );
            report.push(result);
            on_progress(Progress {
                completed: index + 1,
                total,
                current: task,
            });
        }

        // A request during the last task closes nothing early but still counts
        if self.cancel.is_cancelled() {
            report.mark_cancel_requested();
        }

        let report = report.finish();
        info!(
            status = %report.overall_status,
            bytes = report.total_bytes_freed_or_copied,
            "Orchestration run finished"
        );

        if kind == RunKind::Cleanup {
            self.schedule_reanalysis(plan);
        }

        Ok(report)
    }

    /// Wait for the deferred re-analysis of the last cleanup run, if any
    pub fn wait_for_reanalysis(&self) {
        let handle = self
            .pending_reanalysis
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("Re-analysis thread panicked");
            }
        }
    }

    fn target_present(&self, target: &DriveInfo) -> bool {
        match &self.drive_probe {
            Some(probe) => probe
                .list()
                .iter()
                .any(|d| d.drive_id.eq_ignore_ascii_case(&target.drive_id)),
            None => true,
        }
    }

    /// Backups write elsewhere, so only their risky tasks are checked
    fn is_destructive(kind: RunKind, task: &MaintenanceTask) -> bool {
        kind != RunKind::Backup || task.risk_level != RiskLevel::Low
    }

    fn safety_gate(&self, kind: RunKind, task: &MaintenanceTask) -> Gate {
        if !Self::is_destructive(kind, task) {
            return Gate::Proceed { warning: None };
        }

        let check = self.safety.check();
        if check.safe {
            return Gate::Proceed { warning: None };
        }

        let summary = check.summary();
        match self.config.safety_policy {
            SafetyPolicy::BlockHighRisk if task.risk_level == RiskLevel::High => {
                Gate::Block(summary)
            }
            _ => {
                warn!(task = %task.id, "Safety check failed, proceeding: {}", summary);
                Gate::Proceed {
                    warning: Some(summary),
                }
            }
        }
    }

    /// Run the executor on a worker thread, waiting at most the task timeout.
    ///
    /// A timed-out task is reported as failed, but the next task only starts
    /// once its worker has exited, so two executors never overlap.
    fn execute(
        &self,
        task: &MaintenanceTask,
        executor: Arc<dyn Executor>,
        target: &DriveInfo,
    ) -> std::result::Result<ExecutorOutcome, ExecutorError> {
        let (tx, rx) = mpsc::channel();
        let worker_target = target.clone();

        let worker = thread::Builder::new()
            .name(format!("task-{}", task.id))
            .spawn(move || {
                let _ = tx.send(executor.run(&worker_target));
            })
            .map_err(|e| ExecutorError::failed(format!("failed to start worker: {}", e)))?;

        let timeout = self.config.task_timeout();
        let result = match rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                warn!(task = %task.id, "Task timed out, waiting for its worker to exit");
                Err(ExecutorError::TimedOut(timeout))
            }
            // Sender dropped without sending: the executor panicked
            Err(RecvTimeoutError::Disconnected) => Err(ExecutorError::failed("executor panicked")),
        };

        if worker.join().is_err() {
            debug!(task = %task.id, "Worker thread panicked");
        }
        result
    }

    /// Turn a raw executor outcome into a task result
    fn normalize(
        &self,
        kind: RunKind,
        task: &MaintenanceTask,
        outcome: ExecutorOutcome,
        duration_ms: u64,
    ) -> TaskResult {
        let status = if outcome.success {
            TaskStatus::Success
        } else if outcome.items_affected > 0 || outcome.bytes_affected.is_some_and(|b| b > 0) {
            TaskStatus::Partial
        } else {
            TaskStatus::Failed
        };

        let bytes = match outcome.bytes_affected {
            Some(bytes) => bytes,
            None if kind == RunKind::Cleanup && status == TaskStatus::Success => task
                .estimated_size
                .map(|estimate| {
                    analyzer::estimated_freed(estimate, self.config.cleanup_fallback_ratio)
                })
                .unwrap_or(0),
            None => 0,
        };

        let message = if outcome.message.is_empty() {
            match status {
                TaskStatus::Success => "Completed".to_string(),
                TaskStatus::Partial => "Completed with errors".to_string(),
                _ => SYSTEM_ERROR_MESSAGE.to_string(),
            }
        } else {
            outcome.message
        };

        TaskResult {
            task_id: task.id.clone(),
            status,
            items_affected: if status == TaskStatus::Failed { 0 } else { outcome.items_affected },
            bytes_freed_or_copied: bytes,
            message,
            duration_ms,
        }
    }

    fn schedule_reanalysis(&self, plan: &[MaintenanceTask]) {
        let Some(reanalysis) = &self.reanalysis else {
            return;
        };

        let catalog = Arc::clone(&reanalysis.catalog);
        let analyzer = Arc::clone(&reanalysis.analyzer);
        let tasks = plan.to_vec();
        let delay = self.config.reanalysis_delay();
        let ratio = self.config.analysis_freed_ratio;

        let spawned = thread::Builder::new()
            .name("reanalysis".to_string())
            .spawn(move || {
                thread::sleep(delay);
                let analysis = analyzer::analyze(&tasks, analyzer.as_ref(), ratio);
                catalog.apply_estimates(&analyzer::size_estimates(&analysis));
                debug!(tasks = tasks.len(), "Catalog estimates refreshed");
            });

        match spawned {
            Ok(handle) => {
                let mut pending = self
                    .pending_reanalysis
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                *pending = Some(handle);
            }
            Err(e) => warn!("Could not schedule re-analysis: {}", e),
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}
