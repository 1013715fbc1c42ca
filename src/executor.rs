//! Executor and safety-checker contracts.
//!
//! Every side effect the tool performs (copying a folder, editing the
//! registry, flushing a cache) sits behind the `Executor` trait, keyed by task
//! id in an `ExecutorRegistry`. The orchestrator never looks inside an
//! executor; it only sees the raw `ExecutorOutcome` or an `ExecutorError`.
//!
//! # Contract
//!
//! - `run()` may block for seconds to minutes. It is called from a worker
//!   thread, hence `Send + Sync`.
//! - `bytes_affected: None` means "unknown", not zero. The orchestrator may
//!   substitute an estimate.
//! - `ExecutorError::DriveUnavailable` is an environment failure and stops
//!   the remainder of the run. Any other error fails only its own task.

use crate::catalog::MaintenanceTask;
use crate::drive::DriveInfo;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Raw result reported by an executor
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExecutorOutcome {
    pub items_affected: u64,
    /// Bytes freed or copied, `None` if the executor could not tell
    pub bytes_affected: Option<u64>,
    pub success: bool,
    pub message: String,
}

impl ExecutorOutcome {
    /// A successful outcome with known size
    pub fn success(items: u64, bytes: u64, message: impl Into<String>) -> Self {
        Self {
            items_affected: items,
            bytes_affected: Some(bytes),
            success: true,
            message: message.into(),
        }
    }

    /// The executor did part of the work before giving up
    pub fn partial(items: u64, bytes: u64, message: impl Into<String>) -> Self {
        Self {
            items_affected: items,
            bytes_affected: Some(bytes),
            success: false,
            message: message.into(),
        }
    }

    /// Success without a size figure
    pub fn unsized_success(items: u64, message: impl Into<String>) -> Self {
        Self {
            items_affected: items,
            bytes_affected: None,
            success: true,
            message: message.into(),
        }
    }
}

/// Errors an executor can raise
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutorError {
    /// The task failed; the run continues
    #[error("{0}")]
    Failed(String),

    /// The target drive disappeared or became read-only
    #[error("Target drive unavailable: {0}")]
    DriveUnavailable(String),

    /// The executor did not return within the task timeout
    #[error("Timed out after {0:?}")]
    TimedOut(Duration),
}

impl ExecutorError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }

    /// True for failures that invalidate the rest of the plan
    pub fn is_environmental(&self) -> bool {
        matches!(self, Self::DriveUnavailable(_))
    }
}

/// Performs the side effect of one maintenance task
pub trait Executor: Send + Sync {
    fn run(&self, target: &DriveInfo) -> Result<ExecutorOutcome, ExecutorError>;
}

impl<F> Executor for F
where
    F: Fn(&DriveInfo) -> Result<ExecutorOutcome, ExecutorError> + Send + Sync,
{
    fn run(&self, target: &DriveInfo) -> Result<ExecutorOutcome, ExecutorError> {
        self(target)
    }
}

/// Executors keyed by task id
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn Executor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an executor, replacing any previous one for the id
    pub fn register(&mut self, task_id: impl Into<String>, executor: impl Executor + 'static) {
        self.executors.insert(task_id.into(), Arc::new(executor));
    }

    pub fn with(mut self, task_id: impl Into<String>, executor: impl Executor + 'static) -> Self {
        self.register(task_id, executor);
        self
    }

    /// Register a closure as an executor
    pub fn register_fn<F>(&mut self, task_id: impl Into<String>, f: F)
    where
        F: Fn(&DriveInfo) -> Result<ExecutorOutcome, ExecutorError> + Send + Sync + 'static,
    {
        self.executors.insert(task_id.into(), Arc::new(f));
    }

    pub fn with_fn<F>(mut self, task_id: impl Into<String>, f: F) -> Self
    where
        F: Fn(&DriveInfo) -> Result<ExecutorOutcome, ExecutorError> + Send + Sync + 'static,
    {
        self.register_fn(task_id, f);
        self
    }

    pub fn get(&self, task_id: &str) -> Option<Arc<dyn Executor>> {
        self.executors.get(task_id).cloned()
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.executors.contains_key(task_id)
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }

    /// Ids in the plan with no registered executor
    pub fn missing<'a>(&self, plan: &'a [MaintenanceTask]) -> Vec<&'a str> {
        plan.iter()
            .filter(|t| !self.contains(&t.id))
            .map(|t| t.id.as_str())
            .collect()
    }

    /// A registry that simulates every task in the plan
    pub fn dry_run(plan: &[MaintenanceTask]) -> Self {
        let mut registry = Self::new();
        for task in plan {
            registry.register(task.id.clone(), DryRunExecutor::new(&task.name));
        }
        registry
    }
}

impl fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<&String> = self.executors.keys().collect();
        ids.sort();
        f.debug_struct("ExecutorRegistry").field("tasks", &ids).finish()
    }
}

/// Reports success without touching the system
#[derive(Debug, Clone)]
pub struct DryRunExecutor {
    label: String,
}

impl DryRunExecutor {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

impl Executor for DryRunExecutor {
    fn run(&self, target: &DriveInfo) -> Result<ExecutorOutcome, ExecutorError> {
        tracing::info!(task = %self.label, drive = %target, "[DRY RUN] skipping side effects");
        Ok(ExecutorOutcome::unsized_success(
            0,
            format!("[DRY RUN] {} on {}", self.label, target.drive_id),
        ))
    }
}

/// Result of a pre-task safety check
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SafetyReport {
    pub safe: bool,
    pub warnings: Vec<String>,
}

impl SafetyReport {
    pub fn safe() -> Self {
        Self {
            safe: true,
            warnings: Vec::new(),
        }
    }

    pub fn unsafe_with(warnings: Vec<String>) -> Self {
        Self {
            safe: false,
            warnings,
        }
    }

    /// Warnings joined for a task message
    pub fn summary(&self) -> String {
        if self.warnings.is_empty() {
            "system reported unsafe".to_string()
        } else {
            self.warnings.join("; ")
        }
    }
}

/// Checks whether the system is in a state where destructive work is safe
/// (no pending reboot, restore point available, battery not critical, ...)
pub trait SafetyChecker: Send + Sync {
    fn check(&self) -> SafetyReport;
}

/// Checker used when the host supplies none
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSafetyCheck;

impl SafetyChecker for NoSafetyCheck {
    fn check(&self) -> SafetyReport {
        SafetyReport::safe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TaskCategory;

    fn target() -> DriveInfo {
        DriveInfo {
            drive_id: "D:\\".to_string(),
            label: "Data".to_string(),
            free_space_bytes: 1 << 30,
            total_space_bytes: 1 << 31,
            file_system: "NTFS".to_string(),
            is_active_system_drive: false,
            is_removable: false,
            is_network: false,
        }
    }

    #[test]
    fn test_closure_is_executor() {
        let exec = |_: &DriveInfo| Ok::<_, ExecutorError>(ExecutorOutcome::success(3, 300, "done"));
        let outcome = exec.run(&target()).unwrap();
        assert_eq!(outcome.items_affected, 3);
        assert_eq!(outcome.bytes_affected, Some(300));
        assert!(outcome.success);
    }

    #[test]
    fn test_registry_missing() {
        let plan = vec![
            MaintenanceTask::new("a", "A", TaskCategory::Cache),
            MaintenanceTask::new("b", "B", TaskCategory::Cache),
        ];
        let registry = ExecutorRegistry::new()
            .with_fn("a", |_| Ok(ExecutorOutcome::default()));

        assert_eq!(registry.missing(&plan), vec!["b"]);
        assert_eq!(registry.len(), 1);
        assert!(registry.get("a").is_some());
    }

    #[test]
    fn test_dry_run_registry_covers_plan() {
        let plan = vec![MaintenanceTask::new("temp_files", "Temporary files", TaskCategory::Cache)];
        let registry = ExecutorRegistry::dry_run(&plan);
        assert!(registry.missing(&plan).is_empty());

        let outcome = registry.get("temp_files").unwrap().run(&target()).unwrap();
        assert!(outcome.success);
        assert!(outcome.bytes_affected.is_none());
        assert!(outcome.message.starts_with("[DRY RUN]"));
    }

    #[test]
    fn test_error_classification() {
        assert!(ExecutorError::DriveUnavailable("E:".into()).is_environmental());
        assert!(!ExecutorError::failed("access denied").is_environmental());
        assert!(!ExecutorError::TimedOut(Duration::from_secs(1)).is_environmental());
    }

    #[test]
    fn test_safety_summary() {
        assert_eq!(SafetyReport::unsafe_with(vec![]).summary(), "system reported unsafe");
        let report = SafetyReport::unsafe_with(vec!["pending reboot".into(), "low battery".into()]);
        assert_eq!(report.summary(), "pending reboot; low battery");
        assert!(NoSafetyCheck.check().safe);
    }
}
