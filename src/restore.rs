//! Restore with a safety backup first
//!
//! Restoring chat-app data, user folders or Wi-Fi profiles overwrites what is
//! on the machine now. Before such a restore the current state is backed up
//! through the same pipeline. Each live-data restore task only goes ahead if
//! its own backup did at least part of its work.

use crate::catalog::{MaintenanceTask, TaskCatalog};
use crate::drive::DriveInfo;
use crate::engine::{Orchestrator, Progress};
use crate::error::{EngineError, Result};
use crate::executor::ExecutorRegistry;
use crate::report::{OrchestrationReport, TaskResult};
use crate::types::RunKind;
use tracing::{info, warn};

/// Backup task that captures what a restore task overwrites
pub fn safety_backup_for(restore_id: &str) -> Option<&'static str> {
    match restore_id {
        "restore_drivers" => Some("backup_drivers"),
        "restore_zalo" => Some("backup_zalo"),
        "restore_browser_profiles" => Some("backup_browser_profiles"),
        "restore_user_folders" => Some("backup_user_folders"),
        "restore_wifi" => Some("backup_wifi"),
        _ => None,
    }
}

/// Backup ids needed before running `plan`, live-data categories only
pub fn required_safety_backups(plan: &[MaintenanceTask]) -> Vec<&'static str> {
    let mut ids: Vec<&'static str> = plan
        .iter()
        .filter(|task| task.category.is_live_data())
        .filter_map(|task| safety_backup_for(&task.id))
        .collect();
    ids.dedup();
    ids
}

/// Message for a restore task held back because its data was not saved first
pub const SAFETY_BACKUP_MISSING_MESSAGE: &str = "Skipped: safety backup did not complete";

#[derive(Debug, Clone, PartialEq)]
pub struct RestoreOutcome {
    /// Report of the safety backup, if one was needed
    pub safety_report: Option<OrchestrationReport>,
    /// `None` when no restore task was allowed to run
    pub restore_report: Option<OrchestrationReport>,
    /// Restore tasks that were never run, with the reason
    pub held_back: Vec<TaskResult>,
}

impl RestoreOutcome {
    pub fn aborted(&self) -> bool {
        self.restore_report.is_none()
    }
}

/// Whether the safety backup covering `task` did its work.
///
/// Tasks outside the live-data categories need no safety backup.
fn safety_backup_held(task: &MaintenanceTask, safety: &OrchestrationReport) -> bool {
    if !task.category.is_live_data() {
        return true;
    }
    match safety_backup_for(&task.id) {
        Some(backup_id) => safety
            .result(backup_id)
            .is_some_and(|result| result.status.made_progress()),
        None => true,
    }
}

/// Run a restore plan, backing up live data first.
///
/// Both runs go to `target` and share `executors` and `on_progress`. A
/// live-data restore task only runs if its own safety backup made progress.
/// A cancel request during the safety backup ends the whole restore.
pub fn run_restore<F>(
    orchestrator: &Orchestrator,
    catalog: &TaskCatalog,
    plan: &[MaintenanceTask],
    target: &DriveInfo,
    executors: &ExecutorRegistry,
    mut on_progress: F,
) -> Result<RestoreOutcome>
where
    F: FnMut(Progress<'_>),
{
    if plan.is_empty() {
        return Err(EngineError::NoTasksSelected);
    }

    let backup_ids = required_safety_backups(plan);
    if backup_ids.is_empty() {
        let report =
            orchestrator.run(RunKind::Restore, plan, target, executors, &mut on_progress)?;
        return Ok(RestoreOutcome {
            safety_report: None,
            restore_report: Some(report),
            held_back: Vec::new(),
        });
    }

    let backup_plan = catalog.plan_for_ids(&backup_ids)?;
    info!(tasks = ?backup_ids, "Running safety backup before restore");
    let safety =
        orchestrator.run(RunKind::Backup, &backup_plan, target, executors, &mut on_progress)?;

    if safety.cancel_requested {
        info!("Cancelled during the safety backup, restore not started");
        return Ok(RestoreOutcome {
            safety_report: Some(safety),
            restore_report: None,
            held_back: plan.iter().map(|task| TaskResult::cancelled(&task.id)).collect(),
        });
    }

    let (allowed, blocked): (Vec<MaintenanceTask>, Vec<MaintenanceTask>) = plan
        .iter()
        .cloned()
        .partition(|task| safety_backup_held(task, &safety));
    let held_back: Vec<TaskResult> = blocked
        .iter()
        .map(|task| {
            warn!(task = %task.id, "Safety backup failed, restore task skipped");
            TaskResult::failed(&task.id, SAFETY_BACKUP_MISSING_MESSAGE, 0)
        })
        .collect();

    if allowed.is_empty() {
        warn!("No restore task has a completed safety backup, restore skipped");
        return Ok(RestoreOutcome {
            safety_report: Some(safety),
            restore_report: None,
            held_back,
        });
    }

    let report =
        orchestrator.run(RunKind::Restore, &allowed, target, executors, &mut on_progress)?;
    Ok(RestoreOutcome {
        safety_report: Some(safety),
        restore_report: Some(report),
        held_back,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{ExecutorError, ExecutorOutcome};
    use crate::types::TaskStatus;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn target() -> DriveInfo {
        DriveInfo {
            drive_id: "E:\\".to_string(),
            label: "Backup".to_string(),
            free_space_bytes: 1 << 34,
            total_space_bytes: 1 << 35,
            file_system: "NTFS".to_string(),
            is_active_system_drive: false,
            is_removable: true,
            is_network: false,
        }
    }

    fn done(items: u64) -> std::result::Result<ExecutorOutcome, ExecutorError> {
        Ok(ExecutorOutcome::success(items, 100, ""))
    }

    fn restore(plan: &[MaintenanceTask], executors: &ExecutorRegistry) -> RestoreOutcome {
        let catalog = TaskCatalog::builtin();
        run_restore(&Orchestrator::default(), &catalog, plan, &target(), executors, |_| {})
            .unwrap()
    }

    #[test]
    fn test_only_live_data_needs_safety_backup() {
        let catalog = TaskCatalog::builtin();
        let plan = catalog
            .plan_for_ids(&["restore_drivers", "restore_wifi", "restore_zalo"])
            .unwrap();
        let mut ids = required_safety_backups(&plan);
        ids.sort();
        assert_eq!(ids, vec!["backup_wifi", "backup_zalo"]);
    }

    #[test]
    fn test_every_restore_maps_to_catalog_backup() {
        let catalog = TaskCatalog::builtin();
        for task in catalog.list_tasks(None) {
            if task.id.starts_with("restore_") {
                let backup = safety_backup_for(&task.id).unwrap();
                assert!(catalog.get(backup).is_some(), "{} has no backup task", task.id);
            }
        }
    }

    #[test]
    fn test_safety_backup_runs_first() {
        let catalog = TaskCatalog::builtin();
        let plan = catalog.plan_for_ids(&["restore_wifi"]).unwrap();
        let executors = ExecutorRegistry::new()
            .with_fn("backup_wifi", |_| Ok(ExecutorOutcome::success(3, 900, "exported")))
            .with_fn("restore_wifi", |_| Ok(ExecutorOutcome::success(3, 900, "imported")));
        let mut seen = Vec::new();

        let orchestrator = Orchestrator::default();
        let outcome = run_restore(&orchestrator, &catalog, &plan, &target(), &executors, |p| {
            seen.push(p.current.id.clone())
        })
        .unwrap();

        assert_eq!(seen, vec!["backup_wifi", "restore_wifi"]);
        assert!(!outcome.aborted());
        assert!(outcome.held_back.is_empty());
        assert_eq!(outcome.safety_report.unwrap().kind, RunKind::Backup);
    }

    #[test]
    fn test_failed_safety_backup_skips_restore() {
        let catalog = TaskCatalog::builtin();
        let plan = catalog.plan_for_ids(&["restore_user_folders"]).unwrap();
        let executors = ExecutorRegistry::new()
            .with_fn("backup_user_folders", |_| Err(ExecutorError::failed("access denied")))
            .with_fn("restore_user_folders", |_| done(1));

        let outcome = restore(&plan, &executors);

        assert!(outcome.aborted());
        let safety = outcome.safety_report.unwrap();
        assert_eq!(safety.results[0].status, TaskStatus::Failed);
        assert_eq!(outcome.held_back[0].task_id, "restore_user_folders");
        assert_eq!(outcome.held_back[0].message, SAFETY_BACKUP_MISSING_MESSAGE);
    }

    #[test]
    fn test_each_category_needs_its_own_safety_backup() {
        let catalog = TaskCatalog::builtin();
        let plan = catalog.plan_for_ids(&["restore_zalo", "restore_wifi"]).unwrap();
        let zalo_restored = Arc::new(AtomicUsize::new(0));
        let executors = {
            let zalo_restored = Arc::clone(&zalo_restored);
            ExecutorRegistry::new()
                .with_fn("backup_zalo", |_| Err(ExecutorError::failed("Zalo is running")))
                .with_fn("backup_wifi", |_| done(2))
                .with_fn("restore_zalo", move |_| {
                    zalo_restored.fetch_add(1, Ordering::SeqCst);
                    done(1)
                })
                .with_fn("restore_wifi", |_| done(2))
        };

        let outcome = restore(&plan, &executors);

        assert_eq!(zalo_restored.load(Ordering::SeqCst), 0);
        let report = outcome.restore_report.unwrap();
        let ran: Vec<&str> = report.results.iter().map(|r| r.task_id.as_str()).collect();
        assert_eq!(ran, vec!["restore_wifi"]);
        assert_eq!(outcome.held_back.len(), 1);
        assert_eq!(outcome.held_back[0].task_id, "restore_zalo");
        assert_eq!(outcome.held_back[0].status, TaskStatus::Failed);
    }

    #[test]
    fn test_non_live_restore_runs_when_safety_backup_fails() {
        let catalog = TaskCatalog::builtin();
        let plan = catalog.plan_for_ids(&["restore_drivers", "restore_wifi"]).unwrap();
        let executors = ExecutorRegistry::new()
            .with_fn("backup_wifi", |_| Err(ExecutorError::failed("netsh failed")))
            .with_fn("restore_drivers", |_| done(4))
            .with_fn("restore_wifi", |_| done(2));

        let outcome = restore(&plan, &executors);

        let report = outcome.restore_report.unwrap();
        assert_eq!(report.results.len(), 1);
        assert_eq!(report.results[0].task_id, "restore_drivers");
        assert_eq!(outcome.held_back[0].task_id, "restore_wifi");
    }

    #[test]
    fn test_cancel_during_safety_backup_stops_restore() {
        let catalog = TaskCatalog::builtin();
        let plan = catalog.plan_for_ids(&["restore_zalo", "restore_wifi"]).unwrap();
        let orchestrator = Orchestrator::default();
        let token = orchestrator.cancel_token();
        let restores = Arc::new(AtomicUsize::new(0));

        let executors = {
            let zalo = Arc::clone(&restores);
            let wifi = Arc::clone(&restores);
            ExecutorRegistry::new()
                .with_fn("backup_zalo", move |_| {
                    token.cancel();
                    done(1)
                })
                .with_fn("backup_wifi", |_| done(1))
                .with_fn("restore_zalo", move |_| {
                    zalo.fetch_add(1, Ordering::SeqCst);
                    done(1)
                })
                .with_fn("restore_wifi", move |_| {
                    wifi.fetch_add(1, Ordering::SeqCst);
                    done(1)
                })
        };

        let outcome =
            run_restore(&orchestrator, &catalog, &plan, &target(), &executors, |_| {}).unwrap();

        assert_eq!(restores.load(Ordering::SeqCst), 0);
        assert!(outcome.aborted());
        assert!(outcome.safety_report.unwrap().cancel_requested);
        assert!(outcome
            .held_back
            .iter()
            .all(|r| r.status == TaskStatus::Cancelled));
        assert_eq!(outcome.held_back.len(), 2);
    }

    #[test]
    fn test_cancel_during_last_safety_task_stops_restore() {
        let catalog = TaskCatalog::builtin();
        let plan = catalog.plan_for_ids(&["restore_wifi"]).unwrap();
        let orchestrator = Orchestrator::default();
        let token = orchestrator.cancel_token();
        let executors = ExecutorRegistry::new()
            .with_fn("backup_wifi", move |_| {
                token.cancel();
                done(1)
            })
            .with_fn("restore_wifi", |_| done(1));

        let outcome =
            run_restore(&orchestrator, &catalog, &plan, &target(), &executors, |_| {}).unwrap();

        let safety = outcome.safety_report.unwrap();
        assert_eq!(safety.results[0].status, TaskStatus::Success);
        assert!(outcome.restore_report.is_none());
    }

    #[test]
    fn test_no_live_data_skips_safety_backup() {
        let catalog = TaskCatalog::builtin();
        let plan = catalog.plan_for_ids(&["restore_drivers"]).unwrap();
        let executors = ExecutorRegistry::new().with_fn("restore_drivers", |_| done(4));

        let outcome = restore(&plan, &executors);
        assert!(outcome.safety_report.is_none());
        assert!(outcome.restore_report.is_some());
    }
}
