//! Orchestrator integration tests
//!
//! These tests verify:
//! - One failing executor fails only its own task
//! - Repeated runs of the same plan give the same statuses
//! - A second concurrent run is rejected
//! - Cancellation, drive loss and the cleanup size fallback
//! - Dry-run registries and restore sequencing through the public API

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;
use sysmaint::catalog::{MaintenanceTask, TaskCatalog};
use sysmaint::config_file::EngineConfig;
use sysmaint::drive::DriveInfo;
use sysmaint::engine::{Orchestrator, channel_progress};
use sysmaint::error::EngineError;
use sysmaint::executor::{Executor, ExecutorError, ExecutorOutcome, ExecutorRegistry};
use sysmaint::report::OverallStatus;
use sysmaint::restore::run_restore;
use sysmaint::types::{RunKind, TaskCategory, TaskStatus};

fn target() -> DriveInfo {
    DriveInfo {
        drive_id: "D:\\".to_string(),
        label: "Data".to_string(),
        free_space_bytes: 200 * 1024 * 1024 * 1024,
        total_space_bytes: 500 * 1024 * 1024 * 1024,
        file_system: "NTFS".to_string(),
        is_active_system_drive: false,
        is_removable: false,
        is_network: false,
    }
}

fn task(id: &str) -> MaintenanceTask {
    MaintenanceTask::new(id, id, TaskCategory::Cache)
}

// =============================================================================
// Aggregation
// =============================================================================

#[test]
fn test_middle_failure_gives_partial_report() {
    let orchestrator = Orchestrator::default();
    let plan = vec![task("one"), task("two"), task("three")];
    let executors = ExecutorRegistry::new()
        .with_fn("one", |_| Ok(ExecutorOutcome::success(2, 100, "done")))
        .with_fn("two", |_| Err(ExecutorError::failed("registry key locked")))
        .with_fn("three", |_| Ok(ExecutorOutcome::success(5, 300, "done")));

    let report = orchestrator
        .run(RunKind::Cleanup, &plan, &target(), &executors, |_| {})
        .unwrap();

    let statuses: Vec<TaskStatus> = report.results.iter().map(|r| r.status).collect();
    assert_eq!(statuses, vec![TaskStatus::Success, TaskStatus::Failed, TaskStatus::Success]);
    assert_eq!(report.overall_status, OverallStatus::Partial);
    assert_eq!(report.total_bytes_freed_or_copied, 400);

    let failed = report.result("two").unwrap();
    assert_eq!(failed.items_affected, 0);
    // Executor details stay in the log, not in the user-facing message
    assert_eq!(failed.message, "System error");
    assert!(!report.stopped_early);
}

#[test]
fn test_all_failed_gives_failed_report() {
    let orchestrator = Orchestrator::default();
    let plan = vec![task("one"), task("two")];
    let executors = ExecutorRegistry::new()
        .with_fn("one", |_| Err(ExecutorError::failed("no")))
        .with_fn("two", |_| Err(ExecutorError::failed("no")));

    let report = orchestrator
        .run(RunKind::Cleanup, &plan, &target(), &executors, |_| {})
        .unwrap();
    assert_eq!(report.overall_status, OverallStatus::Failed);
    assert_eq!(report.total_bytes_freed_or_copied, 0);
}

#[test]
fn test_repeated_runs_are_idempotent() {
    let orchestrator = Orchestrator::default();
    let catalog = TaskCatalog::builtin();
    let plan = catalog
        .plan_for_ids(&["temp_files", "dns_cache", "recycle_bin"])
        .unwrap();
    let executors = ExecutorRegistry::new()
        .with_fn("temp_files", |_| Ok(ExecutorOutcome::success(0, 0, "")))
        .with_fn("dns_cache", |_| Ok(ExecutorOutcome::success(0, 0, "")))
        .with_fn("recycle_bin", |_| Ok(ExecutorOutcome::success(0, 0, "")));

    let statuses = |orchestrator: &Orchestrator| -> Vec<(String, TaskStatus)> {
        orchestrator
            .run(RunKind::Cleanup, &plan, &target(), &executors, |_| {})
            .unwrap()
            .results
            .into_iter()
            .map(|r| (r.task_id, r.status))
            .collect()
    };

    let first = statuses(&orchestrator);
    let second = statuses(&orchestrator);
    assert_eq!(first, second);
    assert_eq!(first[0].0, "dns_cache");
}

// =============================================================================
// Run Exclusivity
// =============================================================================

#[test]
fn test_concurrent_run_is_rejected() {
    let orchestrator = Arc::new(Orchestrator::default());
    let started = Arc::new(Barrier::new(2));
    let release = Arc::new(Barrier::new(2));

    let executors = {
        let started = Arc::clone(&started);
        let release = Arc::clone(&release);
        ExecutorRegistry::new().with_fn("slow", move |_| {
            started.wait();
            release.wait();
            Ok(ExecutorOutcome::success(1, 1, ""))
        })
    };

    let first = {
        let orchestrator = Arc::clone(&orchestrator);
        thread::spawn(move || {
            orchestrator.run(RunKind::Cleanup, &[task("slow")], &target(), &executors, |_| {})
        })
    };

    started.wait();
    assert!(orchestrator.is_running());
    let second = orchestrator.run(
        RunKind::Cleanup,
        &[task("slow")],
        &target(),
        &ExecutorRegistry::new(),
        |_| {},
    );
    assert!(matches!(second, Err(EngineError::RunAlreadyInProgress)));

    release.wait();
    let report = first.join().unwrap().unwrap();
    assert_eq!(report.overall_status, OverallStatus::Success);
    assert!(!orchestrator.is_running());
}

#[test]
fn test_empty_plan_is_user_error() {
    let result = Orchestrator::default().run(
        RunKind::Backup,
        &[],
        &target(),
        &ExecutorRegistry::new(),
        |_| {},
    );
    let err = result.unwrap_err();
    assert!(matches!(err, EngineError::NoTasksSelected));
    assert!(err.is_user_error());
}

#[test]
fn test_low_space_target_rejected() {
    let full = DriveInfo {
        free_space_bytes: 1024,
        ..target()
    };
    let result = Orchestrator::default().run(
        RunKind::Backup,
        &[task("a")],
        &full,
        &ExecutorRegistry::new(),
        |_| {},
    );
    assert!(matches!(result, Err(EngineError::InvalidTarget { .. })));
}

// =============================================================================
// Cancellation and Drive Loss
// =============================================================================

#[test]
fn test_cancel_requested_during_task() {
    let orchestrator = Orchestrator::default();
    let token = orchestrator.cancel_token();
    let runs = Arc::new(AtomicUsize::new(0));

    let executors = {
        let runs = Arc::clone(&runs);
        ExecutorRegistry::new().with_fn("step", move |_| {
            if runs.fetch_add(1, Ordering::SeqCst) == 0 {
                token.cancel();
            }
            Ok(ExecutorOutcome::success(1, 10, ""))
        })
    };
    // Same executor under several ids
    let step = executors.get("step").unwrap();
    let mut registry = ExecutorRegistry::new();
    for id in ["a", "b", "c", "d"] {
        let step = Arc::clone(&step);
        registry.register_fn(id, move |drive| step.run(drive));
    }

    let plan = vec![task("a"), task("b"), task("c"), task("d")];
    let report = orchestrator
        .run(RunKind::Cleanup, &plan, &target(), &registry, |_| {})
        .unwrap();

    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(report.count(TaskStatus::Success), 1);
    assert_eq!(report.count(TaskStatus::Cancelled), 3);
    assert_eq!(report.count(TaskStatus::Failed), 0);
    assert_eq!(report.overall_status, OverallStatus::Partial);
    assert!(report.stopped_early);
}

#[test]
fn test_drive_unavailable_stops_run() {
    let orchestrator = Orchestrator::default();
    let plan = vec![task("copy_a"), task("copy_b"), task("copy_c")];
    let executors = ExecutorRegistry::new()
        .with_fn("copy_a", |_| Ok(ExecutorOutcome::success(10, 4096, "")))
        .with_fn("copy_b", |drive| {
            Err(ExecutorError::DriveUnavailable(drive.drive_id.clone()))
        })
        .with_fn("copy_c", |_| Ok(ExecutorOutcome::success(10, 4096, "")));

    let report = orchestrator
        .run(RunKind::Backup, &plan, &target(), &executors, |_| {})
        .unwrap();

    assert!(report.stopped_early);
    assert_eq!(report.result("copy_b").unwrap().message, "DriveUnavailable");
    assert_eq!(report.result("copy_c").unwrap().status, TaskStatus::Failed);
    assert_eq!(report.total_bytes_freed_or_copied, 4096);
}

// =============================================================================
// Normalization
// =============================================================================

#[test]
fn test_unsized_cleanup_reports_eighty_percent_of_estimate() {
    let orchestrator = Orchestrator::default();
    let catalog = TaskCatalog::builtin();
    catalog.set_estimated_size("recycle_bin", Some(500_000_000)).unwrap();
    let plan = catalog.plan_for_ids(&["recycle_bin"]).unwrap();
    let executors = ExecutorRegistry::new()
        .with_fn("recycle_bin", |_| Ok(ExecutorOutcome::unsized_success(12, "emptied")));

    let report = orchestrator
        .run(RunKind::Cleanup, &plan, &target(), &executors, |_| {})
        .unwrap();
    assert_eq!(report.results[0].bytes_freed_or_copied, 400_000_000);
}

#[test]
fn test_fallback_ratio_is_configurable() {
    let config = EngineConfig {
        cleanup_fallback_ratio: 0.5,
        ..Default::default()
    };
    let orchestrator = Orchestrator::new(config);
    let plan = vec![task("prefetch").with_estimated_size(1000)];
    let executors = ExecutorRegistry::new()
        .with_fn("prefetch", |_| Ok(ExecutorOutcome::unsized_success(1, "")));

    let report = orchestrator
        .run(RunKind::Cleanup, &plan, &target(), &executors, |_| {})
        .unwrap();
    assert_eq!(report.total_bytes_freed_or_copied, 500);
}

#[test]
fn test_dry_run_registry_covers_plan() {
    let catalog = TaskCatalog::builtin();
    let plan = catalog
        .plan_for_ids(&["backup_drivers", "backup_wifi"])
        .unwrap();
    let executors = ExecutorRegistry::dry_run(&plan);
    assert!(executors.missing(&plan).is_empty());

    let (tx, rx) = mpsc::channel();
    let report = Orchestrator::default()
        .run(RunKind::Backup, &plan, &target(), &executors, channel_progress(tx))
        .unwrap();

    assert_eq!(report.overall_status, OverallStatus::Success);
    assert!(report.results.iter().all(|r| r.message.starts_with("[DRY RUN]")));
    assert_eq!(rx.try_iter().count(), 2);
}

// =============================================================================
// Restore
// =============================================================================

#[test]
fn test_restore_backs_up_live_data_then_restores() {
    let catalog = TaskCatalog::builtin();
    let plan = catalog
        .plan_for_ids(&["restore_zalo", "restore_drivers"])
        .unwrap();
    let executors = ExecutorRegistry::new()
        .with_fn("backup_zalo", |_| Ok(ExecutorOutcome::success(40, 1 << 20, "")))
        .with_fn("restore_zalo", |_| Ok(ExecutorOutcome::success(40, 1 << 20, "")))
        .with_fn("restore_drivers", |_| Ok(ExecutorOutcome::partial(3, 0, "1 driver rejected")));

    let outcome = run_restore(
        &Orchestrator::default(),
        &catalog,
        &plan,
        &target(),
        &executors,
        |_| {},
    )
    .unwrap();

    let safety = outcome.safety_report.unwrap();
    assert_eq!(safety.results.len(), 1);
    assert_eq!(safety.results[0].task_id, "backup_zalo");

    let restore = outcome.restore_report.unwrap();
    assert_eq!(restore.kind, RunKind::Restore);
    assert_eq!(restore.overall_status, OverallStatus::Partial);
}

#[test]
fn test_reanalysis_delay_does_not_block_run() {
    let config = EngineConfig {
        reanalysis_delay_ms: 60_000,
        ..Default::default()
    };
    let catalog = Arc::new(TaskCatalog::builtin());
    let orchestrator = Orchestrator::new(config).with_reanalysis(
        Arc::clone(&catalog),
        Arc::new(sysmaint::analyzer::PathAnalyzer::new()),
    );
    let plan = catalog.plan_for_ids(&["dns_cache"]).unwrap();
    let executors = ExecutorRegistry::new()
        .with_fn("dns_cache", |_| Ok(ExecutorOutcome::success(1, 0, "")));

    let started = std::time::Instant::now();
    orchestrator
        .run(RunKind::Cleanup, &plan, &target(), &executors, |_| {})
        .unwrap();
    assert!(started.elapsed() < Duration::from_secs(30));
}
