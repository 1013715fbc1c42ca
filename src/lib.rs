//! SysMaint Library
//!
//! Task orchestration engine for Windows maintenance: a catalog of backup,
//! restore and cleanup tasks, a sequential runner with per-task result
//! aggregation, target drive validation, backup manifest discovery and size
//! analysis. Task executors are supplied by the host.

pub mod analyzer;
pub mod catalog;
pub mod cli;
pub mod config_file;
pub mod drive;
pub mod engine;
pub mod error;
pub mod executor;
pub mod manifest;
pub mod report;
pub mod restore;
pub mod types;

// Re-export main types for convenience
pub use analyzer::{Analyzer, Measurement, PathAnalyzer, TaskAnalysis, analyze};
pub use catalog::{MaintenanceTask, TaskCatalog};
pub use config_file::{EngineConfig, SafetyPolicy};
pub use drive::{DriveEnumerator, DriveInfo, DriveSelector, SysinfoDrives, validate_target};
pub use engine::{CancelToken, Orchestrator, Progress, ProgressEvent, channel_progress};
pub use error::{EngineError, Result};
pub use executor::{
    DryRunExecutor, Executor, ExecutorError, ExecutorOutcome, ExecutorRegistry, SafetyChecker,
    SafetyReport,
};
pub use manifest::{
    BackupManifest, ManifestCategories, discover_wifi_backup_files, find_latest_manifest,
};
pub use report::{OrchestrationReport, OverallStatus, SummaryTone, TaskResult};
pub use restore::{RestoreOutcome, run_restore};
pub use types::{Priority, RiskLevel, RunKind, TaskCategory, TaskStatus};
