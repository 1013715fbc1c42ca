//! Cleanup analysis
//!
//! Before the user picks cleanup tasks, each task is measured to show how
//! much space it would reclaim. Measurement sits behind the `Analyzer` trait.
//! When a measurement fails the task gets a coarse estimate from a fixed
//! table instead, so selection is never blocked by a broken probe.

use crate::catalog::MaintenanceTask;
use crate::config_file::ANALYSIS_FREED_RATIO;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};
use walkdir::WalkDir;

const MIB: u64 = 1024 * 1024;
const GIB: u64 = 1024 * MIB;

/// How many of the largest files a measurement keeps
pub const LARGEST_FILES_LIMIT: usize = 10;

/// A file reported in a measurement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    pub path: PathBuf,
    pub size: u64,
}

/// Raw measurement of one task's footprint
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Measurement {
    pub size_bytes: u64,
    pub file_count: u64,
    pub folders: Vec<PathBuf>,
    /// Largest files first
    pub largest_files: Vec<FileRef>,
    pub last_modified: Option<DateTime<Utc>>,
}

/// Errors from a measurement source
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AnalysisError {
    /// The analyzer has no way to measure this task
    #[error("No measurement source for task {0}")]
    Unsupported(String),

    /// The underlying tool or filesystem call failed
    #[error("Measurement of {task} failed: {reason}")]
    Failed { task: String, reason: String },
}

/// Measures the reclaimable footprint of a task
pub trait Analyzer: Send + Sync {
    fn measure(&self, task_id: &str) -> Result<Measurement, AnalysisError>;
}

/// Analysis of one task as shown to the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskAnalysis {
    pub size_bytes: u64,
    pub file_count: u64,
    pub folders: Vec<PathBuf>,
    pub largest_files: Vec<FileRef>,
    pub last_modified: Option<DateTime<Utc>>,
    /// What a cleanup is expected to actually free
    pub estimated_freed: u64,
    /// Size came from the coarse fallback table, not a measurement
    pub is_fallback: bool,
}

/// Expected freed bytes for a measured size
pub fn estimated_freed(measured: u64, ratio: f64) -> u64 {
    (measured as f64 * ratio).round() as u64
}

/// Coarse (low, high) size range for well-known cleanup tasks
pub fn fallback_range(task_id: &str) -> Option<(u64, u64)> {
    let range = match task_id {
        "dns_cache" => (MIB, 5 * MIB),
        "temp_files" => (200 * MIB, 2 * GIB),
        "recycle_bin" => (100 * MIB, 5 * GIB),
        "browser_cache" => (300 * MIB, 3 * GIB),
        "thumbnail_cache" => (50 * MIB, 500 * MIB),
        "error_reports" => (10 * MIB, 500 * MIB),
        "delivery_optimization" => (100 * MIB, 4 * GIB),
        "windows_update_cache" => (500 * MIB, 8 * GIB),
        "zalo_cache" => (200 * MIB, 5 * GIB),
        "windows_logs" => (50 * MIB, GIB),
        "prefetch" => (10 * MIB, 100 * MIB),
        "old_downloads" => (500 * MIB, 10 * GIB),
        "windows_old" => (10 * GIB, 30 * GIB),
        _ => return None,
    };
    Some(range)
}

fn fallback_analysis(task_id: &str, freed_ratio: f64) -> TaskAnalysis {
    let size_bytes = fallback_range(task_id)
        .map(|(low, high)| low + (high - low) / 2)
        .unwrap_or(0);

    TaskAnalysis {
        size_bytes,
        file_count: 0,
        folders: Vec::new(),
        largest_files: Vec::new(),
        last_modified: None,
        estimated_freed: estimated_freed(size_bytes, freed_ratio),
        is_fallback: true,
    }
}

/// Measure every task in the subset.
///
/// Never fails: a task whose measurement errors gets a fallback estimate.
pub fn analyze(
    tasks: &[MaintenanceTask],
    analyzer: &dyn Analyzer,
    freed_ratio: f64,
) -> BTreeMap<String, TaskAnalysis> {
    tasks
        .iter()
        .map(|task| {
            let analysis = match analyzer.measure(&task.id) {
                Ok(m) => TaskAnalysis {
                    estimated_freed: estimated_freed(m.size_bytes, freed_ratio),
                    size_bytes: m.size_bytes,
                    file_count: m.file_count,
                    folders: m.folders,
                    largest_files: m.largest_files,
                    last_modified: m.last_modified,
                    is_fallback: false,
                },
                Err(e) => {
                    warn!(task = %task.id, "Analysis failed, using fallback estimate: {}", e);
                    fallback_analysis(&task.id, freed_ratio)
                }
            };
            debug!(
                task = %task.id,
                bytes = analysis.size_bytes,
                fallback = analysis.is_fallback,
                "Analyzed"
            );
            (task.id.clone(), analysis)
        })
        .collect()
}

/// `analyze` with the default freed ratio
pub fn analyze_default(
    tasks: &[MaintenanceTask],
    analyzer: &dyn Analyzer,
) -> BTreeMap<String, TaskAnalysis> {
    analyze(tasks, analyzer, ANALYSIS_FREED_RATIO)
}

/// Sizes to write back into the catalog's `estimated_size`
pub fn size_estimates(analysis: &BTreeMap<String, TaskAnalysis>) -> HashMap<String, u64> {
    analysis
        .iter()
        .map(|(id, a)| (id.clone(), a.size_bytes))
        .collect()
}

/// Analyzer that walks the folders configured for each task
#[derive(Debug, Clone, Default)]
pub struct PathAnalyzer {
    roots: HashMap<String, Vec<PathBuf>>,
}

impl PathAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Measure `task_id` by walking these folders
    pub fn with_paths(mut self, task_id: impl Into<String>, paths: Vec<PathBuf>) -> Self {
        self.roots.insert(task_id.into(), paths);
        self
    }

    /// Folders of the built-in cleanup tasks, resolved from the environment
    pub fn windows_defaults() -> Self {
        let mut analyzer = Self::new();
        for &(id, var, relative) in DEFAULT_ROOTS {
            let Some(base) = std::env::var_os(var) else {
                continue;
            };
            let path = if relative.is_empty() {
                PathBuf::from(base)
            } else {
                PathBuf::from(base).join(relative)
            };
            analyzer.roots.entry(id.to_string()).or_default().push(path);
        }
        analyzer
    }
}

/// Cleanup task id, environment variable, path below it
const DEFAULT_ROOTS: &[(&str, &str, &str)] = &[
    ("temp_files", "TEMP", ""),
    ("temp_files", "SystemRoot", "Temp"),
    ("browser_cache", "LOCALAPPDATA", r"Google\Chrome\User Data\Default\Cache"),
    ("browser_cache", "LOCALAPPDATA", r"Microsoft\Edge\User Data\Default\Cache"),
    ("thumbnail_cache", "LOCALAPPDATA", r"Microsoft\Windows\Explorer"),
    ("error_reports", "ProgramData", r"Microsoft\Windows\WER"),
    ("windows_update_cache", "SystemRoot", r"SoftwareDistribution\Download"),
    (
        "delivery_optimization",
        "SystemRoot",
        r"ServiceProfiles\NetworkService\AppData\Local\Microsoft\Windows\DeliveryOptimization",
    ),
    ("windows_logs", "SystemRoot", "Logs"),
    ("prefetch", "SystemRoot", "Prefetch"),
    ("zalo_cache", "APPDATA", r"ZaloPC\cache"),
    ("old_downloads", "USERPROFILE", "Downloads"),
    ("windows_old", "SystemDrive", r"\Windows.old"),
];

impl Analyzer for PathAnalyzer {
    fn measure(&self, task_id: &str) -> Result<Measurement, AnalysisError> {
        let roots = self
            .roots
            .get(task_id)
            .ok_or_else(|| AnalysisError::Unsupported(task_id.to_string()))?;

        let mut measurement = Measurement::default();
        for root in roots.iter().filter(|r| r.exists()) {
            measure_folder(root, &mut measurement);
            measurement.folders.push(root.clone());
        }
        Ok(measurement)
    }
}

fn measure_folder(root: &Path, into: &mut Measurement) {
    for entry in WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        let size = metadata.len();
        into.size_bytes += size;
        into.file_count += 1;

        if let Ok(modified) = metadata.modified() {
            let modified: DateTime<Utc> = modified.into();
            if into.last_modified.is_none_or(|current| modified > current) {
                into.last_modified = Some(modified);
            }
        }

        record_largest(&mut into.largest_files, entry.path(), size);
    }
}

fn record_largest(largest: &mut Vec<FileRef>, path: &Path, size: u64) {
    if largest.len() == LARGEST_FILES_LIMIT && largest.last().is_some_and(|f| f.size >= size) {
        return;
    }
    let position = largest.partition_point(|f| f.size >= size);
    largest.insert(
        position,
        FileRef {
            path: path.to_path_buf(),
            size,
        },
    );
    largest.truncate(LARGEST_FILES_LIMIT);
}
