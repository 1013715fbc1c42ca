//! Task catalog and priority ordering
//!
//! The catalog holds the definition of every maintenance task the tool knows
//! about. It is process-wide and read-mostly: the only runtime mutations are
//! the `selected` flag and the analyzer's `estimated_size`, both behind a
//! single mutex. Callers work with cloned snapshots, never with live entries.
//!
//! # Execution order
//!
//! ```text
//! priority  high → medium → low
//! risk      low → medium → high   (within equal priority)
//! position  catalog declaration order (stable tie-break)
//! ```

use crate::error::{EngineError, Result};
use crate::types::{Priority, RiskLevel, RunKind, TaskCategory};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

/// A single named maintenance action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceTask {
    /// Stable key, unique within the catalog
    pub id: String,
    pub name: String,
    pub description: String,
    pub category: TaskCategory,
    pub risk_level: RiskLevel,
    pub priority: Priority,
    pub selected: bool,
    /// Reclaimable or copyable bytes; `None` until analyzed
    pub estimated_size: Option<u64>,
    /// Tasks sharing a group cannot be selected together
    #[serde(default)]
    pub exclusive_group: Option<String>,
}

impl MaintenanceTask {
    /// Create an unselected task with medium priority and low risk
    pub fn new(id: impl Into<String>, name: impl Into<String>, category: TaskCategory) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            category,
            risk_level: RiskLevel::default(),
            priority: Priority::default(),
            selected: false,
            estimated_size: None,
            exclusive_group: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_risk(mut self, risk: RiskLevel) -> Self {
        self.risk_level = risk;
        self
    }

    pub fn with_estimated_size(mut self, bytes: u64) -> Self {
        self.estimated_size = Some(bytes);
        self
    }

    pub fn with_exclusive_group(mut self, group: impl Into<String>) -> Self {
        self.exclusive_group = Some(group.into());
        self
    }

    pub fn selected(mut self) -> Self {
        self.selected = true;
        self
    }

    /// Run kind implied by the task id prefix
    pub fn run_kind(&self) -> RunKind {
        if self.id.starts_with("backup_") {
            RunKind::Backup
        } else if self.id.starts_with("restore_") {
            RunKind::Restore
        } else {
            RunKind::Cleanup
        }
    }

    /// Sort key for execution ordering (without the positional tie-break)
    fn order_key(&self) -> (u8, u8) {
        (self.priority.rank(), self.risk_level.rank())
    }
}

/// Process-wide catalog of maintenance tasks
#[derive(Debug)]
pub struct TaskCatalog {
    tasks: Mutex<Vec<MaintenanceTask>>,
}

impl TaskCatalog {
    /// Build a catalog from task definitions.
    ///
    /// Fails if two definitions share an id.
    pub fn new(tasks: Vec<MaintenanceTask>) -> Result<Self> {
        let mut seen = HashSet::new();
        for task in &tasks {
            if !seen.insert(task.id.as_str()) {
                return Err(EngineError::config(format!("Duplicate task id: {}", task.id)));
            }
        }
        Ok(Self {
            tasks: Mutex::new(tasks),
        })
    }

    /// The catalog shipped with the tool
    pub fn builtin() -> Self {
        Self {
            tasks: Mutex::new(builtin_tasks()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<MaintenanceTask>> {
        // Catalog state is advisory; a panic mid-update leaves it usable
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Snapshot of all tasks, optionally limited to one category
    pub fn list_tasks(&self, category: Option<TaskCategory>) -> Vec<MaintenanceTask> {
        self.lock()
            .iter()
            .filter(|t| category.is_none_or(|c| t.category == c))
            .cloned()
            .collect()
    }

    /// Snapshot of a single task
    pub fn get(&self, task_id: &str) -> Option<MaintenanceTask> {
        self.lock().iter().find(|t| t.id == task_id).cloned()
    }

    /// Snapshot of the currently selected tasks, in declaration order
    pub fn selected_tasks(&self) -> Vec<MaintenanceTask> {
        self.lock().iter().filter(|t| t.selected).cloned().collect()
    }

    /// Select or deselect a task.
    ///
    /// Selecting a task in an exclusive group deselects the other members of
    /// that group under the same lock. Returns the ids that were turned off.
    pub fn set_selected(&self, task_id: &str, selected: bool) -> Result<Vec<String>> {
        let mut tasks = self.lock();

        let index = tasks
            .iter()
            .position(|t| t.id == task_id)
            .ok_or_else(|| EngineError::UnknownTask(task_id.to_string()))?;

        let mut deselected = Vec::new();
        if selected {
            if let Some(group) = tasks[index].exclusive_group.clone() {
                for (i, other) in tasks.iter_mut().enumerate() {
                    let same_group = other.exclusive_group.as_ref() == Some(&group);
                    if i != index && other.selected && same_group {
                        other.selected = false;
                        deselected.push(other.id.clone());
                    }
                }
            }
        }
        tasks[index].selected = selected;

        debug!(task = task_id, selected, ?deselected, "Task selection changed");
        Ok(deselected)
    }

    /// Select or deselect every task, optionally within one category.
    ///
    /// Exclusive groups keep only their first member when selecting.
    pub fn select_all(&self, category: Option<TaskCategory>, selected: bool) {
        let mut tasks = self.lock();
        let mut claimed_groups = HashSet::new();

        for task in tasks.iter_mut() {
            if !category.is_none_or(|c| task.category == c) {
                continue;
            }
            if selected {
                if let Some(group) = &task.exclusive_group {
                    if !claimed_groups.insert(group.clone()) {
                        task.selected = false;
                        continue;
                    }
                }
            }
            task.selected = selected;
        }
    }

    /// Record an analyzer measurement for a task
    pub fn set_estimated_size(&self, task_id: &str, bytes: Option<u64>) -> Result<()> {
        let mut tasks = self.lock();
        let task = tasks
            .iter_mut()
            .find(|t| t.id == task_id)
            .ok_or_else(|| EngineError::UnknownTask(task_id.to_string()))?;
        task.estimated_size = bytes;
        Ok(())
    }

    /// Record many measurements at once; unknown ids are ignored
    pub fn apply_estimates(&self, estimates: &HashMap<String, u64>) {
        let mut tasks = self.lock();
        for task in tasks.iter_mut() {
            if let Some(bytes) = estimates.get(&task.id) {
                task.estimated_size = Some(*bytes);
            }
        }
    }

    /// Order selected tasks for execution.
    ///
    /// Priority descending, then risk ascending, then catalog declaration
    /// order. Tasks unknown to the catalog go after known ones of equal rank,
    /// in input order. Duplicate ids keep their first occurrence.
    pub fn compute_execution_order(&self, selected: &[MaintenanceTask]) -> Vec<MaintenanceTask> {
        let positions: HashMap<String, usize> = self
            .lock()
            .iter()
            .enumerate()
            .map(|(i, t)| (t.id.clone(), i))
            .collect();

        let mut seen = HashSet::new();
        let mut plan: Vec<MaintenanceTask> = selected
            .iter()
            .filter(|t| seen.insert(t.id.clone()))
            .cloned()
            .collect();

        // Stable sort keeps input order among unknown tasks of equal rank
        plan.sort_by_key(|t| {
            let (priority, risk) = t.order_key();
            (priority, risk, positions.get(&t.id).copied().unwrap_or(usize::MAX))
        });
        plan
    }

    /// Execution order of the catalog's current selection
    pub fn plan_selected(&self) -> Vec<MaintenanceTask> {
        let selected = self.selected_tasks();
        self.compute_execution_order(&selected)
    }

    /// Plan for an explicit list of task ids
    pub fn plan_for_ids<S: AsRef<str>>(&self, ids: &[S]) -> Result<Vec<MaintenanceTask>> {
        let tasks = ids
            .iter()
            .map(|id| {
                self.get(id.as_ref())
                    .ok_or_else(|| EngineError::UnknownTask(id.as_ref().to_string()))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(self.compute_execution_order(&tasks))
    }
}

/// One row of the built-in task table
type TaskRow = (&'static str, &'static str, TaskCategory, Priority, RiskLevel, &'static str);

const BUILTIN_TASKS: &[TaskRow] = {
    use Priority::{High, Low, Medium};
    use RiskLevel::{High as Risky, Low as Safe, Medium as Moderate};
    use TaskCategory as C;

    &[
        // Backup
        ("backup_drivers", "Drivers", C::Drivers, High, Safe,
            "Export installed third-party drivers"),
        ("backup_zalo", "Zalo data", C::ChatApp, High, Safe,
            "Copy Zalo chat history and received files"),
        ("backup_browser_profiles", "Browser profiles", C::BrowserProfiles, Medium, Safe,
            "Copy Chrome, Edge, Firefox and Coc Coc profiles"),
        ("backup_user_folders", "User folders", C::UserFolders, High, Safe,
            "Copy Desktop, Documents, Pictures, Videos, Music and Downloads"),
        ("backup_wifi", "Wi-Fi profiles", C::Wifi, High, Safe,
            "Export saved Wi-Fi networks with their keys"),
        ("backup_custom_folders", "Custom folders", C::CustomFolders, Medium, Safe,
            "Copy folders chosen by the user"),
        ("backup_system_info", "System information", C::System, Low, Safe,
            "Save hardware and installed software inventory"),
        // Restore
        ("restore_drivers", "Restore drivers", C::Drivers, Low, Risky,
            "Install drivers from a backup"),
        ("restore_zalo", "Restore Zalo data", C::ChatApp, High, Risky,
            "Replace current Zalo data with a backup"),
        ("restore_browser_profiles", "Restore browser profiles", C::BrowserProfiles,
            Medium, Moderate, "Replace browser profiles with a backup"),
        ("restore_user_folders", "Restore user folders", C::UserFolders, Medium, Risky,
            "Copy backed-up user folders over the current ones"),
        ("restore_wifi", "Restore Wi-Fi profiles", C::Wifi, High, Moderate,
            "Import Wi-Fi networks from a backup"),
        // Cleanup
        ("dns_cache", "DNS cache", C::Network, High, Safe,
            "Flush the resolver cache"),
        ("temp_files", "Temporary files", C::Cache, High, Safe,
            "User and Windows temp folders"),
        ("recycle_bin", "Recycle Bin", C::Trash, High, Moderate,
            "Empty the Recycle Bin on all drives"),
        ("browser_cache", "Browser cache", C::Cache, Medium, Safe,
            "Cached pages and images of installed browsers"),
        ("thumbnail_cache", "Thumbnail cache", C::Cache, Medium, Safe,
            "Explorer thumbnail databases"),
        ("error_reports", "Error reports", C::System, Medium, Safe,
            "Windows Error Reporting queues and archives"),
        ("delivery_optimization", "Delivery Optimization", C::System, Medium, Safe,
            "Peer update download cache"),
        ("windows_update_cache", "Windows Update cache", C::System, Medium, Moderate,
            "Downloaded update packages in SoftwareDistribution"),
        ("zalo_cache", "Zalo cache", C::Apps, Medium, Moderate,
            "Zalo image and media cache"),
        ("windows_logs", "Windows logs", C::System, Low, Safe,
            "CBS, DISM and setup log files"),
        ("prefetch", "Prefetch", C::System, Low, Moderate,
            "Application launch prefetch data"),
        ("old_downloads", "Old downloads", C::Trash, Low, Moderate,
            "Files in Downloads untouched for 90 days"),
        ("windows_old", "Previous Windows installation", C::System, Low, Risky,
            "The Windows.old folder left by upgrades"),
        // System tweaks
        ("context_menu_classic", "Classic context menu", C::System, Low, Moderate,
            "Use the Windows 10 style right-click menu"),
        ("context_menu_modern", "Modern context menu", C::System, Low, Moderate,
            "Use the Windows 11 style right-click menu"),
    ]
};

/// Tasks that share a mutually exclusive group
const EXCLUSIVE_GROUPS: &[(&str, &str)] = &[
    ("context_menu_classic", "context_menu_style"),
    ("context_menu_modern", "context_menu_style"),
];

/// Definitions for every task the Windows tool offers
fn builtin_tasks() -> Vec<MaintenanceTask> {
    BUILTIN_TASKS
        .iter()
        .map(|&(id, name, category, priority, risk, description)| {
            let task = MaintenanceTask::new(id, name, category)
                .with_priority(priority)
                .with_risk(risk)
                .with_description(description);
            match EXCLUSIVE_GROUPS.iter().find(|(member, _)| *member == id) {
                Some((_, group)) => task.with_exclusive_group(*group),
                None => task,
            }
        })
        .collect()
}
