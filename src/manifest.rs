//! Backup manifests on a target drive
//!
//! A backup run writes into one dated folder at the drive root:
//!
//! ```text
//! backup_15_03_2024_09_30/
//! ├── 01_Drivers/
//! ├── 02_Zalo_Data/
//! ├── 02_Browser_Profiles/
//! ├── 03_User_Folders/
//! ├── 04_Custom_Folders/
//! ├── 05_System_Info/
//! ├── 06_Backup_Logs/
//! └── 07_WiFi_Config.json
//! ```
//!
//! The folder name carries the creation time (local clock, minute precision)
//! and is the only persisted format the restore side depends on. Which slots
//! exist tells what the backup contains.

use crate::catalog::MaintenanceTask;
use crate::error::{EngineError, Result};
use crate::report::{OrchestrationReport, OverallStatus};
use crate::types::TaskCategory;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

pub const FOLDER_PREFIX: &str = "backup_";
const FOLDER_TIME_FORMAT: &str = "%d_%m_%Y_%H_%M";

pub const DRIVERS_SLOT: &str = "01_Drivers";
pub const CHAT_APP_SLOT: &str = "02_Zalo_Data";
pub const BROWSER_PROFILES_SLOT: &str = "02_Browser_Profiles";
pub const USER_FOLDERS_SLOT: &str = "03_User_Folders";
pub const CUSTOM_FOLDERS_SLOT: &str = "04_Custom_Folders";
pub const SYSTEM_INFO_SLOT: &str = "05_System_Info";
pub const LOGS_SLOT: &str = "06_Backup_Logs";
pub const WIFI_SLOT: &str = "07_WiFi_Config.json";

/// Which categories a backup holds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestCategories {
    pub has_drivers: bool,
    pub has_chat_app: bool,
    pub has_user_folders: bool,
    pub has_browser_profiles: bool,
    pub has_custom_folders: bool,
    pub has_system_info: bool,
    pub has_wifi: bool,
}

impl ManifestCategories {
    /// Read the categories from the slots present in a backup folder
    pub fn detect(folder: &Path) -> Self {
        Self {
            has_drivers: folder.join(DRIVERS_SLOT).is_dir(),
            has_chat_app: folder.join(CHAT_APP_SLOT).is_dir(),
            has_user_folders: folder.join(USER_FOLDERS_SLOT).is_dir(),
            has_browser_profiles: folder.join(BROWSER_PROFILES_SLOT).is_dir(),
            has_custom_folders: folder.join(CUSTOM_FOLDERS_SLOT).is_dir(),
            has_system_info: folder.join(SYSTEM_INFO_SLOT).is_dir(),
            has_wifi: folder.join(WIFI_SLOT).is_file(),
        }
    }

    /// Categories a backup plan will fill
    pub fn from_tasks(tasks: &[MaintenanceTask]) -> Self {
        let mut categories = Self::default();
        for task in tasks {
            match task.category {
                TaskCategory::Drivers => categories.has_drivers = true,
                TaskCategory::ChatApp => categories.has_chat_app = true,
                TaskCategory::UserFolders => categories.has_user_folders = true,
                TaskCategory::BrowserProfiles => categories.has_browser_profiles = true,
                TaskCategory::CustomFolders => categories.has_custom_folders = true,
                TaskCategory::System => categories.has_system_info = true,
                TaskCategory::Wifi => categories.has_wifi = true,
                _ => {}
            }
        }
        categories
    }

    /// Directory slots for the flagged categories
    fn directory_slots(&self) -> Vec<&'static str> {
        [
            (self.has_drivers, DRIVERS_SLOT),
            (self.has_chat_app, CHAT_APP_SLOT),
            (self.has_browser_profiles, BROWSER_PROFILES_SLOT),
            (self.has_user_folders, USER_FOLDERS_SLOT),
            (self.has_custom_folders, CUSTOM_FOLDERS_SLOT),
            (self.has_system_info, SYSTEM_INFO_SLOT),
        ]
        .into_iter()
        .filter_map(|(present, slot)| present.then_some(slot))
        .collect()
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// A backup folder found on (or written to) a drive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupManifest {
    pub path: PathBuf,
    /// Timestamp embedded in the folder name
    pub created_at: NaiveDateTime,
    pub size_bytes: u64,
    pub categories: ManifestCategories,
}

impl BackupManifest {
    /// Read a manifest from an existing backup folder
    pub fn from_folder(folder: &Path) -> Result<Self> {
        let name = folder
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                EngineError::manifest(format!("Invalid folder path: {}", folder.display()))
            })?;
        let created_at = parse_folder_name(name)
            .ok_or_else(|| EngineError::manifest(format!("Not a backup folder name: {}", name)))?;

        Ok(Self {
            path: folder.to_path_buf(),
            created_at,
            size_bytes: folder_size(folder),
            categories: ManifestCategories::detect(folder),
        })
    }

    pub fn slot(&self, slot: &str) -> PathBuf {
        self.path.join(slot)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.slot(LOGS_SLOT)
    }
}

/// Backup folder name for a creation time
pub fn folder_name(created_at: NaiveDateTime) -> String {
    format!("{}{}", FOLDER_PREFIX, created_at.format(FOLDER_TIME_FORMAT))
}

/// Timestamp embedded in a backup folder name, if it is one.
///
/// Only the exact zero-padded form counts: `backup_1_1_2024_9_5` is not a
/// backup folder.
pub fn parse_folder_name(name: &str) -> Option<NaiveDateTime> {
    let stamp = name.strip_prefix(FOLDER_PREFIX)?;
    let created_at = NaiveDateTime::parse_from_str(stamp, FOLDER_TIME_FORMAT).ok()?;
    (folder_name(created_at) == name).then_some(created_at)
}

/// Create the dated backup folder with slots for `categories`, ready for the
/// backup executors to fill. Call `finalize_manifest` after the run.
///
/// The logs slot is always created. The Wi-Fi slot is a file, written as an
/// empty profile list until the Wi-Fi export fills it.
pub fn create_manifest(
    root: &Path,
    created_at: NaiveDateTime,
    categories: &ManifestCategories,
) -> Result<BackupManifest> {
    let folder = root.join(folder_name(created_at));
    fs::create_dir_all(&folder)?;

    for slot in categories.directory_slots() {
        fs::create_dir_all(folder.join(slot))?;
    }
    fs::create_dir_all(folder.join(LOGS_SLOT))?;

    let wifi = folder.join(WIFI_SLOT);
    if categories.has_wifi && !wifi.exists() {
        fs::write(&wifi, "[]")?;
    }

    debug!(path = %folder.display(), "Backup folder prepared");
    BackupManifest::from_folder(&folder)
}

/// Settle the backup folder once its run has finished.
///
/// A run that made no progress at all leaves no backup behind: the folder is
/// deleted and `None` returned, so it can never be offered for a restore.
/// Otherwise the slots of categories whose tasks made no progress are
/// removed and the manifest is read back from disk.
pub fn finalize_manifest(
    manifest: BackupManifest,
    plan: &[MaintenanceTask],
    report: &OrchestrationReport,
) -> Result<Option<BackupManifest>> {
    if report.overall_status == OverallStatus::Failed {
        remove_if_present(&manifest.path)?;
        warn!(path = %manifest.path.display(), "Backup failed, folder removed");
        return Ok(None);
    }

    let completed: Vec<MaintenanceTask> = plan
        .iter()
        .filter(|task| {
            report
                .result(&task.id)
                .is_some_and(|result| result.status.made_progress())
        })
        .cloned()
        .collect();
    let planned = ManifestCategories::from_tasks(plan);
    let kept = ManifestCategories::from_tasks(&completed);

    let kept_slots = kept.directory_slots();
    for slot in planned.directory_slots() {
        if !kept_slots.contains(&slot) {
            debug!(slot, "Removing slot of a failed backup task");
            remove_if_present(&manifest.slot(slot))?;
        }
    }
    if planned.has_wifi && !kept.has_wifi {
        remove_if_present(&manifest.slot(WIFI_SLOT))?;
    }

    info!(path = %manifest.path.display(), "Backup folder finalized");
    BackupManifest::from_folder(&manifest.path).map(Some)
}

fn remove_if_present(path: &Path) -> Result<()> {
    let removed = if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    match removed {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
        _ => Ok(()),
    }
}

/// Save a run report as JSON in the manifest's logs slot
pub fn write_report_log(
    manifest: &BackupManifest,
    report: &OrchestrationReport,
) -> Result<PathBuf> {
    let logs = manifest.logs_dir();
    fs::create_dir_all(&logs)?;

    let file = logs.join(format!(
        "{}_report_{}.json",
        report.kind,
        report.finished_at.format("%Y%m%d_%H%M%S")
    ));
    let json = serde_json::to_string_pretty(report)?;
    fs::write(&file, json)?;

    debug!(path = %file.display(), "Report saved");
    Ok(file)
}

/// All backup folders directly under `root`, newest first.
///
/// A missing root yields an empty list.
pub fn list_manifests(root: &Path) -> Result<Vec<BackupManifest>> {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(root = %root.display(), "No such root, no manifests");
            return Ok(Vec::new());
        }
        Err(e) => return Err(e.into()),
    };

    let mut manifests = Vec::new();
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if parse_folder_name(name).is_none() {
            continue;
        }
        match BackupManifest::from_folder(&path) {
            Ok(manifest) => manifests.push(manifest),
            Err(e) => warn!(path = %path.display(), "Skipping backup folder: {}", e),
        }
    }

    manifests.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.path.cmp(&a.path))
    });
    Ok(manifests)
}

/// The newest backup on a drive.
///
/// Greatest embedded timestamp wins; equal timestamps fall back to the
/// lexicographically greatest path.
pub fn find_latest_manifest(root: &Path) -> Result<Option<BackupManifest>> {
    Ok(list_manifests(root)?.into_iter().next())
}

/// Standalone Wi-Fi profile exports on a drive, newest first.
///
/// Looks for `*WiFi*.json` at the root and inside backup folders. The first
/// entry is the default restore candidate.
pub fn discover_wifi_backup_files(root: &Path) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        return Ok(Vec::new());
    }

    let mut found: Vec<(SystemTime, PathBuf)> = Vec::new();
    for entry in WalkDir::new(root).min_depth(1).max_depth(2) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                debug!("Skipping unreadable entry: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() || !is_wifi_export(entry.path()) {
            continue;
        }
        // Below the root, only backup folders are searched
        if entry.depth() == 2 {
            let in_backup = entry
                .path()
                .parent()
                .and_then(|p| p.file_name())
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(FOLDER_PREFIX));
            if !in_backup {
                continue;
            }
        }

        let modified = entry
            .metadata()
            .ok()
            .and_then(|m| m.modified().ok())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        found.push((modified, entry.into_path()));
    }

    found.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
    Ok(found.into_iter().map(|(_, path)| path).collect())
}

fn is_wifi_export(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    name.contains("WiFi")
        && path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"))
}

fn folder_size(folder: &Path) -> u64 {
    WalkDir::new(folder)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .map(|metadata| metadata.len())
        .sum()
}
