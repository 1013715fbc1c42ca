//! Drive selection and target validation
//!
//! Backup and cleanup runs write to a target drive chosen by the user. The
//! active system drive is never an acceptable target. Enumeration itself is
//! behind the `DriveEnumerator` trait; `SysinfoDrives` is the stock
//! implementation.

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// A mounted volume as seen by the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriveInfo {
    /// Mount point or drive letter, e.g. `D:\` or `/mnt/usb`
    pub drive_id: String,
    pub label: String,
    pub free_space_bytes: u64,
    pub total_space_bytes: u64,
    pub file_system: String,
    pub is_active_system_drive: bool,
    pub is_removable: bool,
    pub is_network: bool,
}

impl DriveInfo {
    /// Root directory of the drive
    pub fn root(&self) -> PathBuf {
        PathBuf::from(&self.drive_id)
    }
}

impl fmt::Display for DriveInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.label.is_empty() {
            write!(f, "{}", self.drive_id)
        } else {
            write!(f, "{} ({})", self.drive_id, self.label)
        }
    }
}

/// Source of the machine's drive list
pub trait DriveEnumerator: Send + Sync {
    fn list(&self) -> Vec<DriveInfo>;
}

/// Outcome of validating a candidate target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetVerdict {
    pub ok: bool,
    /// Why the drive was rejected, or an advisory for an accepted drive
    pub reason: String,
}

impl TargetVerdict {
    fn accept(reason: impl Into<String>) -> Self {
        Self {
            ok: true,
            reason: reason.into(),
        }
    }

    fn reject(reason: impl Into<String>) -> Self {
        Self {
            ok: false,
            reason: reason.into(),
        }
    }

    /// Convert a rejection into an `InvalidTarget` error
    pub fn into_result(self, drive: &DriveInfo) -> Result<()> {
        if self.ok {
            Ok(())
        } else {
            Err(EngineError::invalid_target(&drive.drive_id, self.reason))
        }
    }
}

/// Validate a drive as a backup or cleanup target.
///
/// Rules, in order:
/// 1. The active system drive is rejected.
/// 2. Free space under `min_free_space_bytes` is rejected.
/// 3. Network and removable drives are accepted with an advisory.
pub fn validate_target(drive: &DriveInfo, min_free_space_bytes: u64) -> TargetVerdict {
    if drive.is_active_system_drive {
        return TargetVerdict::reject("drive holds the running Windows installation");
    }

    if drive.free_space_bytes < min_free_space_bytes {
        return TargetVerdict::reject(format!(
            "only {} bytes free, at least {} required",
            drive.free_space_bytes, min_free_space_bytes
        ));
    }

    if drive.is_network {
        return TargetVerdict::accept("network drive: copies may be slow or interrupted");
    }

    if drive.is_removable {
        return TargetVerdict::accept("removable drive: keep it connected until the run ends");
    }

    TargetVerdict::accept("")
}

/// Default drive to offer: the first non-system drive in enumeration order,
/// or the first drive of any kind. The caller must warn the user when the
/// result is the system drive.
pub fn default_target(drives: &[DriveInfo]) -> Option<&DriveInfo> {
    drives
        .iter()
        .find(|d| !d.is_active_system_drive)
        .or_else(|| drives.first())
}

/// Session state for the chosen target drive
#[derive(Debug, Clone, Default)]
pub struct DriveSelector {
    drives: Vec<DriveInfo>,
    selected: Option<usize>,
    min_free_space_bytes: u64,
}

impl DriveSelector {
    /// Build from an enumeration, preselecting the default target
    pub fn new(drives: Vec<DriveInfo>, min_free_space_bytes: u64) -> Self {
        let selected = default_target(&drives)
            .and_then(|default| drives.iter().position(|d| std::ptr::eq(d, default)));

        if let Some(index) = selected {
            debug!(drive = %drives[index], "Default target drive");
        }

        Self {
            drives,
            selected,
            min_free_space_bytes,
        }
    }

    pub fn from_enumerator(enumerator: &dyn DriveEnumerator, min_free_space_bytes: u64) -> Self {
        Self::new(enumerator.list(), min_free_space_bytes)
    }

    pub fn drives(&self) -> &[DriveInfo] {
        &self.drives
    }

    /// The drive Windows is running from, if enumerated
    pub fn active_system_drive(&self) -> Option<&DriveInfo> {
        self.drives.iter().find(|d| d.is_active_system_drive)
    }

    /// Currently selected drive
    pub fn selected(&self) -> Option<&DriveInfo> {
        self.selected.map(|i| &self.drives[i])
    }

    /// Choose a drive by id. The drive is not validated here.
    pub fn select(&mut self, drive_id: &str) -> Result<&DriveInfo> {
        let index = self
            .drives
            .iter()
            .position(|d| d.drive_id.eq_ignore_ascii_case(drive_id))
            .ok_or_else(|| EngineError::invalid_target(drive_id, "no such drive"))?;
        self.selected = Some(index);
        Ok(&self.drives[index])
    }

    /// Validate the selected drive and return it for a run
    pub fn validated_target(&self) -> Result<&DriveInfo> {
        let drive = self
            .selected()
            .ok_or_else(|| EngineError::invalid_target("<none>", "no drive selected"))?;

        let verdict = validate_target(drive, self.min_free_space_bytes);
        if verdict.ok && !verdict.reason.is_empty() {
            warn!(drive = %drive, "{}", verdict.reason);
        }
        verdict.into_result(drive)?;
        Ok(drive)
    }
}

/// Drive enumeration backed by `sysinfo`
#[derive(Debug, Default, Clone, Copy)]
pub struct SysinfoDrives;

impl DriveEnumerator for SysinfoDrives {
    fn list(&self) -> Vec<DriveInfo> {
        let disks = sysinfo::Disks::new_with_refreshed_list();
        let system_root = system_drive_root();

        let drives: Vec<DriveInfo> = disks
            .list()
            .iter()
            .map(|disk| {
                let mount = disk.mount_point();
                let file_system = disk.file_system().to_string_lossy().to_string();
                DriveInfo {
                    drive_id: mount.to_string_lossy().to_string(),
                    label: disk.name().to_string_lossy().to_string(),
                    free_space_bytes: disk.available_space(),
                    total_space_bytes: disk.total_space(),
                    is_active_system_drive: same_root(mount, &system_root),
                    is_removable: disk.is_removable(),
                    is_network: is_network_file_system(&file_system),
                    file_system,
                }
            })
            .collect();

        info!(count = drives.len(), "Enumerated drives");
        drives
    }
}

/// Root of the volume the OS runs from
fn system_drive_root() -> PathBuf {
    match std::env::var("SystemDrive") {
        Ok(letter) if !letter.is_empty() => {
            PathBuf::from(format!("{}\\", letter.trim_end_matches('\\')))
        }
        _ => PathBuf::from("/"),
    }
}

fn same_root(mount: &Path, system_root: &Path) -> bool {
    let normalize = |p: &Path| {
        p.to_string_lossy()
            .trim_end_matches(['\\', '/'])
            .to_ascii_uppercase()
    };
    normalize(mount) == normalize(system_root)
}

fn is_network_file_system(fs: &str) -> bool {
    matches!(
        fs.to_ascii_lowercase().as_str(),
        "nfs" | "nfs4" | "cifs" | "smbfs" | "smb2" | "9p" | "sshfs" | "fuse.sshfs"
    )
}
