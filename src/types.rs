//! Type-safe task metadata for the maintenance engine
//!
//! Categories, risk levels, priorities and statuses are proper Rust enums
//! rather than strings, so catalog definitions and reports are checked at
//! compile time and serialize to stable snake_case names.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// Maintenance category a task belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TaskCategory {
    Cache,
    Trash,
    System,
    Apps,
    Network,
    Drivers,
    ChatApp,
    BrowserProfiles,
    UserFolders,
    Wifi,
    CustomFolders,
}

impl TaskCategory {
    /// Categories whose live data a restore overwrites.
    ///
    /// Restoring any of these requires a safety backup of the current state first.
    pub const fn is_live_data(self) -> bool {
        matches!(self, Self::ChatApp | Self::UserFolders | Self::Wifi)
    }
}

/// How much damage a task can do if it misbehaves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
}

impl RiskLevel {
    /// Sort rank: lower runs first among tasks of equal priority
    pub const fn rank(self) -> u8 {
        match self {
            Self::Low => 0,
            Self::Medium => 1,
            Self::High => 2,
        }
    }
}

/// Execution priority of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    /// Sort rank: lower runs first
    pub const fn rank(self) -> u8 {
        match self {
            Self::High => 0,
            Self::Medium => 1,
            Self::Low => 2,
        }
    }
}

/// Outcome of a single task execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TaskStatus {
    Success,
    Partial,
    Failed,
    /// Not started because the run was cancelled at a task boundary
    Cancelled,
}

impl TaskStatus {
    /// True if the task did at least part of its work
    pub const fn made_progress(self) -> bool {
        matches!(self, Self::Success | Self::Partial)
    }
}

/// Kind of orchestration run
///
/// Affects result normalization (size fallback) and post-run re-analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RunKind {
    Backup,
    Restore,
    #[default]
    Cleanup,
}
