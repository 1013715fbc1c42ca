//! Engine configuration file handling.
//!
//! The tunables that used to be scattered literals (timeouts, free-space
//! floor, size heuristics, safety policy) live in one JSON document. Every
//! field has a default so a partial file is valid.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use strum::{Display, EnumString};

/// Share of a task's pre-analysis estimate reported as freed when a
/// successful cleanup executor reports no size.
pub const CLEANUP_FALLBACK_RATIO: f64 = 0.80;

/// Share of the measured size a cleanup is expected to actually free;
/// in-use files survive deletion.
pub const ANALYSIS_FREED_RATIO: f64 = 0.85;

/// Smallest free space a target drive may have.
pub const MIN_FREE_SPACE_BYTES: u64 = 100 * 1024 * 1024;

/// What to do when the safety checker reports the system unsafe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SafetyPolicy {
    /// Log the warnings and run every task anyway
    Advisory,
    /// Refuse high-risk tasks; run low and medium risk tasks with the warning recorded
    #[default]
    BlockHighRisk,
}

/// Engine configuration that can be saved/loaded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Best-effort upper bound on a single executor call
    pub task_timeout_secs: u64,
    /// Targets with less free space than this are rejected
    pub min_free_space_bytes: u64,
    /// Delay before the post-cleanup re-analysis
    pub reanalysis_delay_ms: u64,
    pub cleanup_fallback_ratio: f64,
    pub analysis_freed_ratio: f64,
    pub safety_policy: SafetyPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            task_timeout_secs: 600,
            min_free_space_bytes: MIN_FREE_SPACE_BYTES,
            reanalysis_delay_ms: 2000,
            cleanup_fallback_ratio: CLEANUP_FALLBACK_RATIO,
            analysis_freed_ratio: ANALYSIS_FREED_RATIO,
            safety_policy: SafetyPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Save configuration to a JSON file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .context("Failed to serialize configuration to JSON")?;

        fs::write(&path, json)
            .with_context(|| format!("Failed to write configuration to {:?}", path.as_ref()))?;

        Ok(())
    }

    /// Load configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read configuration from {:?}", path.as_ref()))?;

        let config: Self =
            serde_json::from_str(&content).context("Failed to parse configuration JSON")?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.task_timeout_secs == 0 {
            anyhow::bail!("Task timeout must be at least one second");
        }

        for (name, ratio) in [
            ("cleanup_fallback_ratio", self.cleanup_fallback_ratio),
            ("analysis_freed_ratio", self.analysis_freed_ratio),
        ] {
            if !(ratio > 0.0 && ratio <= 1.0) {
                anyhow::bail!("{} must be in (0, 1], got {}", name, ratio);
            }
        }

        Ok(())
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }

    pub fn reanalysis_delay(&self) -> Duration {
        Duration::from_millis(self.reanalysis_delay_ms)
    }
}
