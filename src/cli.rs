use crate::types::TaskCategory;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// SysMaint - Windows maintenance task engine
#[derive(Parser)]
#[command(name = "sysmaint")]
#[command(about = "Plan, run and report on backup, restore and cleanup tasks")]
#[command(version)]
pub struct Cli {
    /// Engine configuration file (JSON)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    pub json: bool,

    /// Verbose logging (debug level)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List catalog tasks
    Tasks {
        /// Only tasks in this category (e.g. cache, chat_app, wifi)
        #[arg(short, long)]
        category: Option<TaskCategory>,
    },
    /// Show the execution order for a set of tasks
    Plan {
        /// Task ids
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// List drives with their target verdicts
    Drives,
    /// Backup manifest discovery
    Manifests {
        #[command(subcommand)]
        query: ManifestCommands,
    },
    /// Measure reclaimable space for cleanup tasks
    Analyze {
        /// Task ids (default: every cleanup task in the catalog)
        ids: Vec<String>,
    },
    /// Run a plan against a target drive
    Run {
        /// Task ids
        #[arg(required = true)]
        ids: Vec<String>,
        /// Target drive (e.g. D:\ or /mnt/backup)
        #[arg(short, long)]
        target: String,
        /// Report what would be done without doing it
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Subcommand)]
pub enum ManifestCommands {
    /// Newest backup folder under a root
    Latest {
        /// Drive root to search
        root: PathBuf,
    },
    /// Wi-Fi profile exports under a root, newest first
    Wifi {
        /// Drive root to search
        root: PathBuf,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        <Self as clap::Parser>::parse()
    }
}
