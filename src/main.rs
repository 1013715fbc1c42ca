//! SysMaint - Main entry point
//!
//! Command-line front end over the maintenance engine: catalog inspection,
//! drive and manifest discovery, analysis, and (dry) runs.

use anyhow::{Context, Result, bail};
use chrono::Local;
use std::path::Path;
use std::sync::Arc;
use sysmaint::analyzer::{self, PathAnalyzer};
use sysmaint::catalog::{MaintenanceTask, TaskCatalog};
use sysmaint::cli::{Cli, Commands, ManifestCommands};
use sysmaint::config_file::EngineConfig;
use sysmaint::drive::{DriveEnumerator, DriveSelector, SysinfoDrives, validate_target};
use sysmaint::engine::{Orchestrator, Progress};
use sysmaint::executor::ExecutorRegistry;
use sysmaint::manifest::{self, ManifestCategories};
use sysmaint::report::{OrchestrationReport, OverallStatus, format_bytes};
use sysmaint::restore;
use sysmaint::types::{RunKind, TaskCategory};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Initialize logging to stderr; `RUST_LOG` overrides the default level
fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(path) => {
            info!("Loading configuration from: {:?}", path);
            EngineConfig::load_from_file(path)
        }
        None => Ok(EngineConfig::default()),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse_args();
    init_logging(cli.verbose);
    debug!("CLI arguments parsed");

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Tasks { category } => list_tasks(category, cli.json),
        Commands::Plan { ids } => show_plan(&ids, cli.json),
        Commands::Drives => list_drives(&config, cli.json),
        Commands::Manifests { query } => match query {
            ManifestCommands::Latest { root } => show_latest_manifest(&root, cli.json),
            ManifestCommands::Wifi { root } => show_wifi_files(&root, cli.json),
        },
        Commands::Analyze { ids } => run_analysis(&ids, &config, cli.json),
        Commands::Run {
            ids,
            target,
            dry_run,
        } => run_plan(&ids, &target, dry_run, config, cli.json),
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("Failed to serialize output")?
    );
    Ok(())
}

fn list_tasks(category: Option<TaskCategory>, json: bool) -> Result<()> {
    let tasks = TaskCatalog::builtin().list_tasks(category);
    if json {
        return print_json(&tasks);
    }

    for task in &tasks {
        println!(
            "{:<26} {:<16} priority={:<6} risk={:<6} {}",
            task.id, task.category, task.priority, task.risk_level, task.name
        );
    }
    Ok(())
}

fn show_plan(ids: &[String], json: bool) -> Result<()> {
    let plan = TaskCatalog::builtin().plan_for_ids(ids)?;
    if json {
        return print_json(&plan);
    }

    for (index, task) in plan.iter().enumerate() {
        println!(
            "{:>2}. {} (priority={}, risk={})",
            index + 1,
            task.id,
            task.priority,
            task.risk_level
        );
    }
    Ok(())
}

#[derive(serde::Serialize)]
struct DriveRow<'a> {
    #[serde(flatten)]
    drive: &'a sysmaint::drive::DriveInfo,
    usable: bool,
    reason: String,
    default: bool,
}

fn list_drives(config: &EngineConfig, json: bool) -> Result<()> {
    let selector = DriveSelector::from_enumerator(&SysinfoDrives, config.min_free_space_bytes);
    let default_id = selector.selected().map(|d| d.drive_id.clone());

    let rows: Vec<DriveRow<'_>> = selector
        .drives()
        .iter()
        .map(|drive| {
            let verdict = validate_target(drive, config.min_free_space_bytes);
            DriveRow {
                drive,
                usable: verdict.ok,
                reason: verdict.reason,
                default: default_id.as_deref() == Some(drive.drive_id.as_str()),
            }
        })
        .collect();

    if json {
        return print_json(&rows);
    }

    for row in &rows {
        println!(
            "{} {:<24} {:>10} free  {}{}",
            if row.default { "*" } else { " " },
            row.drive.to_string(),
            format_bytes(row.drive.free_space_bytes),
            if row.usable { "ok" } else { "rejected" },
            if row.reason.is_empty() {
                String::new()
            } else {
                format!(": {}", row.reason)
            }
        );
    }
    if selector.selected().is_some_and(|d| d.is_active_system_drive) {
        warn!("Only the system drive is available; it cannot be used as a target");
    }
    Ok(())
}

fn show_latest_manifest(root: &Path, json: bool) -> Result<()> {
    let latest = manifest::find_latest_manifest(root)?;
    if json {
        return print_json(&latest);
    }

    match latest {
        Some(found) => {
            println!("{}", found.path.display());
            println!("  created:  {}", found.created_at.format("%Y-%m-%d %H:%M"));
            println!("  size:     {}", format_bytes(found.size_bytes));
            println!("  contents: {:?}", found.categories);
        }
        None => println!("No backups found under {}", root.display()),
    }
    Ok(())
}

fn show_wifi_files(root: &Path, json: bool) -> Result<()> {
    let files = manifest::discover_wifi_backup_files(root)?;
    if json {
        return print_json(&files);
    }

    if files.is_empty() {
        println!("No Wi-Fi exports found under {}", root.display());
    }
    for (index, file) in files.iter().enumerate() {
        let marker = if index == 0 { " (default)" } else { "" };
        println!("{}{}", file.display(), marker);
    }
    Ok(())
}

fn run_analysis(ids: &[String], config: &EngineConfig, json: bool) -> Result<()> {
    let catalog = TaskCatalog::builtin();
    let tasks: Vec<MaintenanceTask> = if ids.is_empty() {
        catalog
            .list_tasks(None)
            .into_iter()
            .filter(|t| t.run_kind() == RunKind::Cleanup)
            .filter(|t| analyzer::fallback_range(&t.id).is_some())
            .collect()
    } else {
        catalog.plan_for_ids(ids)?
    };

    let analysis = analyzer::analyze(
        &tasks,
        &PathAnalyzer::windows_defaults(),
        config.analysis_freed_ratio,
    );
    if json {
        return print_json(&analysis);
    }

    for (id, entry) in &analysis {
        println!(
            "{:<24} {:>10}  ~{} freed, {} files{}",
            id,
            format_bytes(entry.size_bytes),
            format_bytes(entry.estimated_freed),
            entry.file_count,
            if entry.is_fallback { " (estimate)" } else { "" }
        );
    }
    Ok(())
}

/// Single run kind shared by every task in the plan
fn plan_kind(plan: &[MaintenanceTask]) -> Result<RunKind> {
    let Some(first) = plan.first() else {
        bail!("No tasks selected");
    };
    let kind = first.run_kind();
    if let Some(other) = plan.iter().find(|t| t.run_kind() != kind) {
        bail!(
            "Cannot mix {} and {} tasks in one run ({})",
            kind,
            other.run_kind(),
            other.id
        );
    }
    Ok(kind)
}

fn run_plan(
    ids: &[String],
    target: &str,
    dry_run: bool,
    config: EngineConfig,
    json: bool,
) -> Result<()> {
    let catalog = Arc::new(TaskCatalog::builtin());
    let plan = catalog.plan_for_ids(ids)?;
    let kind = plan_kind(&plan)?;

    let executors = if dry_run {
        ExecutorRegistry::dry_run(&plan)
    } else {
        ExecutorRegistry::new()
    };
    let missing = executors.missing(&plan);
    if !missing.is_empty() {
        bail!(
            "No executor available for: {} (use --dry-run to simulate)",
            missing.join(", ")
        );
    }

    let mut selector = DriveSelector::from_enumerator(&SysinfoDrives, config.min_free_space_bytes);
    selector.select(target)?;
    let target = selector.validated_target()?.clone();

    let probe: Arc<dyn DriveEnumerator> = Arc::new(SysinfoDrives);
    let orchestrator = Orchestrator::new(config)
        .with_drive_probe(probe)
        .with_reanalysis(Arc::clone(&catalog), Arc::new(PathAnalyzer::windows_defaults()));

    let cancel = orchestrator.cancel_token();
    ctrlc::set_handler(move || {
        eprintln!("\nCancelling after the current task...");
        cancel.cancel();
    })
    .context("Failed to install Ctrl-C handler")?;

    let progress = |p: Progress<'_>| {
        eprintln!("[{}/{}] {}", p.completed, p.total, p.current.name);
    };

    let reports: Vec<OrchestrationReport> = match kind {
        RunKind::Restore => {
            let outcome = restore::run_restore(
                &orchestrator,
                &catalog,
                &plan,
                &target,
                &executors,
                progress,
            )?;
            if outcome.aborted() {
                warn!("Restore skipped: no task had a completed safety backup");
            }
            for held in &outcome.held_back {
                warn!(task = %held.task_id, "{}", held.message);
            }
            outcome
                .safety_report
                .into_iter()
                .chain(outcome.restore_report)
                .collect()
        }
        RunKind::Backup => {
            let folder = if dry_run {
                info!("[DRY RUN] backup folder not created");
                None
            } else {
                let categories = ManifestCategories::from_tasks(&plan);
                let created_at = Local::now().naive_local();
                Some(manifest::create_manifest(&target.root(), created_at, &categories)?)
            };
            let report = orchestrator.run(kind, &plan, &target, &executors, progress)?;
            if let Some(folder) = folder {
                match manifest::finalize_manifest(folder, &plan, &report)? {
                    Some(finalized) => {
                        manifest::write_report_log(&finalized, &report)?;
                    }
                    None => warn!("Backup failed; no backup folder was kept"),
                }
            }
            vec![report]
        }
        RunKind::Cleanup => {
            let report = orchestrator.run(kind, &plan, &target, &executors, progress)?;
            orchestrator.wait_for_reanalysis();
            vec![report]
        }
    };

    if json {
        print_json(&reports)?;
    } else {
        for report in &reports {
            print!("{}", report);
        }
    }

    if reports
        .last()
        .is_some_and(|r| r.overall_status == OverallStatus::Failed)
    {
        std::process::exit(1);
    }
    Ok(())
}
