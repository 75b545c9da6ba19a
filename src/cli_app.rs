//! CLI front-end: drives scan, preview, execute, restore, history, and reap
//! over the library. The core never depends on anything in this module.

#![allow(missing_docs)]
#![allow(clippy::cast_precision_loss)]

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use chrono::Utc;
use clap::{Parser, Subcommand};
use colored::Colorize;

use crate::ai::client::AiReviewer;
use crate::ai::cost::CostController;
use crate::ai::{LlmGateway, NoLlm};
use crate::arbiter::RiskArbiter;
use crate::backup::BackupStore;
use crate::core::config::Config;
use crate::core::errors::Result;
use crate::core::events::{PipelineEvent, event_channel};
use crate::core::types::{ItemStatus, RiskLabel, ScanItem};
use crate::executor::Executor;
use crate::recovery::RecoveryManager;
use crate::report::build_report;
use crate::rules::RuleEngine;
use crate::scanner::{IncrementalIndex, ScanFilters, ScannerPool};
use crate::store::{Database, NewPlanItem, RecoveryFilter};
use crate::whitelist::Whitelist;

#[derive(Debug, Parser)]
#[command(name = "cleanmaster", version, about = "Disk-hygiene engine")]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Scan roots and list candidate junk.
    Scan {
        roots: Vec<PathBuf>,
        /// Skip entries smaller than this many bytes.
        #[arg(long, default_value_t = 0)]
        min_size: u64,
        /// Include dot-prefixed entries.
        #[arg(long)]
        include_hidden: bool,
        /// Only files changed since the last successful scan.
        #[arg(long)]
        incremental: bool,
    },
    /// Scan, classify, and persist a sealed cleanup plan without deleting.
    Preview {
        roots: Vec<PathBuf>,
        #[arg(long, default_value_t = 0)]
        min_size: u64,
        #[arg(long)]
        include_hidden: bool,
    },
    /// Execute a previously previewed plan.
    Execute {
        plan_id: String,
    },
    /// Restore one backup from the recovery log.
    Restore {
        recovery_id: i64,
        /// Alternate destination path.
        #[arg(long)]
        dest: Option<PathBuf>,
    },
    /// Show recovery history.
    History {
        #[arg(long, default_value_t = 0)]
        page: u32,
        /// Substring filter over paths.
        #[arg(long)]
        keyword: Option<String>,
    },
    /// Delete expired backups, keeping the audit trail.
    Reap {
        #[arg(long)]
        days: Option<u32>,
        #[arg(long)]
        max_versions: Option<usize>,
    },
}

pub fn run(cli: &Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref())?;
    match &cli.command {
        Command::Scan {
            roots,
            min_size,
            include_hidden,
            incremental,
        } => scan_cmd(&config, roots, *min_size, *include_hidden, *incremental),
        Command::Preview {
            roots,
            min_size,
            include_hidden,
        } => preview_cmd(&config, roots, *min_size, *include_hidden),
        Command::Execute { plan_id } => execute_cmd(&config, plan_id),
        Command::Restore { recovery_id, dest } => restore_cmd(&config, *recovery_id, dest.as_deref()),
        Command::History { page, keyword } => history_cmd(&config, *page, keyword.as_deref()),
        Command::Reap { days, max_versions } => reap_cmd(&config, *days, *max_versions),
    }
}

fn scan_items(
    config: &Config,
    roots: &[PathBuf],
    filters: ScanFilters,
    incremental: bool,
) -> Result<Vec<ScanItem>> {
    let whitelist = Whitelist::with_builtins(config.whitelist.protected_paths.clone());
    let (events, event_rx) = event_channel(256);
    let index = if incremental {
        Some(Arc::new(IncrementalIndex::open(
            &config.effective_index_path(),
            config.incremental.min_interval_secs,
        )?))
    } else {
        None
    };
    let pool = ScannerPool::from_config(config, whitelist.current(), events, index)?;

    // Drain warnings concurrently so a noisy tree never blocks the workers.
    let warning_printer = std::thread::spawn(move || {
        for event in event_rx {
            if let PipelineEvent::ScanWarning { path, message, .. } = event {
                eprintln!("{} {}: {message}", "warning:".yellow(), path.display());
            }
        }
    });

    let cancel = Arc::new(AtomicBool::new(false));
    let mut stream = pool.scan(roots.to_vec(), filters, cancel);
    let mut items = Vec::new();
    for item in stream.by_ref() {
        items.push(item);
    }
    let summary = stream.join();
    drop(pool);
    let _ = warning_printer.join();

    if summary.cancelled {
        eprintln!("{}", "scan cancelled".yellow());
    }
    Ok(items)
}

fn scan_cmd(
    config: &Config,
    roots: &[PathBuf],
    min_size: u64,
    include_hidden: bool,
    incremental: bool,
) -> Result<()> {
    let items = scan_items(
        config,
        roots,
        ScanFilters {
            min_size,
            include_hidden,
            ..ScanFilters::default()
        },
        incremental,
    )?;

    let total: u64 = items.iter().map(|i| i.size).sum();
    for item in &items {
        println!("{:>12}  {}", human_bytes(item.size), item.path.display());
    }
    println!(
        "{} items, {}",
        items.len().to_string().bold(),
        human_bytes(total).bold()
    );
    Ok(())
}

fn build_gateway(config: &Config) -> Arc<dyn LlmGateway> {
    let cost = Arc::new(CostController::new(config.cost.clone()));
    match AiReviewer::new(config.ai.clone(), &config.breaker, cost) {
        Ok(reviewer) if reviewer.available() => Arc::new(reviewer),
        _ => Arc::new(NoLlm),
    }
}

fn preview_cmd(
    config: &Config,
    roots: &[PathBuf],
    min_size: u64,
    include_hidden: bool,
) -> Result<()> {
    let items = scan_items(
        config,
        roots,
        ScanFilters {
            min_size,
            include_hidden,
            ..ScanFilters::default()
        },
        false,
    )?;

    let db = Database::open(&config.paths.db_path)?;
    let whitelist = Whitelist::with_builtins(config.whitelist.protected_paths.clone());
    let arbiter = RiskArbiter::new(
        RuleEngine::with_builtins(),
        whitelist.current(),
        build_gateway(config),
    );

    let now = Utc::now();
    let mut new_items = Vec::with_capacity(items.len());
    let mut by_label = [0usize; 3];
    for item in &items {
        let assessment = arbiter.assess(item, now);
        by_label[assessment.final_label as usize] += 1;
        let reason_id = db.intern_reason(&assessment.rationale)?;
        new_items.push(NewPlanItem {
            path: item.path.clone(),
            size: item.size,
            kind: item.kind,
            rule_label: assessment.rule_label,
            final_label: assessment.final_label,
            reason_id,
        });
    }

    let target = roots
        .iter()
        .map(|r| r.display().to_string())
        .collect::<Vec<_>>()
        .join(", ");
    let plan = db.save_plan("cleanup preview", "manual", &target, new_items)?;

    println!("plan {}", plan.plan_id.bold());
    println!(
        "  {} safe, {} suspicious, {} dangerous",
        by_label[RiskLabel::Safe as usize].to_string().green(),
        by_label[RiskLabel::Suspicious as usize].to_string().yellow(),
        by_label[RiskLabel::Dangerous as usize].to_string().red(),
    );
    println!("  total {}", human_bytes(plan.total_size()));
    println!("run `cleanmaster execute {}` to clean", plan.plan_id);
    Ok(())
}

fn execute_cmd(config: &Config, plan_id: &str) -> Result<()> {
    let db = Arc::new(Database::open(&config.paths.db_path)?);
    let plan = db
        .get_plan(plan_id)?
        .ok_or_else(|| crate::core::errors::CmError::MalformedPlan {
            plan_id: plan_id.to_string(),
            details: "plan not found".to_string(),
        })?;

    let backups = BackupStore::open(&config.effective_backup_root())?;
    let whitelist = Whitelist::with_builtins(config.whitelist.protected_paths.clone());
    let (events, event_rx) = event_channel(config.executor.progress_capacity);

    let executor = Executor::new(
        Arc::clone(&db),
        backups,
        whitelist.current(),
        events,
        config.executor.clone(),
    );

    let cancel = AtomicBool::new(false);
    let printer = std::thread::spawn(move || {
        for event in event_rx {
            match event {
                PipelineEvent::ExecProgress {
                    current_index,
                    total,
                    ..
                } => eprintln!("  [{current_index}/{total}]"),
                PipelineEvent::ItemFinished { status, .. }
                    if status == ItemStatus::Failed =>
                {
                    eprintln!("{}", "  item failed".red());
                }
                _ => {}
            }
        }
    });

    let result = executor.execute(&plan, &cancel)?;
    drop(executor);
    let _ = printer.join();

    let report = build_report(&plan, &result);
    db.save_report(&plan.plan_id, None, &report)?;

    println!(
        "{}: {} cleaned, {} failed, {} skipped, {} freed",
        result.status.as_str().bold(),
        result.success.to_string().green(),
        result.failed.to_string().red(),
        result.skipped,
        human_bytes(result.freed_bytes).bold(),
    );
    for failure in &result.failures {
        eprintln!(
            "  {} {} ({})",
            "failed:".red(),
            failure.path.display(),
            failure.kind.as_str()
        );
    }
    Ok(())
}

fn restore_cmd(config: &Config, recovery_id: i64, dest: Option<&std::path::Path>) -> Result<()> {
    let db = Arc::new(Database::open(&config.paths.db_path)?);
    let backups = BackupStore::open(&config.effective_backup_root())?;
    let manager = RecoveryManager::new(db, backups);
    let restored_to = manager.restore(recovery_id, dest)?;
    println!("restored to {}", restored_to.display().to_string().green());
    Ok(())
}

fn history_cmd(config: &Config, page: u32, keyword: Option<&str>) -> Result<()> {
    let db = Arc::new(Database::open(&config.paths.db_path)?);
    let backups = BackupStore::open(&config.effective_backup_root())?;
    let manager = RecoveryManager::new(db, backups);

    let rows = match keyword {
        Some(keyword) => manager.search(keyword)?,
        None => manager.history(&RecoveryFilter::default(), page, 50)?,
    };
    for row in &rows {
        let marker = if row.restored {
            "restored".green()
        } else if row.backup_path.is_some() {
            "recoverable".yellow()
        } else {
            "no backup".dimmed()
        };
        println!(
            "{:>6}  {:<11}  {:<10}  {}",
            row.id,
            marker,
            row.backup_kind.as_str(),
            row.original_path.display()
        );
    }
    println!("{} row(s)", rows.len());
    Ok(())
}

fn reap_cmd(config: &Config, days: Option<u32>, max_versions: Option<usize>) -> Result<()> {
    let db = Arc::new(Database::open(&config.paths.db_path)?);
    let backups = BackupStore::open(&config.effective_backup_root())?;
    let manager = RecoveryManager::new(db, backups);

    let days = days.unwrap_or(config.backup.retention_days);
    let max_versions = max_versions.or(config.backup.max_versions);
    let report = manager.cleanup_expired(days, max_versions)?;
    println!(
        "reaped {} manifest(s), {} legacy backup(s), {} reclaimed",
        report.manifests_deleted,
        report.legacy_deleted,
        human_bytes(report.bytes_reclaimed)
    );
    Ok(())
}

fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} {}", UNITS[0])
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn human_bytes_picks_sane_units() {
        assert_eq!(human_bytes(512), "512 B");
        assert_eq!(human_bytes(3072), "3.0 KiB");
        assert_eq!(human_bytes(10 * 1024 * 1024), "10.0 MiB");
    }

    #[test]
    fn scan_command_parses() {
        let cli = Cli::parse_from(["cleanmaster", "scan", "/tmp", "--min-size", "1024"]);
        match cli.command {
            Command::Scan { roots, min_size, .. } => {
                assert_eq!(roots, vec![PathBuf::from("/tmp")]);
                assert_eq!(min_size, 1024);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn reap_command_parses_with_overrides() {
        let cli = Cli::parse_from([
            "cleanmaster",
            "reap",
            "--days",
            "14",
            "--max-versions",
            "3",
        ]);
        match cli.command {
            Command::Reap { days, max_versions } => {
                assert_eq!(days, Some(14));
                assert_eq!(max_versions, Some(3));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
