//! Cleanup report envelope: summary, statistics, failures, recommendations.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::types::{CleanupPlan, ExecutionResult, ItemFailure, RiskLabel};

/// Totals for the report header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub total_items: usize,
    pub success: usize,
    pub failed: usize,
    pub skipped: usize,
    pub freed_bytes: u64,
    pub failed_bytes: u64,
}

/// Distribution tables for the report body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportStatistics {
    pub files_by_type: BTreeMap<String, u64>,
    pub space_by_type: BTreeMap<String, u64>,
    pub size_distribution: BTreeMap<String, u64>,
    pub risk_distribution: BTreeMap<String, u64>,
    pub top_directories: Vec<DirectoryUsage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryUsage {
    pub path: String,
    pub bytes: u64,
}

/// The persisted report envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanupReport {
    #[serde(default)]
    pub report_id: Option<i64>,
    pub generated_at: DateTime<Utc>,
    pub scan_type: String,
    pub summary: ReportSummary,
    pub statistics: ReportStatistics,
    pub failures: Vec<ItemFailure>,
    pub recommendations: Vec<String>,
}

/// Build the report for one executed plan.
#[must_use]
pub fn build_report(plan: &CleanupPlan, result: &ExecutionResult) -> CleanupReport {
    let mut files_by_type: BTreeMap<String, u64> = BTreeMap::new();
    let mut space_by_type: BTreeMap<String, u64> = BTreeMap::new();
    let mut size_distribution: BTreeMap<String, u64> = BTreeMap::new();
    let mut risk_distribution: BTreeMap<String, u64> = BTreeMap::new();
    let mut by_directory: BTreeMap<String, u64> = BTreeMap::new();

    for item in &plan.items {
        let type_key = extension_key(&item.path);
        *files_by_type.entry(type_key.clone()).or_default() += 1;
        *space_by_type.entry(type_key).or_default() += item.size;
        *size_distribution
            .entry(size_bucket(item.size).to_string())
            .or_default() += 1;
        *risk_distribution
            .entry(item.final_label.as_str().to_string())
            .or_default() += 1;
        if let Some(parent) = item.path.parent() {
            *by_directory
                .entry(parent.to_string_lossy().into_owned())
                .or_default() += item.size;
        }
    }

    let mut top_directories: Vec<DirectoryUsage> = by_directory
        .into_iter()
        .map(|(path, bytes)| DirectoryUsage { path, bytes })
        .collect();
    top_directories.sort_by(|a, b| b.bytes.cmp(&a.bytes).then_with(|| a.path.cmp(&b.path)));
    top_directories.truncate(5);

    CleanupReport {
        report_id: None,
        generated_at: Utc::now(),
        scan_type: plan.scan_type.clone(),
        summary: ReportSummary {
            total_items: result.total_items,
            success: result.success,
            failed: result.failed,
            skipped: result.skipped,
            freed_bytes: result.freed_bytes,
            failed_bytes: result.failed_bytes,
        },
        statistics: ReportStatistics {
            files_by_type,
            space_by_type,
            size_distribution,
            risk_distribution,
            top_directories,
        },
        failures: result.failures.clone(),
        recommendations: recommendations_for(plan, result),
    }
}

fn recommendations_for(plan: &CleanupPlan, result: &ExecutionResult) -> Vec<String> {
    let mut out = Vec::new();
    if result.failed > 0 {
        out.push(format!(
            "{} item(s) failed; review the failure list and retry, or restore from backup",
            result.failed
        ));
    }
    if result.skipped > result.success {
        out.push(
            "most items were skipped; re-scan to refresh the plan before executing again"
                .to_string(),
        );
    }
    let dangerous = plan
        .items
        .iter()
        .filter(|i| i.final_label == RiskLabel::Dangerous)
        .count();
    if dangerous > 0 {
        out.push(format!(
            "{dangerous} dangerous item(s) were fully backed up; keep the backups until you are sure"
        ));
    }
    if out.is_empty() {
        out.push("cleanup completed cleanly; no follow-up needed".to_string());
    }
    out
}

fn extension_key(path: &Path) -> String {
    path.extension().map_or_else(
        || "(none)".to_string(),
        |e| e.to_string_lossy().to_lowercase(),
    )
}

const MIB: u64 = 1024 * 1024;

fn size_bucket(size: u64) -> &'static str {
    match size {
        s if s < MIB => "<1MiB",
        s if s < 10 * MIB => "1-10MiB",
        s if s < 100 * MIB => "10-100MiB",
        _ => ">=100MiB",
    }
}
