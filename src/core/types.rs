//! Shared value types for the scan → plan → execute → recover pipeline.

#![allow(missing_docs)]

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Deletion-risk label. The total order Safe < Suspicious < Dangerous is the
/// tie-break rule everywhere: when assessments disagree, the higher label wins.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum RiskLabel {
    Safe,
    #[default]
    Suspicious,
    Dangerous,
}

impl RiskLabel {
    /// Stable string form used in the database and reports.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Safe => "safe",
            Self::Suspicious => "suspicious",
            Self::Dangerous => "dangerous",
        }
    }

    /// Parse the database string form.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "safe" => Some(Self::Safe),
            "suspicious" => Some(Self::Suspicious),
            "dangerous" => Some(Self::Dangerous),
            _ => None,
        }
    }
}

/// Filesystem entry kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    File,
    Dir,
}

impl ItemKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Dir => "dir",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "file" => Some(Self::File),
            "dir" => Some(Self::Dir),
            _ => None,
        }
    }
}

/// The immutable fact produced by scanning: one candidate path.
///
/// Identity is by `path`; within one scan no two items share a path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanItem {
    /// Absolute, canonical path.
    pub path: PathBuf,
    /// Size in bytes; 0 for unreachable entries.
    pub size: u64,
    pub kind: ItemKind,
    pub discovered_at: DateTime<Utc>,
}

/// How the final risk label was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssessmentMethod {
    Whitelist,
    RuleOnly,
    AiEnhanced,
    RuleOnlyAiParseFailed,
    DefaultConservative,
}

impl AssessmentMethod {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Whitelist => "whitelist",
            Self::RuleOnly => "rule_only",
            Self::AiEnhanced => "ai_enhanced",
            Self::RuleOnlyAiParseFailed => "rule_only_ai_parse_failed",
            Self::DefaultConservative => "default_conservative",
        }
    }
}

/// Outcome of arbitration for one scan item.
#[derive(Debug, Clone, PartialEq)]
pub struct RiskAssessment {
    pub rule_label: RiskLabel,
    pub llm_label: Option<RiskLabel>,
    /// Always `max(rule_label, llm_label)` under the risk order.
    pub final_label: RiskLabel,
    /// Interned rationale id in `cleanup_reasons`.
    pub reason_id: i64,
    pub method: AssessmentMethod,
    /// Confidence in the assessment, in `[0, 1]`.
    pub confidence: f64,
}

/// Executor state for one plan item. Terminal states are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    BackingUp,
    Deleting,
    Success,
    Failed,
    Skipped,
}

impl ItemStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::BackingUp => "backing_up",
            Self::Deleting => "deleting",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(Self::Pending),
            "backing_up" => Some(Self::BackingUp),
            "deleting" => Some(Self::Deleting),
            "success" => Some(Self::Success),
            "failed" => Some(Self::Failed),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }

    /// Whether the executor has finished with this item.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Skipped)
    }
}

/// The executor's unit of work.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanItem {
    /// Row id in `cleanup_items`.
    pub item_id: i64,
    pub path: PathBuf,
    pub size: u64,
    pub kind: ItemKind,
    pub rule_label: RiskLabel,
    pub final_label: RiskLabel,
    pub reason_id: i64,
    pub status: ItemStatus,
}

/// Lifecycle of a whole plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanStatus {
    Pending,
    Running,
    Completed,
    Partial,
    Failed,
    Cancelled,
}

impl PlanStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Partial => "partial",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "partial" => Some(Self::Partial),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// A sealed, persisted list of items to clean. Immutable once sealed; the
/// executor refuses unsealed plans.
#[derive(Debug, Clone, PartialEq)]
pub struct CleanupPlan {
    /// Time-ordered identifier (UUIDv7).
    pub plan_id: String,
    pub name: String,
    pub scan_type: String,
    pub created_at: DateTime<Utc>,
    pub items: Vec<PlanItem>,
    pub sealed: bool,
}

impl CleanupPlan {
    /// Mint a fresh time-ordered plan id.
    #[must_use]
    pub fn new_id() -> String {
        uuid::Uuid::now_v7().to_string()
    }

    /// Total bytes across all items.
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.items.iter().map(|i| i.size).sum()
    }
}

/// Backup strategy applied to one item, keyed on its final risk label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupKind {
    None,
    Hardlink,
    Full,
}

impl BackupKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Hardlink => "hardlink",
            Self::Full => "full",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "none" => Some(Self::None),
            "hardlink" => Some(Self::Hardlink),
            "full" => Some(Self::Full),
            _ => None,
        }
    }

    /// Strategy selection per risk label.
    #[must_use]
    pub const fn for_label(label: RiskLabel) -> Self {
        match label {
            RiskLabel::Safe => Self::None,
            RiskLabel::Suspicious => Self::Hardlink,
            RiskLabel::Dangerous => Self::Full,
        }
    }
}

/// A recorded backup. `backup_kind == None` implies `backup_path == None`
/// and the item's final label was Safe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupInfo {
    pub backup_id: String,
    pub item_id: i64,
    pub original_path: PathBuf,
    pub backup_path: Option<PathBuf>,
    pub backup_kind: BackupKind,
    pub created_at: DateTime<Utc>,
    pub restored: bool,
    pub restored_at: Option<DateTime<Utc>>,
}

/// Transient scan progress snapshot.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ScanProgress {
    pub total_roots: usize,
    pub completed_roots: usize,
    pub current_path: Option<PathBuf>,
    pub bytes_seen: u64,
    pub items_found: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub cancelled: bool,
}

/// Classified failure of one item during execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    PermissionDenied,
    FileInUse,
    FileNotFound,
    DiskFull,
    BackupFailed,
    DeleteFailed,
    Unknown,
}

impl FailureKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PermissionDenied => "permission_denied",
            Self::FileInUse => "file_in_use",
            Self::FileNotFound => "file_not_found",
            Self::DiskFull => "disk_full",
            Self::BackupFailed => "backup_failed",
            Self::DeleteFailed => "delete_failed",
            Self::Unknown => "unknown",
        }
    }
}

/// One entry in `ExecutionResult::failures`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemFailure {
    pub path: PathBuf,
    pub kind: FailureKind,
    pub message: String,
}

/// Outcome of one executor run over a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub plan_id: String,
    pub status: PlanStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub total_items: usize,
    pub success: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Sum of original sizes of items that reached Success.
    pub freed_bytes: u64,
    pub failed_bytes: u64,
    pub failures: Vec<ItemFailure>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn risk_order_is_total_and_conservative() {
        assert!(RiskLabel::Safe < RiskLabel::Suspicious);
        assert!(RiskLabel::Suspicious < RiskLabel::Dangerous);
        assert_eq!(
            RiskLabel::Suspicious.max(RiskLabel::Safe),
            RiskLabel::Suspicious
        );
        assert_eq!(
            RiskLabel::Suspicious.max(RiskLabel::Dangerous),
            RiskLabel::Dangerous
        );
    }

    #[test]
    fn risk_label_round_trips_through_strings() {
        for label in [RiskLabel::Safe, RiskLabel::Suspicious, RiskLabel::Dangerous] {
            assert_eq!(RiskLabel::parse(label.as_str()), Some(label));
        }
        assert_eq!(RiskLabel::parse("SAFE"), Some(RiskLabel::Safe));
        assert_eq!(RiskLabel::parse("nonsense"), None);
    }

    #[test]
    fn backup_kind_keys_on_label() {
        assert_eq!(BackupKind::for_label(RiskLabel::Safe), BackupKind::None);
        assert_eq!(
            BackupKind::for_label(RiskLabel::Suspicious),
            BackupKind::Hardlink
        );
        assert_eq!(BackupKind::for_label(RiskLabel::Dangerous), BackupKind::Full);
    }

    #[test]
    fn item_status_terminality() {
        assert!(!ItemStatus::Pending.is_terminal());
        assert!(!ItemStatus::BackingUp.is_terminal());
        assert!(!ItemStatus::Deleting.is_terminal());
        assert!(ItemStatus::Success.is_terminal());
        assert!(ItemStatus::Failed.is_terminal());
        assert!(ItemStatus::Skipped.is_terminal());
    }

    #[test]
    fn status_strings_round_trip() {
        for status in [
            ItemStatus::Pending,
            ItemStatus::BackingUp,
            ItemStatus::Deleting,
            ItemStatus::Success,
            ItemStatus::Failed,
            ItemStatus::Skipped,
        ] {
            assert_eq!(ItemStatus::parse(status.as_str()), Some(status));
        }
        for status in [
            PlanStatus::Pending,
            PlanStatus::Running,
            PlanStatus::Completed,
            PlanStatus::Partial,
            PlanStatus::Failed,
            PlanStatus::Cancelled,
        ] {
            assert_eq!(PlanStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn plan_ids_are_time_ordered() {
        let a = CleanupPlan::new_id();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = CleanupPlan::new_id();
        assert!(a < b, "UUIDv7 ids must sort by creation time: {a} vs {b}");
    }
}
