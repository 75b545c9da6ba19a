//! Staged executor: backup, then delete, then record, per plan item.
//!
//! Operates only on sealed plans, one execution at a time. Every item walks
//! `Pending → BackingUp → Deleting → Success | Failed | Skipped`; each
//! transition is persisted before the matching progress event is emitted, so
//! consumers can trust that the database reflects what they see.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;

use crate::backup::BackupStore;
use crate::core::config::ExecutorConfig;
use crate::core::errors::{CmError, Result};
use crate::core::events::{EventSender, ExecPhase, PipelineEvent};
use crate::core::types::{
    CleanupPlan, ExecutionResult, FailureKind, ItemFailure, ItemKind, ItemStatus, PlanItem,
    PlanStatus,
};
use crate::store::Database;
use crate::whitelist::WhitelistSnapshot;

/// Backup-then-delete engine over a sealed plan.
pub struct Executor {
    db: Arc<Database>,
    backups: BackupStore,
    whitelist: Arc<WhitelistSnapshot>,
    events: EventSender,
    config: ExecutorConfig,
    busy: AtomicBool,
}

/// Resets the busy gate on every exit path.
struct IdleGuard<'a>(&'a AtomicBool);

impl Drop for IdleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

enum DeleteOutcome {
    Deleted,
    Missing,
    Failed(FailureKind, String),
}

impl Executor {
    pub fn new(
        db: Arc<Database>,
        backups: BackupStore,
        whitelist: Arc<WhitelistSnapshot>,
        events: EventSender,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            db,
            backups,
            whitelist,
            events,
            config,
            busy: AtomicBool::new(false),
        }
    }

    /// Whether no execution is in flight. The backup root is written by one
    /// executor at a time; concurrent calls are rejected.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        !self.busy.load(Ordering::Acquire)
    }

    /// Execute a sealed plan. Per-item errors never abort the plan (unless
    /// `abort_on_error` is set); cancellation between items is immediate.
    pub fn execute(&self, plan: &CleanupPlan, cancel: &AtomicBool) -> Result<ExecutionResult> {
        if !plan.sealed {
            return Err(CmError::MalformedPlan {
                plan_id: plan.plan_id.clone(),
                details: "plan is not sealed".to_string(),
            });
        }
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(CmError::Runtime {
                details: "an execution is already in flight".to_string(),
            });
        }
        let _idle = IdleGuard(&self.busy);

        let started_at = Utc::now();
        self.db
            .update_plan_status(&plan.plan_id, PlanStatus::Running)?;
        let execution_id = self.db.create_execution(&plan.plan_id, started_at)?;
        self.phase(&plan.plan_id, ExecPhase::Preparing);

        let mut result = ExecutionResult {
            plan_id: plan.plan_id.clone(),
            status: PlanStatus::Running,
            started_at,
            completed_at: started_at,
            total_items: plan.items.len(),
            success: 0,
            failed: 0,
            skipped: 0,
            freed_bytes: 0,
            failed_bytes: 0,
            failures: Vec::new(),
        };

        self.phase(&plan.plan_id, ExecPhase::Executing);
        let total = plan.items.len();
        let mut cancelled = false;
        let mut aborted = false;

        for (index, item) in plan.items.iter().enumerate() {
            // Cancellation between items is immediate; the rest stay Pending.
            if cancel.load(Ordering::Relaxed) {
                cancelled = true;
                break;
            }

            let terminal = self.execute_item(plan, item, cancel, &mut result)?;
            self.events.send(PipelineEvent::ItemFinished {
                plan_id: plan.plan_id.clone(),
                item_id: item.item_id,
                status: terminal,
            });
            self.events.send(PipelineEvent::ExecProgress {
                plan_id: plan.plan_id.clone(),
                current_index: index + 1,
                total,
            });

            if terminal == ItemStatus::Failed && self.config.abort_on_error {
                aborted = true;
                break;
            }
        }

        self.phase(&plan.plan_id, ExecPhase::Finalizing);
        result.status = if cancelled {
            PlanStatus::Cancelled
        } else if aborted || result.failed > 0 {
            PlanStatus::Partial
        } else {
            PlanStatus::Completed
        };
        result.completed_at = Utc::now();

        self.db.update_plan_status(&plan.plan_id, result.status)?;
        self.db.finish_execution(execution_id, &result)?;
        self.phase(&plan.plan_id, ExecPhase::Completed);
        Ok(result)
    }

    /// Run one item to a terminal state. Mid-item cancellation is
    /// best-effort: the item finishes its current stage so nothing is left
    /// half-deleted and unrecorded.
    fn execute_item(
        &self,
        plan: &CleanupPlan,
        item: &PlanItem,
        cancel: &AtomicBool,
        result: &mut ExecutionResult,
    ) -> Result<ItemStatus> {
        // Whitelisted paths never leave Pending's side of the fence; a
        // directory holding a protected descendant is equally untouchable.
        if self.whitelist.is_protected(&item.path)
            || self.whitelist.protects_within(&item.path)
        {
            return self.finish_item(item, ItemStatus::Skipped, result, None);
        }

        // 1. Existence check.
        if !item.path.exists() {
            return self.finish_item(item, ItemStatus::Skipped, result, None);
        }

        // 2. Backup.
        self.db
            .update_item_status(item.item_id, ItemStatus::BackingUp)?;
        let backup = match self.backups.backup_item(&item.path, item.final_label) {
            Ok(backup) => backup,
            Err(err) => {
                let kind = match &err {
                    CmError::DiskFull { .. } => FailureKind::DiskFull,
                    _ => FailureKind::BackupFailed,
                };
                result.failed_bytes += item.size;
                return self.finish_item(
                    item,
                    ItemStatus::Failed,
                    result,
                    Some(ItemFailure {
                        path: item.path.clone(),
                        kind,
                        message: err.to_string(),
                    }),
                );
            }
        };
        self.db.add_recovery_row(
            &plan.plan_id,
            item.item_id,
            &item.path,
            backup.backup_path.as_deref(),
            backup.kind,
            item.final_label,
        )?;

        // 3. Delete, with bounded retries.
        self.db
            .update_item_status(item.item_id, ItemStatus::Deleting)?;
        match self.delete_with_retries(item, cancel) {
            DeleteOutcome::Deleted => {
                result.freed_bytes += item.size;
                self.finish_item(item, ItemStatus::Success, result, None)
            }
            // Vanished between check and delete: not a failure.
            DeleteOutcome::Missing => self.finish_item(item, ItemStatus::Skipped, result, None),
            DeleteOutcome::Failed(kind, message) => {
                result.failed_bytes += item.size;
                self.finish_item(
                    item,
                    ItemStatus::Failed,
                    result,
                    Some(ItemFailure {
                        path: item.path.clone(),
                        kind,
                        message,
                    }),
                )
            }
        }
    }

    fn finish_item(
        &self,
        item: &PlanItem,
        status: ItemStatus,
        result: &mut ExecutionResult,
        failure: Option<ItemFailure>,
    ) -> Result<ItemStatus> {
        self.db.update_item_status(item.item_id, status)?;
        match status {
            ItemStatus::Success => result.success += 1,
            ItemStatus::Failed => result.failed += 1,
            _ => result.skipped += 1,
        }
        if let Some(failure) = failure {
            result.failures.push(failure);
        }
        Ok(status)
    }

    fn delete_with_retries(&self, item: &PlanItem, cancel: &AtomicBool) -> DeleteOutcome {
        let mut attempt = 0u32;
        loop {
            let outcome = match item.kind {
                ItemKind::File => delete_file(&item.path),
                ItemKind::Dir => delete_dir_recursive(&item.path),
            };

            let err = match outcome {
                Ok(()) => return DeleteOutcome::Deleted,
                Err(err) if err.kind() == ErrorKind::NotFound => return DeleteOutcome::Missing,
                Err(err) => err,
            };

            // Cancellation at a retry boundary: stop retrying, record the
            // failure as this item's terminal state.
            if attempt >= self.config.max_retries || cancel.load(Ordering::Relaxed) {
                return DeleteOutcome::Failed(classify_delete_error(&err), err.to_string());
            }
            attempt += 1;
            let _ = self.db.bump_item_retry(item.item_id);
            std::thread::sleep(Duration::from_millis(self.config.retry_delay_ms));
        }
    }

    fn phase(&self, plan_id: &str, phase: ExecPhase) {
        self.events.send(PipelineEvent::ExecPhase {
            plan_id: plan_id.to_string(),
            phase,
        });
    }
}

fn delete_file(path: &Path) -> std::io::Result<()> {
    clear_readonly(path);
    fs::remove_file(path)
}

/// Depth-first recursive delete. On a non-empty directory after the first
/// pass (a child appeared or was locked), children are cleared and the
/// removal retried once; then the error stands.
fn delete_dir_recursive(path: &Path) -> std::io::Result<()> {
    clear_readonly(path);
    delete_children(path)?;
    match fs::remove_dir(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => {
            delete_children(path)?;
            fs::remove_dir(path)
        }
        Err(err) => Err(err),
    }
}

fn delete_children(path: &Path) -> std::io::Result<()> {
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        let child = entry.path();
        let meta = fs::symlink_metadata(&child)?;
        if meta.is_dir() {
            delete_dir_recursive(&child)?;
        } else {
            clear_readonly(&child);
            fs::remove_file(&child)?;
        }
    }
    Ok(())
}

/// Best-effort removal of the read-only bit before an unlink.
#[cfg(windows)]
fn clear_readonly(path: &Path) {
    if let Ok(meta) = fs::metadata(path) {
        let mut perms = meta.permissions();
        if perms.readonly() {
            perms.set_readonly(false);
            let _ = fs::set_permissions(path, perms);
        }
    }
}

#[cfg(unix)]
fn clear_readonly(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Ok(meta) = fs::metadata(path) {
        let mode = meta.permissions().mode();
        if mode & 0o200 == 0 {
            let _ = fs::set_permissions(path, fs::Permissions::from_mode(mode | 0o700));
        }
    }
}

fn classify_delete_error(err: &std::io::Error) -> FailureKind {
    match err.kind() {
        ErrorKind::PermissionDenied => FailureKind::PermissionDenied,
        ErrorKind::ResourceBusy | ErrorKind::ExecutableFileBusy => FailureKind::FileInUse,
        ErrorKind::StorageFull => FailureKind::DiskFull,
        ErrorKind::NotFound => FailureKind::FileNotFound,
        _ => FailureKind::DeleteFailed,
    }
}
