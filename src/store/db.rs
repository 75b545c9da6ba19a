//! SQLite persistence: WAL-mode database, idempotent schema, and a small
//! connection pool (acquire → transaction → return). No hidden per-thread
//! state.

#![allow(missing_docs)]
#![allow(clippy::cast_possible_wrap)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags, params};
use sha2::{Digest, Sha256};

use crate::core::errors::{CmError, Result};
use crate::core::types::{
    BackupKind, CleanupPlan, ExecutionResult, ItemKind, ItemStatus, PlanItem, PlanStatus,
    RiskLabel,
};

// ──────────────────── connection pool ────────────────────

#[derive(Debug)]
struct Pool {
    path: PathBuf,
    idle: Mutex<Vec<Connection>>,
}

impl Pool {
    fn get(self: &Arc<Self>) -> Result<PooledConn> {
        let conn = match self.idle.lock().pop() {
            Some(conn) => conn,
            None => open_connection(&self.path)?,
        };
        Ok(PooledConn {
            conn: Some(conn),
            pool: Arc::clone(self),
        })
    }
}

pub(crate) struct PooledConn {
    conn: Option<Connection>,
    pool: Arc<Pool>,
}

impl PooledConn {
    fn conn(&self) -> &Connection {
        self.conn.as_ref().expect("connection present until drop")
    }

    /// Borrow the raw connection (for sibling store modules).
    pub(crate) fn raw(&self) -> &Connection {
        self.conn()
    }
}

impl Drop for PooledConn {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.idle.lock().push(conn);
        }
    }
}

fn open_connection(path: &Path) -> Result<Connection> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA temp_store = MEMORY;",
    )?;
    Ok(conn)
}

// ──────────────────── database ────────────────────

/// Single-writer relational store for everything that outlives a process.
#[derive(Debug)]
pub struct Database {
    pool: Arc<Pool>,
}

impl Database {
    /// Open (or create) the database, applying schema idempotently on first
    /// open.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| CmError::io(parent, e))?;
        }
        let conn = open_connection(path)?;
        apply_schema(&conn)?;

        let pool = Arc::new(Pool {
            path: path.to_path_buf(),
            idle: Mutex::new(vec![conn]),
        });
        Ok(Self { pool })
    }

    /// Acquire a pooled connection (for sibling store modules).
    pub(crate) fn pool_get(&self) -> Result<PooledConn> {
        self.pool.get()
    }

    // ──────────────────── interned reasons ────────────────────

    /// Intern a rationale body. A body exists at most once; re-interning
    /// bumps the refcount and returns the same id.
    pub fn intern_reason(&self, body: &str) -> Result<i64> {
        let hash = reason_hash(body);
        let now = Utc::now().to_rfc3339();
        let guard = self.pool.get()?;
        let conn = guard.conn();
        conn.prepare_cached(
            "INSERT INTO cleanup_reasons (reason, hash, created_at, reference_count)
             VALUES (?1, ?2, ?3, 1)
             ON CONFLICT(hash) DO UPDATE SET reference_count = reference_count + 1",
        )?
        .execute(params![body, hash, now])?;
        let id: i64 = conn.query_row(
            "SELECT id FROM cleanup_reasons WHERE hash = ?1",
            params![hash],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// Drop one reference. The body is deleted only at refcount zero.
    pub fn release_reason(&self, reason_id: i64) -> Result<()> {
        let guard = self.pool.get()?;
        let conn = guard.conn();
        conn.execute(
            "UPDATE cleanup_reasons SET reference_count = reference_count - 1
             WHERE id = ?1 AND reference_count > 0",
            params![reason_id],
        )?;
        conn.execute(
            "DELETE FROM cleanup_reasons WHERE id = ?1 AND reference_count <= 0",
            params![reason_id],
        )?;
        Ok(())
    }

    pub fn reason_body(&self, reason_id: i64) -> Result<Option<String>> {
        let guard = self.pool.get()?;
        let mut stmt = guard
            .conn()
            .prepare_cached("SELECT reason FROM cleanup_reasons WHERE id = ?1")?;
        let mut rows = stmt.query(params![reason_id])?;
        Ok(rows.next()?.map(|row| row.get(0)).transpose()?)
    }

    pub fn reason_refcount(&self, reason_id: i64) -> Result<i64> {
        let guard = self.pool.get()?;
        let count = guard.conn().query_row(
            "SELECT reference_count FROM cleanup_reasons WHERE id = ?1",
            params![reason_id],
            |row| row.get(0),
        );
        match count {
            Ok(c) => Ok(c),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    // ──────────────────── plans and items ────────────────────

    /// Persist a new sealed plan with its items, in one transaction.
    pub fn save_plan(
        &self,
        name: &str,
        scan_type: &str,
        scan_target: &str,
        items: Vec<NewPlanItem>,
    ) -> Result<CleanupPlan> {
        let plan_id = CleanupPlan::new_id();
        let created_at = Utc::now();
        let now = created_at.to_rfc3339();
        let total_size: u64 = items.iter().map(|i| i.size).sum();

        let mut guard = self.pool.get()?;
        let conn = guard.conn.as_mut().expect("connection present until drop");
        let tx = conn.transaction().map_err(CmError::from)?;
        tx.prepare_cached(
            "INSERT INTO cleanup_plans (
                plan_id, plan_name, scan_type, scan_target, total_items,
                total_size, status, created_at, updated_at
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?8)",
        )?
        .execute(params![
            plan_id,
            name,
            scan_type,
            scan_target,
            items.len() as i64,
            total_size as i64,
            PlanStatus::Pending.as_str(),
            now,
        ])?;

        let mut plan_items = Vec::with_capacity(items.len());
        for item in items {
            tx.prepare_cached(
                "INSERT INTO cleanup_items (
                    plan_id, path, size, item_type, rule_risk, final_risk,
                    reason_id, status, retry_count, created_at, updated_at
                ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,0,?9,?9)",
            )?
            .execute(params![
                plan_id,
                item.path.to_string_lossy(),
                item.size as i64,
                item.kind.as_str(),
                item.rule_label.as_str(),
                item.final_label.as_str(),
                item.reason_id,
                ItemStatus::Pending.as_str(),
                now,
            ])?;
            let item_id = tx.last_insert_rowid();
            plan_items.push(PlanItem {
                item_id,
                path: item.path,
                size: item.size,
                kind: item.kind,
                rule_label: item.rule_label,
                final_label: item.final_label,
                reason_id: item.reason_id,
                status: ItemStatus::Pending,
            });
        }
        tx.commit().map_err(CmError::from)?;

        Ok(CleanupPlan {
            plan_id,
            name: name.to_string(),
            scan_type: scan_type.to_string(),
            created_at,
            items: plan_items,
            sealed: true,
        })
    }

    /// Load a plan and its items.
    pub fn get_plan(&self, plan_id: &str) -> Result<Option<CleanupPlan>> {
        let guard = self.pool.get()?;
        let conn = guard.conn();

        let header = {
            let mut stmt = conn.prepare_cached(
                "SELECT plan_name, scan_type, created_at FROM cleanup_plans WHERE plan_id = ?1",
            )?;
            let mut rows = stmt.query(params![plan_id])?;
            match rows.next()? {
                Some(row) => {
                    let name: String = row.get(0)?;
                    let scan_type: String = row.get(1)?;
                    let created_at: String = row.get(2)?;
                    (name, scan_type, created_at)
                }
                None => return Ok(None),
            }
        };

        let mut stmt = conn.prepare_cached(
            "SELECT id, path, size, item_type, rule_risk, final_risk, reason_id, status
             FROM cleanup_items WHERE plan_id = ?1 ORDER BY id ASC",
        )?;
        let items = stmt
            .query_map(params![plan_id], |row| {
                Ok(PlanItem {
                    item_id: row.get(0)?,
                    path: PathBuf::from(row.get::<_, String>(1)?),
                    size: u64::try_from(row.get::<_, i64>(2)?).unwrap_or(0),
                    kind: ItemKind::parse(&row.get::<_, String>(3)?)
                        .unwrap_or(ItemKind::File),
                    rule_label: RiskLabel::parse(&row.get::<_, String>(4)?)
                        .unwrap_or(RiskLabel::Suspicious),
                    final_label: RiskLabel::parse(&row.get::<_, String>(5)?)
                        .unwrap_or(RiskLabel::Dangerous),
                    reason_id: row.get(6)?,
                    status: ItemStatus::parse(&row.get::<_, String>(7)?)
                        .unwrap_or(ItemStatus::Pending),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let created_at = header
            .2
            .parse::<DateTime<Utc>>()
            .unwrap_or_else(|_| Utc::now());
        Ok(Some(CleanupPlan {
            plan_id: plan_id.to_string(),
            name: header.0,
            scan_type: header.1,
            created_at,
            items,
            sealed: true,
        }))
    }

    pub fn update_plan_status(&self, plan_id: &str, status: PlanStatus) -> Result<()> {
        let guard = self.pool.get()?;
        guard
            .conn()
            .prepare_cached(
                "UPDATE cleanup_plans SET status = ?1, updated_at = ?2 WHERE plan_id = ?3",
            )?
            .execute(params![status.as_str(), Utc::now().to_rfc3339(), plan_id])?;
        Ok(())
    }

    pub fn plan_status(&self, plan_id: &str) -> Result<Option<PlanStatus>> {
        let guard = self.pool.get()?;
        let status: std::result::Result<String, _> = guard.conn().query_row(
            "SELECT status FROM cleanup_plans WHERE plan_id = ?1",
            params![plan_id],
            |row| row.get(0),
        );
        match status {
            Ok(raw) => Ok(PlanStatus::parse(&raw)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Persist an item's state transition.
    pub fn update_item_status(&self, item_id: i64, status: ItemStatus) -> Result<()> {
        let guard = self.pool.get()?;
        guard
            .conn()
            .prepare_cached(
                "UPDATE cleanup_items SET status = ?1, updated_at = ?2 WHERE id = ?3",
            )?
            .execute(params![status.as_str(), Utc::now().to_rfc3339(), item_id])?;
        Ok(())
    }

    pub fn item_status(&self, item_id: i64) -> Result<Option<ItemStatus>> {
        let guard = self.pool.get()?;
        let status: std::result::Result<String, _> = guard.conn().query_row(
            "SELECT status FROM cleanup_items WHERE id = ?1",
            params![item_id],
            |row| row.get(0),
        );
        match status {
            Ok(raw) => Ok(ItemStatus::parse(&raw)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn bump_item_retry(&self, item_id: i64) -> Result<()> {
        let guard = self.pool.get()?;
        guard
            .conn()
            .prepare_cached(
                "UPDATE cleanup_items SET retry_count = retry_count + 1 WHERE id = ?1",
            )?
            .execute(params![item_id])?;
        Ok(())
    }

    // ──────────────────── executions ────────────────────

    pub fn create_execution(&self, plan_id: &str, started_at: DateTime<Utc>) -> Result<i64> {
        let guard = self.pool.get()?;
        let conn = guard.conn();
        conn.prepare_cached(
            "INSERT INTO cleanup_executions (
                plan_id, started_at, status, created_at
            ) VALUES (?1, ?2, 'running', ?3)",
        )?
        .execute(params![
            plan_id,
            started_at.to_rfc3339(),
            Utc::now().to_rfc3339()
        ])?;
        Ok(conn.last_insert_rowid())
    }

    pub fn finish_execution(&self, execution_id: i64, result: &ExecutionResult) -> Result<()> {
        let guard = self.pool.get()?;
        guard
            .conn()
            .prepare_cached(
                "UPDATE cleanup_executions SET
                    completed_at = ?1, total_items = ?2, success_items = ?3,
                    failed_items = ?4, skipped_items = ?5, freed_size = ?6,
                    failed_size = ?7, status = ?8
                 WHERE execution_id = ?9",
            )?
            .execute(params![
                result.completed_at.to_rfc3339(),
                result.total_items as i64,
                result.success as i64,
                result.failed as i64,
                result.skipped as i64,
                result.freed_bytes as i64,
                result.failed_bytes as i64,
                result.status.as_str(),
                execution_id,
            ])?;
        Ok(())
    }

    // ──────────────────── recovery log ────────────────────

    /// One row per item that reached at least the backup stage.
    pub fn add_recovery_row(
        &self,
        plan_id: &str,
        item_id: i64,
        original_path: &Path,
        backup_path: Option<&Path>,
        backup_kind: BackupKind,
        risk: RiskLabel,
    ) -> Result<i64> {
        let guard = self.pool.get()?;
        let conn = guard.conn();
        conn.prepare_cached(
            "INSERT INTO recovery_log (
                plan_id, item_id, original_path, backup_path, backup_type,
                risk, restored, timestamp
            ) VALUES (?1,?2,?3,?4,?5,?6,0,?7)",
        )?
        .execute(params![
            plan_id,
            item_id,
            original_path.to_string_lossy(),
            backup_path.map(|p| p.to_string_lossy().into_owned()),
            backup_kind.as_str(),
            risk.as_str(),
            Utc::now().to_rfc3339(),
        ])?;
        Ok(conn.last_insert_rowid())
    }

    /// Mark a recovery row restored. `restored` moves false→true only.
    pub fn mark_restored(&self, recovery_id: i64) -> Result<()> {
        let guard = self.pool.get()?;
        guard
            .conn()
            .prepare_cached(
                "UPDATE recovery_log SET restored = 1, restored_at = ?1
                 WHERE id = ?2 AND restored = 0",
            )?
            .execute(params![Utc::now().to_rfc3339(), recovery_id])?;
        Ok(())
    }

    pub fn get_recovery_row(&self, recovery_id: i64) -> Result<Option<RecoveryRow>> {
        let guard = self.pool.get()?;
        let mut stmt = guard.conn().prepare_cached(
            "SELECT id, plan_id, item_id, original_path, backup_path, backup_type,
                    risk, restored, restored_at, timestamp
             FROM recovery_log WHERE id = ?1",
        )?;
        let mut rows = stmt.query(params![recovery_id])?;
        Ok(rows.next()?.map(row_to_recovery).transpose()?)
    }

    /// Paginated recovery history with optional filters.
    pub fn query_recovery(
        &self,
        filter: &RecoveryFilter,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<RecoveryRow>> {
        let mut sql = String::from(
            "SELECT id, plan_id, item_id, original_path, backup_path, backup_type,
                    risk, restored, restored_at, timestamp
             FROM recovery_log WHERE 1=1",
        );
        let mut args: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(risk) = filter.risk {
            sql.push_str(" AND risk = ?");
            args.push(Box::new(risk.as_str().to_string()));
        }
        if let Some(kind) = filter.backup_kind {
            sql.push_str(" AND backup_type = ?");
            args.push(Box::new(kind.as_str().to_string()));
        }
        if let Some(restored) = filter.restored {
            sql.push_str(" AND restored = ?");
            args.push(Box::new(i64::from(restored)));
        }
        if let Some(since) = &filter.since {
            sql.push_str(" AND timestamp >= ?");
            args.push(Box::new(since.to_rfc3339()));
        }
        if let Some(until) = &filter.until {
            sql.push_str(" AND timestamp <= ?");
            args.push(Box::new(until.to_rfc3339()));
        }
        sql.push_str(" ORDER BY id DESC LIMIT ? OFFSET ?");
        args.push(Box::new(i64::from(limit)));
        args.push(Box::new(i64::from(offset)));

        let guard = self.pool.get()?;
        let mut stmt = guard.conn().prepare(&sql)?;
        let refs: Vec<&dyn rusqlite::types::ToSql> =
            args.iter().map(std::convert::AsRef::as_ref).collect();
        let rows = stmt
            .query_map(refs.as_slice(), row_to_recovery)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Case-insensitive substring search over original and backup paths.
    pub fn search_recovery(&self, keyword: &str) -> Result<Vec<RecoveryRow>> {
        let pattern = format!("%{}%", keyword.to_lowercase());
        let guard = self.pool.get()?;
        let mut stmt = guard.conn().prepare_cached(
            "SELECT id, plan_id, item_id, original_path, backup_path, backup_type,
                    risk, restored, restored_at, timestamp
             FROM recovery_log
             WHERE lower(original_path) LIKE ?1
                OR lower(COALESCE(backup_path, '')) LIKE ?1
             ORDER BY id DESC",
        )?;
        let rows = stmt
            .query_map(params![pattern], row_to_recovery)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Recovery rows whose plan item ended `Failed` and which still hold a
    /// backup file.
    pub fn failed_item_recovery_rows(&self, plan_id: Option<&str>) -> Result<Vec<RecoveryRow>> {
        let guard = self.pool.get()?;
        let sql = "SELECT r.id, r.plan_id, r.item_id, r.original_path, r.backup_path,
                          r.backup_type, r.risk, r.restored, r.restored_at, r.timestamp
                   FROM recovery_log r
                   JOIN cleanup_items i ON i.id = r.item_id
                   WHERE i.status = 'failed' AND (?1 IS NULL OR r.plan_id = ?1)
                   ORDER BY r.id ASC";
        let mut stmt = guard.conn().prepare_cached(sql)?;
        let rows = stmt
            .query_map(params![plan_id], row_to_recovery)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Null `backup_path` on rows whose backup files the reaper removed.
    /// The rows themselves remain for audit.
    pub fn null_backup_paths(&self, removed: &[PathBuf]) -> Result<usize> {
        let mut nulled = 0usize;
        let guard = self.pool.get()?;
        let conn = guard.conn();
        for path in removed {
            nulled += conn
                .prepare_cached(
                    "UPDATE recovery_log SET backup_path = NULL WHERE backup_path = ?1",
                )?
                .execute(params![path.to_string_lossy()])?;
        }
        Ok(nulled)
    }
}

/// Input row for [`Database::save_plan`].
#[derive(Debug, Clone)]
pub struct NewPlanItem {
    pub path: PathBuf,
    pub size: u64,
    pub kind: ItemKind,
    pub rule_label: RiskLabel,
    pub final_label: RiskLabel,
    pub reason_id: i64,
}

/// Filters for [`Database::query_recovery`].
#[derive(Debug, Clone, Default)]
pub struct RecoveryFilter {
    pub risk: Option<RiskLabel>,
    pub backup_kind: Option<BackupKind>,
    pub restored: Option<bool>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

/// One row of the recovery log.
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryRow {
    pub id: i64,
    pub plan_id: String,
    pub item_id: i64,
    pub original_path: PathBuf,
    pub backup_path: Option<PathBuf>,
    pub backup_kind: BackupKind,
    pub risk: RiskLabel,
    pub restored: bool,
    pub restored_at: Option<DateTime<Utc>>,
    pub timestamp: DateTime<Utc>,
}

fn row_to_recovery(row: &rusqlite::Row<'_>) -> std::result::Result<RecoveryRow, rusqlite::Error> {
    Ok(RecoveryRow {
        id: row.get(0)?,
        plan_id: row.get(1)?,
        item_id: row.get(2)?,
        original_path: PathBuf::from(row.get::<_, String>(3)?),
        backup_path: row.get::<_, Option<String>>(4)?.map(PathBuf::from),
        backup_kind: BackupKind::parse(&row.get::<_, String>(5)?).unwrap_or(BackupKind::None),
        risk: RiskLabel::parse(&row.get::<_, String>(6)?).unwrap_or(RiskLabel::Suspicious),
        restored: row.get::<_, i64>(7)? != 0,
        restored_at: row
            .get::<_, Option<String>>(8)?
            .and_then(|s| s.parse().ok()),
        timestamp: row
            .get::<_, String>(9)?
            .parse()
            .unwrap_or_else(|_| Utc::now()),
    })
}

fn reason_hash(body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn apply_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS cleanup_reasons (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            reason TEXT NOT NULL,
            hash TEXT UNIQUE NOT NULL,
            created_at TEXT NOT NULL,
            reference_count INTEGER DEFAULT 1
        );

        CREATE TABLE IF NOT EXISTS cleanup_plans (
            plan_id TEXT PRIMARY KEY,
            plan_name TEXT NOT NULL,
            scan_type TEXT NOT NULL,
            scan_target TEXT NOT NULL,
            total_items INTEGER NOT NULL DEFAULT 0,
            total_size INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'pending',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS cleanup_items (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            plan_id TEXT NOT NULL,
            path TEXT NOT NULL,
            size INTEGER NOT NULL,
            item_type TEXT NOT NULL,
            rule_risk TEXT NOT NULL,
            final_risk TEXT NOT NULL,
            reason_id INTEGER,
            status TEXT NOT NULL DEFAULT 'pending',
            retry_count INTEGER DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY (plan_id) REFERENCES cleanup_plans(plan_id),
            FOREIGN KEY (reason_id) REFERENCES cleanup_reasons(id)
        );

        CREATE TABLE IF NOT EXISTS cleanup_executions (
            execution_id INTEGER PRIMARY KEY AUTOINCREMENT,
            plan_id TEXT NOT NULL,
            started_at TEXT NOT NULL,
            completed_at TEXT,
            total_items INTEGER NOT NULL DEFAULT 0,
            success_items INTEGER NOT NULL DEFAULT 0,
            failed_items INTEGER NOT NULL DEFAULT 0,
            skipped_items INTEGER NOT NULL DEFAULT 0,
            freed_size INTEGER NOT NULL DEFAULT 0,
            failed_size INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'pending',
            error_message TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY (plan_id) REFERENCES cleanup_plans(plan_id)
        );

        CREATE TABLE IF NOT EXISTS recovery_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            plan_id TEXT NOT NULL,
            item_id INTEGER NOT NULL,
            original_path TEXT NOT NULL,
            backup_path TEXT,
            backup_type TEXT NOT NULL,
            risk TEXT NOT NULL DEFAULT 'suspicious',
            restored INTEGER DEFAULT 0,
            restored_at TEXT,
            timestamp TEXT NOT NULL,
            FOREIGN KEY (plan_id) REFERENCES cleanup_plans(plan_id)
        );

        CREATE TABLE IF NOT EXISTS cleanup_reports (
            report_id INTEGER PRIMARY KEY AUTOINCREMENT,
            plan_id TEXT UNIQUE NOT NULL,
            execution_id INTEGER,
            report_summary TEXT NOT NULL,
            report_statistics TEXT NOT NULL,
            report_failures TEXT,
            generated_at TEXT NOT NULL,
            scan_type TEXT,
            total_freed_size INTEGER DEFAULT 0,
            FOREIGN KEY (plan_id) REFERENCES cleanup_plans(plan_id),
            FOREIGN KEY (execution_id) REFERENCES cleanup_executions(execution_id)
        );

        CREATE INDEX IF NOT EXISTS idx_items_plan ON cleanup_items(plan_id);
        CREATE INDEX IF NOT EXISTS idx_items_status ON cleanup_items(status);
        CREATE INDEX IF NOT EXISTS idx_recovery_plan ON recovery_log(plan_id);
        CREATE INDEX IF NOT EXISTS idx_recovery_restored ON recovery_log(restored);
        CREATE INDEX IF NOT EXISTS idx_executions_plan ON cleanup_executions(plan_id);",
    )?;
    Ok(())
}
