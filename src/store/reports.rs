//! Report persistence: one report blob per plan, three JSON columns.

use chrono::Utc;
use rusqlite::params;

use crate::core::errors::{CmError, Result};
use crate::report::{CleanupReport, ReportStatistics, ReportSummary};
use crate::store::db::Database;

impl Database {
    /// Persist a report for a plan. A plan carries at most one report; a
    /// second save replaces it.
    pub fn save_report(
        &self,
        plan_id: &str,
        execution_id: Option<i64>,
        report: &CleanupReport,
    ) -> Result<i64> {
        let summary = serde_json::to_string(&report.summary)?;
        let statistics = serde_json::to_string(&report.statistics)?;
        let failures = serde_json::to_string(&report.failures)?;

        let guard = self.pool_get()?;
        let conn = guard.raw();
        conn.prepare_cached(
            "INSERT INTO cleanup_reports (
                plan_id, execution_id, report_summary, report_statistics,
                report_failures, generated_at, scan_type, total_freed_size
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8)
            ON CONFLICT(plan_id) DO UPDATE SET
                execution_id = excluded.execution_id,
                report_summary = excluded.report_summary,
                report_statistics = excluded.report_statistics,
                report_failures = excluded.report_failures,
                generated_at = excluded.generated_at,
                scan_type = excluded.scan_type,
                total_freed_size = excluded.total_freed_size",
        )?
        .execute(params![
            plan_id,
            execution_id,
            summary,
            statistics,
            failures,
            report.generated_at.to_rfc3339(),
            report.scan_type,
            i64::try_from(report.summary.freed_bytes).unwrap_or(i64::MAX),
        ])?;
        let id: i64 = conn.query_row(
            "SELECT report_id FROM cleanup_reports WHERE plan_id = ?1",
            params![plan_id],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// Load the report persisted for a plan, if any.
    pub fn get_report(&self, plan_id: &str) -> Result<Option<CleanupReport>> {
        let guard = self.pool_get()?;
        let mut stmt = guard.raw().prepare_cached(
            "SELECT report_id, report_summary, report_statistics, report_failures,
                    generated_at, scan_type
             FROM cleanup_reports WHERE plan_id = ?1",
        )?;
        let mut rows = stmt.query(params![plan_id])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };

        let report_id: i64 = row.get(0)?;
        let summary: ReportSummary = serde_json::from_str(&row.get::<_, String>(1)?)?;
        let statistics: ReportStatistics = serde_json::from_str(&row.get::<_, String>(2)?)?;
        let failures = row
            .get::<_, Option<String>>(3)?
            .map_or_else(|| Ok(Vec::new()), |raw| serde_json::from_str(&raw))
            .map_err(CmError::from)?;
        let generated_at = row
            .get::<_, String>(4)?
            .parse()
            .unwrap_or_else(|_| Utc::now());
        let scan_type: Option<String> = row.get(5)?;

        Ok(Some(CleanupReport {
            report_id: Some(report_id),
            generated_at,
            scan_type: scan_type.unwrap_or_default(),
            summary,
            statistics,
            failures,
            recommendations: Vec::new(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{
        ExecutionResult, ItemKind, PlanStatus, RiskLabel,
    };
    use crate::report::build_report;
    use crate::store::db::NewPlanItem;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Database, String, CleanupReport) {
        let dir = TempDir::new().unwrap();
        let db = Database::open(&dir.path().join("cleanmaster.db")).unwrap();
        let reason = db.intern_reason("r").unwrap();
        let plan = db
            .save_plan(
                "p",
                "quick",
                "/tmp/x",
                vec![NewPlanItem {
                    path: PathBuf::from("/tmp/x/a.tmp"),
                    size: 1024,
                    kind: ItemKind::File,
                    rule_label: RiskLabel::Safe,
                    final_label: RiskLabel::Safe,
                    reason_id: reason,
                }],
            )
            .unwrap();
        let result = ExecutionResult {
            plan_id: plan.plan_id.clone(),
            status: PlanStatus::Completed,
            started_at: Utc::now(),
            completed_at: Utc::now(),
            total_items: 1,
            success: 1,
            failed: 0,
            skipped: 0,
            freed_bytes: 1024,
            failed_bytes: 0,
            failures: Vec::new(),
        };
        let report = build_report(&plan, &result);
        let plan_id = plan.plan_id;
        (dir, db, plan_id, report)
    }

    #[test]
    fn report_round_trips_through_the_store() {
        let (_dir, db, plan_id, report) = setup();
        let id = db.save_report(&plan_id, None, &report).unwrap();
        assert!(id > 0);

        let loaded = db.get_report(&plan_id).unwrap().unwrap();
        assert_eq!(loaded.report_id, Some(id));
        assert_eq!(loaded.summary, report.summary);
        assert_eq!(loaded.statistics, report.statistics);
        assert_eq!(loaded.scan_type, "quick");
    }

    #[test]
    fn second_save_replaces_the_first() {
        let (_dir, db, plan_id, mut report) = setup();
        let first = db.save_report(&plan_id, None, &report).unwrap();
        report.summary.freed_bytes = 9999;
        let second = db.save_report(&plan_id, None, &report).unwrap();
        assert_eq!(first, second, "one report per plan");

        let loaded = db.get_report(&plan_id).unwrap().unwrap();
        assert_eq!(loaded.summary.freed_bytes, 9999);
    }

    #[test]
    fn missing_report_is_none() {
        let (_dir, db, _plan_id, _report) = setup();
        assert!(db.get_report("other-plan").unwrap().is_none());
    }
}
