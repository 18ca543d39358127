//! Aggregate statistics for the admin dashboard.
//!
//! Read-only rollups across runs, vouchers, and admins. Callers gate
//! access themselves (these queries are not owner-scoped).

use rusqlite::Row;
use serde::Serialize;

use super::{Database, DatabaseError};

/// Run counts by status across all owners.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunTotals {
    pub total: i64,
    pub pending: i64,
    pub running: i64,
    pub completed: i64,
    pub failed: i64,
}

/// Per-voucher usage joined against that voucher's runs.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoucherUsage {
    pub voucher_id: i64,
    pub code: String,
    pub max_runs: i64,
    pub used_runs: i64,
    pub total_runs: i64,
    pub completed_runs: i64,
}

impl VoucherUsage {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            voucher_id: row.get("id")?,
            code: row.get("code")?,
            max_runs: row.get("max_runs")?,
            used_runs: row.get("used_runs")?,
            total_runs: row.get("total_runs")?,
            // SUM over zero joined rows is NULL.
            completed_runs: row.get::<_, Option<i64>>("completed_runs")?.unwrap_or(0),
        })
    }
}

/// Per-admin run counts.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminActivity {
    pub admin_id: i64,
    pub email: String,
    pub total_runs: i64,
    pub completed_runs: i64,
}

impl AdminActivity {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            admin_id: row.get("id")?,
            email: row.get("email")?,
            total_runs: row.get("total_runs")?,
            completed_runs: row.get::<_, Option<i64>>("completed_runs")?.unwrap_or(0),
        })
    }
}

pub fn run_totals(db: &Database) -> Result<RunTotals, DatabaseError> {
    db.with_conn(|conn| {
        let totals = conn.query_row(
            "SELECT COUNT(*),
                    SUM(CASE WHEN status = 'pending' THEN 1 ELSE 0 END),
                    SUM(CASE WHEN status = 'running' THEN 1 ELSE 0 END),
                    SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END),
                    SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END)
             FROM runs",
            [],
            |r| {
                Ok(RunTotals {
                    total: r.get(0)?,
                    pending: r.get::<_, Option<i64>>(1)?.unwrap_or(0),
                    running: r.get::<_, Option<i64>>(2)?.unwrap_or(0),
                    completed: r.get::<_, Option<i64>>(3)?.unwrap_or(0),
                    failed: r.get::<_, Option<i64>>(4)?.unwrap_or(0),
                })
            },
        )?;
        Ok(totals)
    })
}

/// Usage per voucher, highest consumption first.
pub fn voucher_usage(db: &Database) -> Result<Vec<VoucherUsage>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT v.id, v.code, v.max_runs, v.used_runs,
                    COUNT(r.id) AS total_runs,
                    SUM(CASE WHEN r.status = 'completed' THEN 1 ELSE 0 END) AS completed_runs
             FROM vouchers v
             LEFT JOIN runs r ON r.owner_type = 'voucher' AND r.owner_id = v.id
             GROUP BY v.id
             ORDER BY v.used_runs DESC, v.id ASC",
        )?;
        let rows: Vec<VoucherUsage> = stmt
            .query_map([], VoucherUsage::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Run counts per admin account.
pub fn admin_activity(db: &Database) -> Result<Vec<AdminActivity>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT a.id, a.email,
                    COUNT(r.id) AS total_runs,
                    SUM(CASE WHEN r.status = 'completed' THEN 1 ELSE 0 END) AS completed_runs
             FROM admins a
             LEFT JOIN runs r ON r.owner_type = 'admin' AND r.owner_id = a.id
             GROUP BY a.id
             ORDER BY a.id ASC",
        )?;
        let rows: Vec<AdminActivity> = stmt
            .query_map([], AdminActivity::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::voucher_repo::{self, NewVoucher};
    use crate::db::{admin_repo, run_repo};

    const NOW: &str = "2026-01-01T00:00:00Z";

    fn test_db() -> Database {
        Database::open_in_memory().expect("Failed to create test database")
    }

    fn seed_voucher(db: &Database, code: &str, max_runs: i64) -> i64 {
        voucher_repo::insert(
            db,
            &NewVoucher {
                code: code.to_string(),
                prefix: None,
                max_runs,
                batch_label: None,
                expires_at: None,
                created_by_admin_id: None,
            },
            NOW,
        )
        .unwrap()
    }

    #[test]
    fn test_run_totals() {
        let db = test_db();
        let a = run_repo::insert(&db, "A", "admin", 1, NOW).unwrap();
        let b = run_repo::insert(&db, "B", "admin", 1, NOW).unwrap();
        run_repo::insert(&db, "C", "voucher", 2, NOW).unwrap();
        run_repo::mark_completed(&db, a, NOW).unwrap();
        run_repo::mark_failed(&db, b, "boom", NOW).unwrap();

        let totals = run_totals(&db).unwrap();
        assert_eq!(totals.total, 3);
        assert_eq!(totals.pending, 1);
        assert_eq!(totals.completed, 1);
        assert_eq!(totals.failed, 1);
        assert_eq!(totals.running, 0);
    }

    #[test]
    fn test_run_totals_on_empty_database() {
        let totals = run_totals(&test_db()).unwrap();
        assert_eq!(totals.total, 0);
        assert_eq!(totals.completed, 0);
    }

    #[test]
    fn test_voucher_usage_joins_runs() {
        let db = test_db();
        let busy = seed_voucher(&db, "WF-AAAA-BBBB", 3);
        let idle = seed_voucher(&db, "WF-CCCC-DDDD", 2);

        let done = run_repo::insert(&db, "Done", "voucher", busy, NOW).unwrap();
        run_repo::mark_completed(&db, done, NOW).unwrap();
        voucher_repo::increment_usage(&db, busy, NOW).unwrap();
        let failed = run_repo::insert(&db, "Failed", "voucher", busy, NOW).unwrap();
        run_repo::mark_failed(&db, failed, "boom", NOW).unwrap();

        let usage = voucher_usage(&db).unwrap();
        assert_eq!(usage.len(), 2);
        // Heaviest consumer first.
        assert_eq!(usage[0].voucher_id, busy);
        assert_eq!(usage[0].used_runs, 1);
        assert_eq!(usage[0].total_runs, 2);
        assert_eq!(usage[0].completed_runs, 1);
        assert_eq!(usage[1].voucher_id, idle);
        assert_eq!(usage[1].total_runs, 0);
        assert_eq!(usage[1].completed_runs, 0);
    }

    #[test]
    fn test_admin_activity() {
        let db = test_db();
        let admin_id = admin_repo::insert(&db, "ops@example.com", "h", "admin", NOW).unwrap();
        let quiet_id = admin_repo::insert(&db, "quiet@example.com", "h", "admin", NOW).unwrap();

        let run = run_repo::insert(&db, "Topic", "admin", admin_id, NOW).unwrap();
        run_repo::mark_completed(&db, run, NOW).unwrap();
        run_repo::insert(&db, "Other", "admin", admin_id, NOW).unwrap();

        let activity = admin_activity(&db).unwrap();
        assert_eq!(activity.len(), 2);
        let busy = activity.iter().find(|a| a.admin_id == admin_id).unwrap();
        assert_eq!(busy.total_runs, 2);
        assert_eq!(busy.completed_runs, 1);
        let quiet = activity.iter().find(|a| a.admin_id == quiet_id).unwrap();
        assert_eq!(quiet.total_runs, 0);
    }
}
