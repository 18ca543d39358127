//! Voucher repository — CRUD and quota accounting for the `vouchers` table.

use rusqlite::{params, Row};

use super::{Database, DatabaseError};

/// A raw voucher row from the database.
#[derive(Debug, Clone)]
pub struct VoucherRow {
    pub id: i64,
    pub code: String,
    pub prefix: Option<String>,
    pub max_runs: i64,
    pub used_runs: i64,
    pub is_active: bool,
    pub batch_label: Option<String>,
    pub expires_at: Option<String>,
    pub created_by_admin_id: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
}

impl VoucherRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            code: row.get("code")?,
            prefix: row.get("prefix")?,
            max_runs: row.get("max_runs")?,
            used_runs: row.get("used_runs")?,
            is_active: row.get("is_active")?,
            batch_label: row.get("batch_label")?,
            expires_at: row.get("expires_at")?,
            created_by_admin_id: row.get("created_by_admin_id")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    /// Remaining runs before the quota is exhausted.
    pub fn remaining_runs(&self) -> i64 {
        (self.max_runs - self.used_runs).max(0)
    }
}

/// Fields for creating a new voucher. The unique `code` is generated
/// by the caller before insertion.
#[derive(Debug, Clone)]
pub struct NewVoucher {
    pub code: String,
    pub prefix: Option<String>,
    pub max_runs: i64,
    pub batch_label: Option<String>,
    pub expires_at: Option<String>,
    pub created_by_admin_id: Option<i64>,
}

/// Inserts a new voucher and returns its assigned ID.
pub fn insert(db: &Database, voucher: &NewVoucher, now: &str) -> Result<i64, DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO vouchers (code, prefix, max_runs, used_runs, is_active, batch_label,
             expires_at, created_by_admin_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, 0, 1, ?4, ?5, ?6, ?7, ?7)",
            params![
                voucher.code,
                voucher.prefix,
                voucher.max_runs,
                voucher.batch_label,
                voucher.expires_at,
                voucher.created_by_admin_id,
                now,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    })
}

/// Finds a voucher by its ID.
pub fn find_by_id(db: &Database, id: i64) -> Result<Option<VoucherRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM vouchers WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], VoucherRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Finds a voucher by its redemption code.
pub fn find_by_code(db: &Database, code: &str) -> Result<Option<VoucherRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM vouchers WHERE code = ?1")?;
        let mut rows = stmt.query_map(params![code], VoucherRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Checks whether a code is already taken, without fetching the row.
pub fn code_exists(db: &Database, code: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM vouchers WHERE code = ?1",
            params![code],
            |r| r.get(0),
        )?;
        Ok(count > 0)
    })
}

/// Query filter parameters for voucher listing.
#[derive(Debug, Default, Clone)]
pub struct VoucherFilter {
    pub is_active: Option<bool>,
    pub batch_label: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Queries vouchers with filters, returning (rows, total_count).
pub fn query(db: &Database, filter: &VoucherFilter) -> Result<(Vec<VoucherRow>, u64), DatabaseError> {
    db.with_conn(|conn| {
        let mut conditions = Vec::new();
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(is_active) = filter.is_active {
            conditions.push(format!("is_active = ?{}", param_values.len() + 1));
            param_values.push(Box::new(is_active));
        }
        if let Some(ref batch_label) = filter.batch_label {
            conditions.push(format!("batch_label = ?{}", param_values.len() + 1));
            param_values.push(Box::new(batch_label.clone()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let count_sql = format!("SELECT COUNT(*) FROM vouchers {}", where_clause);
        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let total: u64 = conn.query_row(&count_sql, params_ref.as_slice(), |r| r.get(0))?;

        let limit = filter.limit.unwrap_or(100) as i64;
        let offset = filter.offset.unwrap_or(0) as i64;
        param_values.push(Box::new(limit));
        param_values.push(Box::new(offset));
        let query_sql = format!(
            "SELECT * FROM vouchers {} ORDER BY created_at DESC, id DESC LIMIT ?{} OFFSET ?{}",
            where_clause,
            param_values.len() - 1,
            param_values.len()
        );

        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&query_sql)?;
        let rows: Vec<VoucherRow> = stmt
            .query_map(params_ref.as_slice(), VoucherRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok((rows, total))
    })
}

/// Updates the mutable fields of a voucher.
pub fn update(
    db: &Database,
    id: i64,
    max_runs: i64,
    is_active: bool,
    expires_at: Option<&str>,
    now: &str,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE vouchers SET max_runs = ?2, is_active = ?3, expires_at = ?4, updated_at = ?5
             WHERE id = ?1",
            params![id, max_runs, is_active, expires_at, now],
        )?;
        Ok(())
    })
}

/// Sets the active flag on a voucher.
pub fn set_active(db: &Database, id: i64, is_active: bool, now: &str) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE vouchers SET is_active = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, is_active, now],
        )?;
        Ok(())
    })
}

/// Consumes one run from the voucher's quota. The guard in the WHERE
/// clause makes the increment atomic: a voucher at its limit is left
/// untouched and `false` is returned.
pub fn increment_usage(db: &Database, id: i64, now: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE vouchers SET used_runs = used_runs + 1, updated_at = ?2
             WHERE id = ?1 AND used_runs < max_runs",
            params![id, now],
        )?;
        Ok(changed > 0)
    })
}

/// Deletes vouchers by ID, returning how many were removed.
pub fn delete_by_ids(db: &Database, ids: &[i64]) -> Result<u64, DatabaseError> {
    if ids.is_empty() {
        return Ok(0);
    }
    db.with_conn(|conn| {
        let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{}", i)).collect();
        let sql = format!(
            "DELETE FROM vouchers WHERE id IN ({})",
            placeholders.join(", ")
        );
        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            ids.iter().map(|id| id as &dyn rusqlite::types::ToSql).collect();
        let deleted = conn.execute(&sql, params_ref.as_slice())?;
        Ok(deleted as u64)
    })
}

/// Deletes every voucher carrying the given batch label.
pub fn delete_by_batch_label(db: &Database, batch_label: &str) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let deleted = conn.execute(
            "DELETE FROM vouchers WHERE batch_label = ?1",
            params![batch_label],
        )?;
        Ok(deleted as u64)
    })
}
