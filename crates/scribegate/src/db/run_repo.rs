//! Run repository — CRUD operations for the `runs` table.
//!
//! Every read used for authorization is owner-scoped: callers pass the
//! owner coordinates and the WHERE clause enforces isolation at the
//! query level.

use rusqlite::{params, Row};

use super::{Database, DatabaseError};

/// A raw run row from the database.
#[derive(Debug, Clone)]
pub struct RunRow {
    pub id: i64,
    pub topic: String,
    pub owner_type: String,
    pub owner_id: i64,
    pub status: String,
    pub current_stage: Option<String>,
    pub output_dir: Option<String>,
    pub error_message: Option<String>,
    pub start_time: String,
    pub end_time: Option<String>,
}

impl RunRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            topic: row.get("topic")?,
            owner_type: row.get("owner_type")?,
            owner_id: row.get("owner_id")?,
            status: row.get("status")?,
            current_stage: row.get("current_stage")?,
            output_dir: row.get("output_dir")?,
            error_message: row.get("error_message")?,
            start_time: row.get("start_time")?,
            end_time: row.get("end_time")?,
        })
    }
}

/// Inserts a new pending run and returns its assigned ID.
pub fn insert(
    db: &Database,
    topic: &str,
    owner_type: &str,
    owner_id: i64,
    start_time: &str,
) -> Result<i64, DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO runs (topic, owner_type, owner_id, status, start_time)
             VALUES (?1, ?2, ?3, 'pending', ?4)",
            params![topic, owner_type, owner_id, start_time],
        )?;
        Ok(conn.last_insert_rowid())
    })
}

/// Finds a run by its ID, regardless of owner.
pub fn find_by_id(db: &Database, id: i64) -> Result<Option<RunRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM runs WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], RunRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Finds a run by ID only if it belongs to the given owner.
pub fn find_owned(
    db: &Database,
    id: i64,
    owner_type: &str,
    owner_id: i64,
) -> Result<Option<RunRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn
            .prepare("SELECT * FROM runs WHERE id = ?1 AND owner_type = ?2 AND owner_id = ?3")?;
        let mut rows = stmt.query_map(params![id, owner_type, owner_id], RunRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Lists all runs belonging to an owner, most recent first.
pub fn list_for_owner(
    db: &Database,
    owner_type: &str,
    owner_id: i64,
) -> Result<Vec<RunRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM runs WHERE owner_type = ?1 AND owner_id = ?2
             ORDER BY start_time DESC, id DESC",
        )?;
        let rows: Vec<RunRow> = stmt
            .query_map(params![owner_type, owner_id], RunRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Lists every run regardless of owner, most recent first. Admin
/// oversight only; owner-facing reads go through `list_for_owner`.
pub fn list_all(db: &Database) -> Result<Vec<RunRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM runs ORDER BY start_time DESC, id DESC")?;
        let rows: Vec<RunRow> = stmt
            .query_map([], RunRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Counts active (pending or running) runs for an owner.
pub fn count_active_for_owner(
    db: &Database,
    owner_type: &str,
    owner_id: i64,
) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM runs
             WHERE owner_type = ?1 AND owner_id = ?2 AND status IN ('pending', 'running')",
            params![owner_type, owner_id],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}

/// Records the resolved output directory for a run.
pub fn set_output_dir(db: &Database, id: i64, output_dir: &str) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE runs SET output_dir = ?2 WHERE id = ?1",
            params![id, output_dir],
        )?;
        Ok(())
    })
}

/// Marks a run as running and records the stage it entered.
pub fn mark_running(db: &Database, id: i64, stage: &str) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE runs SET status = 'running', current_stage = ?2 WHERE id = ?1",
            params![id, stage],
        )?;
        Ok(())
    })
}

/// Updates only the human-readable stage of a running run.
pub fn update_stage(db: &Database, id: i64, stage: &str) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE runs SET current_stage = ?2 WHERE id = ?1",
            params![id, stage],
        )?;
        Ok(())
    })
}

/// Marks a run as completed.
pub fn mark_completed(db: &Database, id: i64, end_time: &str) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE runs SET status = 'completed', current_stage = NULL, end_time = ?2
             WHERE id = ?1",
            params![id, end_time],
        )?;
        Ok(())
    })
}

/// Marks a run as failed with an error message.
pub fn mark_failed(
    db: &Database,
    id: i64,
    error_message: &str,
    end_time: &str,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE runs SET status = 'failed', error_message = ?2, end_time = ?3 WHERE id = ?1",
            params![id, error_message, end_time],
        )?;
        Ok(())
    })
}

/// Deletes a run. Progress rows cascade via the foreign key.
pub fn delete(db: &Database, id: i64) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let deleted = conn.execute("DELETE FROM runs WHERE id = ?1", params![id])?;
        Ok(deleted > 0)
    })
}
