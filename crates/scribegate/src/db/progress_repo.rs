//! Progress repository — persisted progress history for runs.
//!
//! Live progress travels over the broadcast channel; rows here are the
//! durable trail written when a run reaches a terminal state.

use rusqlite::{params, Row};

use super::{Database, DatabaseError};

/// A raw progress row from the database.
#[derive(Debug, Clone)]
pub struct ProgressRow {
    pub id: i64,
    pub run_id: i64,
    pub timestamp: String,
    pub phase: String,
    pub severity: String,
    pub message: String,
    pub progress: i64,
    pub details: Option<String>,
}

impl ProgressRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            run_id: row.get("run_id")?,
            timestamp: row.get("timestamp")?,
            phase: row.get("phase")?,
            severity: row.get("severity")?,
            message: row.get("message")?,
            progress: row.get("progress")?,
            details: row.get("details")?,
        })
    }
}

/// Fields for one progress entry, before it has a row ID.
#[derive(Debug, Clone)]
pub struct NewProgress {
    pub run_id: i64,
    pub timestamp: String,
    pub phase: String,
    pub severity: String,
    pub message: String,
    pub progress: i64,
    pub details: Option<String>,
}

/// Inserts a batch of progress entries in one transaction.
pub fn insert_batch(db: &Database, entries: &[NewProgress]) -> Result<(), DatabaseError> {
    if entries.is_empty() {
        return Ok(());
    }
    db.with_conn(|conn| {
        let tx = conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO progress_updates (run_id, timestamp, phase, severity, message,
                 progress, details)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for entry in entries {
                stmt.execute(params![
                    entry.run_id,
                    entry.timestamp,
                    entry.phase,
                    entry.severity,
                    entry.message,
                    entry.progress,
                    entry.details,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    })
}

/// Lists the full progress trail for a run, oldest first.
pub fn list_for_run(db: &Database, run_id: i64) -> Result<Vec<ProgressRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM progress_updates WHERE run_id = ?1 ORDER BY id ASC",
        )?;
        let rows: Vec<ProgressRow> = stmt
            .query_map(params![run_id], ProgressRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::run_repo;

    fn test_db() -> Database {
        Database::open_in_memory().expect("Failed to create test database")
    }

    const NOW: &str = "2026-01-01T00:00:00Z";

    fn sample_entry(run_id: i64, phase: &str, progress: i64) -> NewProgress {
        NewProgress {
            run_id,
            timestamp: NOW.to_string(),
            phase: phase.to_string(),
            severity: "info".to_string(),
            message: format!("{} in progress", phase),
            progress,
            details: None,
        }
    }

    #[test]
    fn test_insert_batch_and_list() {
        let db = test_db();
        let run_id = run_repo::insert(&db, "Topic", "admin", 1, NOW).unwrap();

        insert_batch(
            &db,
            &[
                sample_entry(run_id, "INITIALIZING", 0),
                sample_entry(run_id, "PROCESSING", 50),
                sample_entry(run_id, "FINALIZING", 100),
            ],
        )
        .unwrap();

        let rows = list_for_run(&db, run_id).unwrap();
        assert_eq!(rows.len(), 3);
        // Insertion order is preserved.
        assert_eq!(rows[0].phase, "INITIALIZING");
        assert_eq!(rows[2].phase, "FINALIZING");
        assert_eq!(rows[2].progress, 100);
    }

    #[test]
    fn test_insert_empty_batch_is_noop() {
        let db = test_db();
        insert_batch(&db, &[]).unwrap();
    }

    #[test]
    fn test_batch_requires_existing_run() {
        let db = test_db();
        // run_id 999 does not exist; the foreign key rejects the batch.
        let result = insert_batch(&db, &[sample_entry(999, "INITIALIZING", 0)]);
        assert!(result.is_err());
    }

    #[test]
    fn test_list_is_scoped_to_run() {
        let db = test_db();
        let a = run_repo::insert(&db, "A", "admin", 1, NOW).unwrap();
        let b = run_repo::insert(&db, "B", "admin", 1, NOW).unwrap();

        insert_batch(&db, &[sample_entry(a, "PROCESSING", 10)]).unwrap();
        insert_batch(&db, &[sample_entry(b, "PROCESSING", 20)]).unwrap();

        let rows = list_for_run(&db, a).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].run_id, a);
    }
}
