//! Admin repository — CRUD operations for the `admins` table.

use rusqlite::{params, Row};

use super::{Database, DatabaseError};

/// A raw admin row from the database.
#[derive(Debug, Clone)]
pub struct AdminRow {
    pub id: i64,
    pub email: String,
    pub password_hash: String,
    pub is_active: bool,
    pub role: String,
    pub created_at: String,
    pub updated_at: String,
}

impl AdminRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            email: row.get("email")?,
            password_hash: row.get("password_hash")?,
            is_active: row.get("is_active")?,
            role: row.get("role")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Inserts a new admin and returns its assigned ID.
pub fn insert(
    db: &Database,
    email: &str,
    password_hash: &str,
    role: &str,
    now: &str,
) -> Result<i64, DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO admins (email, password_hash, is_active, role, created_at, updated_at)
             VALUES (?1, ?2, 1, ?3, ?4, ?4)",
            params![email, password_hash, role, now],
        )?;
        Ok(conn.last_insert_rowid())
    })
}

/// Finds an admin by its ID.
pub fn find_by_id(db: &Database, id: i64) -> Result<Option<AdminRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM admins WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], AdminRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Finds an admin by email address.
pub fn find_by_email(db: &Database, email: &str) -> Result<Option<AdminRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM admins WHERE email = ?1")?;
        let mut rows = stmt.query_map(params![email], AdminRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Updates the stored password hash for an admin.
pub fn update_password_hash(
    db: &Database,
    id: i64,
    password_hash: &str,
    now: &str,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE admins SET password_hash = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, password_hash, now],
        )?;
        Ok(())
    })
}

/// Sets the active flag on an admin account.
pub fn set_active(db: &Database, id: i64, is_active: bool, now: &str) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE admins SET is_active = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, is_active, now],
        )?;
        Ok(())
    })
}

/// Counts all admin accounts. Used to detect first-run bootstrap.
pub fn count(db: &Database) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row("SELECT COUNT(*) FROM admins", [], |r| r.get(0))?;
        Ok(count)
    })
}
