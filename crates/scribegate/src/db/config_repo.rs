//! System configuration repository — a single-row table of engine
//! settings that override environment defaults.
//!
//! Key material stored here is encrypted by the caller before it is
//! written; this module only moves strings.

use rusqlite::{params, Row};

use super::{Database, DatabaseError};

/// The singleton configuration row. All fields are optional; `None`
/// means "fall back to the environment".
#[derive(Debug, Clone, Default)]
pub struct ConfigRow {
    pub api_key: Option<String>,
    pub api_type: Option<String>,
    pub api_base: Option<String>,
    pub azure_api_base: Option<String>,
    pub azure_api_version: Option<String>,
    pub small_model: Option<String>,
    pub large_model: Option<String>,
    pub small_model_azure: Option<String>,
    pub large_model_azure: Option<String>,
    pub retriever_api_key: Option<String>,
}

impl ConfigRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            api_key: row.get("api_key")?,
            api_type: row.get("api_type")?,
            api_base: row.get("api_base")?,
            azure_api_base: row.get("azure_api_base")?,
            azure_api_version: row.get("azure_api_version")?,
            small_model: row.get("small_model")?,
            large_model: row.get("large_model")?,
            small_model_azure: row.get("small_model_azure")?,
            large_model_azure: row.get("large_model_azure")?,
            retriever_api_key: row.get("retriever_api_key")?,
        })
    }
}

/// Fetches the singleton row, if one has been written.
pub fn get(db: &Database) -> Result<Option<ConfigRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM system_config WHERE id = 1")?;
        let mut rows = stmt.query_map([], ConfigRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Writes the singleton row, replacing whatever was there.
pub fn upsert(db: &Database, config: &ConfigRow, now: &str) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO system_config (id, api_key, api_type, api_base, azure_api_base,
             azure_api_version, small_model, large_model, small_model_azure,
             large_model_azure, retriever_api_key, updated_at)
             VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(id) DO UPDATE SET
                api_key = excluded.api_key,
                api_type = excluded.api_type,
                api_base = excluded.api_base,
                azure_api_base = excluded.azure_api_base,
                azure_api_version = excluded.azure_api_version,
                small_model = excluded.small_model,
                large_model = excluded.large_model,
                small_model_azure = excluded.small_model_azure,
                large_model_azure = excluded.large_model_azure,
                retriever_api_key = excluded.retriever_api_key,
                updated_at = excluded.updated_at",
            params![
                config.api_key,
                config.api_type,
                config.api_base,
                config.azure_api_base,
                config.azure_api_version,
                config.small_model,
                config.large_model,
                config.small_model_azure,
                config.large_model_azure,
                config.retriever_api_key,
                now,
            ],
        )?;
        Ok(())
    })
}

/// Clears the singleton row, restoring environment defaults.
pub fn clear(db: &Database) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute("DELETE FROM system_config WHERE id = 1", [])?;
        Ok(())
    })
}
