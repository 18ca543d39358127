//! Voucher management — creation, batches, and lifecycle operations.
//!
//! Codes double as human-facing identifiers (they appear in artifact
//! directory names), so generation uses an unambiguous alphabet and
//! uniqueness is enforced both here and by the database constraint.

use crate::db::{voucher_repo, Database};
use crate::db::voucher_repo::{NewVoucher, VoucherFilter, VoucherRow};
use crate::error::{Result, ScribegateError};
use crate::secrets;

/// Alphabet for generated codes. Excludes 0/O, 1/I/L to keep codes
/// readable when printed or dictated.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";

/// Characters per random group in a code (`PREFIX-XXXX-XXXX`).
const CODE_GROUP_LEN: usize = 4;

/// How many collisions we tolerate before accepting the last candidate
/// unchecked. With two random groups over a 31-character alphabet,
/// reaching this means something is wrong with the RNG, not bad luck;
/// the UNIQUE constraint still rejects a true duplicate at insert.
const MAX_CODE_ATTEMPTS: usize = 16;

/// Default prefix when the caller supplies none.
const DEFAULT_PREFIX: &str = "SG";

/// Parameters for a single voucher or a batch.
#[derive(Debug, Clone)]
pub struct VoucherSpec {
    pub prefix: Option<String>,
    pub max_runs: i64,
    pub batch_label: Option<String>,
    pub expires_at: Option<String>,
    pub created_by_admin_id: Option<i64>,
}

/// Voucher lifecycle operations, all admin-gated by the caller.
pub struct VoucherManager {
    db: Database,
}

impl VoucherManager {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Creates one voucher with a freshly generated unique code.
    pub fn create(&self, spec: &VoucherSpec) -> Result<VoucherRow> {
        if spec.max_runs < 1 {
            return Err(ScribegateError::validation("max_runs must be at least 1"));
        }
        if let Some(ref prefix) = spec.prefix {
            validate_prefix(prefix)?;
        }

        let code = self.generate_unique_code(spec.prefix.as_deref())?;
        let now = crate::db::format_timestamp(chrono::Utc::now());
        let id = voucher_repo::insert(
            &self.db,
            &NewVoucher {
                code,
                prefix: spec.prefix.clone(),
                max_runs: spec.max_runs,
                batch_label: spec.batch_label.clone(),
                expires_at: spec.expires_at.clone(),
                created_by_admin_id: spec.created_by_admin_id,
            },
            &now,
        )?;
        let voucher = voucher_repo::find_by_id(&self.db, id)?
            .ok_or(ScribegateError::not_found("voucher"))?;
        log::info!("Created voucher {} ({})", voucher.id, voucher.code);
        Ok(voucher)
    }

    /// Creates `count` vouchers sharing the same settings and batch
    /// label. Fails fast on the first error; already-created vouchers
    /// remain (they share the label and can be deleted as a batch).
    pub fn create_batch(&self, spec: &VoucherSpec, count: usize) -> Result<Vec<VoucherRow>> {
        if count == 0 {
            return Err(ScribegateError::validation("batch count must be at least 1"));
        }
        let mut created = Vec::with_capacity(count);
        for _ in 0..count {
            created.push(self.create(spec)?);
        }
        log::info!(
            "Created batch of {} vouchers (label: {:?})",
            created.len(),
            spec.batch_label
        );
        Ok(created)
    }

    /// Lists vouchers with optional filters, returning (rows, total).
    pub fn list(&self, filter: &VoucherFilter) -> Result<(Vec<VoucherRow>, u64)> {
        Ok(voucher_repo::query(&self.db, filter)?)
    }

    pub fn get(&self, id: i64) -> Result<VoucherRow> {
        voucher_repo::find_by_id(&self.db, id)?
            .ok_or(ScribegateError::not_found("voucher"))
    }

    /// Updates quota, active flag, and expiry on an existing voucher.
    /// `max_runs` may not drop below what is already consumed.
    pub fn update(
        &self,
        id: i64,
        max_runs: i64,
        is_active: bool,
        expires_at: Option<&str>,
    ) -> Result<VoucherRow> {
        let existing = self.get(id)?;
        if max_runs < existing.used_runs {
            return Err(ScribegateError::validation(format!(
                "max_runs {} is below already-used {}",
                max_runs, existing.used_runs
            )));
        }
        let now = crate::db::format_timestamp(chrono::Utc::now());
        voucher_repo::update(&self.db, id, max_runs, is_active, expires_at, &now)?;
        self.get(id)
    }

    /// Deactivates a voucher without deleting its history.
    pub fn deactivate(&self, id: i64) -> Result<()> {
        // Ensure it exists so callers get NotFound, not silent success.
        self.get(id)?;
        let now = crate::db::format_timestamp(chrono::Utc::now());
        voucher_repo::set_active(&self.db, id, false, &now)?;
        log::info!("Deactivated voucher {}", id);
        Ok(())
    }

    /// Deletes vouchers by ID. Returns how many were removed.
    pub fn delete_by_ids(&self, ids: &[i64]) -> Result<u64> {
        let deleted = voucher_repo::delete_by_ids(&self.db, ids)?;
        log::info!("Deleted {} of {} requested vouchers", deleted, ids.len());
        Ok(deleted)
    }

    /// Deletes an entire batch by its label.
    pub fn delete_by_batch_label(&self, batch_label: &str) -> Result<u64> {
        let deleted = voucher_repo::delete_by_batch_label(&self.db, batch_label)?;
        log::info!("Deleted {} vouchers in batch '{}'", deleted, batch_label);
        Ok(deleted)
    }

    /// Generates a code and retries on the (unlikely) collision.
    fn generate_unique_code(&self, prefix: Option<&str>) -> Result<String> {
        unique_code_with(&self.db, || generate_code(prefix))
    }
}

/// Retries `next` until it yields an unused code or the retry bound is
/// hit, at which point the last candidate is accepted rather than
/// looping forever.
fn unique_code_with<F>(db: &Database, mut next: F) -> Result<String>
where
    F: FnMut() -> Result<String>,
{
    let mut code = next()?;
    for _ in 1..MAX_CODE_ATTEMPTS {
        if !voucher_repo::code_exists(db, &code)? {
            return Ok(code);
        }
        log::warn!("Voucher code collision on '{}', regenerating", code);
        code = next()?;
    }
    log::warn!(
        "Voucher code retry bound reached, accepting '{}' unchecked",
        code
    );
    Ok(code)
}

/// Generates a `PREFIX-XXXX-XXXX` code from the unambiguous alphabet.
fn generate_code(prefix: Option<&str>) -> Result<String> {
    let prefix = prefix.unwrap_or(DEFAULT_PREFIX);
    let bytes = secrets::rand_bytes::<{ CODE_GROUP_LEN * 2 }>()
        .map_err(|e| ScribegateError::validation(e.to_string()))?;
    let mut chars = bytes
        .iter()
        .map(|&b| CODE_ALPHABET[b as usize % CODE_ALPHABET.len()] as char);

    let group_a: String = chars.by_ref().take(CODE_GROUP_LEN).collect();
    let group_b: String = chars.collect();
    Ok(format!("{}-{}-{}", prefix, group_a, group_b))
}

/// Prefixes end up in directory names, so only a safe subset is
/// allowed.
fn validate_prefix(prefix: &str) -> Result<()> {
    if prefix.is_empty() || prefix.len() > 16 {
        return Err(ScribegateError::validation(
            "prefix must be 1-16 characters",
        ));
    }
    if !prefix.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(ScribegateError::validation(
            "prefix must be ASCII alphanumeric",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> VoucherManager {
        let db = Database::open_in_memory().expect("Failed to create test database");
        VoucherManager::new(db)
    }

    fn spec(max_runs: i64) -> VoucherSpec {
        VoucherSpec {
            prefix: Some("WF".to_string()),
            max_runs,
            batch_label: None,
            expires_at: None,
            created_by_admin_id: None,
        }
    }

    #[test]
    fn test_generate_code_shape() {
        let code = generate_code(Some("WF")).unwrap();
        let parts: Vec<&str> = code.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "WF");
        assert_eq!(parts[1].len(), CODE_GROUP_LEN);
        assert_eq!(parts[2].len(), CODE_GROUP_LEN);
        for c in parts[1].chars().chain(parts[2].chars()) {
            assert!(CODE_ALPHABET.contains(&(c as u8)), "unexpected char {}", c);
        }
    }

    #[test]
    fn test_generate_code_default_prefix() {
        let code = generate_code(None).unwrap();
        assert!(code.starts_with("SG-"));
    }

    #[test]
    fn test_code_retry_bound_accepts_last_candidate() {
        let mgr = manager();
        let taken = mgr.create(&spec(1)).unwrap();

        // A generator that always collides exhausts the bound, but the
        // final candidate is still returned instead of an error.
        let code = unique_code_with(&mgr.db, || Ok(taken.code.clone())).unwrap();
        assert_eq!(code, taken.code);
    }

    #[test]
    fn test_code_retry_skips_collisions() {
        let mgr = manager();
        let taken = mgr.create(&spec(1)).unwrap();

        let mut calls = 0;
        let code = unique_code_with(&mgr.db, || {
            calls += 1;
            if calls == 1 {
                Ok(taken.code.clone())
            } else {
                Ok("WF-FRES-HNEW".to_string())
            }
        })
        .unwrap();
        assert_eq!(code, "WF-FRES-HNEW");
    }

    #[test]
    fn test_create_voucher() {
        let mgr = manager();
        let voucher = mgr.create(&spec(3)).unwrap();
        assert!(voucher.code.starts_with("WF-"));
        assert_eq!(voucher.max_runs, 3);
        assert!(voucher.is_active);
    }

    #[test]
    fn test_create_rejects_bad_input() {
        let mgr = manager();
        assert!(mgr.create(&spec(0)).is_err());

        let mut bad_prefix = spec(1);
        bad_prefix.prefix = Some("../evil".to_string());
        assert!(mgr.create(&bad_prefix).is_err());
    }

    #[test]
    fn test_create_batch() {
        let mgr = manager();
        let mut batch_spec = spec(2);
        batch_spec.batch_label = Some("workshop-march".to_string());

        let created = mgr.create_batch(&batch_spec, 5).unwrap();
        assert_eq!(created.len(), 5);
        // All codes distinct.
        let mut codes: Vec<&str> = created.iter().map(|v| v.code.as_str()).collect();
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), 5);

        let (_, total) = mgr
            .list(&VoucherFilter {
                batch_label: Some("workshop-march".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(total, 5);
    }

    #[test]
    fn test_create_batch_zero_rejected() {
        let mgr = manager();
        assert!(mgr.create_batch(&spec(1), 0).is_err());
    }

    #[test]
    fn test_update_cannot_undercut_usage() {
        let mgr = manager();
        let voucher = mgr.create(&spec(3)).unwrap();
        voucher_repo::increment_usage(&mgr.db, voucher.id, "2026-01-01T00:00:00Z").unwrap();
        voucher_repo::increment_usage(&mgr.db, voucher.id, "2026-01-01T00:00:00Z").unwrap();

        assert!(mgr.update(voucher.id, 1, true, None).is_err());
        let updated = mgr.update(voucher.id, 5, true, None).unwrap();
        assert_eq!(updated.max_runs, 5);
    }

    #[test]
    fn test_deactivate() {
        let mgr = manager();
        let voucher = mgr.create(&spec(1)).unwrap();
        mgr.deactivate(voucher.id).unwrap();
        assert!(!mgr.get(voucher.id).unwrap().is_active);

        assert!(mgr.deactivate(9999).is_err());
    }

    #[test]
    fn test_delete_batch() {
        let mgr = manager();
        let mut batch_spec = spec(1);
        batch_spec.batch_label = Some("pilot".to_string());
        mgr.create_batch(&batch_spec, 3).unwrap();
        let keeper = mgr.create(&spec(1)).unwrap();

        assert_eq!(mgr.delete_by_batch_label("pilot").unwrap(), 3);
        assert!(mgr.get(keeper.id).is_ok());
    }
}
