//! Actor resolution — turning a bearer token back into a live actor.
//!
//! Two modes exist because an exhausted voucher must still be able to
//! read its own finished work. `Strict` gates anything that consumes
//! quota or mutates state; `Lenient` only requires that the principal
//! exists.

use chrono::{DateTime, Utc};
use secrecy::SecretString;

use crate::actor::{Actor, OwnerType};
use crate::db::{admin_repo, voucher_repo, Database};
use crate::db::admin_repo::AdminRow;
use crate::db::voucher_repo::VoucherRow;
use crate::error::{AuthError, Result, ScribegateError};

use super::password::verify_password;
use super::token::TokenCodec;

/// How much of the voucher's health must hold for access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Voucher must be active, unexpired, and have quota left.
    Strict,
    /// Voucher must merely exist. Used for read paths so spent
    /// vouchers can still retrieve their results.
    Lenient,
}

/// Issues tokens and resolves them back to database-backed actors.
pub struct Authenticator {
    db: Database,
    codec: TokenCodec,
}

impl Authenticator {
    pub fn new(db: Database, signing_secret: &SecretString, token_ttl_seconds: i64) -> Self {
        Self {
            db,
            codec: TokenCodec::new(signing_secret, token_ttl_seconds),
        }
    }

    /// Verifies admin credentials and issues a token.
    pub fn login_admin(&self, email: &str, password: &str) -> Result<(String, AdminRow)> {
        let admin = admin_repo::find_by_email(&self.db, email)?
            .ok_or(ScribegateError::Auth(AuthError::InvalidToken))?;
        if !admin.is_active || !verify_password(password, &admin.password_hash) {
            // Same error for wrong password and disabled account.
            return Err(ScribegateError::Auth(AuthError::InvalidToken));
        }
        let token = self.codec.issue(OwnerType::Admin, admin.id, None)?;
        log::info!("Admin {} logged in", admin.id);
        Ok((token, admin))
    }

    /// Redeems a voucher code and issues a token. The voucher must be
    /// healthy at redemption time; the token carries an advisory quota
    /// snapshot.
    pub fn redeem_voucher(&self, code: &str) -> Result<(String, VoucherRow)> {
        let voucher = voucher_repo::find_by_code(&self.db, code)?
            .ok_or(ScribegateError::Auth(AuthError::VoucherNotFound))?;
        check_voucher_health(&voucher)?;
        let token = self.codec.issue(
            OwnerType::Voucher,
            voucher.id,
            Some((voucher.max_runs, voucher.used_runs)),
        )?;
        log::info!("Voucher {} redeemed", voucher.id);
        Ok((token, voucher))
    }

    /// Resolves a bearer token to a live actor, re-reading the
    /// database so revocation takes effect immediately.
    pub fn resolve(&self, token: &str, mode: AccessMode) -> Result<Actor> {
        let claims = self.codec.verify(token)?;
        let actor_id = claims.actor_id()?;

        match claims.actor_type {
            OwnerType::Admin => {
                let admin = admin_repo::find_by_id(&self.db, actor_id)?
                    .ok_or(ScribegateError::Auth(AuthError::AdminNotFound))?;
                if !admin.is_active {
                    return Err(ScribegateError::Auth(AuthError::AdminNotFound));
                }
                Ok(Actor::Admin(admin))
            }
            OwnerType::Voucher => {
                let voucher = voucher_repo::find_by_id(&self.db, actor_id)?
                    .ok_or(ScribegateError::Auth(AuthError::VoucherNotFound))?;
                if mode == AccessMode::Strict {
                    check_voucher_health(&voucher)?;
                }
                Ok(Actor::Voucher(voucher))
            }
        }
    }

    /// Resolves strictly and additionally requires an admin.
    pub fn require_admin(&self, token: &str) -> Result<AdminRow> {
        match self.resolve(token, AccessMode::Strict)? {
            Actor::Admin(admin) => Ok(admin),
            Actor::Voucher(_) => Err(ScribegateError::Auth(AuthError::AdminRequired)),
        }
    }
}

/// Full health check for quota-consuming access. Each failure has its
/// own error so the caller can tell the user exactly what is wrong.
fn check_voucher_health(voucher: &VoucherRow) -> Result<()> {
    if !voucher.is_active {
        return Err(ScribegateError::Auth(AuthError::VoucherInactive));
    }
    if voucher.remaining_runs() == 0 {
        return Err(ScribegateError::Auth(AuthError::QuotaExhausted));
    }
    if let Some(ref expires_at) = voucher.expires_at {
        if let Ok(expiry) = DateTime::parse_from_rfc3339(expires_at) {
            if expiry.with_timezone(&Utc) < Utc::now() {
                return Err(ScribegateError::Auth(AuthError::VoucherExpired));
            }
        } else {
            log::warn!(
                "Voucher {} has unparseable expiry '{}', treating as expired",
                voucher.id,
                expires_at
            );
            return Err(ScribegateError::Auth(AuthError::VoucherExpired));
        }
    }
    Ok(())
}
