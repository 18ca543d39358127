//! Actor model — the two kinds of principals that can hold runs.
//!
//! Admins are long-lived operator accounts; vouchers are quota-limited
//! redemption codes handed out to end users. Both own runs through the
//! same `(owner_type, owner_id)` coordinates.

use serde::{Deserialize, Serialize};

use crate::db::admin_repo::AdminRow;
use crate::db::voucher_repo::VoucherRow;

/// Discriminates the two principal kinds wherever ownership is stored
/// or compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OwnerType {
    Admin,
    Voucher,
}

impl OwnerType {
    /// The value stored in `owner_type` columns and token claims.
    pub fn as_str(&self) -> &'static str {
        match self {
            OwnerType::Admin => "admin",
            OwnerType::Voucher => "voucher",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "admin" => Some(OwnerType::Admin),
            "voucher" => Some(OwnerType::Voucher),
            _ => None,
        }
    }
}

impl std::fmt::Display for OwnerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resolved principal, freshly loaded from the database.
#[derive(Debug, Clone)]
pub enum Actor {
    Admin(AdminRow),
    Voucher(VoucherRow),
}

impl Actor {
    pub fn owner_type(&self) -> OwnerType {
        match self {
            Actor::Admin(_) => OwnerType::Admin,
            Actor::Voucher(_) => OwnerType::Voucher,
        }
    }

    /// The database ID used in ownership coordinates.
    pub fn owner_id(&self) -> i64 {
        match self {
            Actor::Admin(a) => a.id,
            Actor::Voucher(v) => v.id,
        }
    }

    /// Human-readable identifier used when naming artifact directories:
    /// the admin's email or the voucher's code.
    pub fn owner_identifier(&self) -> &str {
        match self {
            Actor::Admin(a) => &a.email,
            Actor::Voucher(v) => &v.code,
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Actor::Admin(_))
    }

    /// Whether this actor owns the run at the given coordinates.
    pub fn owns(&self, owner_type: OwnerType, owner_id: i64) -> bool {
        self.owner_type() == owner_type && self.owner_id() == owner_id
    }
}
