//! Stateless bearer tokens (HS256 JWT).
//!
//! Claims carry only the actor coordinates plus, for vouchers, an
//! advisory quota snapshot for client display. The snapshot is never
//! trusted for authorization; the resolver re-reads the database.

use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::actor::OwnerType;
use crate::error::AuthError;

/// Token claims. `sub` is the actor's database ID as a string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub actor_type: OwnerType,
    pub exp: i64,
    pub iat: i64,
    /// Advisory only: quota snapshot at issue time, present for vouchers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_runs: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub used_runs: Option<i64>,
}

impl Claims {
    /// The actor ID from `sub`, if it parses.
    pub fn actor_id(&self) -> Result<i64, AuthError> {
        self.sub.parse().map_err(|_| AuthError::InvalidToken)
    }
}

/// Signs and validates tokens with a shared HS256 secret.
pub struct TokenCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    ttl_seconds: i64,
}

impl TokenCodec {
    pub fn new(secret: &SecretString, ttl_seconds: i64) -> Self {
        let bytes = secret.expose_secret().as_bytes();
        Self {
            encoding_key: EncodingKey::from_secret(bytes),
            decoding_key: DecodingKey::from_secret(bytes),
            ttl_seconds,
        }
    }

    /// Issues a token for the given actor coordinates.
    pub fn issue(
        &self,
        actor_type: OwnerType,
        actor_id: i64,
        quota: Option<(i64, i64)>,
    ) -> Result<String, AuthError> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: actor_id.to_string(),
            actor_type,
            exp: now + self.ttl_seconds,
            iat: now,
            max_runs: quota.map(|(max, _)| max),
            used_runs: quota.map(|(_, used)| used),
        };
        encode(&Header::default(), &claims, &self.encoding_key).map_err(|e| {
            log::error!("Failed to sign token: {}", e);
            AuthError::InvalidToken
        })
    }

    /// Validates a token's signature and expiry, returning its claims.
    /// All failure modes collapse into `InvalidToken`.
    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        let data = decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map_err(|_| AuthError::InvalidToken)?;
        Ok(data.claims)
    }
}
