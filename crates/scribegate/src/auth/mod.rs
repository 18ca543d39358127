//! Authentication and actor resolution.
//!
//! Tokens are stateless HS256 JWTs carrying the actor's type and ID;
//! the resolver re-loads the actor row on every request so that
//! deactivation, expiry, and quota exhaustion take effect immediately,
//! not at token refresh.

pub mod password;
pub mod resolver;
pub mod token;

pub use password::{hash_password, verify_password};
pub use resolver::{AccessMode, Authenticator};
pub use token::{Claims, TokenCodec};
