use thiserror::Error;

/// Authentication and authorization failures.
///
/// `InvalidToken` is the only authentication-class failure (maps to a
/// 401-style response); every other variant is an authorization failure
/// (403-style) with a specific machine-readable reason.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("could not validate credentials")]
    InvalidToken,

    #[error("admin not found or inactive")]
    AdminNotFound,

    #[error("voucher not found")]
    VoucherNotFound,

    #[error("voucher inactive")]
    VoucherInactive,

    #[error("voucher has no remaining runs")]
    QuotaExhausted,

    #[error("voucher expired")]
    VoucherExpired,

    #[error("admin privileges required")]
    AdminRequired,

    #[error("not authorized to access this run")]
    NotOwner,
}

impl AuthError {
    /// True for failures that mean the caller could not be identified at
    /// all, as opposed to being identified but denied.
    pub fn is_authentication(&self) -> bool {
        matches!(self, AuthError::InvalidToken)
    }
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Worker channel closed unexpectedly")]
    ChannelClosed,

    #[error("Worker queue is full")]
    QueueFull,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {message}")]
    Validation { message: String },

    #[error("Signing key unavailable: {0}")]
    SigningKey(#[from] crate::secrets::SecretError),
}

#[derive(Error, Debug)]
pub enum ScribegateError {
    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Storage error at '{path}': {source}")]
    Storage {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{what} not found")]
    NotFound { what: &'static str },

    #[error("Validation failed: {message}")]
    Validation { message: String },

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),
}

impl ScribegateError {
    pub fn not_found(what: &'static str) -> Self {
        ScribegateError::NotFound { what }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        ScribegateError::Validation {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ScribegateError>;
