pub mod actor;
pub mod artifacts;
pub mod auth;
pub mod broadcast;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod runs;
pub mod secrets;
pub mod vouchers;

pub use actor::{Actor, OwnerType};
pub use artifacts::{ArtifactStore, ARTIFACT_ARTICLE, ARTIFACT_OUTLINE, ARTIFACT_SOURCES};
pub use auth::{AccessMode, Authenticator};
pub use broadcast::{ProgressBroadcaster, ProgressEvent, ProgressRecorder, ProgressSink, Severity};
pub use config::Settings;
pub use db::Database;
pub use engine::{EngineError, EngineFactory, EngineHandle, EngineRequest, EngineSettings};
pub use error::{AuthError, ConfigError, Result, ScribegateError, WorkerError};
pub use runs::Orchestrator;
pub use secrets::{resolve_secret, resolve_secret_optional, CredentialEncryptor, SecretError};
pub use vouchers::{VoucherManager, VoucherSpec};
