//! Engine boundary — the seam between run orchestration and the
//! external content-generation engine.
//!
//! The orchestrator only ever talks to [`EngineFactory`] and
//! [`EngineHandle`], so the real engine adapter and the test doubles
//! plug in the same way. Settings resolve with database values
//! overriding environment defaults; stored API keys are decrypted on
//! the way out.

use std::path::PathBuf;

use secrecy::SecretString;

use crate::broadcast::ProgressSink;
use crate::db::{config_repo, Database};
use crate::error::Result;
use crate::secrets::CredentialEncryptor;

/// Environment variable names for engine defaults. A row in the
/// system configuration table overrides any of these.
pub const ENV_API_KEY: &str = "ENGINE_API_KEY";
pub const ENV_API_TYPE: &str = "ENGINE_API_TYPE";
pub const ENV_API_BASE: &str = "ENGINE_API_BASE";
pub const ENV_AZURE_API_BASE: &str = "AZURE_API_BASE";
pub const ENV_AZURE_API_VERSION: &str = "AZURE_API_VERSION";
pub const ENV_SMALL_MODEL: &str = "ENGINE_SMALL_MODEL";
pub const ENV_LARGE_MODEL: &str = "ENGINE_LARGE_MODEL";
pub const ENV_SMALL_MODEL_AZURE: &str = "ENGINE_SMALL_MODEL_AZURE";
pub const ENV_LARGE_MODEL_AZURE: &str = "ENGINE_LARGE_MODEL_AZURE";
pub const ENV_RETRIEVER_API_KEY: &str = "RETRIEVER_API_KEY";

/// Failures crossing the engine boundary.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Engine initialization failed: {0}")]
    Init(String),

    #[error("Generation failed: {0}")]
    Generation(String),

    #[error("Engine produced no '{0}' artifact")]
    MissingArtifact(&'static str),

    #[error("Engine configuration invalid: {0}")]
    Config(String),
}

/// Effective engine configuration after merging the database row over
/// environment defaults.
#[derive(Clone, Default)]
pub struct EngineSettings {
    pub api_key: Option<SecretString>,
    pub api_type: Option<String>,
    pub api_base: Option<String>,
    pub azure_api_base: Option<String>,
    pub azure_api_version: Option<String>,
    pub small_model: Option<String>,
    pub large_model: Option<String>,
    pub small_model_azure: Option<String>,
    pub large_model_azure: Option<String>,
    pub retriever_api_key: Option<SecretString>,
}

impl EngineSettings {
    /// Resolves settings: environment first, then the database row on
    /// top. Encrypted keys in the row are decrypted with `encryptor`;
    /// a row key that fails to decrypt is dropped with a warning
    /// rather than silently shadowing the env value.
    pub fn resolve(db: &Database, encryptor: Option<&CredentialEncryptor>) -> Result<Self> {
        let mut settings = Self::from_env();

        if let Some(row) = config_repo::get(db)? {
            if let Some(key) = decrypt_stored(encryptor, row.api_key.as_deref(), "api_key") {
                settings.api_key = Some(key);
            }
            if let Some(key) =
                decrypt_stored(encryptor, row.retriever_api_key.as_deref(), "retriever_api_key")
            {
                settings.retriever_api_key = Some(key);
            }
            override_if_set(&mut settings.api_type, row.api_type);
            override_if_set(&mut settings.api_base, row.api_base);
            override_if_set(&mut settings.azure_api_base, row.azure_api_base);
            override_if_set(&mut settings.azure_api_version, row.azure_api_version);
            override_if_set(&mut settings.small_model, row.small_model);
            override_if_set(&mut settings.large_model, row.large_model);
            override_if_set(&mut settings.small_model_azure, row.small_model_azure);
            override_if_set(&mut settings.large_model_azure, row.large_model_azure);
        }

        Ok(settings)
    }

    /// Settings from environment variables alone.
    pub fn from_env() -> Self {
        Self {
            api_key: env_opt(ENV_API_KEY).map(SecretString::from),
            api_type: env_opt(ENV_API_TYPE),
            api_base: env_opt(ENV_API_BASE),
            azure_api_base: env_opt(ENV_AZURE_API_BASE),
            azure_api_version: env_opt(ENV_AZURE_API_VERSION),
            small_model: env_opt(ENV_SMALL_MODEL),
            large_model: env_opt(ENV_LARGE_MODEL),
            small_model_azure: env_opt(ENV_SMALL_MODEL_AZURE),
            large_model_azure: env_opt(ENV_LARGE_MODEL_AZURE),
            retriever_api_key: env_opt(ENV_RETRIEVER_API_KEY).map(SecretString::from),
        }
    }
}

impl std::fmt::Debug for EngineSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineSettings")
            .field("api_key", &self.api_key.as_ref().map(|_| "****"))
            .field("api_type", &self.api_type)
            .field("api_base", &self.api_base)
            .field("azure_api_base", &self.azure_api_base)
            .field("large_model", &self.large_model)
            .field("small_model", &self.small_model)
            .field(
                "retriever_api_key",
                &self.retriever_api_key.as_ref().map(|_| "****"),
            )
            .finish_non_exhaustive()
    }
}

fn env_opt(name: &str) -> Option<String> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Some(value.trim().to_string()),
        _ => None,
    }
}

fn override_if_set(target: &mut Option<String>, value: Option<String>) {
    if let Some(value) = value {
        if !value.is_empty() {
            *target = Some(value);
        }
    }
}

fn decrypt_stored(
    encryptor: Option<&CredentialEncryptor>,
    stored: Option<&str>,
    field: &str,
) -> Option<SecretString> {
    let ciphertext = stored.filter(|s| !s.is_empty())?;
    match encryptor {
        Some(enc) => match enc.decrypt(ciphertext) {
            Ok(plain) => Some(SecretString::from(plain)),
            Err(e) => {
                log::warn!("Stored {} failed to decrypt, ignoring: {}", field, e);
                None
            }
        },
        None => {
            log::warn!("Stored {} present but no credential key configured", field);
            None
        }
    }
}

/// One generation request handed to an engine.
#[derive(Debug, Clone)]
pub struct EngineRequest {
    pub run_id: i64,
    pub topic: String,
    /// Absolute directory the engine must write artifacts into.
    pub output_dir: PathBuf,
}

/// A ready-to-run engine instance for one request.
pub trait EngineHandle: Send {
    /// Runs generation to completion, writing artifacts into
    /// `request.output_dir` and reporting progress through `sink`.
    fn generate(
        &mut self,
        request: &EngineRequest,
        sink: &dyn ProgressSink,
    ) -> std::result::Result<(), EngineError>;

    /// Optional cleanup after generation (polishing artifacts, closing
    /// engine-side resources). Failures here never fail the run; the
    /// orchestrator records them and moves on.
    fn post_process(
        &mut self,
        _request: &EngineRequest,
        _sink: &dyn ProgressSink,
    ) -> std::result::Result<(), EngineError> {
        Ok(())
    }
}

/// Builds engine handles. Construction is where configuration errors
/// surface, before the run is marked running.
pub trait EngineFactory: Send + Sync + 'static {
    fn create(
        &self,
        settings: &EngineSettings,
    ) -> std::result::Result<Box<dyn EngineHandle>, EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use serial_test::serial;

    const TEST_KEY: &str = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

    fn test_db() -> Database {
        Database::open_in_memory().expect("Failed to create test database")
    }

    #[test]
    #[serial]
    fn test_env_defaults() {
        std::env::set_var(ENV_API_TYPE, "openai");
        std::env::set_var(ENV_LARGE_MODEL, "gpt-4o");

        let settings = EngineSettings::resolve(&test_db(), None).unwrap();
        assert_eq!(settings.api_type.as_deref(), Some("openai"));
        assert_eq!(settings.large_model.as_deref(), Some("gpt-4o"));

        std::env::remove_var(ENV_API_TYPE);
        std::env::remove_var(ENV_LARGE_MODEL);
    }

    #[test]
    #[serial]
    fn test_db_row_overrides_env() {
        std::env::set_var(ENV_API_TYPE, "openai");

        let db = test_db();
        config_repo::upsert(
            &db,
            &config_repo::ConfigRow {
                api_type: Some("azure".to_string()),
                ..Default::default()
            },
            "2026-01-01T00:00:00Z",
        )
        .unwrap();

        let settings = EngineSettings::resolve(&db, None).unwrap();
        assert_eq!(settings.api_type.as_deref(), Some("azure"));

        std::env::remove_var(ENV_API_TYPE);
    }

    #[test]
    #[serial]
    fn test_stored_key_decrypts() {
        let encryptor = CredentialEncryptor::from_hex_key(TEST_KEY).unwrap();
        let db = test_db();
        config_repo::upsert(
            &db,
            &config_repo::ConfigRow {
                api_key: Some(encryptor.encrypt("sk-stored").unwrap()),
                ..Default::default()
            },
            "2026-01-01T00:00:00Z",
        )
        .unwrap();

        let settings = EngineSettings::resolve(&db, Some(&encryptor)).unwrap();
        assert_eq!(
            settings.api_key.as_ref().unwrap().expose_secret(),
            "sk-stored"
        );
    }

    #[test]
    #[serial]
    fn test_undecryptable_key_falls_back_to_env() {
        std::env::set_var(ENV_API_KEY, "sk-from-env");

        let encryptor = CredentialEncryptor::from_hex_key(TEST_KEY).unwrap();
        let db = test_db();
        config_repo::upsert(
            &db,
            &config_repo::ConfigRow {
                api_key: Some("deadbeef".to_string()),
                ..Default::default()
            },
            "2026-01-01T00:00:00Z",
        )
        .unwrap();

        let settings = EngineSettings::resolve(&db, Some(&encryptor)).unwrap();
        assert_eq!(
            settings.api_key.as_ref().unwrap().expose_secret(),
            "sk-from-env"
        );

        std::env::remove_var(ENV_API_KEY);
    }

    #[test]
    fn test_debug_redacts_keys() {
        let settings = EngineSettings {
            api_key: Some(SecretString::from("sk-very-secret")),
            ..Default::default()
        };
        let rendered = format!("{:?}", settings);
        assert!(!rendered.contains("sk-very-secret"));
    }
}
