//! Service configuration.
//!
//! Settings come from a JSON file with serde defaults filling the
//! gaps, so an empty `{}` is a valid config for local development
//! (apart from the signing key, which must come from somewhere). The
//! token signing key follows the usual three-source resolution:
//! direct value, file, or environment variable.

use std::path::{Path, PathBuf};

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::secrets::resolve_secret;

/// Fallback env var for the signing key when the config names none.
pub const SIGNING_KEY_ENV_VAR: &str = "SCRIBEGATE_SIGNING_KEY";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// SQLite database file. Defaults to `~/.scribegate/data/scribegate.db`.
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// Root directory for run artifacts. Defaults to `~/.scribegate/output`.
    #[serde(default)]
    pub output_root: Option<PathBuf>,

    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    #[serde(default = "default_max_active_runs")]
    pub max_active_runs_per_owner: u64,

    #[serde(default = "default_token_ttl")]
    pub token_ttl_seconds: i64,

    /// Signing key sources, tried in order: direct, file, env var.
    #[serde(default)]
    pub signing_key: Option<String>,
    #[serde(default)]
    pub signing_key_file: Option<String>,
    #[serde(default = "default_signing_key_env")]
    pub signing_key_env: String,
}

fn default_worker_count() -> usize {
    num_cpus::get()
}

fn default_max_active_runs() -> u64 {
    3
}

fn default_token_ttl() -> i64 {
    // 24 hours, matching how long a voucher holder typically works.
    86_400
}

fn default_signing_key_env() -> String {
    SIGNING_KEY_ENV_VAR.to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_path: None,
            output_root: None,
            worker_count: default_worker_count(),
            max_active_runs_per_owner: default_max_active_runs(),
            token_ttl_seconds: default_token_ttl(),
            signing_key: None,
            signing_key_file: None,
            signing_key_env: default_signing_key_env(),
        }
    }
}

impl Settings {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_str(&content)
    }

    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let settings: Settings = serde_json::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_count == 0 {
            return Err(ConfigError::Validation {
                message: "worker_count must be at least 1".to_string(),
            });
        }
        if self.max_active_runs_per_owner == 0 {
            return Err(ConfigError::Validation {
                message: "max_active_runs_per_owner must be at least 1".to_string(),
            });
        }
        if self.token_ttl_seconds <= 0 {
            return Err(ConfigError::Validation {
                message: "token_ttl_seconds must be positive".to_string(),
            });
        }
        Ok(())
    }

    /// Resolves the token signing key from the configured sources.
    pub fn resolve_signing_key(&self) -> Result<SecretString, ConfigError> {
        Ok(resolve_secret(
            self.signing_key.as_deref(),
            self.signing_key_file.as_deref(),
            Some(&self.signing_key_env),
        )?)
    }

    pub fn database_path(&self) -> PathBuf {
        self.database_path.clone().unwrap_or_else(|| {
            crate::db::default_database_path()
                .unwrap_or_else(|| PathBuf::from("scribegate.db"))
        })
    }

    pub fn output_root(&self) -> PathBuf {
        self.output_root.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".scribegate")
                .join("output")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use serial_test::serial;

    #[test]
    fn test_empty_config_uses_defaults() {
        let settings = Settings::from_str("{}").unwrap();
        assert!(settings.worker_count >= 1);
        assert_eq!(settings.max_active_runs_per_owner, 3);
        assert_eq!(settings.token_ttl_seconds, 86_400);
        assert_eq!(settings.signing_key_env, SIGNING_KEY_ENV_VAR);
    }

    #[test]
    fn test_explicit_values() {
        let settings = Settings::from_str(
            r#"{
                "database_path": "/var/lib/scribegate/app.db",
                "worker_count": 4,
                "token_ttl_seconds": 600
            }"#,
        )
        .unwrap();
        assert_eq!(
            settings.database_path(),
            PathBuf::from("/var/lib/scribegate/app.db")
        );
        assert_eq!(settings.worker_count, 4);
        assert_eq!(settings.token_ttl_seconds, 600);
    }

    #[test]
    fn test_validation_rejects_zero_workers() {
        assert!(Settings::from_str(r#"{"worker_count": 0}"#).is_err());
        assert!(Settings::from_str(r#"{"token_ttl_seconds": -5}"#).is_err());
        assert!(Settings::from_str(r#"{"max_active_runs_per_owner": 0}"#).is_err());
    }

    #[test]
    fn test_signing_key_direct() {
        let settings = Settings::from_str(r#"{"signing_key": "dev-only-key"}"#).unwrap();
        let key = settings.resolve_signing_key().unwrap();
        assert_eq!(key.expose_secret(), "dev-only-key");
    }

    #[test]
    #[serial]
    fn test_signing_key_from_env() {
        std::env::set_var(SIGNING_KEY_ENV_VAR, "env-key");
        let settings = Settings::from_str("{}").unwrap();
        assert_eq!(
            settings.resolve_signing_key().unwrap().expose_secret(),
            "env-key"
        );
        std::env::remove_var(SIGNING_KEY_ENV_VAR);
    }

    #[test]
    #[serial]
    fn test_signing_key_missing_is_error() {
        std::env::remove_var(SIGNING_KEY_ENV_VAR);
        let settings = Settings::from_str("{}").unwrap();
        assert!(settings.resolve_signing_key().is_err());
    }
}
