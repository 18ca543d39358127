//! Secret resolution and at-rest credential encryption.
//!
//! Secrets can arrive three ways, tried in priority order:
//!
//! 1. **Direct value** - for local development (`signingKey: "..."`)
//! 2. **File reference** - Docker secrets (`signingKeyFile: /run/secrets/key`)
//! 3. **Env var reference** - production deployments
//!
//! Engine API keys written to the database go through
//! [`CredentialEncryptor`] first, so the config table never holds them
//! in the clear.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use secrecy::SecretString;
use std::fs;

/// Error type for secret resolution failures.
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("No secret source provided (need one of: direct value, file path, or env var name)")]
    NoSourceProvided,

    #[error("Failed to read secret from file '{path}': {source}")]
    FileReadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Environment variable '{name}' not set")]
    EnvVarNotSet { name: String },

    #[error("Environment variable '{name}' contains invalid UTF-8")]
    EnvVarNotUnicode { name: String },

    #[error("Encryption error: {0}")]
    EncryptionError(String),

    #[error("Decryption error: {0}")]
    DecryptionError(String),

    #[error("Invalid encryption key: {0}")]
    InvalidKey(String),
}

/// Result type for secret resolution.
pub type Result<T> = std::result::Result<T, SecretError>;

/// Resolves a secret from multiple sources in priority order:
/// direct value, then file contents, then environment variable.
///
/// Empty strings in any slot are treated as "not provided". File and
/// env values are trimmed, since both commonly carry trailing
/// newlines.
pub fn resolve_secret(
    direct: Option<&str>,
    file_path: Option<&str>,
    env_var: Option<&str>,
) -> Result<SecretString> {
    if let Some(value) = direct {
        if !value.is_empty() {
            return Ok(SecretString::from(value.to_string()));
        }
    }

    if let Some(path) = file_path {
        if !path.is_empty() {
            let expanded = expand_home(path);
            match fs::read_to_string(&expanded) {
                Ok(content) => return Ok(SecretString::from(content.trim().to_string())),
                Err(e) => {
                    return Err(SecretError::FileReadError {
                        path: expanded,
                        source: e,
                    })
                }
            }
        }
    }

    if let Some(var_name) = env_var {
        if !var_name.is_empty() {
            match std::env::var(var_name) {
                Ok(value) => {
                    return Ok(SecretString::from(value.trim()));
                }
                Err(std::env::VarError::NotPresent) => {
                    return Err(SecretError::EnvVarNotSet {
                        name: var_name.to_string(),
                    })
                }
                Err(std::env::VarError::NotUnicode(_)) => {
                    return Err(SecretError::EnvVarNotUnicode {
                        name: var_name.to_string(),
                    })
                }
            }
        }
    }

    Err(SecretError::NoSourceProvided)
}

/// Like [`resolve_secret`], but a fully absent secret yields `None`
/// instead of an error. Used for optional keys such as the retriever
/// credential.
pub fn resolve_secret_optional(
    direct: Option<&str>,
    file_path: Option<&str>,
    env_var: Option<&str>,
) -> Result<Option<SecretString>> {
    match resolve_secret(direct, file_path, env_var) {
        Ok(secret) => Ok(Some(secret)),
        Err(SecretError::NoSourceProvided) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Expands `~` to the user's home directory.
///
/// Handles `~` and `~/path`; `~user/path` is not supported.
fn expand_home(path: &str) -> String {
    if path == "~" || path.starts_with("~/") {
        if let Some(home) = std::env::var_os("HOME").or_else(|| std::env::var_os("USERPROFILE")) {
            if path == "~" {
                return home.to_string_lossy().into_owned();
            }
            return path.replacen("~", &home.to_string_lossy(), 1);
        }
    }
    path.to_string()
}

// ============================================
// Credential Encryption
// ============================================

/// Encryption key environment variable name.
pub const CREDENTIAL_KEY_ENV_VAR: &str = "SCRIBEGATE_CREDENTIAL_KEY";

/// Nonce size for AES-256-GCM (96 bits = 12 bytes).
const NONCE_SIZE: usize = 12;

/// Encrypts engine credentials before they land in the database.
///
/// Uses AES-256-GCM. The key comes from `SCRIBEGATE_CREDENTIAL_KEY`
/// and must be a 64-character hex string (32 bytes).
pub struct CredentialEncryptor {
    cipher: Aes256Gcm,
}

impl CredentialEncryptor {
    /// Creates an encryptor from the environment variable.
    pub fn from_env() -> Result<Self> {
        let key_hex = std::env::var(CREDENTIAL_KEY_ENV_VAR).map_err(|_| {
            SecretError::InvalidKey(format!(
                "Environment variable {} not set",
                CREDENTIAL_KEY_ENV_VAR
            ))
        })?;

        Self::from_hex_key(&key_hex)
    }

    /// Creates an encryptor from a 64-character hex key.
    pub fn from_hex_key(key_hex: &str) -> Result<Self> {
        let key_bytes = hex_decode(key_hex)
            .map_err(|e| SecretError::InvalidKey(format!("Invalid hex key: {}", e)))?;

        if key_bytes.len() != 32 {
            return Err(SecretError::InvalidKey(format!(
                "Key must be 32 bytes (64 hex chars), got {} bytes",
                key_bytes.len()
            )));
        }

        let cipher = Aes256Gcm::new_from_slice(&key_bytes)
            .map_err(|e| SecretError::InvalidKey(format!("Failed to create cipher: {}", e)))?;

        Ok(Self { cipher })
    }

    /// Encrypts plaintext and returns hex-encoded ciphertext with
    /// prepended nonce. Format: `<12-byte nonce><ciphertext>`, all hex.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let nonce_bytes = rand_bytes::<NONCE_SIZE>()?;
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| SecretError::EncryptionError(e.to_string()))?;

        let mut combined = nonce_bytes.to_vec();
        combined.extend(ciphertext);

        Ok(hex_encode(&combined))
    }

    /// Decrypts hex-encoded ciphertext (with prepended nonce).
    pub fn decrypt(&self, ciphertext_hex: &str) -> Result<String> {
        let combined = hex_decode(ciphertext_hex)
            .map_err(|e| SecretError::DecryptionError(format!("Invalid hex: {}", e)))?;

        if combined.len() < NONCE_SIZE {
            return Err(SecretError::DecryptionError(
                "Ciphertext too short".to_string(),
            ));
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext_bytes = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| SecretError::DecryptionError(e.to_string()))?;

        String::from_utf8(plaintext_bytes)
            .map_err(|e| SecretError::DecryptionError(format!("Invalid UTF-8: {}", e)))
    }
}

/// Encodes bytes as lowercase hex string.
fn hex_encode(bytes: &[u8]) -> String {
    const HEX_CHARS: &[u8; 16] = b"0123456789abcdef";
    let mut result = String::with_capacity(bytes.len() * 2);
    for &byte in bytes {
        result.push(HEX_CHARS[(byte >> 4) as usize] as char);
        result.push(HEX_CHARS[(byte & 0x0f) as usize] as char);
    }
    result
}

/// Decodes hex string to bytes.
fn hex_decode(hex: &str) -> std::result::Result<Vec<u8>, String> {
    if hex.len() % 2 != 0 {
        return Err("Hex string must have even length".to_string());
    }

    (0..hex.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&hex[i..i + 2], 16)
                .map_err(|e| format!("Invalid hex at position {}: {}", i, e))
        })
        .collect()
}

/// Generates random bytes using getrandom.
pub(crate) fn rand_bytes<const N: usize>() -> Result<[u8; N]> {
    let mut bytes = [0u8; N];
    getrandom::getrandom(&mut bytes).map_err(|e| {
        SecretError::EncryptionError(format!("Failed to generate random bytes: {}", e))
    })?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::NamedTempFile;

    // Tests that modify environment variables must run serially.
    #[test]
    #[serial]
    fn test_direct_value_takes_priority() {
        std::env::set_var("SG_TEST_SECRET_1", "env_value");
        let result = resolve_secret(Some("direct_value"), None, Some("SG_TEST_SECRET_1")).unwrap();
        assert_eq!(result.expose_secret(), "direct_value");
        std::env::remove_var("SG_TEST_SECRET_1");
    }

    #[test]
    #[serial]
    fn test_file_takes_priority_over_env() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "file_value").unwrap();

        std::env::set_var("SG_TEST_SECRET_2", "env_value");
        let result = resolve_secret(
            None,
            Some(temp_file.path().to_str().unwrap()),
            Some("SG_TEST_SECRET_2"),
        )
        .unwrap();
        assert_eq!(result.expose_secret(), "file_value");
        std::env::remove_var("SG_TEST_SECRET_2");
    }

    #[test]
    fn test_no_source_error() {
        let result = resolve_secret(None, None, None);
        assert!(matches!(result, Err(SecretError::NoSourceProvided)));
    }

    #[test]
    #[serial]
    fn test_empty_strings_ignored() {
        std::env::set_var("SG_TEST_SECRET_3", "env_value");
        let result = resolve_secret(Some(""), Some(""), Some("SG_TEST_SECRET_3")).unwrap();
        assert_eq!(result.expose_secret(), "env_value");
        std::env::remove_var("SG_TEST_SECRET_3");
    }

    #[test]
    fn test_file_not_found_error() {
        let result = resolve_secret(None, Some("/nonexistent/path/to/secret"), None);
        assert!(matches!(result, Err(SecretError::FileReadError { .. })));
    }

    #[test]
    fn test_resolve_secret_optional() {
        let result = resolve_secret_optional(None, None, None).unwrap();
        assert!(result.is_none());
    }

    // Test key: 32 bytes = 64 hex chars
    const TEST_KEY: &str = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

    #[test]
    fn test_credential_encryptor_roundtrip() {
        let encryptor = CredentialEncryptor::from_hex_key(TEST_KEY).unwrap();
        let plaintext = "sk-engine-credential-12345";

        let ciphertext = encryptor.encrypt(plaintext).unwrap();
        assert_ne!(ciphertext, plaintext);
        assert_eq!(encryptor.decrypt(&ciphertext).unwrap(), plaintext);
    }

    #[test]
    fn test_credential_encryptor_unique_nonces() {
        let encryptor = CredentialEncryptor::from_hex_key(TEST_KEY).unwrap();

        let c1 = encryptor.encrypt("same-plaintext").unwrap();
        let c2 = encryptor.encrypt("same-plaintext").unwrap();
        assert_ne!(c1, c2);
        assert_eq!(encryptor.decrypt(&c1).unwrap(), "same-plaintext");
        assert_eq!(encryptor.decrypt(&c2).unwrap(), "same-plaintext");
    }

    #[test]
    fn test_credential_encryptor_invalid_key() {
        assert!(matches!(
            CredentialEncryptor::from_hex_key("0123456789abcdef"),
            Err(SecretError::InvalidKey(_))
        ));
        assert!(matches!(
            CredentialEncryptor::from_hex_key("not-valid-hex-string-at-all!!!!!"),
            Err(SecretError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_credential_encryptor_rejects_tampering() {
        let encryptor = CredentialEncryptor::from_hex_key(TEST_KEY).unwrap();

        assert!(matches!(
            encryptor.decrypt("not-hex!"),
            Err(SecretError::DecryptionError(_))
        ));
        // Shorter than the nonce.
        assert!(matches!(
            encryptor.decrypt("aabbccdd"),
            Err(SecretError::DecryptionError(_))
        ));

        let ciphertext = encryptor.encrypt("test").unwrap();
        let mut tampered = hex_decode(&ciphertext).unwrap();
        if let Some(byte) = tampered.last_mut() {
            *byte ^= 0xff;
        }
        assert!(matches!(
            encryptor.decrypt(&hex_encode(&tampered)),
            Err(SecretError::DecryptionError(_))
        ));
    }

    #[test]
    fn test_hex_roundtrip() {
        let original = vec![0x00, 0xff, 0x12, 0xab, 0xcd, 0xef];
        let encoded = hex_encode(&original);
        assert_eq!(encoded, "00ff12abcdef");
        assert_eq!(hex_decode(&encoded).unwrap(), original);

        assert!(hex_decode("abc").is_err());
        assert!(hex_decode("ghij").is_err());
    }
}
