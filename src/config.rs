//! Configuration module for the Gmail account and server settings
//!
//! All configuration is loaded from environment variables following the pattern
//! `MAIL_GMAIL_<KEY>`. The server manages exactly one mailbox account, so the
//! surface is a handful of paths, the OAuth scope list, and the master key for
//! the encrypted secret store.

use std::env;
use std::env::VarError;
use std::path::PathBuf;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use secrecy::{ExposeSecret, SecretString};

use crate::errors::{AppError, AppResult};

/// Default OAuth scope requested during consent (read-only mailbox access)
const DEFAULT_SCOPE: &str = "https://www.googleapis.com/auth/gmail.readonly";

/// Server-wide configuration
///
/// Cloned into MCP tool handlers via `Arc` for thread-safe shared access.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Master key for the secret store, base64-encoded 32 bytes.
    /// Stored in a type that prevents accidental logging.
    pub master_key: SecretString,
    /// Directory holding encrypted secret records (`<key>.enc` files)
    pub secrets_dir: PathBuf,
    /// Fallback path for the client descriptor JSON file
    pub credentials_path: PathBuf,
    /// OAuth capability scopes requested during consent
    pub scopes: Vec<String>,
    /// HTTP request timeout in milliseconds for all remote calls
    pub http_timeout_ms: u64,
}

impl ServerConfig {
    /// Load all configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if `MAIL_GMAIL_MASTER_KEY` is missing or is not
    /// valid base64 for a 32-byte key, or if any other variable is malformed.
    ///
    /// # Example Environment
    ///
    /// ```text
    /// MAIL_GMAIL_MASTER_KEY=<base64 of 32 random bytes>
    /// MAIL_GMAIL_SECRETS_DIR=/home/user/.mail-gmail-mcp/secrets
    /// MAIL_GMAIL_CREDENTIALS_PATH=/home/user/.mail-gmail-mcp/credentials.json
    /// MAIL_GMAIL_SCOPES=https://www.googleapis.com/auth/gmail.readonly
    /// MAIL_GMAIL_HTTP_TIMEOUT_MS=30000
    /// ```
    pub fn load_from_env() -> AppResult<Self> {
        let master_key = required_env("MAIL_GMAIL_MASTER_KEY")?;
        decode_master_key(&master_key)?;

        let base_dir = default_base_dir();
        let secrets_dir = match optional_env("MAIL_GMAIL_SECRETS_DIR")? {
            Some(dir) => PathBuf::from(dir),
            None => base_dir.join("secrets"),
        };
        let credentials_path = match optional_env("MAIL_GMAIL_CREDENTIALS_PATH")? {
            Some(path) => PathBuf::from(path),
            None => base_dir.join("credentials.json"),
        };

        let scopes = match optional_env("MAIL_GMAIL_SCOPES")? {
            Some(raw) => parse_scopes(&raw),
            None => vec![DEFAULT_SCOPE.to_owned()],
        };
        if scopes.is_empty() {
            return Err(AppError::InvalidInput(
                "MAIL_GMAIL_SCOPES must contain at least one scope".to_owned(),
            ));
        }

        Ok(Self {
            master_key: SecretString::new(master_key.into()),
            secrets_dir,
            credentials_path,
            scopes,
            http_timeout_ms: parse_u64_env("MAIL_GMAIL_HTTP_TIMEOUT_MS", 30_000)?,
        })
    }

    /// Decode the master key into raw bytes for the protector
    pub fn master_key_bytes(&self) -> AppResult<[u8; 32]> {
        decode_master_key(self.master_key.expose_secret())
    }
}

/// Default base directory for server state (`~/.mail-gmail-mcp`)
fn default_base_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".mail-gmail-mcp")
}

/// Decode and validate the base64 master key
///
/// # Errors
///
/// Returns `InvalidInput` if the value is not base64 or does not decode to
/// exactly 32 bytes.
fn decode_master_key(raw: &str) -> AppResult<[u8; 32]> {
    let bytes = BASE64.decode(raw.trim()).map_err(|_| {
        AppError::InvalidInput("MAIL_GMAIL_MASTER_KEY is not valid base64".to_owned())
    })?;
    bytes.try_into().map_err(|_| {
        AppError::InvalidInput("MAIL_GMAIL_MASTER_KEY must decode to exactly 32 bytes".to_owned())
    })
}

/// Split a comma-separated scope list, trimming and dropping empty entries
fn parse_scopes(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Read a required environment variable, returning error if missing or empty
fn required_env(key: &str) -> AppResult<String> {
    match env::var(key) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(AppError::InvalidInput(format!(
            "missing required environment variable {key}"
        ))),
    }
}

/// Read an optional environment variable, treating empty as unset
fn optional_env(key: &str) -> AppResult<Option<String>> {
    match env::var(key) {
        Ok(v) if v.trim().is_empty() => Ok(None),
        Ok(v) => Ok(Some(v)),
        Err(VarError::NotPresent) => Ok(None),
        Err(VarError::NotUnicode(_)) => Err(AppError::InvalidInput(format!(
            "environment variable {key} contains non-unicode data"
        ))),
    }
}

/// Parse a `u64` environment variable with default fallback
///
/// Returns `default` if unset.
///
/// # Errors
///
/// Returns `InvalidInput` if the variable is set but not a valid `u64`.
fn parse_u64_env(key: &str, default: u64) -> AppResult<u64> {
    match env::var(key) {
        Ok(v) => v.parse::<u64>().map_err(|_| {
            AppError::InvalidInput(format!("invalid u64 environment variable {key}: '{v}'"))
        }),
        Err(VarError::NotPresent) => Ok(default),
        Err(VarError::NotUnicode(_)) => Err(AppError::InvalidInput(format!(
            "environment variable {key} contains non-unicode data"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::{decode_master_key, parse_scopes};

    #[test]
    fn parse_scopes_splits_and_trims() {
        let scopes = parse_scopes(
            "https://www.googleapis.com/auth/gmail.readonly , https://www.googleapis.com/auth/gmail.labels,",
        );
        assert_eq!(scopes.len(), 2);
        assert_eq!(scopes[0], "https://www.googleapis.com/auth/gmail.readonly");
        assert_eq!(scopes[1], "https://www.googleapis.com/auth/gmail.labels");
    }

    #[test]
    fn decode_master_key_accepts_32_bytes() {
        use base64::Engine as _;
        let encoded = base64::engine::general_purpose::STANDARD.encode([7u8; 32]);
        let key = decode_master_key(&encoded).expect("32-byte key must decode");
        assert_eq!(key, [7u8; 32]);
    }

    #[test]
    fn decode_master_key_rejects_wrong_length_and_bad_base64() {
        use base64::Engine as _;
        let short = base64::engine::general_purpose::STANDARD.encode([7u8; 16]);
        assert!(decode_master_key(&short).is_err());
        assert!(decode_master_key("not base64!!").is_err());
    }
}
