//! Application error model with MCP error mapping
//!
//! Defines a typed error hierarchy using `thiserror` for internal error handling,
//! and maps each variant to the appropriate MCP `ErrorData` type for protocol
//! compliance.
//!
//! Two failure classes deliberately have no variant here: a secret that fails
//! to decrypt is read as absent (logged warning), and a failed remote token
//! revocation only logs while local cleanup proceeds. Authentication outcome
//! is reported as a `bool`, not an error, so callers branch instead of
//! catching.

use rmcp::model::ErrorData;
use serde_json::json;
use thiserror::Error;

/// Application error type
///
/// Covers all error cases the Gmail MCP server may encounter. Each variant maps
/// to an appropriate MCP error code in [`ErrorData`].
#[derive(Debug, Error)]
pub enum AppError {
    /// Invalid user input (validation failed, malformed request)
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Resource not found (message, label)
    #[error("not found: {0}")]
    NotFound(String),
    /// No client descriptor in the secret store or at the fallback path
    #[error("not configured: {0}")]
    NotConfigured(String),
    /// A credential was required and could not be obtained silently
    #[error("authentication required: {0}")]
    AuthRequired(String),
    /// Remote API rejected the credential (401/403)
    #[error("authentication failed: {0}")]
    AuthFailed(String),
    /// Remote API call failed (network, 5xx, malformed response)
    #[error("remote error: {0}")]
    Remote(String),
    /// Internal error (unexpected failure, external crate error)
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Convenience constructor for `InvalidInput`
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Convert to MCP `ErrorData`
    ///
    /// Maps each `AppError` variant to the appropriate MCP error type and
    /// includes a structured `code` field for client error handling.
    ///
    /// # Mappings
    ///
    /// - `InvalidInput` → `invalid_params`
    /// - `NotFound` → `resource_not_found`
    /// - `NotConfigured` → `invalid_request`
    /// - `AuthRequired` → `invalid_request`
    /// - `AuthFailed` → `invalid_request`
    /// - `Remote` → `internal_error`
    /// - `Internal` → `internal_error`
    pub fn to_error_data(&self) -> ErrorData {
        match self {
            Self::InvalidInput(msg) => {
                ErrorData::invalid_params(msg.clone(), Some(json!({ "code": "invalid_input" })))
            }
            Self::NotFound(msg) => {
                ErrorData::resource_not_found(msg.clone(), Some(json!({ "code": "not_found" })))
            }
            Self::NotConfigured(msg) => {
                ErrorData::invalid_request(msg.clone(), Some(json!({ "code": "not_configured" })))
            }
            Self::AuthRequired(msg) => {
                ErrorData::invalid_request(msg.clone(), Some(json!({ "code": "auth_required" })))
            }
            Self::AuthFailed(msg) => {
                ErrorData::invalid_request(msg.clone(), Some(json!({ "code": "auth_failed" })))
            }
            Self::Remote(msg) => {
                ErrorData::internal_error(msg.clone(), Some(json!({ "code": "remote" })))
            }
            Self::Internal(msg) => {
                ErrorData::internal_error(msg.clone(), Some(json!({ "code": "internal" })))
            }
        }
    }
}

/// Type alias for fallible return values
///
/// Use this for all internal functions that can fail. Provides a consistent
/// error type throughout the codebase.
pub type AppResult<T> = Result<T, AppError>;
