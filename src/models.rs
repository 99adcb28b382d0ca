//! Canonical mail model and MCP tool DTOs
//!
//! The canonical entities (`EmailMessage` and friends) are produced by the
//! mapper and consumed read-only by callers; they are provider-agnostic and
//! immutable once constructed. The input/output structs below them define the
//! MCP tool contracts and are annotated with `JsonSchema` for automatic schema
//! generation. Output fields use PascalCase names for compatibility with the
//! established tool contract.

use std::fmt;

use chrono::{DateTime, FixedOffset, SecondsFormat, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// An email address with optional display name
///
/// Equality is structural; two addresses are the same when both fields match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailAddress {
    /// The bare address (never empty when the value exists)
    pub address: String,
    /// Optional RFC 2822 display name
    pub display_name: Option<String>,
}

impl EmailAddress {
    /// Create an address without a display name
    pub fn bare(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            display_name: None,
        }
    }
}

impl fmt::Display for EmailAddress {
    /// Renders `DisplayName <address>`, or the bare address when no
    /// display name is present.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.display_name.as_deref() {
            Some(name) if !name.trim().is_empty() => {
                write!(f, "{name} <{}>", self.address)
            }
            _ => write!(f, "{}", self.address),
        }
    }
}

/// Attachment metadata carried on a canonical message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailAttachment {
    /// Attachment filename (non-empty; parts without one are not attachments)
    pub filename: String,
    /// MIME content type (`application/octet-stream` when the part omits it)
    pub mime_type: String,
    /// Size in bytes from the part body metadata
    pub size: i64,
    /// Provider handle for fetching the attachment content
    pub attachment_id: Option<String>,
}

/// Canonical message model
///
/// `id` and `thread_id` are always present and non-empty. `to`/`cc`/`bcc`
/// preserve header order. `body`/`body_html` are populated only when full
/// content was requested; a summary fetch carries `None`, never `""`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailMessage {
    /// Provider message identifier
    pub id: String,
    /// Provider thread identifier
    pub thread_id: String,
    /// Subject header, if present
    pub subject: Option<String>,
    /// Parsed From header
    pub from: Option<EmailAddress>,
    /// Parsed To header, in header order
    pub to: Vec<EmailAddress>,
    /// Parsed Cc header, in header order
    pub cc: Vec<EmailAddress>,
    /// Parsed Bcc header, in header order
    pub bcc: Vec<EmailAddress>,
    /// Parsed Date header
    pub date: Option<DateTime<FixedOffset>>,
    /// Provider-supplied preview snippet
    pub snippet: Option<String>,
    /// Decoded `text/plain` body (full fetch only)
    pub body: Option<String>,
    /// Decoded, sanitized `text/html` body (full fetch only)
    pub body_html: Option<String>,
    /// Whether the provider's reserved unread marker label is present
    pub is_unread: bool,
    /// Label ids in provider order
    pub label_ids: Vec<String>,
    /// Attachment metadata
    pub attachments: Vec<EmailAttachment>,
}

/// A label or folder in the account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailLabel {
    /// Label identifier (e.g. `INBOX`, `Label_42`)
    pub id: String,
    /// Human-readable label name
    pub name: String,
    /// Provider label kind (`system` or `user`), if reported
    pub kind: Option<String>,
    /// Unread message count, if reported
    pub unread_count: Option<i64>,
    /// Total message count, if reported
    pub total_count: Option<i64>,
}

/// Criteria for searching messages
///
/// `max_results` is always positive; the tool boundary clamps it to [1, 50]
/// before constructing the query, the core does not re-check.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    /// Free-text query in the provider's search syntax
    pub query: Option<String>,
    /// Filter by sender address
    pub from: Option<String>,
    /// Filter by recipient address
    pub to: Option<String>,
    /// Filter by subject text
    pub subject: Option<String>,
    /// Only messages after this date
    pub after: Option<chrono::NaiveDate>,
    /// Only messages before this date
    pub before: Option<chrono::NaiveDate>,
    /// Structured label filter (never embedded in the query string)
    pub label_id: Option<String>,
    /// Maximum results to return (positive, caller-clamped)
    pub max_results: u32,
}

impl Default for SearchQuery {
    fn default() -> Self {
        Self {
            query: None,
            from: None,
            to: None,
            subject: None,
            after: None,
            before: None,
            label_id: None,
            max_results: default_max_results(),
        }
    }
}

/// Metadata included in all tool responses
///
/// Provides timing information and current UTC timestamp.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Meta {
    /// Current UTC timestamp in RFC 3339 format with milliseconds
    pub now_utc: String,
    /// Tool execution duration in milliseconds
    pub duration_ms: u64,
}

impl Meta {
    /// Create metadata populated with current time and elapsed duration
    pub fn now(duration_ms: u64) -> Self {
        Self {
            now_utc: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            duration_ms,
        }
    }
}

/// Standard response envelope for all tools
///
/// Wraps tool-specific data with human-readable summary and execution metadata.
/// This structure provides consistent response shape across all MCP tools.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ToolEnvelope<T>
where
    T: JsonSchema,
{
    /// Human-readable summary of the operation outcome
    pub summary: String,
    /// Tool-specific data payload
    pub data: T,
    /// Execution metadata (timestamp, duration)
    pub meta: Meta,
}

/// Input: store Gmail OAuth client credentials
///
/// Used by `setup_gmail`.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SetupGmailInput {
    /// Google OAuth Client ID (ends with `.apps.googleusercontent.com`)
    pub client_id: String,
    /// Google OAuth Client Secret
    pub client_secret: String,
}

/// Input: check or establish authentication
///
/// Used by `auth_status`.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct AuthStatusInput {
    /// Revoke the current token and force a fresh consent flow
    #[serde(default)]
    pub force_reauth: bool,
}

/// Input: list recent emails
///
/// Used by `list_emails`.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ListEmailsInput {
    /// Maximum number of emails to return (1..50, default 20)
    #[serde(default = "default_max_results")]
    pub max_results: u32,
    /// Optional label ID to filter by (e.g. `INBOX`, `SENT`, `UNREAD`)
    pub label_id: Option<String>,
}

/// Input: read one email with full content
///
/// Used by `read_email`.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ReadEmailInput {
    /// The email message ID to read
    pub message_id: String,
}

/// Input: search emails by query and field filters
///
/// Used by `search_emails`. All fields are optional; empty filters are
/// omitted from the generated provider query.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SearchEmailsInput {
    /// Free-text query (Gmail syntax, e.g. `from:alice is:unread`)
    pub query: Option<String>,
    /// Filter by sender address
    pub from: Option<String>,
    /// Filter by recipient address
    pub to: Option<String>,
    /// Filter by subject text
    pub subject: Option<String>,
    /// Only emails after this date (format: YYYY-MM-DD)
    pub after: Option<String>,
    /// Only emails before this date (format: YYYY-MM-DD)
    pub before: Option<String>,
    /// Structured label filter, passed separately from the query string
    pub label_id: Option<String>,
    /// Maximum number of emails to return (1..50, default 20)
    #[serde(default = "default_max_results")]
    pub max_results: u32,
}

/// Message summary for list/search results
///
/// Lightweight representation without body content.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub struct EmailSummary {
    /// Provider message identifier
    pub id: String,
    /// Subject header
    pub subject: Option<String>,
    /// Formatted sender (`DisplayName <address>` or bare address)
    pub from: Option<String>,
    /// Date formatted as `yyyy-MM-dd HH:mm`
    pub date: Option<String>,
    /// Provider-supplied preview snippet
    pub snippet: Option<String>,
    /// Whether the message is unread
    pub is_unread: bool,
    /// Label ids in provider order
    pub labels: Vec<String>,
}

impl EmailSummary {
    /// Project a canonical message into the summary contract shape
    pub fn from_message(message: &EmailMessage) -> Self {
        Self {
            id: message.id.clone(),
            subject: message.subject.clone(),
            from: message.from.as_ref().map(ToString::to_string),
            date: message
                .date
                .map(|d| d.format("%Y-%m-%d %H:%M").to_string()),
            snippet: message.snippet.clone(),
            is_unread: message.is_unread,
            labels: message.label_ids.clone(),
        }
    }
}

/// Attachment metadata in the full-message contract
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub struct AttachmentDetail {
    /// Attachment filename
    pub filename: String,
    /// MIME content type
    pub mime_type: String,
    /// Size in bytes
    pub size: i64,
}

/// Full message detail for `read_email`
///
/// Adds thread id, recipient lists, full-precision date, and body content to
/// the summary shape.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub struct EmailDetail {
    /// Provider message identifier
    pub id: String,
    /// Provider thread identifier
    pub thread_id: String,
    /// Subject header
    pub subject: Option<String>,
    /// Formatted sender
    pub from: Option<String>,
    /// Formatted To recipients, in header order
    pub to: Vec<String>,
    /// Formatted Cc recipients, in header order
    pub cc: Vec<String>,
    /// Date formatted with seconds and zone offset
    pub date: Option<String>,
    /// Decoded plain text body
    pub body: Option<String>,
    /// Decoded, sanitized HTML body
    pub body_html: Option<String>,
    /// Whether the message is unread
    pub is_unread: bool,
    /// Label ids in provider order
    pub labels: Vec<String>,
    /// Attachment metadata
    pub attachments: Vec<AttachmentDetail>,
}

impl EmailDetail {
    /// Project a canonical message into the full contract shape
    pub fn from_message(message: &EmailMessage) -> Self {
        Self {
            id: message.id.clone(),
            thread_id: message.thread_id.clone(),
            subject: message.subject.clone(),
            from: message.from.as_ref().map(ToString::to_string),
            to: message.to.iter().map(ToString::to_string).collect(),
            cc: message.cc.iter().map(ToString::to_string).collect(),
            date: message
                .date
                .map(|d| d.format("%Y-%m-%d %H:%M:%S %:z").to_string()),
            body: message.body.clone(),
            body_html: message.body_html.clone(),
            is_unread: message.is_unread,
            labels: message.label_ids.clone(),
            attachments: message
                .attachments
                .iter()
                .map(|a| AttachmentDetail {
                    filename: a.filename.clone(),
                    mime_type: a.mime_type.clone(),
                    size: a.size,
                })
                .collect(),
        }
    }
}

/// Label metadata returned by `list_labels`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub struct LabelInfo {
    /// Label identifier
    pub id: String,
    /// Human-readable label name
    pub name: String,
    /// Provider label kind (`system` or `user`)
    #[serde(rename = "Type")]
    pub kind: Option<String>,
    /// Unread message count
    pub unread_count: Option<i64>,
    /// Total message count
    pub total_count: Option<i64>,
}

impl LabelInfo {
    /// Project a canonical label into the contract shape
    pub fn from_label(label: &EmailLabel) -> Self {
        Self {
            id: label.id.clone(),
            name: label.name.clone(),
            kind: label.kind.clone(),
            unread_count: label.unread_count,
            total_count: label.total_count,
        }
    }
}

/// Authentication status report
///
/// Returned by `auth_status`, `reauth`, and `revoke_auth`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub struct AuthStatusReport {
    /// Provider name (always `Gmail`)
    pub provider: String,
    /// One of `not_configured`, `authenticated`, `failed`, `revoked`
    pub status: String,
    /// Human-readable guidance
    pub message: String,
    /// Step-by-step setup instructions when not configured
    #[serde(skip_serializing_if = "Option::is_none")]
    pub setup_instructions: Option<Vec<String>>,
    /// What to do next when not configured
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_step: Option<String>,
}

/// Outcome of `setup_gmail`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub struct SetupResult {
    /// Whether the credentials were stored
    pub success: bool,
    /// Human-readable guidance
    pub message: String,
}

/// Default value for `max_results` in list/search
///
/// Matches the provider default page size; the tool boundary clamps the
/// final value to [1, 50].
pub fn default_max_results() -> u32 {
    20
}

#[cfg(test)]
mod tests {
    use chrono::{FixedOffset, TimeZone};

    use super::{EmailAddress, EmailMessage, EmailSummary};

    fn message_fixture() -> EmailMessage {
        EmailMessage {
            id: "m1".to_owned(),
            thread_id: "t1".to_owned(),
            subject: Some("Quarterly report".to_owned()),
            from: Some(EmailAddress {
                address: "alice@test.com".to_owned(),
                display_name: Some("Alice".to_owned()),
            }),
            to: vec![EmailAddress::bare("bob@test.com")],
            cc: vec![],
            bcc: vec![],
            date: FixedOffset::east_opt(3600)
                .and_then(|tz| tz.with_ymd_and_hms(2025, 3, 4, 9, 30, 12).single()),
            snippet: Some("The numbers are in".to_owned()),
            body: None,
            body_html: None,
            is_unread: true,
            label_ids: vec!["INBOX".to_owned(), "UNREAD".to_owned()],
            attachments: vec![],
        }
    }

    #[test]
    fn address_display_includes_name_when_present() {
        let named = EmailAddress {
            address: "john@example.com".to_owned(),
            display_name: Some("John Doe".to_owned()),
        };
        assert_eq!(named.to_string(), "John Doe <john@example.com>");

        let bare = EmailAddress::bare("john@example.com");
        assert_eq!(bare.to_string(), "john@example.com");
    }

    #[test]
    fn summary_formats_date_to_minutes() {
        let summary = EmailSummary::from_message(&message_fixture());
        assert_eq!(summary.date.as_deref(), Some("2025-03-04 09:30"));
        assert_eq!(summary.from.as_deref(), Some("Alice <alice@test.com>"));
        assert!(summary.is_unread);
    }

    #[test]
    fn detail_formats_date_with_offset() {
        let detail = super::EmailDetail::from_message(&message_fixture());
        assert_eq!(detail.date.as_deref(), Some("2025-03-04 09:30:12 +01:00"));
        assert_eq!(detail.to, vec!["bob@test.com".to_owned()]);
    }
}
