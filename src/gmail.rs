//! Gmail API transport
//!
//! Thin typed wrappers over the Gmail REST endpoints used by the provider:
//! message listing, full message fetch, and label listing. Every call obtains
//! a live bearer token from the [`Authenticator`], so callers never see a
//! stale credential. Remote failures are wrapped with the operation name;
//! HTTP 404 maps to `NotFound` and 401/403 to `AuthFailed`.

use std::sync::Arc;

use serde::Deserialize;

use crate::auth::Authenticator;
use crate::errors::{AppError, AppResult};

/// Base URL for the authenticated user's mailbox
const API_BASE: &str = "https://gmail.googleapis.com/gmail/v1/users/me";

/// A header on a message part
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawHeader {
    pub name: String,
    pub value: String,
}

/// Body metadata of a message part
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawBody {
    /// Provider handle for fetching attachment content
    pub attachment_id: Option<String>,
    /// Size in bytes
    pub size: Option<i64>,
    /// Base64url-encoded part content
    pub data: Option<String>,
}

/// A node in the MIME-like part tree
///
/// Generic recursive shape: content type, optional inline data, children.
/// Leaf parts carry data in `body`; multipart containers carry `parts`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMessagePart {
    pub part_id: Option<String>,
    pub mime_type: Option<String>,
    pub filename: Option<String>,
    #[serde(default)]
    pub headers: Vec<RawHeader>,
    pub body: Option<RawBody>,
    #[serde(default)]
    pub parts: Vec<RawMessagePart>,
}

/// A full message as served by `users.messages.get`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMessage {
    pub id: String,
    pub thread_id: Option<String>,
    #[serde(default)]
    pub label_ids: Vec<String>,
    pub snippet: Option<String>,
    pub payload: Option<RawMessagePart>,
}

/// A stub entry from `users.messages.list`
///
/// Stubs carry only identifiers; full content requires a follow-up get.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageRef {
    pub id: String,
}

/// Response of `users.messages.list`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageList {
    #[serde(default)]
    pub messages: Vec<MessageRef>,
}

/// A label as served by `users.labels.list`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLabel {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub messages_unread: Option<i64>,
    pub messages_total: Option<i64>,
}

/// Response of `users.labels.list`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LabelList {
    #[serde(default)]
    pub labels: Vec<RawLabel>,
}

/// Authenticated Gmail REST client
///
/// Scoped to one authenticated session; the provider rebuilds the handle
/// whenever the credential lifecycle invalidates the session.
#[derive(Clone)]
pub struct GmailClient {
    http: reqwest::Client,
    auth: Arc<Authenticator>,
}

impl GmailClient {
    pub fn new(http: reqwest::Client, auth: Arc<Authenticator>) -> Self {
        Self { http, auth }
    }

    /// List message stubs, optionally filtered by label and query string
    ///
    /// `label_id` is a structured filter parameter; `query` is the provider
    /// search-syntax string. Result order is the remote API's native order.
    pub async fn list_messages(
        &self,
        max_results: u32,
        label_id: Option<&str>,
        query: Option<&str>,
    ) -> AppResult<MessageList> {
        let mut url = format!("{API_BASE}/messages?maxResults={max_results}");
        if let Some(label_id) = label_id {
            url.push_str("&labelIds=");
            url.push_str(&urlencoding::encode(label_id));
        }
        if let Some(query) = query {
            url.push_str("&q=");
            url.push_str(&urlencoding::encode(query));
        }
        self.get_json(&url, "list messages").await
    }

    /// Fetch one message with its full payload tree
    pub async fn get_message(&self, id: &str) -> AppResult<RawMessage> {
        let url = format!("{API_BASE}/messages/{}?format=full", urlencoding::encode(id));
        self.get_json(&url, "get message").await
    }

    /// List all labels in the account
    pub async fn list_labels(&self) -> AppResult<LabelList> {
        self.get_json(&format!("{API_BASE}/labels"), "list labels").await
    }

    /// Issue an authenticated GET and decode the JSON response
    async fn get_json<T>(&self, url: &str, operation: &str) -> AppResult<T>
    where
        T: for<'de> Deserialize<'de>,
    {
        let credential = self.auth.credential().await?;
        let response = self
            .http
            .get(url)
            .bearer_auth(&credential.access_token)
            .send()
            .await
            .map_err(|e| AppError::Remote(format!("{operation} failed: {e}")))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(AppError::NotFound(format!("{operation}: resource not found")));
        }
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(AppError::AuthFailed(format!(
                "{operation}: credential rejected ({status})"
            )));
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(AppError::Remote(format!(
                "{operation} returned {status}: {detail}"
            )));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| AppError::Remote(format!("{operation} returned malformed JSON: {e}")))
    }
}
