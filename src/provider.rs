//! Mail provider operations
//!
//! Stateless per-call operations (list, get, search, list-labels) over the
//! Gmail transport, delegating raw-to-canonical conversion to the mapper.
//! The remote API client handle is lazily built and cached for the lifetime
//! of one authenticated session; it is rebuilt whenever the credential
//! lifecycle's epoch moves (reauth or revoke), so a stale handle never
//! outlives the credential it was built under.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use crate::auth::Authenticator;
use crate::errors::{AppError, AppResult};
use crate::gmail::GmailClient;
use crate::mapper;
use crate::models::{EmailLabel, EmailMessage, SearchQuery};

/// Provider facade over the Gmail API
pub struct EmailProvider {
    auth: Arc<Authenticator>,
    http: reqwest::Client,
    /// Cached API handle tagged with the auth epoch it was built under
    client: Mutex<Option<(u64, GmailClient)>>,
}

impl EmailProvider {
    pub fn new(auth: Arc<Authenticator>, http: reqwest::Client) -> Self {
        Self {
            auth,
            http,
            client: Mutex::new(None),
        }
    }

    /// List recent messages, optionally filtered by label
    ///
    /// The remote listing returns stubs; each one costs a follow-up fetch for
    /// full content, mapped summary-only (no body extraction). Ordering
    /// follows the remote API's native order.
    pub async fn list_messages(
        &self,
        max_results: u32,
        label_id: Option<&str>,
    ) -> AppResult<Vec<EmailMessage>> {
        let client = self.client().await?;
        let listing = client.list_messages(max_results, label_id, None).await?;

        let mut messages = Vec::with_capacity(listing.messages.len());
        for stub in &listing.messages {
            let raw = client.get_message(&stub.id).await?;
            messages.push(mapper::map_message(&raw, false));
        }

        debug!(count = messages.len(), "listed messages");
        Ok(messages)
    }

    /// Fetch one message with full content
    ///
    /// # Errors
    ///
    /// - `InvalidInput` if `message_id` is empty/whitespace (before any I/O)
    /// - `NotFound`/`Remote` passed through from the transport
    pub async fn get_message(&self, message_id: &str) -> AppResult<EmailMessage> {
        if message_id.trim().is_empty() {
            return Err(AppError::invalid("message_id must not be empty"));
        }

        let client = self.client().await?;
        let raw = client.get_message(message_id).await?;

        debug!(message_id, "retrieved message");
        Ok(mapper::map_message(&raw, true))
    }

    /// Search messages by structured query
    ///
    /// The query string is assembled by [`build_query`]; the label filter is
    /// passed as a structured parameter, never embedded in the string.
    /// Result mapping matches `list_messages` (summary only).
    pub async fn search_messages(&self, query: &SearchQuery) -> AppResult<Vec<EmailMessage>> {
        let provider_query = build_query(query);
        let client = self.client().await?;
        let listing = client
            .list_messages(
                query.max_results,
                query.label_id.as_deref(),
                (!provider_query.is_empty()).then_some(provider_query.as_str()),
            )
            .await?;

        let mut messages = Vec::with_capacity(listing.messages.len());
        for stub in &listing.messages {
            let raw = client.get_message(&stub.id).await?;
            messages.push(mapper::map_message(&raw, false));
        }

        debug!(count = messages.len(), query = %provider_query, "search complete");
        Ok(messages)
    }

    /// List all labels in the account
    pub async fn list_labels(&self) -> AppResult<Vec<EmailLabel>> {
        let client = self.client().await?;
        let listing = client.list_labels().await?;

        let labels = listing
            .labels
            .into_iter()
            .map(|raw| EmailLabel {
                id: raw.id,
                name: raw.name,
                kind: raw.kind,
                unread_count: raw.messages_unread,
                total_count: raw.messages_total,
            })
            .collect::<Vec<_>>();

        debug!(count = labels.len(), "listed labels");
        Ok(labels)
    }

    /// Get the cached API handle, rebuilding it when the auth epoch moved
    async fn client(&self) -> AppResult<GmailClient> {
        let mut cached = self.client.lock().await;
        let epoch = self.auth.epoch();
        if let Some((built_under, client)) = cached.as_ref() {
            if *built_under == epoch {
                return Ok(client.clone());
            }
            debug!("auth epoch moved, discarding cached API handle");
        }

        let client = GmailClient::new(self.http.clone(), self.auth.clone());
        *cached = Some((epoch, client.clone()));
        Ok(client)
    }
}

/// Assemble the provider search string from a structured query
///
/// Clauses are emitted in fixed order — free text, `from:`, `to:`,
/// `subject:`, `after:`, `before:` — omitting any clause whose source field
/// is empty, joined by single spaces. Dates use the provider's `YYYY/MM/DD`
/// operator syntax.
pub fn build_query(query: &SearchQuery) -> String {
    let mut parts: Vec<String> = Vec::new();

    if let Some(text) = non_empty(query.query.as_deref()) {
        parts.push(text.to_owned());
    }
    if let Some(from) = non_empty(query.from.as_deref()) {
        parts.push(format!("from:{from}"));
    }
    if let Some(to) = non_empty(query.to.as_deref()) {
        parts.push(format!("to:{to}"));
    }
    if let Some(subject) = non_empty(query.subject.as_deref()) {
        parts.push(format!("subject:{subject}"));
    }
    if let Some(after) = query.after {
        parts.push(format!("after:{}", after.format("%Y/%m/%d")));
    }
    if let Some(before) = query.before {
        parts.push(format!("before:{}", before.format("%Y/%m/%d")));
    }

    parts.join(" ")
}

/// Treat empty/whitespace strings as unset
fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::build_query;
    use crate::models::SearchQuery;

    #[test]
    fn query_emits_set_clauses_in_fixed_order() {
        let query = SearchQuery {
            from: Some("alice@test.com".to_owned()),
            subject: Some("report".to_owned()),
            max_results: 5,
            ..SearchQuery::default()
        };
        assert_eq!(build_query(&query), "from:alice@test.com subject:report");
    }

    #[test]
    fn query_formats_dates_with_slashes() {
        let query = SearchQuery {
            query: Some("invoice".to_owned()),
            after: NaiveDate::from_ymd_opt(2025, 1, 1),
            before: NaiveDate::from_ymd_opt(2025, 2, 1),
            ..SearchQuery::default()
        };
        assert_eq!(
            build_query(&query),
            "invoice after:2025/01/01 before:2025/02/01"
        );
    }

    #[test]
    fn query_omits_empty_and_whitespace_fields() {
        let query = SearchQuery {
            query: Some("   ".to_owned()),
            to: Some(String::new()),
            ..SearchQuery::default()
        };
        assert_eq!(build_query(&query), "");
    }

    #[test]
    fn label_filter_never_appears_in_query_string() {
        let query = SearchQuery {
            from: Some("alice@test.com".to_owned()),
            label_id: Some("INBOX".to_owned()),
            ..SearchQuery::default()
        };
        assert_eq!(build_query(&query), "from:alice@test.com");
    }
}
