//! MCP server implementation with tool handlers
//!
//! Implements the `ServerHandler` trait and registers 8 MCP tools covering
//! credential setup and lifecycle plus mailbox read operations. Handles input
//! validation, boundary clamping, and response formatting; business logic
//! lives in the authenticator and provider.

use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDate;
use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{ErrorData, ServerCapabilities, ServerInfo};
use rmcp::{Json, ServerHandler, tool, tool_handler, tool_router};

use crate::auth::{Authenticator, CLIENT_DESCRIPTOR_KEY, ClientDescriptor, LoopbackConsentFlow};
use crate::config::ServerConfig;
use crate::errors::{AppError, AppResult};
use crate::models::{
    AuthStatusInput, AuthStatusReport, EmailDetail, EmailSummary, LabelInfo, ListEmailsInput,
    Meta, ReadEmailInput, SearchEmailsInput, SearchQuery, SetupGmailInput, SetupResult,
    ToolEnvelope,
};
use crate::provider::EmailProvider;
use crate::secrets::{MasterKeyProtector, SecretStore};

/// Maximum messages per list/search page
const MAX_RESULTS_LIMIT: u32 = 50;

/// Gmail MCP server
///
/// Holds the secret store, credential lifecycle, and provider. Implements MCP
/// tool handlers via `#[tool]` attribute macro and `ServerHandler` trait.
#[derive(Clone)]
pub struct MailGmailServer {
    /// Encrypted secret store (shared with the authenticator)
    store: SecretStore,
    /// Credential lifecycle for the single configured account
    auth: Arc<Authenticator>,
    /// Mail provider operations
    provider: Arc<EmailProvider>,
    /// Tool router for dispatching MCP tool calls
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl MailGmailServer {
    /// Create a new MCP server instance
    ///
    /// Wires the protector, secret store, consent flow, authenticator, and
    /// provider from configuration.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the master key does not decode, or
    /// `Internal` if the HTTP client cannot be constructed.
    pub fn new(config: ServerConfig) -> AppResult<Self> {
        let protector = Arc::new(MasterKeyProtector::new(config.master_key_bytes()?));
        let config = Arc::new(config);
        let store = SecretStore::new(config.secrets_dir.clone(), protector);

        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(config.http_timeout_ms))
            .build()
            .map_err(|e| AppError::Internal(format!("cannot build HTTP client: {e}")))?;

        let consent = Arc::new(LoopbackConsentFlow::new(http.clone()));
        let auth = Arc::new(Authenticator::new(
            store.clone(),
            config,
            consent,
            http.clone(),
        ));
        let provider = Arc::new(EmailProvider::new(auth.clone(), http));

        Ok(Self {
            store,
            auth,
            provider,
            tool_router: Self::tool_router(),
        })
    }

    /// Tool: Store Gmail OAuth client credentials
    ///
    /// Encrypts and stores the client descriptor locally; the values never
    /// leave the machine. Validation problems are reported as an unsuccessful
    /// result with guidance rather than a protocol error.
    #[tool(
        name = "setup_gmail",
        description = "Set up Gmail credentials. Requires a Google OAuth Client ID and Client Secret from Google Cloud Console; both are encrypted and stored locally."
    )]
    async fn setup_gmail(
        &self,
        Parameters(input): Parameters<SetupGmailInput>,
    ) -> Result<Json<ToolEnvelope<SetupResult>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(
            started,
            self.setup_gmail_impl(input)
                .await
                .map(|data| (data.message.clone(), data)),
        )
    }

    /// Tool: Check authentication status, authenticating when needed
    ///
    /// Reports setup instructions when unconfigured; otherwise runs the
    /// consent flow if no credential is available. `force_reauth=true`
    /// revokes the current token first.
    #[tool(
        name = "auth_status",
        description = "Check authentication status. If configured but not authenticated, initiates the OAuth flow which opens a browser for consent. Run this before other email tools."
    )]
    async fn auth_status(
        &self,
        Parameters(input): Parameters<AuthStatusInput>,
    ) -> Result<Json<ToolEnvelope<AuthStatusReport>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(
            started,
            self.auth_status_impl(input)
                .await
                .map(|data| (format!("auth status: {}", data.status), data)),
        )
    }

    /// Tool: Invalidate the local session and re-authenticate
    ///
    /// Clears the cached token without contacting the provider, then re-runs
    /// the consent flow. The stored client credentials are untouched.
    #[tool(
        name = "reauth",
        description = "Clear the locally cached OAuth token (without revoking it remotely) and re-run authentication. Use when the session is stale but client credentials are still valid."
    )]
    async fn reauth(&self) -> Result<Json<ToolEnvelope<AuthStatusReport>>, ErrorData> {
        let started = Instant::now();
        let result = self.auth.reauth().await.map(|success| {
            let data = AuthStatusReport {
                provider: Authenticator::PROVIDER.to_owned(),
                status: if success { "authenticated" } else { "failed" }.to_owned(),
                message: if success {
                    "Session token replaced. Email tools are ready to use.".to_owned()
                } else {
                    "Re-authentication failed. Check your credentials and try again.".to_owned()
                },
                setup_instructions: None,
                next_step: None,
            };
            (format!("reauth: {}", data.status), data)
        });
        finalize_tool(started, result)
    }

    /// Tool: Revoke the OAuth token and delete local session state
    ///
    /// Revocation with the provider is best-effort; local tokens are deleted
    /// either way. Stored client credentials are not deleted.
    #[tool(
        name = "revoke_auth",
        description = "Revoke the OAuth token with the provider and delete locally stored tokens. Does NOT delete the stored client credentials; use setup_gmail to change those."
    )]
    async fn revoke_auth(&self) -> Result<Json<ToolEnvelope<AuthStatusReport>>, ErrorData> {
        let started = Instant::now();
        let result = self.auth.revoke().await.map(|()| {
            let data = AuthStatusReport {
                provider: Authenticator::PROVIDER.to_owned(),
                status: "revoked".to_owned(),
                message: "OAuth token revoked and local tokens deleted. Run auth_status to re-authenticate when ready.".to_owned(),
                setup_instructions: None,
                next_step: None,
            };
            ("credential revoked".to_owned(), data)
        });
        finalize_tool(started, result)
    }

    /// Tool: List recent emails
    ///
    /// Returns message summaries (id, subject, sender, date, snippet) in the
    /// remote API's native order.
    #[tool(
        name = "list_emails",
        description = "List recent emails, optionally filtered by label ID (e.g. INBOX, SENT, UNREAD). Returns id, subject, sender, date, and snippet per message."
    )]
    async fn list_emails(
        &self,
        Parameters(input): Parameters<ListEmailsInput>,
    ) -> Result<Json<ToolEnvelope<Vec<EmailSummary>>>, ErrorData> {
        let started = Instant::now();
        let result = self
            .provider
            .list_messages(clamp_max_results(input.max_results), input.label_id.as_deref())
            .await
            .map(|messages| {
                let summaries: Vec<EmailSummary> =
                    messages.iter().map(EmailSummary::from_message).collect();
                (format!("{} message(s)", summaries.len()), summaries)
            });
        finalize_tool(started, result)
    }

    /// Tool: Read one email with full content
    #[tool(
        name = "read_email",
        description = "Read a specific email by message ID. Returns full content including body, recipients, attachments info, and labels."
    )]
    async fn read_email(
        &self,
        Parameters(input): Parameters<ReadEmailInput>,
    ) -> Result<Json<ToolEnvelope<EmailDetail>>, ErrorData> {
        let started = Instant::now();
        let result = self
            .provider
            .get_message(&input.message_id)
            .await
            .map(|message| ("Message retrieved".to_owned(), EmailDetail::from_message(&message)));
        finalize_tool(started, result)
    }

    /// Tool: Search emails
    ///
    /// Combines a free-text query (Gmail syntax) with structured field
    /// filters; the label filter is applied separately from the query string.
    #[tool(
        name = "search_emails",
        description = "Search emails using a query string (Gmail syntax, e.g. 'from:alice subject:report is:unread') and/or field filters: from, to, subject, date range, label."
    )]
    async fn search_emails(
        &self,
        Parameters(input): Parameters<SearchEmailsInput>,
    ) -> Result<Json<ToolEnvelope<Vec<EmailSummary>>>, ErrorData> {
        let started = Instant::now();
        let result = match build_search_query(input) {
            Ok(query) => self.provider.search_messages(&query).await.map(|messages| {
                let summaries: Vec<EmailSummary> =
                    messages.iter().map(EmailSummary::from_message).collect();
                (format!("{} message(s) matched", summaries.len()), summaries)
            }),
            Err(e) => Err(e),
        };
        finalize_tool(started, result)
    }

    /// Tool: List labels
    #[tool(
        name = "list_labels",
        description = "List all email labels/folders in the account. Use label IDs with list_emails or search_emails to filter."
    )]
    async fn list_labels(&self) -> Result<Json<ToolEnvelope<Vec<LabelInfo>>>, ErrorData> {
        let started = Instant::now();
        let result = self.provider.list_labels().await.map(|labels| {
            let infos: Vec<LabelInfo> = labels.iter().map(LabelInfo::from_label).collect();
            (format!("{} label(s)", infos.len()), infos)
        });
        finalize_tool(started, result)
    }
}

/// MCP server handler implementation
///
/// Provides server info and capabilities to MCP client.
#[tool_handler(router = self.tool_router)]
impl ServerHandler for MailGmailServer {
    fn get_info(&self) -> ServerInfo {
        let mut info = ServerInfo::default();
        info.instructions = Some(
            "Gmail MCP server. Run setup_gmail once with OAuth client credentials, then auth_status to authenticate; read tools are list_emails, read_email, search_emails, list_labels.".to_owned(),
        );
        info.capabilities = ServerCapabilities::builder().enable_tools().build();
        info
    }
}

/// Tool implementation methods
///
/// Private methods handle the actual business logic, separated from the
/// public `#[tool]` methods that handle response formatting.
impl MailGmailServer {
    async fn setup_gmail_impl(&self, input: SetupGmailInput) -> AppResult<SetupResult> {
        let client_id = input.client_id.trim();
        let client_secret = input.client_secret.trim();

        if client_id.is_empty() {
            return Ok(SetupResult {
                success: false,
                message: "Client ID is required.".to_owned(),
            });
        }
        if client_secret.is_empty() {
            return Ok(SetupResult {
                success: false,
                message: "Client Secret is required.".to_owned(),
            });
        }
        if !client_id.contains(".apps.googleusercontent.com") {
            return Ok(SetupResult {
                success: false,
                message: "Client ID doesn't look right. It should end with '.apps.googleusercontent.com'. Make sure you're using the OAuth Client ID, not the project ID.".to_owned(),
            });
        }

        let descriptor = ClientDescriptor::for_installed_app(client_id, client_secret);
        let json = serde_json::to_string(&descriptor)
            .map_err(|e| AppError::Internal(format!("cannot serialize client descriptor: {e}")))?;
        self.store.save(CLIENT_DESCRIPTOR_KEY, &json).await?;

        Ok(SetupResult {
            success: true,
            message: "Gmail credentials saved and encrypted. Now use the auth_status tool to authenticate with your Google account; this opens a browser window to sign in.".to_owned(),
        })
    }

    async fn auth_status_impl(&self, input: AuthStatusInput) -> AppResult<AuthStatusReport> {
        if !self.auth.is_configured().await? {
            return Ok(AuthStatusReport {
                provider: Authenticator::PROVIDER.to_owned(),
                status: "not_configured".to_owned(),
                message: "Gmail credentials are not configured. Follow these steps to set up Gmail API access:".to_owned(),
                setup_instructions: Some(setup_instructions()),
                next_step: Some(
                    "Once you have the Client ID and Client Secret, use the setup_gmail tool to provide them.".to_owned(),
                ),
            });
        }

        if input.force_reauth {
            self.auth.revoke().await?;
        }

        if !self.auth.is_authenticated().await? {
            let success = self.auth.authenticate().await?;
            return Ok(AuthStatusReport {
                provider: Authenticator::PROVIDER.to_owned(),
                status: if success { "authenticated" } else { "failed" }.to_owned(),
                message: if success {
                    "Successfully authenticated. You can now use email tools.".to_owned()
                } else {
                    "Authentication failed. Please check your credentials and try again.".to_owned()
                },
                setup_instructions: None,
                next_step: None,
            });
        }

        Ok(AuthStatusReport {
            provider: Authenticator::PROVIDER.to_owned(),
            status: "authenticated".to_owned(),
            message: "Already authenticated. Email tools are ready to use.".to_owned(),
            setup_instructions: None,
            next_step: None,
        })
    }
}

/// Console walkthrough for obtaining OAuth client credentials
fn setup_instructions() -> Vec<String> {
    [
        "1. Go to https://console.cloud.google.com/",
        "2. Create a new project (or select an existing one) from the top dropdown",
        "3. In the left menu, go to 'APIs & Services' → 'Library'",
        "4. Search for 'Gmail API' and click 'Enable'",
        "5. Go to 'APIs & Services' → 'OAuth consent screen'",
        "6. Choose 'External' user type, click 'Create'",
        "7. Fill in the App name, your email, and save",
        "8. On the 'Test users' page, click 'Add users' and add your Gmail address, then save",
        "9. Go to 'APIs & Services' → 'Credentials'",
        "10. Click 'Create Credentials' → 'OAuth client ID'",
        "11. Choose 'Desktop app' as application type, give it a name, click 'Create'",
        "12. Copy the 'Client ID' and 'Client Secret' shown in the popup",
    ]
    .into_iter()
    .map(str::to_owned)
    .collect()
}

/// Build a core search query from tool input, validating date literals
fn build_search_query(input: SearchEmailsInput) -> AppResult<SearchQuery> {
    Ok(SearchQuery {
        query: input.query,
        from: input.from,
        to: input.to,
        subject: input.subject,
        after: parse_date_input(input.after.as_deref(), "after")?,
        before: parse_date_input(input.before.as_deref(), "before")?,
        label_id: input.label_id,
        max_results: clamp_max_results(input.max_results),
    })
}

/// Parse an optional `YYYY-MM-DD` tool input date
fn parse_date_input(raw: Option<&str>, field: &str) -> AppResult<Option<NaiveDate>> {
    let Some(raw) = raw.map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(None);
    };
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map(Some)
        .map_err(|_| AppError::InvalidInput(format!("{field} must be formatted YYYY-MM-DD: '{raw}'")))
}

/// Clamp a requested page size to the supported range
fn clamp_max_results(requested: u32) -> u32 {
    requested.clamp(1, MAX_RESULTS_LIMIT)
}

/// Calculate elapsed milliseconds
fn duration_ms(started: Instant) -> u64 {
    started.elapsed().as_millis().min(u128::from(u64::MAX)) as u64
}

/// Build a standardized MCP tool response envelope from business logic output
fn finalize_tool<T>(
    started: Instant,
    result: AppResult<(String, T)>,
) -> Result<Json<ToolEnvelope<T>>, ErrorData>
where
    T: schemars::JsonSchema,
{
    match result {
        Ok((summary, data)) => Ok(Json(ToolEnvelope {
            summary,
            data,
            meta: Meta::now(duration_ms(started)),
        })),
        Err(e) => Err(e.to_error_data()),
    }
}

#[cfg(test)]
mod tests {
    use super::{clamp_max_results, parse_date_input};

    #[test]
    fn max_results_clamps_into_supported_range() {
        assert_eq!(clamp_max_results(0), 1);
        assert_eq!(clamp_max_results(20), 20);
        assert_eq!(clamp_max_results(500), 50);
    }

    #[test]
    fn date_input_parses_iso_and_rejects_noise() {
        let parsed = parse_date_input(Some("2025-01-31"), "after").expect("valid date");
        assert_eq!(parsed.map(|d| d.to_string()), Some("2025-01-31".to_owned()));

        assert!(parse_date_input(Some("2025/01/31"), "after").is_err());
        assert!(parse_date_input(Some("yesterday"), "before").is_err());
        assert_eq!(parse_date_input(Some("  "), "after").expect("empty is unset"), None);
        assert_eq!(parse_date_input(None, "after").expect("absent is unset"), None);
    }
}
