//! OAuth credential lifecycle for the Gmail account
//!
//! A state machine over the account's access credential: configuration
//! discovery, interactive authentication, silent refresh, local-only reauth,
//! and full revocation. The long-lived client descriptor and the short-lived
//! session token share the encrypted [`SecretStore`](crate::secrets::SecretStore)
//! but have independent lifetimes: the descriptor survives `reauth` and
//! `revoke`, the session token does not.
//!
//! The interactive consent step is an injected [`ConsentFlow`] capability;
//! the default [`LoopbackConsentFlow`] opens the system browser and receives
//! the authorization code on a loopback listener. All credential acquisition
//! and refresh happens under a single mutex so concurrent callers await one
//! in-flight round-trip instead of racing their own.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::errors::{AppError, AppResult};
use crate::secrets::SecretStore;

/// Secret-store key for the session token (access/refresh token pair)
pub const TOKEN_KEY: &str = "gmail-oauth-token";
/// Secret-store key for the client descriptor (application identity)
pub const CLIENT_DESCRIPTOR_KEY: &str = "gmail-client-credentials";

/// Google token revocation endpoint
const DEFAULT_REVOKE_URI: &str = "https://oauth2.googleapis.com/revoke";
/// Google authorization endpoint for installed applications
const DEFAULT_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";
/// Google token endpoint
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Clock skew applied when deciding a token is stale
const STALE_SKEW_SECONDS: i64 = 60;

/// Loopback port range tried for the consent callback listener
const PORT_RANGE_START: u16 = 8080;
const PORT_RANGE_END: u16 = 8090;

/// Long-lived application identity (client id/secret and endpoints)
///
/// The JSON shape reproduces the `installed` application descriptor exactly,
/// both for the encrypted store record and the fallback file, so the
/// descriptor interoperates with externally-generated credential files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientDescriptor {
    /// Installed-application section
    pub installed: InstalledClient,
}

/// The `installed` section of a client descriptor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstalledClient {
    pub client_id: String,
    pub client_secret: String,
    pub auth_uri: String,
    pub token_uri: String,
    pub redirect_uris: Vec<String>,
}

impl ClientDescriptor {
    /// Build a descriptor for an installed app with the standard endpoints
    pub fn for_installed_app(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            installed: InstalledClient {
                client_id: client_id.into(),
                client_secret: client_secret.into(),
                auth_uri: DEFAULT_AUTH_URI.to_owned(),
                token_uri: DEFAULT_TOKEN_URI.to_owned(),
                redirect_uris: vec!["http://localhost".to_owned()],
            },
        }
    }
}

/// A session credential: access token plus refresh material
///
/// Persisted as JSON under [`TOKEN_KEY`]; the in-memory copy inside
/// [`Authenticator`] is the canonical one for the process lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    /// Bearer token for API requests
    pub access_token: String,
    /// Token used to mint new access tokens without user interaction
    pub refresh_token: Option<String>,
    /// Access token expiry (UTC); `None` means the provider gave no expiry
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    /// Whether the access token needs a refresh before use
    ///
    /// Applies a skew window so a token about to expire mid-request counts
    /// as stale. A credential without an expiry is never stale.
    pub fn is_stale(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at <= Utc::now() + Duration::seconds(STALE_SKEW_SECONDS),
            None => false,
        }
    }

    /// Build a credential from a token-endpoint response
    ///
    /// Providers often omit the refresh token on refresh responses; the
    /// previous one is carried forward in that case.
    fn from_token_response(token: TokenResponse, previous_refresh: Option<String>) -> Self {
        Self {
            access_token: token.access_token,
            refresh_token: token.refresh_token.or(previous_refresh),
            expires_at: token
                .expires_in
                .map(|secs| Utc::now() + Duration::seconds(secs as i64)),
        }
    }
}

/// Token endpoint response shape
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<u64>,
}

/// Interactive consent capability
///
/// One operation: given a client descriptor and a scope list, produce a
/// credential or fail. The lifecycle never knows how consent is obtained.
#[async_trait]
pub trait ConsentFlow: Send + Sync {
    async fn authorize(
        &self,
        descriptor: &ClientDescriptor,
        scopes: &[String],
    ) -> AppResult<Credential>;
}

/// Default consent flow: system browser plus loopback redirect
///
/// Binds a loopback listener, opens the provider's authorization URL in the
/// user's browser, waits for the redirect carrying the authorization code,
/// and exchanges the code at the descriptor's token endpoint.
pub struct LoopbackConsentFlow {
    http: reqwest::Client,
}

impl LoopbackConsentFlow {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl ConsentFlow for LoopbackConsentFlow {
    async fn authorize(
        &self,
        descriptor: &ClientDescriptor,
        scopes: &[String],
    ) -> AppResult<Credential> {
        let (listener, port) = bind_loopback().await?;
        let redirect_uri = format!("http://localhost:{port}");
        let auth_url = build_auth_url(descriptor, scopes, &redirect_uri);

        info!(url = %auth_url, "opening browser for consent");
        if let Err(e) = open::that(&auth_url) {
            warn!(error = %e, "could not open browser; visit the authorization URL manually");
        }

        let code = wait_for_callback(listener).await?;
        debug!("authorization code received, exchanging for tokens");

        let response = self
            .http
            .post(&descriptor.installed.token_uri)
            .form(&[
                ("client_id", descriptor.installed.client_id.as_str()),
                ("client_secret", descriptor.installed.client_secret.as_str()),
                ("code", code.as_str()),
                ("grant_type", "authorization_code"),
                ("redirect_uri", redirect_uri.as_str()),
            ])
            .send()
            .await
            .map_err(|e| AppError::Remote(format!("token exchange failed: {e}")))?;
        let token: TokenResponse = read_token_response(response, "token exchange").await?;

        Ok(Credential::from_token_response(token, None))
    }
}

/// Build the authorization URL for the consent redirect
///
/// Requests offline access so a refresh token is issued, and forces the
/// consent prompt so re-authorization after revocation yields one again.
fn build_auth_url(descriptor: &ClientDescriptor, scopes: &[String], redirect_uri: &str) -> String {
    format!(
        "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&access_type=offline&prompt=consent",
        descriptor.installed.auth_uri,
        urlencoding::encode(&descriptor.installed.client_id),
        urlencoding::encode(redirect_uri),
        urlencoding::encode(&scopes.join(" ")),
    )
}

/// Bind the first free loopback port in the callback range
async fn bind_loopback() -> AppResult<(TcpListener, u16)> {
    for port in PORT_RANGE_START..=PORT_RANGE_END {
        if let Ok(listener) = TcpListener::bind(("127.0.0.1", port)).await {
            return Ok((listener, port));
        }
    }
    Err(AppError::Internal(format!(
        "no free loopback port in range {PORT_RANGE_START}-{PORT_RANGE_END} for consent callback"
    )))
}

/// Accept one redirect request and extract the authorization code
///
/// Answers the browser with a small HTML page either way. A redirect carrying
/// `error=` (user denied consent) is reported as `AuthFailed`.
async fn wait_for_callback(listener: TcpListener) -> AppResult<String> {
    let (stream, _) = listener
        .accept()
        .await
        .map_err(|e| AppError::Internal(format!("consent callback accept failed: {e}")))?;

    let mut reader = BufReader::new(stream);
    let mut request_line = String::new();
    reader
        .read_line(&mut request_line)
        .await
        .map_err(|e| AppError::Internal(format!("consent callback read failed: {e}")))?;

    // Request line shape: GET /?code=...&scope=... HTTP/1.1
    let path = request_line.split_whitespace().nth(1).unwrap_or_default();
    let code = query_param(path, "code");
    let denial = query_param(path, "error");

    let (status, body) = if code.is_some() {
        ("200 OK", "Authentication successful! You can close this window.")
    } else {
        ("400 Bad Request", "Authentication failed. Please try again.")
    };
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: text/html\r\nConnection: close\r\n\r\n<html><body><h1>{body}</h1></body></html>"
    );
    let mut stream = reader.into_inner();
    let _ = stream.write_all(response.as_bytes()).await;

    if let Some(err) = denial {
        return Err(AppError::AuthFailed(format!("consent denied: {err}")));
    }
    code.ok_or_else(|| AppError::AuthFailed("no authorization code received".to_owned()))
}

/// Extract and percent-decode a query parameter from a request path
fn query_param(path: &str, name: &str) -> Option<String> {
    let query = path.split('?').nth(1)?;
    query.split('&').find_map(|param| {
        let (key, value) = param.split_once('=')?;
        if key == name && !value.is_empty() {
            Some(
                urlencoding::decode(value)
                    .map(|v| v.into_owned())
                    .unwrap_or_else(|_| value.to_owned()),
            )
        } else {
            None
        }
    })
}

/// Parse a token-endpoint response, mapping HTTP failures to the taxonomy
async fn read_token_response(
    response: reqwest::Response,
    operation: &str,
) -> AppResult<TokenResponse> {
    let status = response.status();
    if !status.is_success() {
        let detail = response.text().await.unwrap_or_default();
        let message = format!("{operation} returned {status}: {detail}");
        return if status.is_client_error() {
            Err(AppError::AuthFailed(message))
        } else {
            Err(AppError::Remote(message))
        };
    }
    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| AppError::Remote(format!("{operation} returned malformed JSON: {e}")))
}

/// Credential lifecycle state machine
///
/// States: no descriptor → descriptor present → authenticated, with stale ⇄
/// authenticated on refresh and revoked returning to descriptor present.
/// Owns the only in-memory copy of the cached credential.
pub struct Authenticator {
    store: SecretStore,
    config: Arc<ServerConfig>,
    consent: Arc<dyn ConsentFlow>,
    http: reqwest::Client,
    /// Cached credential; every acquire/refresh path locks this first
    credential: Mutex<Option<Credential>>,
    /// Bumped on reauth/revoke so cached API handles built under an older
    /// epoch are discarded by the provider
    epoch: AtomicU64,
    revoke_uri: String,
}

impl Authenticator {
    /// Provider name reported by the tool surface
    pub const PROVIDER: &'static str = "Gmail";

    pub fn new(
        store: SecretStore,
        config: Arc<ServerConfig>,
        consent: Arc<dyn ConsentFlow>,
        http: reqwest::Client,
    ) -> Self {
        Self {
            store,
            config,
            consent,
            http,
            credential: Mutex::new(None),
            epoch: AtomicU64::new(0),
            revoke_uri: DEFAULT_REVOKE_URI.to_owned(),
        }
    }

    /// Override the revocation endpoint (used by tests and non-Google stacks)
    pub fn with_revoke_uri(mut self, uri: impl Into<String>) -> Self {
        self.revoke_uri = uri.into();
        self
    }

    /// Current invalidation epoch
    ///
    /// A cached remote-API handle is valid only while the epoch it was built
    /// under still matches.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Whether a credential is cached or a session-token record exists
    ///
    /// Existence check only; the token is not validated against the provider.
    pub async fn is_authenticated(&self) -> AppResult<bool> {
        if self.credential.lock().await.is_some() {
            return Ok(true);
        }
        self.store.exists(TOKEN_KEY).await
    }

    /// Whether a client descriptor is available (store or fallback file)
    pub async fn is_configured(&self) -> AppResult<bool> {
        if self.store.exists(CLIENT_DESCRIPTOR_KEY).await? {
            return Ok(true);
        }
        Ok(self.config.credentials_path.is_file())
    }

    /// Run the authentication flow, returning whether it succeeded
    ///
    /// Restores a persisted session token when one is usable; otherwise runs
    /// the interactive consent flow. The resulting token is persisted, and a
    /// token already expired at issuance is refreshed once before returning.
    /// Flow failure is a logged `false`, not an error.
    ///
    /// # Errors
    ///
    /// - `NotConfigured` when no client descriptor exists in the store or at
    ///   the fallback path (the message names the expected file)
    /// - `Internal` for secret-store failures
    pub async fn authenticate(&self) -> AppResult<bool> {
        let mut guard = self.credential.lock().await;
        self.authenticate_locked(&mut guard).await
    }

    /// Local-only session invalidation followed by re-authentication
    ///
    /// Clears the cached credential and deletes the persisted session token
    /// without contacting the provider, then authenticates again. The client
    /// descriptor is never touched.
    pub async fn reauth(&self) -> AppResult<bool> {
        let mut guard = self.credential.lock().await;
        *guard = None;
        self.store.delete(TOKEN_KEY).await?;
        self.epoch.fetch_add(1, Ordering::SeqCst);
        info!("cleared cached session token, re-authenticating");
        self.authenticate_locked(&mut guard).await
    }

    /// Revoke the credential with the provider and clear local state
    ///
    /// Remote revocation is best-effort: a failure is logged as a warning and
    /// local cleanup proceeds unconditionally, so losing the round-trip never
    /// leaves local secrets dangling.
    pub async fn revoke(&self) -> AppResult<()> {
        let mut guard = self.credential.lock().await;
        if let Some(credential) = guard.as_ref() {
            if let Err(e) = self.revoke_remote(credential).await {
                warn!(error = %e, "remote token revocation failed; clearing local secrets anyway");
            }
        }
        *guard = None;
        self.store.delete(TOKEN_KEY).await?;
        self.epoch.fetch_add(1, Ordering::SeqCst);
        info!("credential revoked and local session token deleted");
        Ok(())
    }

    /// Obtain a live credential, authenticating and refreshing as needed
    ///
    /// The single site where lazy authentication and silent refresh happen;
    /// callers never observe a stale token. Concurrent callers serialize on
    /// the credential mutex and share one consent/refresh round-trip.
    ///
    /// # Errors
    ///
    /// - `AuthRequired` when authentication cannot complete silently or fails
    /// - `NotConfigured` when no client descriptor exists
    pub async fn credential(&self) -> AppResult<Credential> {
        let mut guard = self.credential.lock().await;
        if guard.is_none() && !self.authenticate_locked(&mut guard).await? {
            return Err(AppError::AuthRequired(
                "Gmail authentication required; run the auth_status tool first".to_owned(),
            ));
        }

        let Some(mut current) = guard.clone() else {
            return Err(AppError::AuthRequired(
                "Gmail authentication required; run the auth_status tool first".to_owned(),
            ));
        };

        if current.is_stale() {
            let descriptor = self.load_descriptor().await?;
            current = self.refresh(&descriptor, &current).await?;
            self.save_credential(&current).await?;
            *guard = Some(current.clone());
            debug!("access token refreshed");
        }

        Ok(current)
    }

    /// Authentication flow body; caller holds the credential lock
    async fn authenticate_locked(
        &self,
        guard: &mut MutexGuard<'_, Option<Credential>>,
    ) -> AppResult<bool> {
        let descriptor = self.load_descriptor().await?;

        if let Some(persisted) = self.restore_persisted().await? {
            if !persisted.is_stale() {
                debug!("restored persisted session token");
                **guard = Some(persisted);
                return Ok(true);
            }
            match self.refresh(&descriptor, &persisted).await {
                Ok(fresh) => {
                    self.save_credential(&fresh).await?;
                    debug!("refreshed persisted session token");
                    **guard = Some(fresh);
                    return Ok(true);
                }
                Err(e) => {
                    warn!(error = %e, "persisted token refresh failed, starting interactive consent");
                }
            }
        }

        match self.consent.authorize(&descriptor, &self.config.scopes).await {
            Ok(mut credential) => {
                if credential.is_stale() {
                    credential = match self.refresh(&descriptor, &credential).await {
                        Ok(fresh) => fresh,
                        Err(e) => {
                            error!(error = %e, "token stale at issuance and refresh failed");
                            return Ok(false);
                        }
                    };
                }
                self.save_credential(&credential).await?;
                **guard = Some(credential);
                info!("authentication successful");
                Ok(true)
            }
            Err(e) => {
                error!(error = %e, "authentication failed");
                Ok(false)
            }
        }
    }

    /// Load the client descriptor, preferring the encrypted store
    ///
    /// The store always wins over the fallback file so a previously
    /// configured descriptor cannot be shadowed by a stray file.
    async fn load_descriptor(&self) -> AppResult<ClientDescriptor> {
        if let Some(json) = self.store.load(CLIENT_DESCRIPTOR_KEY).await? {
            debug!("loading client descriptor from encrypted store");
            return serde_json::from_str(&json).map_err(|e| {
                AppError::Internal(format!("stored client descriptor is malformed: {e}"))
            });
        }

        let path = &self.config.credentials_path;
        let json = tokio::fs::read_to_string(path).await.map_err(|_| {
            AppError::NotConfigured(format!(
                "Gmail credentials not configured; use the setup_gmail tool, or place a \
                 credentials file at: {}",
                path.display()
            ))
        })?;
        serde_json::from_str(&json).map_err(|e| {
            AppError::Internal(format!(
                "client descriptor file {} is malformed: {e}",
                path.display()
            ))
        })
    }

    /// Load the persisted session token, if any
    ///
    /// A record that decrypts but fails to parse is treated like corruption:
    /// logged and read as absent.
    async fn restore_persisted(&self) -> AppResult<Option<Credential>> {
        let Some(json) = self.store.load(TOKEN_KEY).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&json) {
            Ok(credential) => Ok(Some(credential)),
            Err(e) => {
                warn!(error = %e, "persisted session token is malformed, treating as absent");
                Ok(None)
            }
        }
    }

    /// Persist a credential under the session-token key
    async fn save_credential(&self, credential: &Credential) -> AppResult<()> {
        let json = serde_json::to_string(credential)
            .map_err(|e| AppError::Internal(format!("cannot serialize credential: {e}")))?;
        self.store.save(TOKEN_KEY, &json).await
    }

    /// Mint a fresh access token from the refresh token
    async fn refresh(
        &self,
        descriptor: &ClientDescriptor,
        credential: &Credential,
    ) -> AppResult<Credential> {
        let refresh_token = credential.refresh_token.as_deref().ok_or_else(|| {
            AppError::AuthRequired("credential has no refresh token; re-authentication required".to_owned())
        })?;

        let response = self
            .http
            .post(&descriptor.installed.token_uri)
            .form(&[
                ("client_id", descriptor.installed.client_id.as_str()),
                ("client_secret", descriptor.installed.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .map_err(|e| AppError::Remote(format!("token refresh failed: {e}")))?;
        let token = read_token_response(response, "token refresh").await?;

        Ok(Credential::from_token_response(
            token,
            credential.refresh_token.clone(),
        ))
    }

    /// Best-effort remote revocation of the current token
    async fn revoke_remote(&self, credential: &Credential) -> AppResult<()> {
        // Revoking the refresh token invalidates the whole grant; fall back
        // to the access token when no refresh token was issued.
        let token = credential
            .refresh_token
            .as_deref()
            .unwrap_or(credential.access_token.as_str());

        let response = self
            .http
            .post(&self.revoke_uri)
            .form(&[("token", token)])
            .send()
            .await
            .map_err(|e| AppError::Remote(format!("revocation request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Remote(format!(
                "revocation endpoint returned {status}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use secrecy::SecretString;

    use super::{
        Authenticator, CLIENT_DESCRIPTOR_KEY, ClientDescriptor, ConsentFlow, Credential,
        TOKEN_KEY, build_auth_url, query_param,
    };
    use crate::config::ServerConfig;
    use crate::errors::{AppError, AppResult};
    use crate::secrets::{MasterKeyProtector, SecretStore};

    /// Consent double that hands out a fixed fresh credential
    struct FakeConsent {
        calls: AtomicUsize,
        seen_client_id: std::sync::Mutex<Option<String>>,
        fail: bool,
    }

    impl FakeConsent {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                seen_client_id: std::sync::Mutex::new(None),
                fail,
            })
        }
    }

    #[async_trait]
    impl ConsentFlow for FakeConsent {
        async fn authorize(
            &self,
            descriptor: &ClientDescriptor,
            _scopes: &[String],
        ) -> AppResult<Credential> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.seen_client_id.lock().expect("lock") =
                Some(descriptor.installed.client_id.clone());
            if self.fail {
                return Err(AppError::AuthFailed("consent denied".to_owned()));
            }
            Ok(fresh_credential())
        }
    }

    fn fresh_credential() -> Credential {
        Credential {
            access_token: "at-1".to_owned(),
            refresh_token: Some("rt-1".to_owned()),
            expires_at: Some(Utc::now() + Duration::hours(1)),
        }
    }

    fn config_in(dir: &std::path::Path) -> Arc<ServerConfig> {
        Arc::new(ServerConfig {
            master_key: SecretString::new("unused-in-tests".to_owned().into()),
            secrets_dir: dir.join("secrets"),
            credentials_path: dir.join("credentials.json"),
            scopes: vec!["https://www.googleapis.com/auth/gmail.readonly".to_owned()],
            http_timeout_ms: 1_000,
        })
    }

    fn authenticator(
        dir: &std::path::Path,
        consent: Arc<dyn ConsentFlow>,
    ) -> (Authenticator, SecretStore) {
        let config = config_in(dir);
        let store = SecretStore::new(
            config.secrets_dir.clone(),
            Arc::new(MasterKeyProtector::new([9u8; 32])),
        );
        let auth = Authenticator::new(store.clone(), config, consent, reqwest::Client::new())
            // Port 9 (discard) refuses connections, so remote revocation
            // always fails in tests without reaching the network.
            .with_revoke_uri("http://127.0.0.1:9/revoke");
        (auth, store)
    }

    async fn seed_descriptor(store: &SecretStore, client_id: &str) {
        let descriptor = ClientDescriptor::for_installed_app(client_id, "secret");
        store
            .save(
                CLIENT_DESCRIPTOR_KEY,
                &serde_json::to_string(&descriptor).expect("serialize"),
            )
            .await
            .expect("seed descriptor");
    }

    #[test]
    fn stale_detection_applies_skew() {
        let mut credential = fresh_credential();
        assert!(!credential.is_stale());

        credential.expires_at = Some(Utc::now() + Duration::seconds(10));
        assert!(credential.is_stale());

        credential.expires_at = None;
        assert!(!credential.is_stale());
    }

    #[test]
    fn auth_url_carries_encoded_scope_and_redirect() {
        let descriptor = ClientDescriptor::for_installed_app("id-1", "secret");
        let url = build_auth_url(
            &descriptor,
            &["https://www.googleapis.com/auth/gmail.readonly".to_owned()],
            "http://localhost:8080",
        );
        assert!(url.starts_with("https://accounts.google.com/o/oauth2/auth?client_id=id-1"));
        assert!(url.contains("redirect_uri=http%3A%2F%2Flocalhost%3A8080"));
        assert!(url.contains("scope=https%3A%2F%2Fwww.googleapis.com%2Fauth%2Fgmail.readonly"));
        assert!(url.contains("access_type=offline"));
    }

    #[test]
    fn query_param_extracts_and_decodes() {
        assert_eq!(
            query_param("/?code=4%2FabcDEF&scope=email", "code").as_deref(),
            Some("4/abcDEF")
        );
        assert_eq!(
            query_param("/?error=access_denied", "error").as_deref(),
            Some("access_denied")
        );
        assert_eq!(query_param("/?code=", "code"), None);
        assert_eq!(query_param("/", "code"), None);
    }

    #[tokio::test]
    async fn authenticate_without_descriptor_names_expected_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (auth, _store) = authenticator(dir.path(), FakeConsent::new(false));

        let err = auth.authenticate().await.expect_err("must not authenticate");
        match err {
            AppError::NotConfigured(msg) => {
                assert!(msg.contains("credentials.json"), "message names the path: {msg}");
            }
            other => panic!("expected NotConfigured, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn authenticate_persists_token_and_reports_success() {
        let dir = tempfile::tempdir().expect("tempdir");
        let consent = FakeConsent::new(false);
        let (auth, store) = authenticator(dir.path(), consent.clone());
        seed_descriptor(&store, "store-id").await;

        assert!(auth.authenticate().await.expect("flow runs"));
        assert!(store.exists(TOKEN_KEY).await.expect("exists"));
        assert!(auth.is_authenticated().await.expect("authenticated"));
        assert_eq!(
            consent.seen_client_id.lock().expect("lock").as_deref(),
            Some("store-id")
        );
    }

    #[tokio::test]
    async fn store_descriptor_shadows_fallback_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let consent = FakeConsent::new(false);
        let (auth, store) = authenticator(dir.path(), consent.clone());

        let file_descriptor = ClientDescriptor::for_installed_app("file-id", "secret");
        std::fs::write(
            dir.path().join("credentials.json"),
            serde_json::to_string(&file_descriptor).expect("serialize"),
        )
        .expect("write fallback");
        seed_descriptor(&store, "store-id").await;

        assert!(auth.authenticate().await.expect("flow runs"));
        assert_eq!(
            consent.seen_client_id.lock().expect("lock").as_deref(),
            Some("store-id")
        );
    }

    #[tokio::test]
    async fn failed_consent_is_false_not_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (auth, store) = authenticator(dir.path(), FakeConsent::new(true));
        seed_descriptor(&store, "store-id").await;

        assert!(!auth.authenticate().await.expect("flow runs"));
        assert!(!store.exists(TOKEN_KEY).await.expect("exists"));

        let err = auth.credential().await.expect_err("no credential");
        assert!(matches!(err, AppError::AuthRequired(_)));
    }

    #[tokio::test]
    async fn credential_restores_persisted_token_without_consent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let consent = FakeConsent::new(false);
        let (auth, store) = authenticator(dir.path(), consent.clone());
        seed_descriptor(&store, "store-id").await;
        store
            .save(
                TOKEN_KEY,
                &serde_json::to_string(&fresh_credential()).expect("serialize"),
            )
            .await
            .expect("seed token");

        let credential = auth.credential().await.expect("credential");
        assert_eq!(credential.access_token, "at-1");
        assert_eq!(consent.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn reauth_deletes_token_but_never_descriptor() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (auth, store) = authenticator(dir.path(), FakeConsent::new(true));
        seed_descriptor(&store, "store-id").await;
        store
            .save(
                TOKEN_KEY,
                &serde_json::to_string(&fresh_credential()).expect("serialize"),
            )
            .await
            .expect("seed token");

        let epoch_before = auth.epoch();
        // Consent fails, so reauth ends unauthenticated: the token record
        // must be gone while the descriptor survives.
        assert!(!auth.reauth().await.expect("flow runs"));
        assert!(!store.exists(TOKEN_KEY).await.expect("token exists"));
        assert!(store.exists(CLIENT_DESCRIPTOR_KEY).await.expect("descriptor exists"));
        assert!(auth.epoch() > epoch_before);
    }

    #[tokio::test]
    async fn revoke_clears_token_even_when_remote_endpoint_unreachable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (auth, store) = authenticator(dir.path(), FakeConsent::new(false));
        seed_descriptor(&store, "store-id").await;
        assert!(auth.authenticate().await.expect("flow runs"));

        let epoch_before = auth.epoch();
        auth.revoke().await.expect("revoke proceeds despite remote failure");

        assert!(!store.exists(TOKEN_KEY).await.expect("token exists"));
        assert!(store.exists(CLIENT_DESCRIPTOR_KEY).await.expect("descriptor exists"));
        assert!(!auth.is_authenticated().await.expect("authenticated"));
        assert!(auth.epoch() > epoch_before);
    }
}
