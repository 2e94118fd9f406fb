//! Tastytrade Session Management
//!
//! REST authentication against the brokerage API. Owns the session token,
//! the remember token and (until a remember token is issued) the password,
//! and hands out quote tokens for the streaming endpoint.
//!
//! # Endpoints
//!
//! - `POST /sessions` with `{login, password | remember-token, remember-me}`
//! - `DELETE /sessions` with the session token in `Authorization`
//! - `GET /api-quote-tokens` with the session token in `Authorization`
//!
//! All session state lives behind one async lock that is held for the whole
//! of a login, refresh or logout, so concurrent callers never observe a half
//! applied update.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::AUTHORIZATION;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::infrastructure::metrics;
use crate::infrastructure::resilience::{RateLimitError, RateLimiter, RetryError, RetryPolicy};

// =============================================================================
// Error Types
// =============================================================================

/// Errors from the session endpoints.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The server answered with a non-success status.
    #[error("request rejected with status {status}: {body}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Response body, for diagnostics.
        body: String,
    },

    /// No session token is held.
    #[error("no active session")]
    NoSession,

    /// No remember token is held.
    #[error("no remember token available")]
    NoRememberToken,

    /// Neither a remember token nor a password is available to log in again.
    #[error("no credentials available to re-authenticate")]
    NoCredentials,

    /// Transport-level HTTP failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The response body did not have the expected shape.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Cancelled while waiting for the rate limiter.
    #[error(transparent)]
    RateLimited(#[from] RateLimitError),

    /// Cancelled between retries.
    #[error("request cancelled")]
    Cancelled,
}

impl AuthError {
    /// Whether the server rejected the credentials or token.
    #[must_use]
    pub const fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Rejected { status: 401 | 403, .. })
    }

    /// Whether an idempotent request failing this way is worth retrying.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Http(_) => true,
            Self::Rejected { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl From<RetryError<Self>> for AuthError {
    fn from(err: RetryError<Self>) -> Self {
        match err {
            RetryError::Exhausted { source, .. } | RetryError::Permanent(source) => source,
            RetryError::Cancelled => Self::Cancelled,
        }
    }
}

// =============================================================================
// Quote Token
// =============================================================================

/// Credentials for the streaming endpoint.
#[derive(Clone, PartialEq, Eq)]
pub struct QuoteToken {
    /// Token sent in the streaming `AUTH` frame.
    pub token: String,
    /// Streaming endpoint URL.
    pub dxlink_url: String,
    /// Data entitlement level, when reported.
    pub level: Option<String>,
}

impl std::fmt::Debug for QuoteToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuoteToken")
            .field("token", &"[REDACTED]")
            .field("dxlink_url", &self.dxlink_url)
            .field("level", &self.level)
            .finish()
    }
}

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Serialize)]
struct SessionRequest<'a> {
    login: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    password: Option<&'a str>,
    #[serde(rename = "remember-token", skip_serializing_if = "Option::is_none")]
    remember_token: Option<&'a str>,
    #[serde(rename = "remember-me")]
    remember_me: bool,
}

impl<'a> SessionRequest<'a> {
    const fn password(login: &'a str, password: &'a str) -> Self {
        Self {
            login,
            password: Some(password),
            remember_token: None,
            remember_me: true,
        }
    }

    const fn remember(login: &'a str, remember_token: &'a str) -> Self {
        Self {
            login,
            password: None,
            remember_token: Some(remember_token),
            remember_me: true,
        }
    }
}

#[derive(Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case")]
struct SessionData {
    session_token: String,
    #[serde(default)]
    remember_token: Option<String>,
    #[serde(default)]
    user: Option<UserData>,
}

#[derive(Deserialize)]
struct UserData {
    #[serde(default)]
    username: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case")]
struct QuoteTokenData {
    token: String,
    dxlink_url: String,
    #[serde(default)]
    level: Option<String>,
}

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the session manager.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// REST base URL, without a trailing slash.
    pub base_url: String,
    /// Per-request timeout.
    pub request_timeout: Duration,
    /// Minimum interval between REST calls.
    pub rate_limit_interval: Duration,
    /// Retry policy for idempotent calls.
    pub retry: RetryPolicy,
}

impl SessionConfig {
    /// Configuration with default timing for a base URL.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            request_timeout: Duration::from_secs(15),
            rate_limit_interval: Duration::from_millis(100),
            retry: RetryPolicy::default(),
        }
    }
}

// =============================================================================
// Session Manager
// =============================================================================

#[derive(Default)]
struct SessionState {
    login: Option<String>,
    password: Option<String>,
    session_token: Option<String>,
    remember_token: Option<String>,
    created_at: Option<DateTime<Utc>>,
    refreshed_at: Option<DateTime<Utc>>,
}

impl SessionState {
    /// Start a new session; the next install stamps a fresh creation time.
    fn begin(&mut self) {
        self.created_at = None;
        self.refreshed_at = None;
    }

    fn install(&mut self, login: &str, data: SessionData) -> String {
        let now = Utc::now();
        self.created_at.get_or_insert(now);
        self.refreshed_at = Some(now);
        self.login = Some(login.to_string());
        if let Some(remember_token) = data.remember_token.filter(|t| !t.is_empty()) {
            self.remember_token = Some(remember_token);
        }
        if self.remember_token.is_some() {
            self.password = None;
        }
        self.session_token = Some(data.session_token.clone());
        data.session_token
    }
}

/// Session lifecycle against the REST API.
pub struct SessionManager {
    http: reqwest::Client,
    base_url: String,
    limiter: RateLimiter,
    retry: RetryPolicy,
    state: Mutex<SessionState>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("base_url", &self.base_url)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    /// Create a session manager. Waits observe `cancel`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: SessionConfig, cancel: CancellationToken) -> Result<Self, AuthError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("options-chain-stream/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url,
            limiter: RateLimiter::new(config.rate_limit_interval),
            retry: config.retry,
            state: Mutex::new(SessionState::default()),
            cancel,
        })
    }

    /// Seed a pre-issued session token instead of logging in.
    #[must_use]
    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        let state = self.state.get_mut();
        let now = Utc::now();
        state.session_token = Some(token.into());
        state.created_at = Some(now);
        state.refreshed_at = Some(now);
        self
    }

    /// Current session token, if any.
    pub async fn session_token(&self) -> Option<String> {
        self.state.lock().await.session_token.clone()
    }

    /// When the current session was created.
    pub async fn created_at(&self) -> Option<DateTime<Utc>> {
        self.state.lock().await.created_at
    }

    /// When the session token was last issued, by login or refresh.
    pub async fn refreshed_at(&self) -> Option<DateTime<Utc>> {
        self.state.lock().await.refreshed_at
    }

    /// Drop the session token after the server signalled it is no longer
    /// valid. Credentials for [`refresh`](Self::refresh) are kept.
    pub async fn invalidate(&self) {
        let mut state = self.state.lock().await;
        if state.session_token.take().is_some() {
            tracing::info!("Session invalidated");
        }
    }

    /// Whether a remember token is held.
    pub async fn has_remember_token(&self) -> bool {
        self.state.lock().await.remember_token.is_some()
    }

    /// Log in with a password.
    ///
    /// Stores the session token and any remember token. The password is kept
    /// for later re-authentication only if no remember token was issued.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Rejected`] with the server's status and body on a
    /// non-success response.
    pub async fn login(&self, login: &str, password: &str) -> Result<String, AuthError> {
        let mut state = self.state.lock().await;
        state.begin();
        self.password_login(&mut state, login, password).await
    }

    /// Log in silently with the stored remember token.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::NoRememberToken`] if none is held. On rejection
    /// the remember token is discarded.
    pub async fn login_with_remember_token(&self, login: &str) -> Result<String, AuthError> {
        let mut state = self.state.lock().await;
        state.begin();
        self.remember_login(&mut state, login).await
    }

    /// Destroy the session server-side.
    ///
    /// Local tokens are cleared whether or not the server accepts the
    /// request.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::NoSession`] if no session is held, or the server
    /// rejection.
    pub async fn logout(&self) -> Result<(), AuthError> {
        let mut state = self.state.lock().await;
        let token = state.session_token.take();
        state.remember_token = None;
        state.begin();
        let token = token.ok_or(AuthError::NoSession)?;

        self.limiter.wait(&self.cancel).await?;
        let response = self
            .http
            .delete(format!("{}/sessions", self.base_url))
            .header(AUTHORIZATION, token)
            .send()
            .await?;
        check_status(response).await?;

        tracing::info!("Logged out");
        Ok(())
    }

    /// Obtain a fresh session after the current one was rejected.
    ///
    /// Tries the remember token first and falls back to the password while it
    /// is still held.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::NoCredentials`] when neither is available, or the
    /// last login failure.
    pub async fn refresh(&self) -> Result<String, AuthError> {
        let mut state = self.state.lock().await;
        let login = state.login.clone().ok_or(AuthError::NoCredentials)?;
        let mut last_error = None;

        if state.remember_token.is_some() {
            match self.remember_login(&mut state, &login).await {
                Ok(token) => {
                    metrics::record_auth_refresh("remember_token");
                    return Ok(token);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Remember-token login failed");
                    last_error = Some(e);
                }
            }
        }

        if let Some(password) = state.password.clone() {
            let token = self.password_login(&mut state, &login, &password).await?;
            metrics::record_auth_refresh("password");
            return Ok(token);
        }

        Err(last_error.unwrap_or(AuthError::NoCredentials))
    }

    /// Fetch streaming credentials.
    ///
    /// Idempotent, so transient failures are retried; 4xx responses other
    /// than 429 are not.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::NoSession`] without a session token, or the last
    /// request failure.
    pub async fn quote_token(&self) -> Result<QuoteToken, AuthError> {
        let token = self.session_token().await.ok_or(AuthError::NoSession)?;
        let url = format!("{}/api-quote-tokens", self.base_url);

        let data = self
            .retry
            .run_with(
                &self.cancel,
                || self.fetch_quote_token(&url, &token),
                AuthError::is_retryable,
            )
            .await?;

        tracing::debug!(dxlink_url = %data.dxlink_url, level = ?data.level, "Quote token acquired");
        Ok(QuoteToken {
            token: data.token,
            dxlink_url: data.dxlink_url,
            level: data.level,
        })
    }

    async fn fetch_quote_token(&self, url: &str, token: &str) -> Result<QuoteTokenData, AuthError> {
        self.limiter.wait(&self.cancel).await?;
        let response = self
            .http
            .get(url)
            .header(AUTHORIZATION, token)
            .send()
            .await?;
        let envelope: Envelope<QuoteTokenData> = parse_json(check_status(response).await?).await?;
        Ok(envelope.data)
    }

    async fn password_login(
        &self,
        state: &mut SessionState,
        login: &str,
        password: &str,
    ) -> Result<String, AuthError> {
        tracing::info!(login, "Logging in with password");
        let data = self
            .create_session(&SessionRequest::password(login, password))
            .await?;
        if data.remember_token.is_none() {
            state.password = Some(password.to_string());
        }
        Ok(state.install(login, data))
    }

    async fn remember_login(
        &self,
        state: &mut SessionState,
        login: &str,
    ) -> Result<String, AuthError> {
        let remember_token = state
            .remember_token
            .clone()
            .ok_or(AuthError::NoRememberToken)?;

        tracing::info!(login, "Logging in with remember token");
        match self
            .create_session(&SessionRequest::remember(login, &remember_token))
            .await
        {
            Ok(data) => Ok(state.install(login, data)),
            Err(e) => {
                if matches!(e, AuthError::Rejected { .. }) {
                    tracing::warn!(error = %e, "Remember token rejected, discarding it");
                    state.remember_token = None;
                }
                Err(e)
            }
        }
    }

    async fn create_session(&self, request: &SessionRequest<'_>) -> Result<SessionData, AuthError> {
        self.limiter.wait(&self.cancel).await?;
        let response = self
            .http
            .post(format!("{}/sessions", self.base_url))
            .json(request)
            .send()
            .await?;
        let envelope: Envelope<SessionData> = parse_json(check_status(response).await?).await?;

        if envelope.data.session_token.is_empty() {
            return Err(AuthError::InvalidResponse("empty session token".to_string()));
        }
        let username = envelope.data.user.as_ref().and_then(|u| u.username.as_deref());
        tracing::info!(
            username = username.unwrap_or("unknown"),
            remember_token = envelope.data.remember_token.is_some(),
            "Session created"
        );
        Ok(envelope.data)
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, AuthError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(AuthError::Rejected {
        status: status.as_u16(),
        body,
    })
}

async fn parse_json<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, AuthError> {
    response
        .json()
        .await
        .map_err(|e| AuthError::InvalidResponse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn password_request_shape() {
        let body = serde_json::to_value(SessionRequest::password("trader", "hunter2")).unwrap();
        assert_eq!(
            body,
            json!({"login": "trader", "password": "hunter2", "remember-me": true})
        );
    }

    #[test]
    fn remember_request_omits_password() {
        let body = serde_json::to_value(SessionRequest::remember("trader", "rt-1")).unwrap();
        assert_eq!(
            body,
            json!({"login": "trader", "remember-token": "rt-1", "remember-me": true})
        );
    }

    #[test]
    fn session_response_parses_kebab_case() {
        let envelope: Envelope<SessionData> = serde_json::from_value(json!({
            "data": {
                "user": {"email": "t@example.com", "username": "trader"},
                "session-token": "st-1",
                "remember-token": "rt-1"
            },
            "context": "/sessions"
        }))
        .unwrap();

        assert_eq!(envelope.data.session_token, "st-1");
        assert_eq!(envelope.data.remember_token.as_deref(), Some("rt-1"));
    }

    #[test]
    fn install_drops_password_once_remember_token_is_held() {
        let mut state = SessionState {
            password: Some("hunter2".to_string()),
            ..SessionState::default()
        };
        let data = SessionData {
            session_token: "st-1".to_string(),
            remember_token: Some("rt-1".to_string()),
            user: None,
        };

        assert_eq!(state.install("trader", data), "st-1");
        assert!(state.password.is_none());
        assert_eq!(state.remember_token.as_deref(), Some("rt-1"));
        assert_eq!(state.login.as_deref(), Some("trader"));
    }

    #[test]
    fn install_keeps_previous_remember_token_when_none_issued() {
        let mut state = SessionState {
            remember_token: Some("rt-old".to_string()),
            ..SessionState::default()
        };
        let data = SessionData {
            session_token: "st-2".to_string(),
            remember_token: None,
            user: None,
        };

        state.install("trader", data);
        assert_eq!(state.remember_token.as_deref(), Some("rt-old"));
    }

    fn session(token: &str) -> SessionData {
        SessionData {
            session_token: token.to_string(),
            remember_token: None,
            user: None,
        }
    }

    #[test]
    fn reinstall_keeps_creation_time() {
        let mut state = SessionState::default();
        state.install("trader", session("st-1"));
        let created = state.created_at.unwrap();
        assert_eq!(state.refreshed_at, Some(created));

        state.install("trader", session("st-2"));
        assert_eq!(state.created_at, Some(created));
        assert!(state.refreshed_at.unwrap() >= created);
    }

    #[test]
    fn begin_starts_a_new_creation_time() {
        let mut state = SessionState::default();
        state.install("trader", session("st-1"));

        state.begin();
        assert!(state.created_at.is_none());
        assert!(state.refreshed_at.is_none());

        state.install("trader", session("st-2"));
        assert!(state.created_at.is_some());
        assert_eq!(state.created_at, state.refreshed_at);
    }

    #[test]
    fn retry_classification() {
        let rejected = |status| AuthError::Rejected {
            status,
            body: String::new(),
        };
        assert!(rejected(503).is_retryable());
        assert!(rejected(429).is_retryable());
        assert!(!rejected(401).is_retryable());
        assert!(!rejected(404).is_retryable());
        assert!(rejected(401).is_unauthorized());
        assert!(rejected(403).is_unauthorized());
        assert!(!AuthError::NoSession.is_retryable());
    }

    #[test]
    fn retry_error_unwraps_to_last_error() {
        let err: AuthError = RetryError::Exhausted {
            attempts: 3,
            source: AuthError::NoSession,
        }
        .into();
        assert!(matches!(err, AuthError::NoSession));

        let err: AuthError = RetryError::<AuthError>::Cancelled.into();
        assert!(matches!(err, AuthError::Cancelled));
    }

    #[test]
    fn quote_token_debug_redacts_token() {
        let token = QuoteToken {
            token: "secret-token".to_string(),
            dxlink_url: "wss://tasty-openapi-ws.dxfeed.com/realtime".to_string(),
            level: Some("api".to_string()),
        };
        let debug = format!("{token:?}");
        assert!(!debug.contains("secret-token"));
        assert!(debug.contains("REDACTED"));
    }

    #[test]
    fn config_trims_trailing_slash() {
        let config = SessionConfig::new("https://api.cert.tastyworks.com/");
        assert_eq!(config.base_url, "https://api.cert.tastyworks.com");
    }
}
