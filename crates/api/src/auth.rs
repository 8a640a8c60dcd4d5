//! Bearer-token cache and the authorization service client behind it.
//!
//! Every remote call needs a valid bearer token. Tokens are short
//! lived, so the cache refreshes lazily: reads of a still-valid token
//! are lock-cheap, while an expired token funnels all callers through
//! a single in-flight refresh.

use std::sync::{Arc, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};

use crate::types::AuthToken;
use crate::{ApiError, ApiFuture};

/// Authorization service abstraction.
///
/// Implemented by [`HttpAuthProvider`] in production and by mocks in
/// tests. `refresh` exchanges stored credentials for a fresh token
/// plus its expiry.
pub trait AuthProvider: Send + Sync {
    fn refresh(&self) -> ApiFuture<'_, AuthToken>;
}

/// Shared bearer-token cache with single-flight refresh.
///
/// A failed refresh surfaces the error and leaves the previous
/// (expired) entry in place, so the next caller retries the refresh
/// instead of reusing a known-bad value.
pub struct TokenCache {
    cached: RwLock<Option<AuthToken>>,
    refresh_lock: tokio::sync::Mutex<()>,
    provider: Arc<dyn AuthProvider>,
}

impl TokenCache {
    pub fn new(provider: Arc<dyn AuthProvider>) -> Self {
        Self {
            cached: RwLock::new(None),
            refresh_lock: tokio::sync::Mutex::new(()),
            provider,
        }
    }

    /// Returns a usable bearer token, refreshing if the cached one
    /// has expired.
    pub async fn bearer_token(&self) -> Result<String, ApiError> {
        if let Some(token) = self.cached_valid() {
            return Ok(token);
        }

        // Serialize refreshes; whoever wins re-checks and the rest
        // see the freshly cached value after acquiring the lock.
        let _guard = self.refresh_lock.lock().await;
        if let Some(token) = self.cached_valid() {
            return Ok(token);
        }

        let fresh = self.provider.refresh().await?;
        if fresh.value.is_empty() {
            return Err(ApiError::Auth("response missing bearer token".into()));
        }

        debug!(expires_at = fresh.expires_at, "bearer token refreshed");
        let value = fresh.value.clone();
        *self.cached.write().unwrap() = Some(fresh);
        Ok(value)
    }

    fn cached_valid(&self) -> Option<String> {
        let cached = self.cached.read().unwrap();
        cached
            .as_ref()
            .filter(|t| t.expires_at > unix_now())
            .map(|t| t.value.clone())
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Authorization client that exchanges stored credentials for a
/// bearer token over HTTPS.
///
/// The auth endpoint takes a form-encoded POST and answers with one
/// `Key=Value` pair per line; `Auth` and `Expiry` are required.
pub struct HttpAuthProvider {
    http: reqwest::Client,
    auth_url: String,
    credentials: Vec<(String, String)>,
    user_agent: String,
}

impl HttpAuthProvider {
    pub fn new(
        http: reqwest::Client,
        auth_url: String,
        credentials: Vec<(String, String)>,
        user_agent: String,
    ) -> Self {
        Self {
            http,
            auth_url,
            credentials,
            user_agent,
        }
    }

    async fn request_token(&self) -> Result<AuthToken, ApiError> {
        let resp = self
            .http
            .post(&self.auth_url)
            .header(reqwest::header::USER_AGENT, &self.user_agent)
            .form(&self.credentials)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "auth refresh rejected");
            return Err(ApiError::Auth(format!(
                "refresh failed with status {}: {body}",
                status.as_u16()
            )));
        }

        parse_auth_response(&resp.text().await?)
    }
}

impl AuthProvider for HttpAuthProvider {
    fn refresh(&self) -> ApiFuture<'_, AuthToken> {
        Box::pin(self.request_token())
    }
}

/// Parses the `Key=Value`-per-line auth response body.
fn parse_auth_response(body: &str) -> Result<AuthToken, ApiError> {
    let mut value = None;
    let mut expires_at = None;

    for line in body.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some((key, val)) = line.split_once('=') {
            match key {
                "Auth" => value = Some(val.to_string()),
                "Expiry" => expires_at = val.parse::<i64>().ok(),
                _ => {}
            }
        }
    }

    let value = value.filter(|v| !v.is_empty()).ok_or(ApiError::Auth(
        "auth response missing Auth token".into(),
    ))?;
    let expires_at = expires_at.ok_or(ApiError::Auth(
        "auth response missing or invalid Expiry".into(),
    ))?;

    Ok(AuthToken { value, expires_at })
}
