//! Remote media service operations.
//!
//! Four calls back the upload pipeline: duplicate lookup, upload-slot
//! acquisition, the streamed upload itself, and the final commit.
//! Only the streamed upload is retried; each attempt re-opens the
//! file and streams from byte 0 because the destination is not
//! assumed to have kept any bytes from a failed attempt.

use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::Stream;
use reqwest::header::USER_AGENT;
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::auth::{AuthProvider, HttpAuthProvider, TokenCache};
use crate::http::build_http_client;
use crate::retry::{RetryPolicy, is_retryable};
use crate::types::{CommitTicket, FileDigest, UploadQuality, UploadSlot};
use crate::{ApiError, ApiFuture};

/// Read size for the streaming upload body.
const UPLOAD_CHUNK_SIZE: usize = 1024 * 1024;

/// Bytes streamed between cancellation checks.
const CANCEL_CHECK_INTERVAL: u64 = 64 * 1024 * 1024;

/// Byte-progress sink: `(bytes_uploaded, bytes_total, attempt)`.
/// `attempt` is 1-based; progress resets to 0 at the start of each
/// retry attempt.
pub type ProgressFn = Arc<dyn Fn(u64, u64, u32) + Send + Sync>;

/// Abstract remote service consumed by the upload pipeline.
///
/// [`Client`] implements this over HTTPS; tests implement it with
/// in-memory mocks.
pub trait RemoteApi: Send + Sync {
    /// Looks up a media key by content digest. `None` means the
    /// library does not have this content yet.
    fn find_by_hash(&self, digest: FileDigest) -> ApiFuture<'_, Option<String>>;

    /// Acquires a destination slot for a streamed upload.
    fn request_upload_slot(&self, digest: FileDigest, size_bytes: u64)
    -> ApiFuture<'_, UploadSlot>;

    /// Streams the file into the slot, retrying transient failures.
    fn stream_upload(
        &self,
        path: PathBuf,
        slot: UploadSlot,
        progress: ProgressFn,
        cancel: CancellationToken,
    ) -> ApiFuture<'_, CommitTicket>;

    /// Converts a completed byte stream into a permanent media item
    /// and returns its media key. Never retried.
    fn commit(
        &self,
        ticket: CommitTicket,
        file_name: String,
        digest: FileDigest,
        mod_time: i64,
    ) -> ApiFuture<'_, String>;
}

/// Endpoints and request settings for the remote service.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL for lookup and commit calls.
    pub api_base: String,
    /// Base URL for slot acquisition and streamed uploads.
    pub upload_base: String,
    /// Authorization token endpoint.
    pub auth_url: String,
    pub user_agent: String,
    pub proxy: Option<String>,
    pub retry: RetryPolicy,
    /// Storage tier requested at commit time.
    pub quality: UploadQuality,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.photoup.io/v1".into(),
            upload_base: "https://upload.photoup.io/v1".into(),
            auth_url: "https://auth.photoup.io/token".into(),
            user_agent: format!("photoup/{}", env!("CARGO_PKG_VERSION")),
            proxy: None,
            retry: RetryPolicy::default(),
            quality: UploadQuality::default(),
        }
    }
}

/// HTTPS client for the media service.
pub struct Client {
    http: reqwest::Client,
    tokens: TokenCache,
    config: ClientConfig,
}

impl Client {
    /// Creates a client with an injected authorization provider.
    pub fn new(config: ClientConfig, provider: Arc<dyn AuthProvider>) -> Result<Self, ApiError> {
        let http = build_http_client(config.proxy.as_deref())?;
        Ok(Self {
            tokens: TokenCache::new(provider),
            http,
            config,
        })
    }

    /// Creates a client whose tokens come from the HTTP authorization
    /// endpoint in `config`, exchanging the given credential pairs.
    pub fn with_credentials(
        config: ClientConfig,
        credentials: Vec<(String, String)>,
    ) -> Result<Self, ApiError> {
        let http = build_http_client(config.proxy.as_deref())?;
        let provider = Arc::new(HttpAuthProvider::new(
            http.clone(),
            config.auth_url.clone(),
            credentials,
            config.user_agent.clone(),
        ));
        Ok(Self {
            tokens: TokenCache::new(provider),
            http,
            config,
        })
    }

    pub async fn find_by_hash(&self, digest: FileDigest) -> Result<Option<String>, ApiError> {
        let token = self.tokens.bearer_token().await?;
        let url = format!("{}/media/lookup", self.config.api_base);
        let req = LookupRequest {
            sha1: digest.to_base64(),
        };

        let resp = self
            .http
            .post(&url)
            .header(USER_AGENT, &self.config.user_agent)
            .bearer_auth(&token)
            .json(&req)
            .send()
            .await?;
        let resp = check_status(resp).await?;

        let body: LookupResponse = resp.json().await?;
        Ok(body.media_key.filter(|k| !k.is_empty()))
    }

    pub async fn request_upload_slot(
        &self,
        digest: FileDigest,
        size_bytes: u64,
    ) -> Result<UploadSlot, ApiError> {
        let token = self.tokens.bearer_token().await?;
        let url = format!("{}/uploads", self.config.upload_base);
        let req = SlotRequest {
            sha1: digest.to_base64(),
            size_bytes,
        };

        let resp = self
            .http
            .post(&url)
            .header(USER_AGENT, &self.config.user_agent)
            .bearer_auth(&token)
            .json(&req)
            .send()
            .await?;
        let resp = check_status(resp).await?;

        // The slot id travels in a response header, not the body.
        let id = resp
            .headers()
            .get("x-upload-slot")
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .ok_or(ApiError::MissingField("X-Upload-Slot header"))?
            .to_string();

        Ok(UploadSlot { id })
    }

    /// Streams `path` into `slot`, retrying transient failures per
    /// the configured policy. Cancellation is checked before each
    /// attempt, during the backoff sleep, and periodically while
    /// bytes flow.
    pub async fn stream_upload(
        &self,
        path: &Path,
        slot: UploadSlot,
        progress: ProgressFn,
        cancel: CancellationToken,
    ) -> Result<CommitTicket, ApiError> {
        let size = tokio::fs::metadata(path).await?.len();
        let policy = &self.config.retry;
        let mut attempt: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(ApiError::Cancelled);
            }

            let attempt_no = attempt + 1;
            progress(0, size, attempt_no);

            let result = self
                .upload_once(path, &slot, size, &progress, &cancel, attempt_no)
                .await;

            match result {
                Ok(ticket) => return Ok(ticket),
                Err(ApiError::Cancelled) => return Err(ApiError::Cancelled),
                Err(e) if is_retryable(&e) && attempt < policy.max_retries => {
                    if cancel.is_cancelled() {
                        return Err(ApiError::Cancelled);
                    }
                    let delay = policy.delay_for_retry(attempt);
                    warn!(
                        path = %path.display(),
                        attempt = attempt_no,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "upload attempt failed, retrying"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(ApiError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                Err(e) if is_retryable(&e) => {
                    return Err(ApiError::RetriesExhausted {
                        attempts: attempt_no,
                        source: Box::new(e),
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// One upload attempt: re-opens the file and streams it from
    /// byte 0 with a chunked body (no Content-Length, so a retried
    /// attempt never has to match a previous length).
    async fn upload_once(
        &self,
        path: &Path,
        slot: &UploadSlot,
        size: u64,
        progress: &ProgressFn,
        cancel: &CancellationToken,
        attempt: u32,
    ) -> Result<CommitTicket, ApiError> {
        let token = self.tokens.bearer_token().await?;
        let file = tokio::fs::File::open(path).await?;
        let body = ProgressStream {
            inner: ReaderStream::with_capacity(file, UPLOAD_CHUNK_SIZE),
            sent: 0,
            total: size,
            since_check: 0,
            attempt,
            progress: progress.clone(),
            cancel: cancel.clone(),
        };

        let url = format!("{}/uploads/{}", self.config.upload_base, slot.id);
        let resp = self
            .http
            .put(&url)
            .header(USER_AGENT, &self.config.user_agent)
            .bearer_auth(&token)
            .body(reqwest::Body::wrap_stream(body))
            .send()
            .await;

        // A cancelled body stream surfaces as a transport error;
        // report it as cancellation, not as a retryable failure.
        if cancel.is_cancelled() {
            return Err(ApiError::Cancelled);
        }
        let resp = check_status(resp?).await?;

        let body: StreamResponse = resp.json().await?;
        if body.ticket.is_empty() {
            return Err(ApiError::MissingField("ticket"));
        }
        debug!(path = %path.display(), attempt, "upload stream accepted");
        Ok(CommitTicket { token: body.ticket })
    }

    pub async fn commit(
        &self,
        ticket: CommitTicket,
        file_name: &str,
        digest: FileDigest,
        mod_time: i64,
    ) -> Result<String, ApiError> {
        let token = self.tokens.bearer_token().await?;
        let url = format!("{}/media/commit", self.config.api_base);
        let req = CommitRequest {
            ticket: ticket.token,
            file_name,
            sha1: digest.to_base64(),
            modified_at_epoch: mod_time,
            quality: self.config.quality,
        };

        let resp = self
            .http
            .post(&url)
            .header(USER_AGENT, &self.config.user_agent)
            .bearer_auth(&token)
            .json(&req)
            .send()
            .await?;
        let resp = check_status(resp).await?;

        let body: CommitResponse = resp.json().await?;
        if body.media_key.is_empty() {
            // A well-formed response without a key means the server
            // rejected the item; there is nothing to retry.
            return Err(ApiError::MissingField("mediaKey"));
        }
        Ok(body.media_key)
    }
}

impl RemoteApi for Client {
    fn find_by_hash(&self, digest: FileDigest) -> ApiFuture<'_, Option<String>> {
        Box::pin(Client::find_by_hash(self, digest))
    }

    fn request_upload_slot(
        &self,
        digest: FileDigest,
        size_bytes: u64,
    ) -> ApiFuture<'_, UploadSlot> {
        Box::pin(Client::request_upload_slot(self, digest, size_bytes))
    }

    fn stream_upload(
        &self,
        path: PathBuf,
        slot: UploadSlot,
        progress: ProgressFn,
        cancel: CancellationToken,
    ) -> ApiFuture<'_, CommitTicket> {
        Box::pin(async move { Client::stream_upload(self, &path, slot, progress, cancel).await })
    }

    fn commit(
        &self,
        ticket: CommitTicket,
        file_name: String,
        digest: FileDigest,
        mod_time: i64,
    ) -> ApiFuture<'_, String> {
        Box::pin(async move { Client::commit(self, ticket, &file_name, digest, mod_time).await })
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    let status = resp.status();
    if status.is_success() {
        Ok(resp)
    } else {
        let body = resp.text().await.unwrap_or_default();
        Err(ApiError::Api {
            status: status.as_u16(),
            body,
        })
    }
}

// ---------------------------------------------------------------------------
// Wire payloads
// ---------------------------------------------------------------------------

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LookupRequest {
    sha1: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LookupResponse {
    #[serde(default)]
    media_key: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SlotRequest {
    sha1: String,
    size_bytes: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamResponse {
    #[serde(default)]
    ticket: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CommitRequest<'a> {
    ticket: String,
    file_name: &'a str,
    sha1: String,
    modified_at_epoch: i64,
    quality: UploadQuality,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommitResponse {
    #[serde(default)]
    media_key: String,
}

// ---------------------------------------------------------------------------
// Streaming upload body
// ---------------------------------------------------------------------------

/// Counts bytes as they leave the local reader, forwards them to the
/// progress sink, and checks cancellation every
/// [`CANCEL_CHECK_INTERVAL`] bytes.
struct ProgressStream<S> {
    inner: S,
    sent: u64,
    total: u64,
    since_check: u64,
    attempt: u32,
    progress: ProgressFn,
    cancel: CancellationToken,
}

impl<S, B> Stream for ProgressStream<S>
where
    S: Stream<Item = Result<B, std::io::Error>> + Unpin,
    B: AsRef<[u8]>,
{
    type Item = Result<B, std::io::Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if this.since_check >= CANCEL_CHECK_INTERVAL {
            if this.cancel.is_cancelled() {
                return Poll::Ready(Some(Err(std::io::Error::new(
                    std::io::ErrorKind::Interrupted,
                    "upload cancelled",
                ))));
            }
            this.since_check = 0;
        }

        match Pin::new(&mut this.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                let n = chunk.as_ref().len() as u64;
                this.sent += n;
                this.since_check += n;
                (this.progress)(this.sent, this.total, this.attempt);
                Poll::Ready(Some(Ok(chunk)))
            }
            other => other,
        }
    }
}
