//! Client for the photoup media service.
//!
//! Covers the four remote operations the upload pipeline needs
//! (duplicate lookup, upload-slot acquisition, streamed upload with
//! retry, commit) plus the shared bearer-token cache that backs them.

pub mod auth;
pub mod client;
pub mod http;
pub mod retry;
pub mod types;

pub use auth::{AuthProvider, HttpAuthProvider, TokenCache};
pub use client::{Client, ClientConfig, ProgressFn, RemoteApi};
pub use retry::{RetryPolicy, is_retryable};
pub use types::{AuthToken, CommitTicket, FileDigest, UploadQuality, UploadSlot};

use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by [`RemoteApi`] and [`AuthProvider`] methods.
pub type ApiFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ApiError>> + Send + 'a>>;

/// Errors produced by the remote service client.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("auth refresh failed: {0}")]
    Auth(String),

    #[error("response missing {0}")]
    MissingField(&'static str),

    #[error("upload failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<ApiError>,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("cancelled")]
    Cancelled,
}
