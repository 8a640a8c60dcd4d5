//! Concurrent media upload pipeline.
//!
//! Takes a set of local photo and video files, hashes them, skips
//! content the remote library already has, and streams the rest
//! through a bounded worker pool, reporting progress as events.

pub mod config;
pub mod events;
pub mod hasher;
pub mod manager;
pub mod pipeline;
pub mod progress;
pub mod scan;

#[cfg(test)]
pub(crate) mod testutil;

pub use config::UploadConfig;
pub use events::{BatchSummary, FileResult, TaskOutcome, UploadEvent, UploadStage, WorkerStatus};
pub use manager::UploadManager;
pub use pipeline::UploadPipeline;

use photoup_api::ApiError;

/// Errors that fail a single file's upload.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("hashing failed: {0}")]
    Hashing(String),

    #[error("slot acquisition failed: {0}")]
    Slot(#[source] ApiError),

    #[error("upload failed: {0}")]
    Stream(#[source] ApiError),

    #[error("commit failed: {0}")]
    Commit(#[source] ApiError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cancelled")]
    Cancelled,
}
