//! Per-file upload state machine.
//!
//! Each file moves through hashing, duplicate checking, streaming,
//! and finalizing. Cancellation is checked before every remote
//! operation; in particular a cancelled batch never commits, so a
//! half-finished stream cannot turn into a library item after the
//! user asked to stop.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::UNIX_EPOCH;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::UploadConfig;
use crate::events::{TaskOutcome, UploadStage, WorkerStatus};
use crate::hasher;
use crate::progress::ProgressThrottle;
use crate::UploadError;
use photoup_api::{ApiError, ProgressFn, RemoteApi};

/// Worker status sink.
pub type StatusFn = Arc<dyn Fn(WorkerStatus) + Send + Sync>;

pub struct UploadPipeline {
    api: Arc<dyn RemoteApi>,
    config: UploadConfig,
    cancel: CancellationToken,
}

impl UploadPipeline {
    pub fn new(api: Arc<dyn RemoteApi>, config: UploadConfig, cancel: CancellationToken) -> Self {
        Self {
            api,
            config,
            cancel,
        }
    }

    /// Runs one file to a terminal outcome. Never returns an error:
    /// failures become [`TaskOutcome::Failed`] and cancellation
    /// becomes [`TaskOutcome::Canceled`].
    pub async fn run(&self, worker_id: usize, path: &Path, status: StatusFn) -> TaskOutcome {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();

        match self.run_inner(worker_id, path, &file_name, &status).await {
            Ok(outcome) => outcome,
            Err(UploadError::Cancelled) => TaskOutcome::Canceled,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "upload task failed");
                status(WorkerStatus {
                    worker_id,
                    stage: UploadStage::Error,
                    file_path: path.to_path_buf(),
                    file_name,
                    message: e.to_string(),
                    bytes_uploaded: 0,
                    bytes_total: 0,
                    attempt: 0,
                });
                TaskOutcome::Failed {
                    error: e.to_string(),
                }
            }
        }
    }

    async fn run_inner(
        &self,
        worker_id: usize,
        path: &Path,
        file_name: &str,
        status: &StatusFn,
    ) -> Result<TaskOutcome, UploadError> {
        let emit = |stage: UploadStage, sent: u64, total: u64, attempt: u32, message: &str| {
            status(WorkerStatus {
                worker_id,
                stage,
                file_path: path.to_path_buf(),
                file_name: file_name.to_string(),
                message: message.to_string(),
                bytes_uploaded: sent,
                bytes_total: total,
                attempt,
            });
        };

        if self.cancel.is_cancelled() {
            return Ok(TaskOutcome::Canceled);
        }
        emit(UploadStage::Hashing, 0, 0, 0, "Hashing...");
        let digest = hasher::digest_file(path, &self.cancel).await?;

        let meta = tokio::fs::metadata(path).await?;
        let size = meta.len();
        let mod_time = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        debug!(path = %path.display(), digest = %digest, size, "file hashed");

        if !self.config.force_upload {
            if self.cancel.is_cancelled() {
                return Ok(TaskOutcome::Canceled);
            }
            emit(UploadStage::Checking, 0, size, 0, "Checking library...");
            match self.api.find_by_hash(digest).await {
                Ok(Some(media_key)) => {
                    debug!(path = %path.display(), media_key, "duplicate, skipping upload");
                    let cleanup_error = self.maybe_delete(path).await;
                    emit(UploadStage::Completed, size, size, 0, "Already in library");
                    return Ok(TaskOutcome::Duplicate {
                        media_key,
                        cleanup_error,
                    });
                }
                Ok(None) => {}
                // Lookup is an optimization; a failed check falls
                // back to uploading, which dedups server-side anyway.
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "duplicate lookup failed, uploading anyway");
                    emit(
                        UploadStage::Checking,
                        0,
                        size,
                        0,
                        &format!("duplicate lookup failed: {e}"),
                    );
                }
            }
        }

        if self.cancel.is_cancelled() {
            return Ok(TaskOutcome::Canceled);
        }
        emit(UploadStage::Uploading, 0, size, 1, "Uploading...");
        let slot = self
            .api
            .request_upload_slot(digest, size)
            .await
            .map_err(UploadError::Slot)?;

        let last_attempt = Arc::new(AtomicU32::new(1));
        let throttle = {
            let status = Arc::clone(status);
            let file_path = path.to_path_buf();
            let file_name = file_name.to_string();
            ProgressThrottle::new(
                self.config.progress_interval,
                Box::new(move |sent, total, attempt| {
                    let message = if attempt > 1 {
                        format!("Retrying... (attempt {attempt})")
                    } else {
                        "Uploading...".to_string()
                    };
                    status(WorkerStatus {
                        worker_id,
                        stage: UploadStage::Uploading,
                        file_path: file_path.clone(),
                        file_name: file_name.clone(),
                        message,
                        bytes_uploaded: sent,
                        bytes_total: total,
                        attempt,
                    });
                }),
            )
        };
        let progress: ProgressFn = {
            let last_attempt = Arc::clone(&last_attempt);
            Arc::new(move |sent, total, attempt| {
                last_attempt.store(attempt, Ordering::Relaxed);
                throttle.report(sent, total, attempt);
            })
        };

        let ticket = self
            .api
            .stream_upload(path.to_path_buf(), slot, progress, self.cancel.clone())
            .await
            .map_err(|e| match e {
                ApiError::Cancelled => UploadError::Cancelled,
                e => UploadError::Stream(e),
            })?;

        // The stream finished, but a cancel that raced it must still
        // win: no commit after cancellation.
        if self.cancel.is_cancelled() {
            return Ok(TaskOutcome::Canceled);
        }
        let attempt = last_attempt.load(Ordering::Relaxed);
        emit(UploadStage::Finalizing, size, size, attempt, "Committing upload...");
        let media_key = self
            .api
            .commit(ticket, file_name.to_string(), digest, mod_time)
            .await
            .map_err(UploadError::Commit)?;
        if media_key.is_empty() {
            return Err(UploadError::Commit(ApiError::MissingField("mediaKey")));
        }

        let cleanup_error = self.maybe_delete(path).await;
        emit(UploadStage::Completed, size, size, attempt, "Completed");
        Ok(TaskOutcome::Uploaded {
            media_key,
            cleanup_error,
        })
    }

    /// Removes the local file after a successful upload or duplicate
    /// hit, when configured. Deletion failures never fail the task.
    async fn maybe_delete(&self, path: &Path) -> Option<String> {
        if !self.config.delete_after_upload {
            return None;
        }
        match tokio::fs::remove_file(path).await {
            Ok(()) => {
                debug!(path = %path.display(), "deleted local file after upload");
                None
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to delete local file");
                Some(e.to_string())
            }
        }
    }
}
