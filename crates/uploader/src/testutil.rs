//! Scriptable in-memory remote service for pipeline and manager tests.

use std::path::PathBuf;
use std::sync::Mutex;

use tokio_util::sync::CancellationToken;

use photoup_api::{
    ApiError, ApiFuture, CommitTicket, FileDigest, ProgressFn, RemoteApi, UploadSlot,
};

/// Records every remote call and answers according to its flags.
#[derive(Default)]
pub struct MockApi {
    calls: Mutex<Vec<String>>,
    /// `Some(key)` makes every duplicate lookup a hit.
    pub duplicate_key: Option<String>,
    pub lookup_fails: bool,
    pub slot_fails: bool,
    pub upload_fails: bool,
    /// Park the upload until the batch is cancelled.
    pub upload_waits_for_cancel: bool,
    pub commit_fails: bool,
    /// Media key returned by commit; empty string models a rejection.
    pub commit_key: String,
}

impl MockApi {
    pub fn new() -> Self {
        Self {
            commit_key: "mk-test".into(),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, name: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| *c == name)
            .count()
    }

    fn record(&self, call: &str) {
        self.calls.lock().unwrap().push(call.to_string());
    }

    fn server_error() -> ApiError {
        ApiError::Api {
            status: 500,
            body: "mock failure".into(),
        }
    }
}

impl RemoteApi for MockApi {
    fn find_by_hash(&self, _digest: FileDigest) -> ApiFuture<'_, Option<String>> {
        self.record("lookup");
        Box::pin(async move {
            if self.lookup_fails {
                Err(Self::server_error())
            } else {
                Ok(self.duplicate_key.clone())
            }
        })
    }

    fn request_upload_slot(
        &self,
        _digest: FileDigest,
        _size_bytes: u64,
    ) -> ApiFuture<'_, UploadSlot> {
        self.record("slot");
        Box::pin(async move {
            if self.slot_fails {
                Err(Self::server_error())
            } else {
                Ok(UploadSlot {
                    id: "slot-1".into(),
                })
            }
        })
    }

    fn stream_upload(
        &self,
        path: PathBuf,
        _slot: UploadSlot,
        progress: ProgressFn,
        cancel: CancellationToken,
    ) -> ApiFuture<'_, CommitTicket> {
        self.record("upload");
        Box::pin(async move {
            if self.upload_waits_for_cancel {
                cancel.cancelled().await;
                return Err(ApiError::Cancelled);
            }
            if cancel.is_cancelled() {
                return Err(ApiError::Cancelled);
            }
            let size = tokio::fs::metadata(&path).await.map(|m| m.len()).unwrap_or(0);
            progress(0, size, 1);
            progress(size, size, 1);
            if self.upload_fails {
                Err(Self::server_error())
            } else {
                Ok(CommitTicket {
                    token: "ticket-1".into(),
                })
            }
        })
    }

    fn commit(
        &self,
        _ticket: CommitTicket,
        _file_name: String,
        _digest: FileDigest,
        _mod_time: i64,
    ) -> ApiFuture<'_, String> {
        self.record("commit");
        Box::pin(async move {
            if self.commit_fails {
                Err(Self::server_error())
            } else {
                Ok(self.commit_key.clone())
            }
        })
    }
}
