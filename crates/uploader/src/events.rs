//! Events emitted by the upload manager.
//!
//! Consumers (the CLI, a UI) receive these over an mpsc channel.
//! Worker status updates are lossy under backpressure; per-file
//! results and batch lifecycle events are always delivered.

use std::path::PathBuf;

use serde::Serialize;

/// Where a worker currently is in a file's upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStage {
    Idle,
    Hashing,
    Checking,
    Uploading,
    Finalizing,
    Completed,
    Error,
}

impl UploadStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadStage::Idle => "idle",
            UploadStage::Hashing => "hashing",
            UploadStage::Checking => "checking",
            UploadStage::Uploading => "uploading",
            UploadStage::Finalizing => "finalizing",
            UploadStage::Completed => "completed",
            UploadStage::Error => "error",
        }
    }
}

/// Snapshot of one worker's current activity. Purely observational;
/// nothing in the pipeline reads these back.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerStatus {
    pub worker_id: usize,
    pub stage: UploadStage,
    pub file_path: PathBuf,
    pub file_name: String,
    /// Informational detail, e.g. a non-fatal lookup failure.
    pub message: String,
    pub bytes_uploaded: u64,
    pub bytes_total: u64,
    /// 1-based upload attempt, 0 outside the uploading stage.
    pub attempt: u32,
}

impl WorkerStatus {
    pub fn idle(worker_id: usize) -> Self {
        Self {
            worker_id,
            stage: UploadStage::Idle,
            file_path: PathBuf::new(),
            file_name: String::new(),
            message: String::new(),
            bytes_uploaded: 0,
            bytes_total: 0,
            attempt: 0,
        }
    }
}

/// Terminal state of one file's upload task.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum TaskOutcome {
    /// Streamed and committed; the library assigned a media key.
    Uploaded {
        media_key: String,
        /// Post-upload local delete failure, when deletion was asked for.
        cleanup_error: Option<String>,
    },
    /// The library already had this content.
    Duplicate {
        media_key: String,
        cleanup_error: Option<String>,
    },
    Canceled,
    Failed {
        error: String,
    },
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Uploaded { .. } | TaskOutcome::Duplicate { .. })
    }
}

/// Exactly one of these is emitted per scanned file.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileResult {
    pub path: PathBuf,
    #[serde(flatten)]
    pub outcome: TaskOutcome,
}

/// Counts for a finished (or stopped) batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub uploaded: usize,
    pub duplicates: usize,
    pub failed: usize,
    pub canceled: usize,
}

impl BatchSummary {
    pub fn record(&mut self, outcome: &TaskOutcome) {
        match outcome {
            TaskOutcome::Uploaded { .. } => self.uploaded += 1,
            TaskOutcome::Duplicate { .. } => self.duplicates += 1,
            TaskOutcome::Canceled => self.canceled += 1,
            TaskOutcome::Failed { .. } => self.failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.uploaded + self.duplicates + self.failed + self.canceled
    }
}

/// Batch lifecycle and progress stream.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum UploadEvent {
    /// A batch began. `total_bytes` is 0 here; sizes are summed in
    /// the background and arrive as a separate [`UploadEvent::TotalBytes`].
    BatchStarted {
        total_files: usize,
        total_bytes: u64,
    },
    /// Late-arriving sum of all file sizes in the batch.
    TotalBytes { total_bytes: u64 },
    Worker(WorkerStatus),
    File(FileResult),
    BatchStopped(BatchSummary),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_strings() {
        assert_eq!(UploadStage::Idle.as_str(), "idle");
        assert_eq!(UploadStage::Uploading.as_str(), "uploading");
        assert_eq!(UploadStage::Error.as_str(), "error");
    }

    #[test]
    fn summary_records_outcomes() {
        let mut summary = BatchSummary::default();
        summary.record(&TaskOutcome::Uploaded {
            media_key: "mk".into(),
            cleanup_error: None,
        });
        summary.record(&TaskOutcome::Duplicate {
            media_key: "mk".into(),
            cleanup_error: None,
        });
        summary.record(&TaskOutcome::Canceled);
        summary.record(&TaskOutcome::Failed {
            error: "boom".into(),
        });

        assert_eq!(summary.uploaded, 1);
        assert_eq!(summary.duplicates, 1);
        assert_eq!(summary.canceled, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.total(), 4);
    }

    #[test]
    fn events_serialize_tagged() {
        let event = UploadEvent::BatchStarted {
            total_files: 3,
            total_bytes: 0,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "batchStarted");
        assert_eq!(json["totalFiles"], 3);

        let event = UploadEvent::File(FileResult {
            path: PathBuf::from("/p/a.jpg"),
            outcome: TaskOutcome::Failed {
                error: "boom".into(),
            },
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "file");
        assert_eq!(json["status"], "failed");
        assert_eq!(json["error"], "boom");
    }
}
