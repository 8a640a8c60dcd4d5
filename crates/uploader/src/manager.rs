//! Batch orchestration over a bounded worker pool.
//!
//! The manager owns the event channel and the batch-wide cancellation
//! token. One batch runs at a time; workers pull file tasks from a
//! shared queue until it is empty or the batch is cancelled. Every
//! scanned file ends up with exactly one [`FileResult`], including
//! files no worker ever claimed.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::UploadConfig;
use crate::events::{BatchSummary, FileResult, TaskOutcome, UploadEvent, WorkerStatus};
use crate::pipeline::{StatusFn, UploadPipeline};
use crate::scan;
use crate::UploadError;
use photoup_api::RemoteApi;

/// Event channel capacity. Worker status updates are sent lossily,
/// so a slow consumer stalls result delivery but never the workers'
/// progress reporting.
const EVENT_CHANNEL_CAPACITY: usize = 256;

pub struct UploadManager {
    api: Arc<dyn RemoteApi>,
    config: UploadConfig,
    events_tx: mpsc::Sender<UploadEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<UploadEvent>>>,
    cancel: Mutex<CancellationToken>,
    running: AtomicBool,
}

impl UploadManager {
    pub fn new(api: Arc<dyn RemoteApi>, config: UploadConfig) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            api,
            config,
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            cancel: Mutex::new(CancellationToken::new()),
            running: AtomicBool::new(false),
        }
    }

    /// Takes the event receiver. Returns `None` after the first call.
    pub fn take_events(&self) -> Option<mpsc::Receiver<UploadEvent>> {
        self.events_rx.lock().unwrap().take()
    }

    /// Requests cancellation of the in-flight batch. In-progress
    /// streams stop at their next check; unclaimed tasks resolve to
    /// [`TaskOutcome::Canceled`].
    pub fn cancel(&self) {
        self.cancel.lock().unwrap().cancel();
    }

    /// Runs one batch over `inputs`. A second call while a batch is
    /// in flight is a no-op. Scanning nothing uploads nothing and
    /// emits no events.
    pub async fn run(&self, inputs: &[PathBuf]) -> Result<BatchSummary, UploadError> {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("upload batch already running, ignoring request");
            return Ok(BatchSummary::default());
        }
        let result = self.run_batch(inputs).await;
        self.running.store(false, Ordering::SeqCst);
        result
    }

    async fn run_batch(&self, inputs: &[PathBuf]) -> Result<BatchSummary, UploadError> {
        // Fresh token per batch so an earlier cancel does not leak in.
        let cancel = {
            let mut guard = self.cancel.lock().unwrap();
            *guard = CancellationToken::new();
            guard.clone()
        };

        let tasks = scan::collect_upload_tasks(
            inputs,
            self.config.recursive,
            self.config.filter_unsupported,
        )?;
        if tasks.is_empty() {
            debug!("nothing to upload");
            return Ok(BatchSummary::default());
        }

        let workers = self.config.clamped_concurrency(tasks.len());
        info!(files = tasks.len(), workers, "starting upload batch");
        let _ = self
            .events_tx
            .send(UploadEvent::BatchStarted {
                total_files: tasks.len(),
                total_bytes: 0,
            })
            .await;

        // Size stat-ing a large batch can be slow on network mounts,
        // so the total is summed off the hot path and delivered late.
        {
            let events_tx = self.events_tx.clone();
            let paths = tasks.clone();
            tokio::spawn(async move {
                let mut total_bytes: u64 = 0;
                for path in &paths {
                    if let Ok(meta) = tokio::fs::metadata(path).await {
                        total_bytes += meta.len();
                    }
                }
                let _ = events_tx.send(UploadEvent::TotalBytes { total_bytes }).await;
            });
        }

        let queue = Arc::new(Mutex::new(VecDeque::from(tasks)));
        let summary = Arc::new(Mutex::new(BatchSummary::default()));
        let pipeline = Arc::new(UploadPipeline::new(
            Arc::clone(&self.api),
            self.config.clone(),
            cancel.clone(),
        ));

        let mut handles = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let pipeline = Arc::clone(&pipeline);
            let queue = Arc::clone(&queue);
            let summary = Arc::clone(&summary);
            let cancel = cancel.clone();
            let events_tx = self.events_tx.clone();

            handles.push(tokio::spawn(async move {
                let status: StatusFn = {
                    let events_tx = events_tx.clone();
                    Arc::new(move |s: WorkerStatus| {
                        // Lossy on purpose: dropping a progress frame
                        // beats stalling the upload behind a slow
                        // consumer.
                        let _ = events_tx.try_send(UploadEvent::Worker(s));
                    })
                };

                loop {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let Some(path) = queue.lock().unwrap().pop_front() else {
                        break;
                    };

                    let outcome = pipeline.run(worker_id, &path, Arc::clone(&status)).await;
                    summary.lock().unwrap().record(&outcome);
                    let _ = events_tx
                        .send(UploadEvent::File(FileResult { path, outcome }))
                        .await;
                    status(WorkerStatus::idle(worker_id));
                }
            }));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "upload worker panicked");
            }
        }

        // Cancellation can leave tasks no worker ever claimed; they
        // still owe the consumer a result.
        loop {
            let Some(path) = queue.lock().unwrap().pop_front() else {
                break;
            };
            let outcome = TaskOutcome::Canceled;
            summary.lock().unwrap().record(&outcome);
            let _ = self
                .events_tx
                .send(UploadEvent::File(FileResult { path, outcome }))
                .await;
        }

        let summary = *summary.lock().unwrap();
        info!(
            uploaded = summary.uploaded,
            duplicates = summary.duplicates,
            failed = summary.failed,
            canceled = summary.canceled,
            "upload batch stopped"
        );
        let _ = self.events_tx.send(UploadEvent::BatchStopped(summary)).await;
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockApi;
    use std::time::Duration;

    fn media_files(dir: &tempfile::TempDir, names: &[&str]) -> Vec<PathBuf> {
        names
            .iter()
            .map(|name| {
                let path = dir.path().join(name);
                std::fs::write(&path, name.as_bytes()).unwrap();
                path
            })
            .collect()
    }

    fn drain(rx: &mut mpsc::Receiver<UploadEvent>) -> Vec<UploadEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn batch_uploads_every_file() {
        let dir = tempfile::tempdir().unwrap();
        let files = media_files(&dir, &["a.jpg", "b.png", "c.mp4"]);
        let total: u64 = files
            .iter()
            .map(|p| std::fs::metadata(p).unwrap().len())
            .sum();

        let manager = UploadManager::new(Arc::new(MockApi::new()), UploadConfig::default());
        let mut rx = manager.take_events().unwrap();

        let summary = manager.run(&files).await.unwrap();
        assert_eq!(summary.uploaded, 3);
        assert_eq!(summary.total(), 3);

        // Give the background size sum a moment to land.
        tokio::time::sleep(Duration::from_millis(100)).await;
        let events = drain(&mut rx);

        assert!(matches!(
            events.first(),
            Some(UploadEvent::BatchStarted {
                total_files: 3,
                total_bytes: 0
            })
        ));
        assert!(events.iter().any(
            |e| matches!(e, UploadEvent::TotalBytes { total_bytes } if *total_bytes == total)
        ));
        let results = events
            .iter()
            .filter(|e| matches!(e, UploadEvent::File(_)))
            .count();
        assert_eq!(results, 3);
        assert!(events
            .iter()
            .any(|e| matches!(e, UploadEvent::BatchStopped(s) if s.uploaded == 3)));
    }

    #[tokio::test]
    async fn cancel_resolves_every_task() {
        let dir = tempfile::tempdir().unwrap();
        let names: Vec<String> = (0..10).map(|i| format!("img{i:02}.jpg")).collect();
        let names: Vec<&str> = names.iter().map(String::as_str).collect();
        let files = media_files(&dir, &names);

        let mut mock = MockApi::new();
        mock.upload_waits_for_cancel = true;
        let api = Arc::new(mock);
        let config = UploadConfig {
            concurrency: 3,
            ..UploadConfig::default()
        };
        let manager = Arc::new(UploadManager::new(
            Arc::clone(&api) as Arc<dyn RemoteApi>,
            config,
        ));
        let mut rx = manager.take_events().unwrap();

        let run = tokio::spawn({
            let manager = Arc::clone(&manager);
            let files = files.clone();
            async move { manager.run(&files).await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        manager.cancel();

        let summary = run.await.unwrap().unwrap();
        assert_eq!(summary.total(), 10, "every task owes a result");
        assert_eq!(summary.uploaded, 0);
        assert_eq!(summary.canceled, 10);
        assert_eq!(api.call_count("commit"), 0, "no commit after cancel");

        let events = drain(&mut rx);
        let results = events
            .iter()
            .filter(|e| matches!(e, UploadEvent::File(_)))
            .count();
        assert_eq!(results, 10);
    }

    #[tokio::test]
    async fn one_idle_status_per_finished_task() {
        use crate::events::UploadStage;

        let dir = tempfile::tempdir().unwrap();
        let files = media_files(&dir, &["a.jpg", "b.jpg"]);
        let config = UploadConfig {
            concurrency: 1,
            ..UploadConfig::default()
        };
        let manager = UploadManager::new(Arc::new(MockApi::new()), config);
        let mut rx = manager.take_events().unwrap();

        manager.run(&files).await.unwrap();

        let events = drain(&mut rx);
        let idles = events
            .iter()
            .filter(|e| matches!(e, UploadEvent::Worker(s) if s.stage == UploadStage::Idle))
            .count();
        assert_eq!(idles, 2, "exactly one idle snapshot per finished task");
    }

    #[tokio::test]
    async fn second_run_while_running_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let files = media_files(&dir, &["a.jpg"]);

        let mut mock = MockApi::new();
        mock.upload_waits_for_cancel = true;
        let manager = Arc::new(UploadManager::new(
            Arc::new(mock) as Arc<dyn RemoteApi>,
            UploadConfig::default(),
        ));
        let mut rx = manager.take_events().unwrap();

        let run = tokio::spawn({
            let manager = Arc::clone(&manager);
            let files = files.clone();
            async move { manager.run(&files).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let second = manager.run(&files).await.unwrap();
        assert_eq!(second, BatchSummary::default());

        manager.cancel();
        run.await.unwrap().unwrap();

        let events = drain(&mut rx);
        let starts = events
            .iter()
            .filter(|e| matches!(e, UploadEvent::BatchStarted { .. }))
            .count();
        assert_eq!(starts, 1, "overlapping run must not start a batch");
    }

    #[tokio::test]
    async fn empty_scan_emits_nothing() {
        let dir = tempfile::tempdir().unwrap();
        media_files(&dir, &["notes.txt"]);

        let manager = UploadManager::new(Arc::new(MockApi::new()), UploadConfig::default());
        let mut rx = manager.take_events().unwrap();

        let summary = manager.run(&[dir.path().to_path_buf()]).await.unwrap();
        assert_eq!(summary, BatchSummary::default());
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn failed_and_succeeded_mix() {
        let dir = tempfile::tempdir().unwrap();
        let files = media_files(&dir, &["a.jpg", "b.jpg"]);

        let mut mock = MockApi::new();
        mock.commit_fails = true;
        let manager = UploadManager::new(Arc::new(mock), UploadConfig::default());
        let _rx = manager.take_events().unwrap();

        let summary = manager.run(&files).await.unwrap();
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.total(), 2);
    }

    #[test]
    fn take_events_only_once() {
        let manager = UploadManager::new(Arc::new(MockApi::new()), UploadConfig::default());
        assert!(manager.take_events().is_some());
        assert!(manager.take_events().is_none());
    }
}
