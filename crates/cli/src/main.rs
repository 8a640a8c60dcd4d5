//! photoup command line entry point.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use photoup_api::{Client, ClientConfig, UploadQuality};
use photoup_upload::{
    BatchSummary, TaskOutcome, UploadConfig, UploadEvent, UploadManager,
};

#[derive(Parser)]
#[command(name = "photoup", version, about = "Upload photos and videos to your media library")]
struct Args {
    /// Files or directories to upload.
    #[arg(required = true)]
    paths: Vec<PathBuf>,

    /// Concurrent upload workers.
    #[arg(short = 'j', long, default_value_t = 3)]
    concurrency: usize,

    /// Skip the duplicate check and upload unconditionally.
    #[arg(long)]
    force_upload: bool,

    /// Delete local files after a successful upload.
    #[arg(long)]
    delete: bool,

    /// Descend into subdirectories.
    #[arg(short, long)]
    recursive: bool,

    /// Upload every file, even unsupported formats.
    #[arg(long)]
    all_files: bool,

    /// Commit uploads into the storage-saver tier instead of
    /// keeping originals.
    #[arg(long)]
    saver: bool,

    /// Credentials file, one Key=Value pair per line.
    #[arg(long)]
    credentials: PathBuf,

    /// HTTP(S) proxy URL.
    #[arg(long)]
    proxy: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    match run(args).await {
        Ok(summary) if summary.failed == 0 => ExitCode::SUCCESS,
        Ok(summary) => {
            error!(failed = summary.failed, "some uploads failed");
            ExitCode::FAILURE
        }
        Err(e) => {
            error!(error = %e, "upload aborted");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<BatchSummary, Box<dyn std::error::Error>> {
    let credentials = read_credentials(&args.credentials)?;

    let client_config = ClientConfig {
        proxy: args.proxy.clone(),
        quality: if args.saver {
            UploadQuality::Saver
        } else {
            UploadQuality::Original
        },
        ..ClientConfig::default()
    };
    let client = Client::with_credentials(client_config, credentials)?;

    let upload_config = UploadConfig {
        concurrency: args.concurrency,
        force_upload: args.force_upload,
        delete_after_upload: args.delete,
        recursive: args.recursive,
        filter_unsupported: !args.all_files,
        ..UploadConfig::default()
    };

    let manager = Arc::new(UploadManager::new(Arc::new(client), upload_config));
    let mut events = manager
        .take_events()
        .ok_or("event stream already taken")?;

    // First Ctrl-C cancels the batch; in-flight work winds down and
    // every file still gets a result.
    let interrupt_target = Arc::downgrade(&manager);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling batch");
            if let Some(manager) = interrupt_target.upgrade() {
                manager.cancel();
            }
        }
    });

    let renderer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            render_event(event);
        }
    });

    let summary = manager.run(&args.paths).await?;
    if summary == BatchSummary::default() {
        info!("no supported media files found");
    }

    // Dropping the manager closes the event channel, letting the
    // renderer drain the tail and exit.
    drop(manager);
    let _ = renderer.await;

    Ok(summary)
}

fn render_event(event: UploadEvent) {
    match event {
        UploadEvent::BatchStarted { total_files, .. } => {
            info!(total_files, "batch started");
        }
        UploadEvent::TotalBytes { total_bytes } => {
            info!(total_bytes, "batch size known");
        }
        UploadEvent::Worker(s) => {
            debug!(
                worker = s.worker_id,
                stage = s.stage.as_str(),
                file = %s.file_name,
                message = %s.message,
                uploaded = s.bytes_uploaded,
                total = s.bytes_total,
                attempt = s.attempt,
                "worker status"
            );
        }
        UploadEvent::File(result) => match result.outcome {
            TaskOutcome::Uploaded {
                media_key,
                cleanup_error,
            } => {
                info!(path = %result.path.display(), media_key, "uploaded");
                if let Some(e) = cleanup_error {
                    warn!(path = %result.path.display(), error = %e, "local delete failed");
                }
            }
            TaskOutcome::Duplicate { media_key, .. } => {
                info!(path = %result.path.display(), media_key, "already in library");
            }
            TaskOutcome::Canceled => {
                warn!(path = %result.path.display(), "canceled");
            }
            TaskOutcome::Failed { error } => {
                error!(path = %result.path.display(), error, "failed");
            }
        },
        UploadEvent::BatchStopped(s) => {
            info!(
                uploaded = s.uploaded,
                duplicates = s.duplicates,
                failed = s.failed,
                canceled = s.canceled,
                "batch finished"
            );
        }
    }
}

/// Reads a credentials file of `Key=Value` lines. Blank lines and
/// `#` comments are skipped.
fn read_credentials(path: &Path) -> Result<Vec<(String, String)>, Box<dyn std::error::Error>> {
    let body = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read credentials file {}: {e}", path.display()))?;

    let mut pairs = Vec::new();
    for line in body.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            return Err(format!("malformed credentials line: {line}").into());
        };
        pairs.push((key.trim().to_string(), value.trim().to_string()));
    }

    if pairs.is_empty() {
        return Err(format!("credentials file {} is empty", path.display()).into());
    }
    Ok(pairs)
}
