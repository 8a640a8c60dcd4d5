//! Content hashing for dedup lookups and commit payloads.

use std::io::Read;
use std::path::Path;

use sha1::{Digest, Sha1};
use tokio_util::sync::CancellationToken;

use crate::UploadError;
use photoup_api::FileDigest;

/// Read size while hashing.
const HASH_BUF_SIZE: usize = 1024 * 1024;

/// Bytes hashed between cancellation checks. Large files take a
/// while, so hashing must notice cancellation without paying a check
/// per read.
const CANCEL_CHECK_INTERVAL: u64 = 64 * 1024 * 1024;

/// Computes the SHA-1 digest of `path` on a blocking thread.
///
/// The file is read sequentially in [`HASH_BUF_SIZE`] chunks and
/// cancellation is checked every [`CANCEL_CHECK_INTERVAL`] bytes.
pub async fn digest_file(
    path: &Path,
    cancel: &CancellationToken,
) -> Result<FileDigest, UploadError> {
    let path = path.to_path_buf();
    let cancel = cancel.clone();

    tokio::task::spawn_blocking(move || {
        if cancel.is_cancelled() {
            return Err(UploadError::Cancelled);
        }

        let mut file = std::fs::File::open(&path)?;
        let mut hasher = Sha1::new();
        let mut buf = vec![0u8; HASH_BUF_SIZE];
        let mut since_check: u64 = 0;

        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            since_check += n as u64;
            if since_check >= CANCEL_CHECK_INTERVAL {
                if cancel.is_cancelled() {
                    return Err(UploadError::Cancelled);
                }
                since_check = 0;
            }
        }

        Ok(FileDigest::from_bytes(hasher.finalize().into()))
    })
    .await
    .map_err(|e| UploadError::Hashing(format!("task join error: {e}")))?
}
