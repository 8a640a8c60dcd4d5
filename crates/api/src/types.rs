//! Value types shared between the client and the upload pipeline.

use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Serialize;

/// 20-byte SHA-1 content digest of a local file.
///
/// Used both as the dedup lookup key and as part of the commit
/// payload. Never mutated after computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileDigest([u8; 20]);

impl FileDigest {
    /// Digest length in bytes.
    pub const LEN: usize = 20;

    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Lowercase hex rendering (40 chars).
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Standard base64 rendering, as sent in wire payloads.
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.0)
    }
}

impl fmt::Display for FileDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Bearer token plus its expiry, as returned by the authorization
/// service. A token is usable iff `expires_at` is in the future.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthToken {
    pub value: String,
    /// Unix seconds.
    pub expires_at: i64,
}

/// Opaque destination for streamed upload bytes.
///
/// Short-lived; consumed exactly once by the streaming upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSlot {
    pub id: String,
}

/// Opaque proof of a completed byte stream, required by commit.
///
/// Consumed exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitTicket {
    pub token: String,
}

/// Storage tier requested when committing an upload.
///
/// `Original` keeps the bytes as uploaded; `Saver` asks the library
/// to transcode into its storage-saver tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum UploadQuality {
    #[default]
    Original,
    Saver,
}
