//! Input scanning and media file selection.
//!
//! Turns the mixed file/directory paths a user hands in into the flat
//! list of upload tasks, optionally filtering out formats the remote
//! library would reject.

use std::path::{Path, PathBuf};

use crate::UploadError;

/// Photo formats the remote library accepts, including camera RAW.
const PHOTO_FORMATS: &[&str] = &[
    "avif", "bmp", "gif", "heic", "ico", "jpg", "jpeg", "png", "tiff", "webp", "cr2", "cr3",
    "nef", "arw", "orf", "raf", "rw2", "pef", "sr2", "dng",
];

/// Video formats the remote library accepts.
const VIDEO_FORMATS: &[&str] = &[
    "3gp", "3g2", "asf", "avi", "divx", "m2t", "m2ts", "m4v", "mkv", "mmv", "mod", "mov", "mp4",
    "mpg", "mpeg", "mts", "tod", "wmv", "ts",
];

/// Case-insensitive extension check against the supported photo and
/// video formats. Files without an extension are unsupported.
pub fn is_supported_media(path: &Path) -> bool {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return false;
    };
    let ext = ext.to_ascii_lowercase();
    PHOTO_FORMATS.contains(&ext.as_str()) || VIDEO_FORMATS.contains(&ext.as_str())
}

/// Expands the given paths into a sorted list of files to upload.
///
/// Directories are expanded (recursively when `recursive` is set);
/// plain files are taken as-is. With `filter_unsupported`, files
/// whose extension is not a supported media format are dropped. An
/// unreadable input path fails the whole scan.
pub fn collect_upload_tasks(
    inputs: &[PathBuf],
    recursive: bool,
    filter_unsupported: bool,
) -> Result<Vec<PathBuf>, UploadError> {
    let mut tasks = Vec::new();

    for input in inputs {
        let meta = std::fs::metadata(input)?;
        if meta.is_dir() {
            walk_dir(input, recursive, &mut |path| {
                if !filter_unsupported || is_supported_media(&path) {
                    tasks.push(path);
                }
            })?;
        } else if !filter_unsupported || is_supported_media(input) {
            // Explicitly named files still go through the filter so a
            // directory drop and a file drop behave the same way.
            tasks.push(input.clone());
        }
    }

    tasks.sort();
    tasks.dedup();
    Ok(tasks)
}

fn walk_dir(
    dir: &Path,
    recursive: bool,
    visit: &mut impl FnMut(PathBuf),
) -> Result<(), UploadError> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            if recursive {
                walk_dir(&path, recursive, visit)?;
            }
        } else {
            visit(path);
        }
    }
    Ok(())
}
