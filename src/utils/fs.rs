//! Small filesystem helpers shared by the recording session, the upload
//! session, and the hot-reload coordinator's quiescence probe.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Extensions that mark a file as "a recording is in progress" for the
/// hot-reload coordinator's quiescence check (spec.md §4.9, P6).
pub const RECORDING_SENTINEL_EXTENSIONS: &[&str] =
    &["mp4", "flv", "3gp", "webm", "mkv", "ts", "part"];

/// `true` if `path`'s extension is one of the finished-media sentinel
/// extensions (`RECORDING_SENTINEL_EXTENSIONS` minus the in-progress
/// `part` marker). Used to keep non-video files — chat sidecars, covers
/// — out of the upload session's file enumeration.
pub fn is_media_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| {
            RECORDING_SENTINEL_EXTENSIONS
                .iter()
                .filter(|sentinel| **sentinel != "part")
                .any(|sentinel| sentinel.eq_ignore_ascii_case(ext))
        })
}

/// `true` if `dir` contains any file whose extension is a recording
/// sentinel extension.
pub fn has_recording_in_progress(dir: &Path) -> std::io::Result<bool> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err),
    };
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if let Some(ext) = entry.path().extension().and_then(|e| e.to_str()) {
            if RECORDING_SENTINEL_EXTENSIONS
                .iter()
                .any(|sentinel| sentinel.eq_ignore_ascii_case(ext))
            {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

/// Atomically rename a `.part` (or any) temporary path to its final
/// name. Used both by the segmenting recorder (finished segment) and by
/// the upload session (dropping a stray `.part` suffix before upload).
pub async fn finalize_rename(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::rename(from, to).await?;
    Ok(())
}

/// List every regular file directly under `dir` whose file name
/// contains `needle`, sorted by file-creation time (falling back to
/// modified time where creation time isn't available on this
/// filesystem).
pub async fn list_files_containing(dir: &Path, needle: &str) -> Result<Vec<PathBuf>> {
    let mut matches = Vec::new();
    let mut read_dir = match tokio::fs::read_dir(dir).await {
        Ok(rd) => rd,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(matches),
        Err(err) => return Err(Error::Io(err)),
    };

    while let Some(entry) = read_dir.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.contains(needle) {
            matches.push(entry.path());
        }
    }

    let mut with_times = Vec::with_capacity(matches.len());
    for path in matches {
        let meta = tokio::fs::metadata(&path).await?;
        let created = meta
            .created()
            .or_else(|_| meta.modified())
            .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
        with_times.push((created, path));
    }
    with_times.sort_by_key(|(created, _)| *created);
    Ok(with_times.into_iter().map(|(_, path)| path).collect())
}
