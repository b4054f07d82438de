//! Shared domain types that cross component boundaries.
//!
//! These are the "semantic types, not language names" of the data model:
//! streamer configuration, the hook-chain ABI, and the small value types
//! that flow through events and the persistence facade.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One step of a hook chain: `rm | {mv: dest_dir} | {run: shell_template}`.
///
/// `Run` receives its payload on stdin — JSON for pre/downloaded/segment
/// hooks, newline-separated absolute paths for postprocessor hooks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookStep {
    Rm,
    Mv { dest_dir: String },
    Run { shell: String },
}

/// An ordered list of hook steps.
pub type HookChain = Vec<HookStep>;

/// The per-streamer-key configuration entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamerEntry {
    /// Operator-chosen display name; filename-prefix variable, upload
    /// template binding, and grouping key.
    pub key: String,
    pub urls: Vec<String>,
    pub display_remark: String,
    pub filename_prefix: Option<String>,
    pub format_hint: Option<String>,
    pub upload_template_ref: Option<String>,
    #[serde(default)]
    pub preprocessor: HookChain,
    #[serde(default)]
    pub segment_processor: HookChain,
    #[serde(default)]
    pub segment_processor_parallel: bool,
    #[serde(default)]
    pub downloaded_processor: HookChain,
    /// `None` means "no postprocessor: delete every returned file and
    /// the cover". `Some(vec![])` is treated the same as `None` by the
    /// upload session (an explicitly empty chain still deletes).
    pub postprocessor: Option<HookChain>,

    /// Segmentation policy.
    pub segment_time: Option<String>,
    pub segment_size_bytes: Option<u64>,

    /// Seconds to wait before scanning for files on UPLOAD, to let a
    /// fresh DOWNLOAD claim the URL first.
    pub upload_delay_secs: Option<u64>,

    /// Bytes; files at or below this size are considered noise and
    /// deleted during upload-job enumeration rather than uploaded.
    pub filtering_threshold_bytes: u64,

    /// If true, a session does not loop back to polling after
    /// `record()` returns (one-shot download mode).
    #[serde(default)]
    pub is_download_mode: bool,
}

/// The in-flight recording session's identity and timing, handed to
/// `DOWNLOADED`/`UPLOAD` handlers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamInfo {
    pub streamer_key: String,
    pub url: String,
    pub title: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub cover_path: Option<PathBuf>,
    pub is_download_mode: bool,
    pub recording_id: i64,
}

/// A file discovered by the upload-job scanner, with its optional
/// danmaku sidecar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileInfo {
    pub video_path: PathBuf,
    pub danmaku_path: Option<PathBuf>,
}

impl FileInfo {
    /// Filename stem shared by the video and, if present, the sidecar.
    pub fn stem(&self) -> String {
        self.video_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// The per-URL scheduling state. A third, orthogonal signal (the
/// upload-in-flight counter) lives in `state::UrlStateTable` rather than
/// here, per the data model's `{Idle, Downloading}` + counter split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UrlState {
    Idle = 0,
    Downloading = 1,
}

/// Segmentation policy handed to the recorder. If both are `None` the
/// recorder falls back to an 8 GiB size cap (spec.md §4.7).
#[derive(Debug, Clone, Copy, Default)]
pub struct SegmentationPolicy {
    pub max_duration: Option<Duration>,
    pub max_bytes: Option<u64>,
}

impl SegmentationPolicy {
    pub const DEFAULT_MAX_BYTES: u64 = 8 * 1024 * 1024 * 1024;

    /// Apply the default 8 GiB cap if neither bound was configured.
    pub fn with_default_cap(mut self) -> Self {
        if self.max_duration.is_none() && self.max_bytes.is_none() {
            self.max_bytes = Some(Self::DEFAULT_MAX_BYTES);
        }
        self
    }
}

/// What a probe resolved about a live stream: the fields `record()`
/// needs plus enough identity to decide stream-URL stability (spec.md
/// §4.7's "stream has not restarted" check).
#[derive(Debug, Clone, Default)]
pub struct ProbeResult {
    pub is_live: bool,
    pub title: String,
    pub stream_url: Option<String>,
    pub quality: Option<String>,
    pub live_start_time: Option<DateTime<Utc>>,
    pub cover_url: Option<String>,
    pub headers: HashMap<String, String>,
}

/// Everything the recorder needs to start or resume writing segments.
#[derive(Debug, Clone)]
pub struct RecordRequest {
    pub url: String,
    pub stream_url: String,
    pub headers: HashMap<String, String>,
    /// Base path (no extension) for the next segment; the adapter
    /// appends its own extension and `.part` suffix as appropriate.
    pub output_base: PathBuf,
    pub segmentation: SegmentationPolicy,
}
