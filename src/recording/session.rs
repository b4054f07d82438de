//! C7: recording session — the probe/record/close lifecycle for one
//! `(streamer_key, url)` pair, driven by the `DOWNLOAD` handler (C10).
//!
//! Grounded in the teacher's session-loop shape (construct adapter,
//! probe, hand off to a recorder, react to segment completion) but
//! generalized to the three-recorder-variant contract collapsed behind
//! a single `DownloadAdapter::record` and to the spec's filename/
//! segmentation/stream-reuse rules.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{info, warn};

use super::filename;
use crate::domain::{ProbeResult, RecordRequest, SegmentationPolicy, StreamInfo, StreamerEntry};
use crate::error::{Error, Result};
use crate::persistence::RecordingStore;
use crate::plugin::PluginRegistry;

/// Bounded exponential backoff for probe retries once a session has
/// already started (so a transient network blip doesn't tear down and
/// recreate the recording row). Caps at 64s between attempts and gives
/// up after 8 consecutive failures, treating the stream as ended.
struct ProbeBackoff {
    attempt: u32,
}

impl ProbeBackoff {
    const MAX_ATTEMPTS: u32 = 8;

    fn new() -> Self {
        Self { attempt: 0 }
    }

    fn reset(&mut self) {
        self.attempt = 0;
    }

    fn exhausted(&self) -> bool {
        self.attempt >= Self::MAX_ATTEMPTS
    }

    async fn wait(&mut self) {
        let delay_ms = (1u64 << self.attempt.min(6)) * 1000;
        self.attempt += 1;
        let jitter_ms = (delay_ms as f64 * 0.25 * rand::random::<f64>()) as u64;
        tokio::time::sleep(StdDuration::from_millis(delay_ms + jitter_ms)).await;
    }
}

fn parse_hms(s: &str) -> Option<StdDuration> {
    let mut parts = s.split(':');
    let h: u64 = parts.next()?.parse().ok()?;
    let m: u64 = parts.next()?.parse().ok()?;
    let sec: u64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some(StdDuration::from_secs(h * 3600 + m * 60 + sec))
}

/// One run of the session drives zero or more probe/record rounds and
/// returns the finished `StreamInfo`, or `None` if the stream was never
/// observed live.
pub struct RecordingSession {
    entry: Arc<StreamerEntry>,
    streamer_key: String,
    url: String,
    adapter_name: String,
    registry: Arc<PluginRegistry>,
    store: Arc<dyn RecordingStore>,
    output_dir: PathBuf,
    cover_dir: PathBuf,
}

impl RecordingSession {
    pub fn new(
        entry: Arc<StreamerEntry>,
        streamer_key: String,
        url: String,
        adapter_name: String,
        registry: Arc<PluginRegistry>,
        store: Arc<dyn RecordingStore>,
        output_dir: PathBuf,
        cover_dir: PathBuf,
    ) -> Self {
        Self {
            entry,
            streamer_key,
            url,
            adapter_name,
            registry,
            store,
            output_dir,
            cover_dir,
        }
    }

    fn segmentation_policy(&self) -> SegmentationPolicy {
        SegmentationPolicy {
            max_duration: self.entry.segment_time.as_deref().and_then(parse_hms),
            max_bytes: self.entry.segment_size_bytes,
        }
        .with_default_cap()
    }

    fn resolve_stream_url(
        &self,
        probe: &ProbeResult,
        last_stream_url: Option<&str>,
        last_quality: Option<&str>,
        last_live_start: Option<DateTime<Utc>>,
    ) -> Result<String> {
        if let (Some(prev), Some(quality)) = (last_stream_url, last_quality) {
            let restarted = probe.live_start_time != last_live_start || probe.live_start_time.is_none();
            if quality == "source" && !restarted {
                return Ok(prev.to_string());
            }
        }
        probe.stream_url.clone().ok_or_else(|| {
            Error::probe(
                self.url.clone(),
                anyhow::anyhow!("live probe result carried no stream_url"),
            )
        })
    }

    pub async fn run(&self) -> Result<Option<StreamInfo>> {
        let mut recording_id: Option<i64> = None;
        let mut session_start: Option<DateTime<Utc>> = None;
        let mut last_title = String::new();
        let mut last_cover_url: Option<String> = None;
        let mut last_stream_url: Option<String> = None;
        let mut last_quality: Option<String> = None;
        let mut last_live_start: Option<DateTime<Utc>> = None;
        let mut segment_workers: JoinSet<()> = JoinSet::new();
        let mut backoff = ProbeBackoff::new();

        loop {
            let Some(mut adapter) = self.registry.new_download_adapter(&self.adapter_name) else {
                warn!(adapter = %self.adapter_name, "no download adapter registered for this name");
                break;
            };

            let probe = match adapter.probe(false).await {
                Ok(probe) => {
                    backoff.reset();
                    probe
                }
                Err(err) => {
                    if recording_id.is_none() {
                        warn!(url = %self.url, error = %err, "initial probe failed");
                        break;
                    }
                    if backoff.exhausted() {
                        warn!(url = %self.url, "giving up on probe retries, ending session");
                        break;
                    }
                    warn!(url = %self.url, error = %err, "probe failed mid-session, retrying");
                    backoff.wait().await;
                    continue;
                }
            };

            if !probe.is_live {
                adapter.close();
                break;
            }

            if recording_id.is_none() {
                let now = Utc::now();
                let id = self
                    .store
                    .add_recording(&self.streamer_key, &self.url, now)
                    .await?;
                recording_id = Some(id);
                session_start = Some(now);
                adapter.init_chat_capture();
            }
            let id = recording_id.expect("set above");
            let start = session_start.expect("set above");

            last_title = probe.title.clone();
            self.store.update_title(id, &last_title).await?;
            if probe.cover_url.is_some() {
                last_cover_url = probe.cover_url.clone();
            }

            let stream_url = match self.resolve_stream_url(
                &probe,
                last_stream_url.as_deref(),
                last_quality.as_deref(),
                last_live_start,
            ) {
                Ok(url) => url,
                Err(err) => {
                    warn!(url = %self.url, error = %err, "could not resolve a stream url");
                    adapter.close();
                    if backoff.exhausted() {
                        break;
                    }
                    backoff.wait().await;
                    continue;
                }
            };
            last_stream_url = Some(stream_url.clone());
            last_quality = probe.quality.clone();
            last_live_start = probe.live_start_time;

            let template = self
                .entry
                .filename_prefix
                .as_deref()
                .unwrap_or("{streamer}_%Y%m%d_%H%M%S");
            let (output_base, _) = filename::unique_output_base(
                &self.output_dir,
                template,
                &self.streamer_key,
                &last_title,
                &self.url,
                start,
            );

            let req = RecordRequest {
                url: self.url.clone(),
                stream_url,
                headers: probe.headers.clone(),
                output_base,
                segmentation: self.segmentation_policy(),
            };

            let (seg_tx, mut seg_rx) = mpsc::unbounded_channel();
            let record_fut = adapter.record(&req, seg_tx);
            let consumer = async {
                while let Some(path) = seg_rx.recv().await {
                    self.handle_segment(id, &path, &mut segment_workers).await;
                }
            };
            let (record_result, ()) = tokio::join!(record_fut, consumer);
            adapter.close();

            if let Err(err) = record_result {
                warn!(url = %self.url, error = %err, "record() returned with an error");
            }

            if self.entry.is_download_mode {
                break;
            }
            // Not one-shot: treat record() returning (clean or error) as
            // the stream pausing, and loop back to probing without
            // tearing the session down.
        }

        let Some(id) = recording_id else {
            return Ok(None);
        };
        let start = session_start.expect("recording_id implies session_start");

        while segment_workers.join_next().await.is_some() {}

        let cover_path = match &last_cover_url {
            Some(cover_url) => self.download_cover(id, cover_url, &self.entry.key, start).await,
            None => None,
        };

        let end_time = Utc::now();
        info!(
            streamer_key = %self.streamer_key,
            url = %self.url,
            recording_id = id,
            "recording session closed"
        );

        Ok(Some(StreamInfo {
            streamer_key: self.streamer_key.clone(),
            url: self.url.clone(),
            title: last_title,
            start_time: start,
            end_time,
            cover_path,
            is_download_mode: self.entry.is_download_mode,
            recording_id: id,
        }))
    }

    /// Persist the segment's file name, then run the segment-post-
    /// processor chain. Persistence always happens before the hook
    /// invocation (P3), whether or not the hook itself runs in parallel
    /// with the next segment.
    async fn handle_segment(&self, id: i64, path: &std::path::Path, workers: &mut JoinSet<()>) {
        let name = path.to_string_lossy().into_owned();
        if let Err(err) = self.store.append_file(id, &name).await {
            warn!(segment = %name, error = %err, "failed to persist segment file name");
        }

        if self.entry.segment_processor.is_empty() {
            return;
        }

        let payload = serde_json::json!({
            "name": self.streamer_key,
            "url": self.url,
            "segment": name,
        });

        if self.entry.segment_processor_parallel {
            let chain = self.entry.segment_processor.clone();
            workers.spawn(async move {
                crate::hooks::run_json_hooks(&chain, &payload).await;
            });
        } else {
            crate::hooks::run_json_hooks(&self.entry.segment_processor, &payload).await;
        }
    }

    /// Cover download (P5: at most once, only after the session's last
    /// `record()` round). Best-effort — a failing or unsupported
    /// adapter leaves `cover_path` at `None` rather than failing the
    /// session.
    async fn download_cover(
        &self,
        id: i64,
        cover_url: &str,
        adapter_name: &str,
        start: DateTime<Utc>,
    ) -> Option<PathBuf> {
        let dest_dir = self.cover_dir.join(adapter_name).join(&self.streamer_key);
        let base = filename::expand("{streamer}_%Y%m%d_%H%M%S", &self.streamer_key, "", &self.url, start);
        let dest = dest_dir.join(format!("{base}.jpg"));

        if let Err(err) = tokio::fs::create_dir_all(&dest_dir).await {
            warn!(error = %err, "could not create cover directory");
            return None;
        }

        let Some(mut adapter) = self.registry.new_download_adapter(&self.adapter_name) else {
            return None;
        };
        if let Err(err) = adapter.download_cover(cover_url, &dest).await {
            warn!(error = %err, "cover download failed");
            return None;
        }

        if !dest.exists() {
            return None;
        }

        let path_str = dest.to_string_lossy().into_owned();
        if let Err(err) = self.store.update_cover_path(id, &path_str).await {
            warn!(error = %err, "failed to persist cover path");
        }
        Some(dest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::memory::InMemoryRecordingStore;
    use crate::plugin::testing::FakeDownloadAdapter;
    use crate::plugin::DownloadAdapter;
    use std::sync::Arc;

    fn entry(is_download_mode: bool) -> Arc<StreamerEntry> {
        Arc::new(StreamerEntry {
            key: "alice".to_string(),
            urls: vec!["https://example/ch/1".to_string()],
            display_remark: "alice".to_string(),
            filename_prefix: Some("{streamer}_%Y%m%d_%H%M%S".to_string()),
            format_hint: None,
            upload_template_ref: None,
            preprocessor: vec![],
            segment_processor: vec![],
            segment_processor_parallel: false,
            downloaded_processor: vec![],
            postprocessor: None,
            segment_time: None,
            segment_size_bytes: None,
            upload_delay_secs: None,
            filtering_threshold_bytes: 0,
            is_download_mode,
        })
    }

    fn registry_with(name: &str, adapter: FakeDownloadAdapter) -> Arc<PluginRegistry> {
        let mut registry = PluginRegistry::new();
        registry
            .register_download(
                name,
                "^https://example/",
                Arc::new(move || Box::new(adapter.clone()) as Box<dyn DownloadAdapter>),
            )
            .unwrap();
        Arc::new(registry)
    }

    #[tokio::test]
    async fn clean_session_persists_three_segments_and_emits_stream_info() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(InMemoryRecordingStore::new());
        let adapter = FakeDownloadAdapter::scripted(vec![true], 3, StdDuration::from_millis(1));
        let registry = registry_with("fake", adapter);

        let session = RecordingSession::new(
            entry(false),
            "alice".to_string(),
            "https://example/ch/1".to_string(),
            "fake".to_string(),
            registry,
            store.clone(),
            dir.path().to_path_buf(),
            dir.path().join("cover"),
        );

        let info = session.run().await.unwrap().expect("session went live");
        assert_eq!(info.streamer_key, "alice");
        let files = store.get_files(info.recording_id).await.unwrap();
        assert_eq!(files.len(), 3);
    }

    #[tokio::test]
    async fn never_live_produces_no_session() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(InMemoryRecordingStore::new());
        let adapter = FakeDownloadAdapter::scripted(vec![false], 0, StdDuration::from_millis(1));
        let registry = registry_with("fake", adapter);

        let session = RecordingSession::new(
            entry(false),
            "alice".to_string(),
            "https://example/ch/1".to_string(),
            "fake".to_string(),
            registry,
            store,
            dir.path().to_path_buf(),
            dir.path().join("cover"),
        );

        assert!(session.run().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn download_mode_stops_after_one_round() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(InMemoryRecordingStore::new());
        let adapter = FakeDownloadAdapter::scripted(vec![true, true], 2, StdDuration::from_millis(1));
        let registry = registry_with("fake", adapter.clone());

        let session = RecordingSession::new(
            entry(true),
            "alice".to_string(),
            "https://example/ch/1".to_string(),
            "fake".to_string(),
            registry,
            store,
            dir.path().to_path_buf(),
            dir.path().join("cover"),
        );

        session.run().await.unwrap();
        assert_eq!(adapter.record_calls(), 1);
    }
}
