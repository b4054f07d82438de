//! C8: upload session — file discovery, the in-flight guard, the
//! upload-adapter call, and the postprocessor chain for one
//! `(streamer_key, url)` pair's finished recording.

pub mod hooks;

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::{Duration as StdDuration, SystemTime};

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{info, warn};

use crate::domain::{FileInfo, StreamInfo, StreamerEntry};
use crate::error::{Error, Result};
use crate::mutex::NamedMutexRegistry;
use crate::persistence::RecordingStore;
use crate::plugin::PluginRegistry;
use crate::state::UrlStateTable;
use crate::utils::fs as fsutil;

/// The process-global set of filename stems currently being uploaded
/// (spec.md §3's "in-flight stems set"). Mutation is only ever done by
/// a caller already holding the `upload_filename` named mutex.
#[derive(Default)]
pub struct InFlightStems {
    stems: Mutex<HashSet<String>>,
}

impl InFlightStems {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, stem: &str) -> bool {
        self.stems.lock().contains(stem)
    }

    fn add(&self, stem: String) {
        self.stems.lock().insert(stem);
    }

    fn remove(&self, stem: &str) {
        self.stems.lock().remove(stem);
    }
}

pub struct UploadSession {
    entry: Arc<StreamerEntry>,
    state: Arc<UrlStateTable>,
    mutexes: Arc<NamedMutexRegistry>,
    registry: Arc<PluginRegistry>,
    store: Arc<dyn RecordingStore>,
    in_flight_stems: Arc<InFlightStems>,
    output_dir: PathBuf,
}

impl UploadSession {
    pub fn new(
        entry: Arc<StreamerEntry>,
        state: Arc<UrlStateTable>,
        mutexes: Arc<NamedMutexRegistry>,
        registry: Arc<PluginRegistry>,
        store: Arc<dyn RecordingStore>,
        in_flight_stems: Arc<InFlightStems>,
        output_dir: PathBuf,
    ) -> Self {
        Self {
            entry,
            state,
            mutexes,
            registry,
            store,
            in_flight_stems,
            output_dir,
        }
    }

    /// Step 1 + finally: the in-flight-per-URL guard. Returns `Ok(())`
    /// without doing anything if another UPLOAD is already running for
    /// this URL (spec.md P2).
    pub async fn run(&self, info: &StreamInfo) -> Result<()> {
        if !self.state.try_begin_upload(&info.url) {
            info!(url = %info.url, "upload already in flight, skipping");
            return Ok(());
        }

        let result = self.run_guarded(info).await;
        self.state.end_upload(&info.url);
        if let Err(err) = &result {
            warn!(streamer_key = %self.entry.key, error = %err, "upload session failed");
        }
        result
    }

    async fn run_guarded(&self, info: &StreamInfo) -> Result<()> {
        if let Some(delay) = self.entry.upload_delay_secs {
            tokio::time::sleep(StdDuration::from_secs(delay)).await;
            if self.state.is_downloading(&info.url) {
                info!(url = %info.url, "a new recording took over, deferring this upload");
                return Ok(());
            }
        }

        let files = {
            let list_mutex_name = format!("upload_file_list_{}", self.entry.key);
            let _list_guard = self.mutexes.acquire(&list_mutex_name).await;
            let files = self.enumerate_job().await?;

            if !files.is_empty() {
                let _stem_guard = self.mutexes.acquire("upload_filename").await;
                for file in &files {
                    self.in_flight_stems.add(file.stem());
                }
            }
            files
        };

        if files.is_empty() {
            return Ok(());
        }

        let adapter_name = self.entry.upload_template_ref.as_deref().unwrap_or("generic");
        let upload_result = match self.registry.new_upload_adapter(adapter_name, &self.entry) {
            Some(adapter) => adapter.upload(files.clone()).await,
            None => Err(Error::upload(
                self.entry.key.clone(),
                anyhow::anyhow!("no upload adapter registered for '{adapter_name}'"),
            )),
        };

        let release = self.release_stems(&files);

        match upload_result {
            Ok(uploaded) => {
                hooks::run_postprocessor(
                    self.entry.postprocessor.as_deref(),
                    &uploaded,
                    info.cover_path.as_deref(),
                )
                .await;
                release.await;
                Ok(())
            }
            Err(err) => {
                release.await;
                Err(err)
            }
        }
    }

    async fn release_stems(&self, files: &[FileInfo]) {
        let _guard = self.mutexes.acquire("upload_filename").await;
        for file in files {
            self.in_flight_stems.remove(&file.stem());
        }
    }

    /// Step 3: enumerate the files this upload job should carry.
    /// Assumes the caller holds `upload_file_list_<streamer_key>`.
    async fn enumerate_job(&self) -> Result<Vec<FileInfo>> {
        let mut candidates =
            fsutil::list_files_containing(&self.output_dir, &self.entry.key).await?;

        if let Some(latest) = self.store.get_latest_by_streamer(&self.entry.key).await? {
            for name in self.store.get_files(latest.id).await? {
                let path = PathBuf::from(&name);
                if path.exists() && !candidates.contains(&path) {
                    candidates.push(path);
                }
            }
        }

        let mut finalized = Vec::with_capacity(candidates.len());
        for path in candidates {
            if path.extension().is_some_and(|e| e == "part") {
                let target = path.with_extension("");
                match fsutil::finalize_rename(&path, &target).await {
                    Ok(()) => finalized.push(target),
                    Err(_) => finalized.push(path),
                }
            } else {
                finalized.push(path);
            }
        }

        let mut kept = Vec::new();
        for path in finalized {
            if !fsutil::is_media_file(&path) {
                continue;
            }
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            if self.in_flight_stems.contains(&stem) {
                continue;
            }
            let Ok(meta) = tokio::fs::metadata(&path).await else {
                continue;
            };
            if meta.len() <= self.entry.filtering_threshold_bytes {
                let _ = tokio::fs::remove_file(&path).await;
                continue;
            }
            let created = meta
                .created()
                .or_else(|_| meta.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            kept.push((created, path, stem));
        }
        kept.sort_by_key(|(created, _, _)| *created);

        let mut files = Vec::with_capacity(kept.len());
        let mut kept_stems = HashSet::with_capacity(kept.len());
        for (_, video_path, stem) in kept {
            let sidecar = video_path.with_extension("xml");
            let danmaku_path = sidecar.exists().then_some(sidecar);
            kept_stems.insert(stem);
            files.push(FileInfo {
                video_path,
                danmaku_path,
            });
        }

        self.delete_orphan_chat_files(&kept_stems).await;
        Ok(files)
    }

    async fn delete_orphan_chat_files(&self, kept_stems: &HashSet<String>) {
        let Ok(mut read_dir) = tokio::fs::read_dir(&self.output_dir).await else {
            return;
        };
        while let Ok(Some(entry)) = read_dir.next_entry().await {
            let path = entry.path();
            if path.extension().is_none_or(|e| e != "xml") {
                continue;
            }
            let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
            if !name.contains(&self.entry.key) {
                continue;
            }
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            if !kept_stems.contains(&stem) {
                let _ = tokio::fs::remove_file(&path).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::memory::InMemoryRecordingStore;
    use crate::plugin::{PluginRegistry, UploadAdapter};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn entry(key: &str, threshold: u64) -> Arc<StreamerEntry> {
        Arc::new(StreamerEntry {
            key: key.to_string(),
            urls: vec!["https://example/ch/1".to_string()],
            display_remark: key.to_string(),
            filename_prefix: None,
            format_hint: None,
            upload_template_ref: Some("fake-upload".to_string()),
            preprocessor: vec![],
            segment_processor: vec![],
            segment_processor_parallel: false,
            downloaded_processor: vec![],
            postprocessor: None,
            segment_time: None,
            segment_size_bytes: None,
            upload_delay_secs: None,
            filtering_threshold_bytes: threshold,
            is_download_mode: false,
        })
    }

    struct CountingUploadAdapter {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl UploadAdapter for CountingUploadAdapter {
        async fn upload(&self, files: Vec<FileInfo>) -> std::result::Result<Vec<FileInfo>, Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(files)
        }
    }

    fn stream_info(key: &str, url: &str) -> StreamInfo {
        StreamInfo {
            streamer_key: key.to_string(),
            url: url.to_string(),
            title: "t".to_string(),
            start_time: Utc::now(),
            end_time: Utc::now(),
            cover_path: None,
            is_download_mode: false,
            recording_id: 1,
        }
    }

    #[tokio::test]
    async fn uploads_matching_files_and_skips_small_ones() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("alice_1.flv"), b"0123456789").await.unwrap();
        tokio::fs::write(dir.path().join("alice_2.flv"), b"x").await.unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = PluginRegistry::new();
        let calls_clone = calls.clone();
        registry.register_upload(
            "fake-upload",
            Arc::new(move |_entry: &StreamerEntry| {
                Box::new(CountingUploadAdapter {
                    calls: calls_clone.clone(),
                }) as Box<dyn UploadAdapter>
            }),
        );

        let session = UploadSession::new(
            entry("alice", 5),
            Arc::new(UrlStateTable::new()),
            Arc::new(NamedMutexRegistry::new()),
            Arc::new(registry),
            Arc::new(InMemoryRecordingStore::new()),
            Arc::new(InFlightStems::new()),
            dir.path().to_path_buf(),
        );

        session.run(&stream_info("alice", "https://example/ch/1")).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!dir.path().join("alice_2.flv").exists());
    }

    #[tokio::test]
    async fn second_concurrent_upload_for_same_url_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let state = Arc::new(UrlStateTable::new());
        assert!(state.try_begin_upload("https://example/ch/1"));

        let session = UploadSession::new(
            entry("alice", 0),
            state,
            Arc::new(NamedMutexRegistry::new()),
            Arc::new(PluginRegistry::new()),
            Arc::new(InMemoryRecordingStore::new()),
            Arc::new(InFlightStems::new()),
            dir.path().to_path_buf(),
        );

        session.run(&stream_info("alice", "https://example/ch/1")).await.unwrap();
    }
}
