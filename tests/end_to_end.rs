//! End-to-end scenarios exercising the scheduler, event bus, and
//! handler wiring together through the crate's public API — the
//! concrete per-module behaviors (segmentation, filename templating,
//! postprocessor steps, hot-reload quiescence) are covered by unit
//! tests alongside the code they exercise; these tests check that the
//! pieces compose into the pipeline spec.md describes end to end.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;

use srec_sentinel::bus::{BusConfig, Event, EventBus, EventKind};
use srec_sentinel::config::ConfigSnapshot;
use srec_sentinel::domain::{FileInfo, StreamerEntry};
use srec_sentinel::error::Result;
use srec_sentinel::handlers::{self, HandlerContext};
use srec_sentinel::mutex::NamedMutexRegistry;
use srec_sentinel::persistence::memory::InMemoryRecordingStore;
use srec_sentinel::persistence::RecordingStore;
use srec_sentinel::plugin::testing::{FakeBatchAdapter, FakeDownloadAdapter};
use srec_sentinel::plugin::{BatchDownloadAdapter, DownloadAdapter, PluginRegistry, UploadAdapter};
use srec_sentinel::scheduler::Scheduler;
use srec_sentinel::state::UrlStateTable;
use srec_sentinel::upload::InFlightStems;

fn streamer(key: &str, url: &str) -> StreamerEntry {
    StreamerEntry {
        key: key.to_string(),
        urls: vec![url.to_string()],
        display_remark: key.to_string(),
        filename_prefix: Some(format!("{key}_%Y%m%d_%H%M%S")),
        format_hint: None,
        upload_template_ref: Some("recorder-upload".to_string()),
        preprocessor: vec![],
        segment_processor: vec![],
        segment_processor_parallel: false,
        downloaded_processor: vec![],
        postprocessor: None,
        segment_time: None,
        segment_size_bytes: None,
        upload_delay_secs: None,
        filtering_threshold_bytes: 0,
        is_download_mode: false,
    }
}

struct RecordingUploadAdapter {
    calls: Arc<AtomicUsize>,
    last_batch: Arc<parking_lot::Mutex<Vec<FileInfo>>>,
}

#[async_trait]
impl UploadAdapter for RecordingUploadAdapter {
    async fn upload(&self, files: Vec<FileInfo>) -> Result<Vec<FileInfo>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_batch.lock() = files.clone();
        Ok(files)
    }
}

/// Scenario 1: a single streamer with a fake adapter that reports live
/// immediately and emits three segments produces one DOWNLOADED and one
/// UPLOAD event, and the upload adapter receives three files, each
/// without a danmaku sidecar.
#[tokio::test]
async fn clean_session_uploads_three_segments() {
    let dir = tempfile::tempdir().unwrap();
    let bus = EventBus::new(BusConfig::default());

    let mut registry = PluginRegistry::new();
    registry
        .register_download(
            "fake",
            r"^https://example\.test/",
            Arc::new(|| {
                Box::new(FakeDownloadAdapter::scripted(
                    vec![true],
                    3,
                    Duration::from_millis(5),
                )) as Box<dyn DownloadAdapter>
            }),
        )
        .unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let last_batch = Arc::new(parking_lot::Mutex::new(Vec::new()));
    registry.register_upload(
        "recorder-upload",
        Arc::new({
            let calls = calls.clone();
            let last_batch = last_batch.clone();
            move |_e: &StreamerEntry| {
                Box::new(RecordingUploadAdapter {
                    calls: calls.clone(),
                    last_batch: last_batch.clone(),
                }) as Box<dyn UploadAdapter>
            }
        }),
    );

    let config = ConfigSnapshot::build(vec![streamer("alice", "https://example.test/ch/1")]).unwrap();
    let ctx = Arc::new(HandlerContext {
        config: Arc::new(RwLock::new(config)),
        state: Arc::new(UrlStateTable::new()),
        mutexes: Arc::new(NamedMutexRegistry::new()),
        registry: Arc::new(registry),
        store: Arc::new(InMemoryRecordingStore::new()) as Arc<dyn RecordingStore>,
        in_flight_stems: Arc::new(InFlightStems::new()),
        output_dir: dir.path().to_path_buf(),
        cover_dir: dir.path().join("covers"),
    });
    handlers::wire(&bus, ctx);

    bus.publish(Event::PreDownload {
        streamer_key: "alice".to_string(),
        url: "https://example.test/ch/1".to_string(),
    });

    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let batch = last_batch.lock();
    assert_eq!(batch.len(), 3);
    assert!(batch.iter().all(|f| f.danmaku_path.is_none()));
}

/// Scenario 3: two UPLOAD events for the same URL published back to
/// back only result in one call to the upload adapter — the second
/// handler observes the in-flight guard and returns immediately.
#[tokio::test]
async fn concurrent_upload_events_for_same_url_call_the_adapter_once() {
    let dir = tempfile::tempdir().unwrap();
    let bus = EventBus::new(BusConfig::default());

    tokio::fs::write(dir.path().join("bob_1.flv"), b"0123456789").await.unwrap();

    let mut registry = PluginRegistry::new();
    let calls = Arc::new(AtomicUsize::new(0));
    registry.register_upload(
        "recorder-upload",
        Arc::new({
            let calls = calls.clone();
            move |_e: &StreamerEntry| {
                Box::new(RecordingUploadAdapter {
                    calls: calls.clone(),
                    last_batch: Arc::new(parking_lot::Mutex::new(Vec::new())),
                }) as Box<dyn UploadAdapter>
            }
        }),
    );

    let config = ConfigSnapshot::build(vec![streamer("bob", "https://example.test/ch/2")]).unwrap();
    let ctx = Arc::new(HandlerContext {
        config: Arc::new(RwLock::new(config)),
        state: Arc::new(UrlStateTable::new()),
        mutexes: Arc::new(NamedMutexRegistry::new()),
        registry: Arc::new(registry),
        store: Arc::new(InMemoryRecordingStore::new()) as Arc<dyn RecordingStore>,
        in_flight_stems: Arc::new(InFlightStems::new()),
        output_dir: dir.path().to_path_buf(),
        cover_dir: dir.path().join("covers"),
    });
    handlers::wire(&bus, ctx);

    let info = srec_sentinel::domain::StreamInfo {
        streamer_key: "bob".to_string(),
        url: "https://example.test/ch/2".to_string(),
        title: "t".to_string(),
        start_time: chrono::Utc::now(),
        end_time: chrono::Utc::now(),
        cover_path: None,
        is_download_mode: false,
        recording_id: 1,
    };
    bus.publish(Event::Upload(info.clone()));
    bus.publish(Event::Upload(info));

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

/// Scenario 6: a batch-capable adapter covering three URLs, where
/// `batch_probe` only yields two, produces exactly one PRE_DOWNLOAD per
/// yielded URL with the correct streamer key resolved, and none for the
/// URL that wasn't yielded.
#[tokio::test]
async fn batch_scheduler_only_publishes_for_yielded_urls() {
    let bus = EventBus::new(BusConfig::default());
    let store: Arc<dyn RecordingStore> = Arc::new(InMemoryRecordingStore::new());

    let mut registry = PluginRegistry::new();
    registry
        .register_batch_download(
            "batchy",
            r"^https://batchy\.test/",
            Arc::new(|| Box::new(FakeDownloadAdapter::always_live()) as Box<dyn DownloadAdapter>),
            Arc::new(|| {
                Box::new(FakeBatchAdapter::yields(vec![
                    "https://batchy.test/1".to_string(),
                    "https://batchy.test/3".to_string(),
                ])) as Box<dyn BatchDownloadAdapter>
            }),
        )
        .unwrap();
    let registry = Arc::new(registry);

    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    {
        let seen = seen.clone();
        bus.on(EventKind::PreDownload, move |e| {
            let seen = seen.clone();
            async move {
                if let Event::PreDownload { streamer_key, url } = e {
                    seen.lock().unwrap().push((streamer_key, url));
                }
                vec![]
            }
        });
    }

    let scheduler = Scheduler::new(
        bus,
        registry,
        store,
        Arc::new(UrlStateTable::new()),
        Arc::new(NamedMutexRegistry::new()),
        Duration::from_secs(5),
        Duration::from_millis(20),
    );
    scheduler.add("alice".to_string(), "https://batchy.test/1".to_string());
    scheduler.add("carol".to_string(), "https://batchy.test/2".to_string());
    scheduler.add("dave".to_string(), "https://batchy.test/3".to_string());

    tokio::time::sleep(Duration::from_millis(80)).await;

    let observed = seen.lock().unwrap().clone();
    assert!(observed.contains(&("alice".to_string(), "https://batchy.test/1".to_string())));
    assert!(observed.contains(&("dave".to_string(), "https://batchy.test/3".to_string())));
    assert!(!observed.iter().any(|(_, u)| u == "https://batchy.test/2"));

    scheduler.shutdown();
}
