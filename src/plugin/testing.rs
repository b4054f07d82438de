//! Test doubles for the plugin contracts, used by this crate's own unit
//! tests and by the integration tests under `tests/`.
//!
//! Kept as a regular (non-`#[cfg(test)]`) module, mirroring the
//! teacher's convention of shipping a scriptable fake platform
//! alongside its real adapters rather than behind a test-only gate.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{BatchDownloadAdapter, DownloadAdapter, SegmentSender};
use crate::domain::{FileInfo, ProbeResult, RecordRequest};
use crate::error::Error;

/// A scripted sequence of probe outcomes and a scripted number of
/// segments to emit per `record()` call.
#[derive(Clone)]
pub struct FakeDownloadAdapter {
    live_script: Arc<Mutex<Vec<bool>>>,
    segments_per_session: usize,
    segment_interval: Duration,
    probe_calls: Arc<AtomicUsize>,
    record_calls: Arc<AtomicUsize>,
}

impl FakeDownloadAdapter {
    /// Always reports live; emits `segments_per_session` segments per
    /// `record()` call.
    pub fn always_live() -> Self {
        Self::scripted(std::iter::repeat(true).take(64).collect(), 3, Duration::from_millis(1))
    }

    pub fn scripted(live_script: Vec<bool>, segments_per_session: usize, segment_interval: Duration) -> Self {
        Self {
            live_script: Arc::new(Mutex::new(live_script)),
            segments_per_session,
            segment_interval,
            probe_calls: Arc::new(AtomicUsize::new(0)),
            record_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn probe_calls(&self) -> usize {
        self.probe_calls.load(Ordering::SeqCst)
    }

    pub fn record_calls(&self) -> usize {
        self.record_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DownloadAdapter for FakeDownloadAdapter {
    async fn probe(&mut self, _is_check_only: bool) -> Result<ProbeResult, Error> {
        self.probe_calls.fetch_add(1, Ordering::SeqCst);
        let is_live = {
            let mut script = self.live_script.lock();
            if script.is_empty() { false } else { script.remove(0) }
        };
        Ok(ProbeResult {
            is_live,
            title: "fake stream".to_string(),
            stream_url: is_live.then(|| "https://fake.example/stream.flv".to_string()),
            quality: Some("source".to_string()),
            live_start_time: is_live.then(chrono::Utc::now),
            cover_url: None,
            headers: Default::default(),
        })
    }

    async fn record(&mut self, req: &RecordRequest, segment_tx: SegmentSender) -> Result<(), Error> {
        self.record_calls.fetch_add(1, Ordering::SeqCst);
        for i in 0..self.segments_per_session {
            tokio::time::sleep(self.segment_interval).await;
            let ext = "flv";
            let path: PathBuf = if i == 0 {
                req.output_base.with_extension(ext)
            } else {
                PathBuf::from(format!("{}_{i}.{ext}", req.output_base.display()))
            };
            tokio::fs::write(&path, b"fake-segment").await.ok();
            if segment_tx.send(path).is_err() {
                break;
            }
        }
        Ok(())
    }
}

/// A batch-capable fake: yields a fixed list of URLs on every call.
pub struct FakeBatchAdapter {
    yields: Vec<String>,
}

impl FakeBatchAdapter {
    pub fn yields(urls: Vec<String>) -> Self {
        Self { yields: urls }
    }
}

#[async_trait]
impl BatchDownloadAdapter for FakeBatchAdapter {
    async fn batch_probe(&self, urls: &[String]) -> Result<Vec<String>, Error> {
        Ok(self
            .yields
            .iter()
            .filter(|u| urls.contains(u))
            .cloned()
            .collect())
    }
}

/// Helper for tests: drains a segment channel into a `Vec<PathBuf>`.
pub async fn drain_segments(mut rx: mpsc::UnboundedReceiver<PathBuf>) -> Vec<PathBuf> {
    let mut out = Vec::new();
    while let Some(p) = rx.recv().await {
        out.push(p);
    }
    out
}
