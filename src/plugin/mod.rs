//! C4: plugin registry.
//!
//! Registers download adapters (regex -> adapter) and upload adapters
//! (name -> adapter), routes a URL to the matching download adapter,
//! and exposes a "batch-check capable" capability flag. Concrete
//! per-site adapters and upload-API clients are out of scope (spec.md
//! §1) — only the trait contracts, the routing/grouping logic, and a
//! `testing` double used by integration tests live here.

pub mod testing;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use tokio::sync::mpsc;

use crate::domain::{FileInfo, ProbeResult, RecordRequest, StreamerEntry};
use crate::error::Error;

/// One finished segment's final path, delivered from the adapter to the
/// recording session while `record()` is still running.
pub type SegmentSender = mpsc::UnboundedSender<PathBuf>;

/// A download adapter for one platform. A fresh instance is constructed
/// per probe/record cycle (spec.md §4.7 step 1).
#[async_trait]
pub trait DownloadAdapter: Send + Sync {
    /// Fails with a probe error on network failure; returns `Ok(result)`
    /// with `result.is_live == false` if not live.
    async fn probe(&mut self, is_check_only: bool) -> Result<ProbeResult, Error>;

    /// Produces segments via `segment_tx`, returning when the stream
    /// ends or on a fatal error.
    async fn record(&mut self, req: &RecordRequest, segment_tx: SegmentSender) -> Result<(), Error>;

    fn init_chat_capture(&mut self) {}

    fn close(&mut self) {}

    /// Fetch the room cover to `dest` (WebP-to-JPEG conversion, if
    /// needed, is the adapter's concern). Default: unsupported, a no-op
    /// that leaves `dest` unwritten.
    async fn download_cover(&self, _cover_url: &str, _dest: &std::path::Path) -> Result<(), Error> {
        Ok(())
    }
}

/// Optional capability: a download adapter that can check a whole URL
/// list in one round-trip and yield only the currently-live ones.
#[async_trait]
pub trait BatchDownloadAdapter: Send + Sync {
    async fn batch_probe(&self, urls: &[String]) -> Result<Vec<String>, Error>;
}

/// An upload adapter for one target video platform, constructed from
/// the merged config for a streamer key.
#[async_trait]
pub trait UploadAdapter: Send + Sync {
    async fn upload(&self, files: Vec<FileInfo>) -> Result<Vec<FileInfo>, Error>;
}

pub type DownloadFactory = Arc<dyn Fn() -> Box<dyn DownloadAdapter> + Send + Sync>;
pub type BatchFactory = Arc<dyn Fn() -> Box<dyn BatchDownloadAdapter> + Send + Sync>;
pub type UploadFactory = Arc<dyn Fn(&StreamerEntry) -> Box<dyn UploadAdapter> + Send + Sync>;

/// One registered download-side plugin: its routing regex, its
/// constructor, and an optional batch constructor.
#[derive(Clone)]
struct DownloadPlugin {
    name: String,
    regex: Regex,
    factory: DownloadFactory,
    batch_factory: Option<BatchFactory>,
}

impl DownloadPlugin {
    fn is_batch_capable(&self) -> bool {
        self.batch_factory.is_some()
    }
}

/// Name used for URLs matched by no registered adapter.
pub const GENERIC_ADAPTER: &str = "generic";

#[derive(Default)]
pub struct PluginRegistry {
    download_plugins: Vec<DownloadPlugin>,
    upload_plugins: HashMap<String, UploadFactory>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_download(
        &mut self,
        name: impl Into<String>,
        pattern: &str,
        factory: DownloadFactory,
    ) -> Result<(), Error> {
        let regex = Regex::new(pattern)
            .map_err(|e| Error::config(format!("invalid adapter regex '{pattern}': {e}")))?;
        self.download_plugins.push(DownloadPlugin {
            name: name.into(),
            regex,
            factory,
            batch_factory: None,
        });
        Ok(())
    }

    pub fn register_batch_download(
        &mut self,
        name: impl Into<String>,
        pattern: &str,
        factory: DownloadFactory,
        batch_factory: BatchFactory,
    ) -> Result<(), Error> {
        let regex = Regex::new(pattern)
            .map_err(|e| Error::config(format!("invalid adapter regex '{pattern}': {e}")))?;
        self.download_plugins.push(DownloadPlugin {
            name: name.into(),
            regex,
            factory,
            batch_factory: Some(batch_factory),
        });
        Ok(())
    }

    pub fn register_upload(&mut self, name: impl Into<String>, factory: UploadFactory) {
        self.upload_plugins.insert(name.into(), factory);
    }

    /// The name of the adapter that would handle this URL — the first
    /// whose regex matches, else `GENERIC_ADAPTER`.
    pub fn route(&self, url: &str) -> &str {
        self.download_plugins
            .iter()
            .find(|p| p.regex.is_match(url))
            .map(|p| p.name.as_str())
            .unwrap_or(GENERIC_ADAPTER)
    }

    pub fn is_batch_capable(&self, adapter_name: &str) -> bool {
        self.download_plugins
            .iter()
            .find(|p| p.name == adapter_name)
            .map(DownloadPlugin::is_batch_capable)
            .unwrap_or(false)
    }

    pub fn new_download_adapter(&self, adapter_name: &str) -> Option<Box<dyn DownloadAdapter>> {
        self.download_plugins
            .iter()
            .find(|p| p.name == adapter_name)
            .map(|p| (p.factory)())
    }

    pub fn new_batch_adapter(&self, adapter_name: &str) -> Option<Box<dyn BatchDownloadAdapter>> {
        self.download_plugins
            .iter()
            .find(|p| p.name == adapter_name)
            .and_then(|p| p.batch_factory.as_ref())
            .map(|f| f())
    }

    pub fn new_upload_adapter(
        &self,
        name: &str,
        entry: &StreamerEntry,
    ) -> Option<Box<dyn UploadAdapter>> {
        self.upload_plugins.get(name).map(|f| f(entry))
    }

    /// Partition `urls` by routed adapter name, preserving input
    /// ordering both within a group and across first-seen groups.
    pub fn group(&self, urls: &[String]) -> Vec<(String, Vec<String>)> {
        let mut order: Vec<String> = Vec::new();
        let mut groups: HashMap<String, Vec<String>> = HashMap::new();

        for url in urls {
            let name = self.route(url).to_string();
            if !groups.contains_key(&name) {
                order.push(name.clone());
            }
            groups.entry(name).or_default().push(url.clone());
        }

        order
            .into_iter()
            .map(|name| {
                let urls = groups.remove(&name).unwrap_or_default();
                (name, urls)
            })
            .collect()
    }
}
