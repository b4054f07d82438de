//! C5: URL watcher scheduler.
//!
//! One long-running task per adapter group: an "individual" round-robin
//! polling loop for ordinary adapters, or a fixed-interval `batch_probe`
//! loop for batch-capable ones (spec.md §4.5). `add`/`delete` mutate a
//! shared URL index the running tasks re-read each pass, so group
//! membership changes take effect without tearing the task down.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::bus::{Event, EventBus};
use crate::config::ConfigSnapshot;
use crate::domain::StreamInfo;
use crate::mutex::NamedMutexRegistry;
use crate::persistence::RecordingStore;
use crate::plugin::PluginRegistry;
use crate::state::UrlStateTable;
use crate::timer::PeriodicTimer;

pub const DEFAULT_BATCH_INTERVAL: StdDuration = StdDuration::from_secs(30);

enum GroupTask {
    Individual {
        cancel: CancellationToken,
        handle: JoinHandle<()>,
    },
    Batch(PeriodicTimer),
}

impl GroupTask {
    fn stop(self) {
        match self {
            GroupTask::Individual { cancel, .. } => cancel.cancel(),
            GroupTask::Batch(timer) => timer.stop(),
        }
    }
}

pub struct Scheduler {
    bus: Arc<EventBus>,
    registry: Arc<PluginRegistry>,
    store: Arc<dyn RecordingStore>,
    state: Arc<UrlStateTable>,
    mutexes: Arc<NamedMutexRegistry>,
    event_loop_interval: StdDuration,
    batch_interval: StdDuration,
    url_index: DashMap<String, String>,
    groups: DashMap<String, GroupTask>,
}

impl Scheduler {
    pub fn new(
        bus: Arc<EventBus>,
        registry: Arc<PluginRegistry>,
        store: Arc<dyn RecordingStore>,
        state: Arc<UrlStateTable>,
        mutexes: Arc<NamedMutexRegistry>,
        event_loop_interval: StdDuration,
        batch_interval: StdDuration,
    ) -> Arc<Self> {
        Arc::new(Self {
            bus,
            registry,
            store,
            state,
            mutexes,
            event_loop_interval,
            batch_interval,
            url_index: DashMap::new(),
            groups: DashMap::new(),
        })
    }

    /// Seed the scheduler from a freshly built configuration snapshot.
    pub fn load(self: &Arc<Self>, snapshot: &ConfigSnapshot) {
        for entry in snapshot.entries() {
            for url in &entry.urls {
                self.add(entry.key.clone(), url.clone());
            }
        }
    }

    /// Add a URL to its adapter's group, creating the group (and its
    /// task) if this is the first URL routed to that adapter.
    pub fn add(self: &Arc<Self>, streamer_key: String, url: String) {
        let adapter_name = self.registry.route(&url).to_string();
        self.url_index.insert(url, streamer_key);
        if !self.groups.contains_key(&adapter_name) {
            self.spawn_group(adapter_name);
        }
    }

    /// Remove a URL. If its adapter's group is now empty, cancel the
    /// group's task.
    pub fn delete(&self, url: &str) {
        let adapter_name = self.registry.route(url).to_string();
        self.url_index.remove(url);
        if self.urls_for(&adapter_name).is_empty() {
            if let Some((_, task)) = self.groups.remove(&adapter_name) {
                task.stop();
            }
        }
    }

    /// Cancel every running group task (hot-reload / shutdown path).
    pub fn shutdown(&self) {
        let names: Vec<String> = self.groups.iter().map(|e| e.key().clone()).collect();
        for name in names {
            if let Some((_, task)) = self.groups.remove(&name) {
                task.stop();
            }
        }
    }

    fn urls_for(&self, adapter_name: &str) -> Vec<String> {
        self.url_index
            .iter()
            .filter(|e| self.registry.route(e.key()) == adapter_name)
            .map(|e| e.key().clone())
            .collect()
    }

    fn spawn_group(self: &Arc<Self>, adapter_name: String) {
        let task = if self.registry.is_batch_capable(&adapter_name) {
            let this = self.clone();
            let name = adapter_name.clone();
            let timer = PeriodicTimer::start(self.batch_interval, move |_token| {
                let this = this.clone();
                let name = name.clone();
                async move { this.run_batch_tick(&name).await }
            });
            GroupTask::Batch(timer)
        } else {
            let cancel = CancellationToken::new();
            let task_cancel = cancel.clone();
            let this = self.clone();
            let name = adapter_name.clone();
            let handle = tokio::spawn(async move { this.run_individual(name, task_cancel).await });
            GroupTask::Individual { cancel, handle }
        };
        self.groups.insert(adapter_name, task);
    }

    /// Cooperative sleep that returns `true` if cancellation won the race.
    async fn sleep_or_cancelled(&self, cancel: &CancellationToken, duration: StdDuration) -> bool {
        tokio::select! {
            _ = cancel.cancelled() => true,
            _ = tokio::time::sleep(duration) => false,
        }
    }

    async fn run_individual(self: Arc<Self>, adapter_name: String, cancel: CancellationToken) {
        let mut cursor: usize = 0;
        loop {
            if cancel.is_cancelled() {
                return;
            }
            let urls = self.urls_for(&adapter_name);
            if urls.is_empty() {
                if self.sleep_or_cancelled(&cancel, self.event_loop_interval).await {
                    return;
                }
                continue;
            }

            cursor %= urls.len();
            let url = urls[cursor].clone();
            cursor = (cursor + 1) % urls.len();

            let Some(streamer_key) = self.url_index.get(&url).map(|e| e.value().clone()) else {
                continue;
            };

            if self.state.is_downloading(&url) {
                // No throttle: move straight to the next URL.
                continue;
            }

            self.probe_pending_upload(&streamer_key, &url).await;

            if self.check_live(&adapter_name, &url).await {
                let mutex_name = format!("upload_file_list_{streamer_key}");
                let _guard = self.mutexes.acquire(&mutex_name).await;
                self.bus.publish(Event::PreDownload { streamer_key, url });
            }

            if self.sleep_or_cancelled(&cancel, self.event_loop_interval).await {
                return;
            }
        }
    }

    /// The scheduler's own "probe for pending segments" signal: an
    /// opportunistic UPLOAD trigger for whatever was last persisted,
    /// independent of any fresh DOWNLOADED, so a crash-and-restart
    /// doesn't strand segments that were never uploaded.
    async fn probe_pending_upload(&self, streamer_key: &str, url: &str) {
        match self.store.get_latest_by_streamer(streamer_key).await {
            Ok(Some(row)) => {
                let info = StreamInfo {
                    streamer_key: streamer_key.to_string(),
                    url: url.to_string(),
                    title: row.title,
                    start_time: row.start_time,
                    end_time: row.start_time,
                    cover_path: row.cover_path.map(PathBuf::from),
                    is_download_mode: false,
                    recording_id: row.id,
                };
                self.bus.publish(Event::Upload(info));
            }
            Ok(None) => {}
            Err(err) => {
                warn!(streamer_key, error = %err, "pending-upload probe lookup failed");
            }
        }
    }

    async fn check_live(&self, adapter_name: &str, url: &str) -> bool {
        let Some(mut adapter) = self.registry.new_download_adapter(adapter_name) else {
            return false;
        };
        match adapter.probe(true).await {
            Ok(probe) => probe.is_live,
            Err(err) => {
                warn!(url, error = %err, "liveness check probe failed");
                false
            }
        }
    }

    async fn run_batch_tick(&self, adapter_name: &str) {
        let urls = self.urls_for(adapter_name);
        if urls.is_empty() {
            return;
        }
        let Some(adapter) = self.registry.new_batch_adapter(adapter_name) else {
            return;
        };
        match adapter.batch_probe(&urls).await {
            Ok(live_urls) => {
                for url in live_urls {
                    let Some(streamer_key) = self.url_index.get(&url).map(|e| e.value().clone())
                    else {
                        continue;
                    };
                    self.bus.publish(Event::PreDownload { streamer_key, url });
                }
            }
            Err(err) => {
                warn!(adapter_name, error = %err, "batch_probe failed, continuing at next tick");
            }
        }
    }
}
