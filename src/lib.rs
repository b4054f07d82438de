//! srec-sentinel: the scheduling, lifecycle, and concurrency fabric for
//! an always-on live-stream recorder/uploader supervisor.
//!
//! This crate owns URL watching (C5), per-URL state (C6), the event bus
//! (C3) and its handler wiring (C10), recording and upload sessions
//! (C7/C8), hot-reload (C9), and the persistence facade (C11). Concrete
//! per-platform download/upload adapters, the on-disk configuration
//! format, and any HTTP admin surface are out of scope (spec.md §1) and
//! are supplied by the binary embedding this crate.

pub mod bus;
pub mod config;
pub mod domain;
pub mod error;
pub mod handlers;
pub mod hooks;
pub mod logging;
pub mod mutex;
pub mod persistence;
pub mod plugin;
pub mod recording;
pub mod reload;
pub mod scheduler;
pub mod state;
pub mod timer;
pub mod upload;
pub mod utils;

pub use error::{Error, Result};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use bus::{BusConfig, Event, EventBus};
use config::ConfigSnapshot;
use handlers::HandlerContext;
use mutex::NamedMutexRegistry;
use persistence::RecordingStore;
use plugin::PluginRegistry;
use scheduler::Scheduler;
use state::UrlStateTable;
use upload::InFlightStems;

/// Where the running process reads and writes recordings. Grouped so
/// `Supervisor::start` doesn't take a pile of loose `PathBuf` arguments.
#[derive(Debug, Clone)]
pub struct Layout {
    pub output_dir: PathBuf,
    pub cover_dir: PathBuf,
}

/// Owns every long-lived component (C1-C11) and the handler wiring
/// (C10) tying them together. Constructed once per process — see
/// spec.md §4.1's "no static singleton" invariant.
pub struct Supervisor {
    pub bus: Arc<EventBus>,
    pub registry: Arc<PluginRegistry>,
    pub state: Arc<UrlStateTable>,
    pub mutexes: Arc<NamedMutexRegistry>,
    pub store: Arc<dyn RecordingStore>,
    pub config: Arc<RwLock<ConfigSnapshot>>,
    pub scheduler: Arc<Scheduler>,
}

impl Supervisor {
    /// Construct every component, wire the handlers (C10), and start
    /// the scheduler's per-adapter-group tasks (C5) for `config`.
    ///
    /// `registry` must already have its concrete adapters registered —
    /// this crate only defines the adapter traits and routing, not any
    /// implementation of them.
    pub fn start(
        registry: Arc<PluginRegistry>,
        store: Arc<dyn RecordingStore>,
        config: ConfigSnapshot,
        layout: Layout,
        event_loop_interval: Duration,
    ) -> Self {
        let bus = EventBus::new(BusConfig::default());
        let state = Arc::new(UrlStateTable::new());
        let mutexes = Arc::new(NamedMutexRegistry::new());
        let config = Arc::new(RwLock::new(config));

        let ctx = Arc::new(HandlerContext {
            config: config.clone(),
            state: state.clone(),
            mutexes: mutexes.clone(),
            registry: registry.clone(),
            store: store.clone(),
            in_flight_stems: Arc::new(InFlightStems::new()),
            output_dir: layout.output_dir,
            cover_dir: layout.cover_dir,
        });
        handlers::wire(&bus, ctx);

        let scheduler = Scheduler::new(
            bus.clone(),
            registry.clone(),
            store.clone(),
            state.clone(),
            mutexes.clone(),
            event_loop_interval,
            scheduler::DEFAULT_BATCH_INTERVAL,
        );
        scheduler.load(&config.read());

        Self {
            bus,
            registry,
            state,
            mutexes,
            store,
            config,
            scheduler,
        }
    }

    /// Swap in a freshly loaded configuration, diffing URLs against the
    /// previous snapshot so the scheduler only adds/removes what
    /// actually changed rather than tearing every group down.
    pub fn reload_config(&self, new_config: ConfigSnapshot) {
        let previous = self.config.read().all_urls();
        let next = new_config.all_urls();

        for url in &previous {
            if !next.contains(url) {
                self.scheduler.delete(url);
            }
        }
        for entry in new_config.entries() {
            for url in &entry.urls {
                if !previous.contains(url) {
                    self.scheduler.add(entry.key.clone(), url.clone());
                }
            }
        }

        *self.config.write() = new_config;
    }

    /// Manually publish an `UPLOAD` trigger for a streamer's most
    /// recent recording, bypassing the scheduler's own opportunistic
    /// probe. Exposed for operator-triggered retries.
    pub async fn trigger_upload(&self, streamer_key: &str) -> Result<bool> {
        let Some(row) = self.store.get_latest_by_streamer(streamer_key).await? else {
            return Ok(false);
        };
        let Some(entry) = self.config.read().streamer(streamer_key).cloned() else {
            return Ok(false);
        };
        let url = entry.urls.first().cloned().unwrap_or_default();
        self.bus.publish(Event::Upload(domain::StreamInfo {
            streamer_key: streamer_key.to_string(),
            url,
            title: row.title,
            start_time: row.start_time,
            end_time: row.start_time,
            cover_path: row.cover_path.map(PathBuf::from),
            is_download_mode: false,
            recording_id: row.id,
        }));
        Ok(true)
    }

    /// Cancel every scheduler group and drain the event bus's worker
    /// pools, bounded by `timeout` (spec.md §4.3's graceful-shutdown
    /// supplement).
    pub async fn shutdown(&self, timeout: Duration) {
        self.scheduler.shutdown();
        self.bus.shutdown(timeout).await;
    }
}
