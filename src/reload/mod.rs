//! C9: hot-reload coordinator.
//!
//! Watches source file and configuration mtimes; once a change is
//! observed, waits for a quiet point (no recording in progress, P6)
//! before cancelling owned tasks and exiting with a sentinel code so a
//! surrounding daemon/supervisor can re-launch the process. In container
//! mode, exit alone is the signal — the coordinator never re-execs
//! itself (spec.md §4.9).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration as StdDuration, SystemTime};

use tracing::{info, warn};

use crate::timer::PeriodicTimer;
use crate::utils::fs as fsutil;

/// Exit code a surrounding process-manager should treat as "please
/// restart me" rather than a genuine failure.
pub const RESTART_SENTINEL_EXIT_CODE: i32 = 75;

/// How the coordinator learns that it should actually stop the process
/// once quiescent — injected so tests can observe the decision instead
/// of calling `std::process::exit`.
pub trait RestartSink: Send + Sync {
    fn restart(&self);
}

/// Default sink: terminates the process. Never used by tests.
pub struct ProcessExit;

impl RestartSink for ProcessExit {
    fn restart(&self) {
        std::process::exit(RESTART_SENTINEL_EXIT_CODE);
    }
}

fn file_mtime(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).ok()?.modified().ok()
}

/// `true` if this process is running inside a container, per spec.md
/// §4.9's two detection heuristics. Container mode only changes whether
/// the surrounding daemon is expected to re-launch the process; the
/// coordinator's own behavior (cancel + exit) is identical either way.
pub fn in_container() -> bool {
    if Path::new("/.dockerenv").exists() {
        return true;
    }
    std::fs::read_to_string("/proc/self/cgroup")
        .map(|contents| contents.contains("docker"))
        .unwrap_or(false)
}

struct Watched {
    mtimes: HashMap<PathBuf, SystemTime>,
}

impl Watched {
    fn snapshot(paths: &[PathBuf]) -> Self {
        let mtimes = paths
            .iter()
            .filter_map(|p| file_mtime(p).map(|m| (p.clone(), m)))
            .collect();
        Self { mtimes }
    }

    /// `true` if any watched path's mtime moved, or a path appeared that
    /// wasn't previously readable.
    fn changed_since(&self, paths: &[PathBuf]) -> bool {
        paths.iter().any(|p| match file_mtime(p) {
            Some(current) => self.mtimes.get(p) != Some(&current),
            None => false,
        })
    }
}

/// The hot-reload coordinator. Construct once with the set of source
/// files and the configuration file to watch, then `start()` it.
pub struct ReloadCoordinator {
    watched_paths: Vec<PathBuf>,
    recording_dir: PathBuf,
    check_interval: StdDuration,
    sink: std::sync::Arc<dyn RestartSink>,
}

impl ReloadCoordinator {
    pub fn new(
        watched_paths: Vec<PathBuf>,
        recording_dir: PathBuf,
        check_interval: StdDuration,
        sink: std::sync::Arc<dyn RestartSink>,
    ) -> Self {
        Self {
            watched_paths,
            recording_dir,
            check_interval,
            sink,
        }
    }

    /// Default `check_sourcecode` cadence per spec.md §4.9.
    pub const DEFAULT_CHECK_INTERVAL: StdDuration = StdDuration::from_secs(15);

    /// Spawn the watch loop. Returns a `PeriodicTimer` the caller can
    /// `stop()`/`join()` on its own shutdown path.
    pub fn start(self) -> PeriodicTimer {
        let baseline = Watched::snapshot(&self.watched_paths);
        let state = std::sync::Arc::new(std::sync::Mutex::new(ReloadState {
            baseline,
            pending_restart: false,
        }));
        let watched_paths = self.watched_paths;
        let recording_dir = self.recording_dir;
        let sink = self.sink;
        let check_interval = self.check_interval;

        PeriodicTimer::start(check_interval, move |_token| {
            let state = state.clone();
            let watched_paths = watched_paths.clone();
            let recording_dir = recording_dir.clone();
            let sink = sink.clone();
            async move {
                let mut guard = state.lock().expect("reload coordinator state poisoned");
                tick_once(&mut guard, &watched_paths, &recording_dir, sink.as_ref());
            }
        })
    }
}

struct ReloadState {
    baseline: Watched,
    pending_restart: bool,
}

fn tick_once(
    state: &mut ReloadState,
    watched_paths: &[PathBuf],
    recording_dir: &Path,
    sink: &dyn RestartSink,
) {
    if !state.pending_restart {
        if state.baseline.changed_since(watched_paths) {
            info!("source or configuration change detected, waiting for a quiet point to restart");
            state.pending_restart = true;
        }
        return;
    }

    match fsutil::has_recording_in_progress(recording_dir) {
        Ok(true) => {
            info!("restart pending, deferred: a recording is still in progress");
        }
        Ok(false) => {
            info!(container = in_container(), "quiescent, restarting now");
            sink.restart();
        }
        Err(err) => {
            warn!(error = %err, "could not check recording directory, deferring restart");
        }
    }
}
