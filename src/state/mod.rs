//! C6: per-URL state table.
//!
//! A single mapping URL -> `{Idle, Downloading}` plus a companion
//! mapping URL -> in-flight-upload-count. The table itself is not
//! self-guarding — callers enforce the handler-boundary invariants
//! (P1, P2) using the named mutex registry (C1) around the critical
//! sections that read-then-write it; the atomics here only guarantee
//! that a single compare-and-swap is itself race-free.

use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::domain::UrlState;

const IDLE: u8 = 0;
const DOWNLOADING: u8 = 1;

#[derive(Default)]
pub struct UrlStateTable {
    state: DashMap<String, Arc<AtomicU8>>,
    upload_in_flight: DashMap<String, Arc<AtomicI64>>,
}

impl UrlStateTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn state_cell(&self, url: &str) -> Arc<AtomicU8> {
        self.state
            .entry(url.to_string())
            .or_insert_with(|| Arc::new(AtomicU8::new(IDLE)))
            .clone()
    }

    fn upload_cell(&self, url: &str) -> Arc<AtomicI64> {
        self.upload_in_flight
            .entry(url.to_string())
            .or_insert_with(|| Arc::new(AtomicI64::new(0)))
            .clone()
    }

    pub fn get(&self, url: &str) -> UrlState {
        match self.state_cell(url).load(Ordering::SeqCst) {
            DOWNLOADING => UrlState::Downloading,
            _ => UrlState::Idle,
        }
    }

    pub fn is_downloading(&self, url: &str) -> bool {
        matches!(self.get(url), UrlState::Downloading)
    }

    /// Attempt the Idle -> Downloading transition. Returns `true` if the
    /// caller won the transition and may now record (P1).
    pub fn try_begin_download(&self, url: &str) -> bool {
        self.state_cell(url)
            .compare_exchange(IDLE, DOWNLOADING, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Reset to Idle. Called unconditionally in the recording session's
    /// `finally` block.
    pub fn end_download(&self, url: &str) {
        self.state_cell(url).store(IDLE, Ordering::SeqCst);
    }

    pub fn upload_in_flight_count(&self, url: &str) -> i64 {
        self.upload_cell(url).load(Ordering::SeqCst)
    }

    /// Attempt the 0 -> 1 transition on the upload counter (P2). Returns
    /// `true` if the caller won and must decrement on its way out.
    pub fn try_begin_upload(&self, url: &str) -> bool {
        self.upload_cell(url)
            .compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn end_upload(&self, url: &str) {
        let cell = self.upload_cell(url);
        let prev = cell.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(prev >= 1, "upload counter underflow for {url}");
        if prev <= 0 {
            // clamp defensively; should never happen if callers are paired
            cell.store(0, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_one_download_wins() {
        let table = UrlStateTable::new();
        assert!(table.try_begin_download("u"));
        assert!(!table.try_begin_download("u"));
        table.end_download("u");
        assert!(table.try_begin_download("u"));
    }

    #[test]
    fn only_one_upload_in_flight() {
        let table = UrlStateTable::new();
        assert!(table.try_begin_upload("u"));
        assert!(!table.try_begin_upload("u"));
        assert_eq!(table.upload_in_flight_count("u"), 1);
        table.end_upload("u");
        assert_eq!(table.upload_in_flight_count("u"), 0);
        assert!(table.try_begin_upload("u"));
    }

    #[test]
    fn unknown_url_defaults_idle() {
        let table = UrlStateTable::new();
        assert_eq!(table.get("never-seen"), UrlState::Idle);
    }
}
