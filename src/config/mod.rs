//! Streamer configuration snapshot and the derived URL index.
//!
//! The on-disk configuration file format and the web-admin boundary that
//! mutates it are out of scope (spec.md §1) — this module only owns the
//! in-memory snapshot, its invariants, and the index rebuild that the
//! scheduler (C5) and handlers (C10) read.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::domain::StreamerEntry;
use crate::error::{Error, Result};

/// An immutable, validated configuration snapshot.
///
/// Rebuilt wholesale on every config change and swapped in behind an
/// `arc-swap`-style `Arc` reference; components hold a clone of the
/// `Arc` and simply re-fetch it on the next scheduling tick rather than
/// observing mutation in place.
#[derive(Debug, Clone)]
pub struct ConfigSnapshot {
    streamers: Arc<HashMap<String, StreamerEntry>>,
    /// URL -> streamer key. Derived; rebuilt alongside `streamers`.
    url_index: Arc<HashMap<String, String>>,
}

impl ConfigSnapshot {
    /// Build a snapshot from streamer entries, enforcing the data
    /// model's invariant that a URL maps to exactly one streamer key.
    pub fn build(entries: Vec<StreamerEntry>) -> Result<Self> {
        let mut streamers = HashMap::with_capacity(entries.len());
        let mut url_index = HashMap::new();

        for entry in entries {
            for url in &entry.urls {
                if let Some(existing) = url_index.insert(url.clone(), entry.key.clone()) {
                    if existing != entry.key {
                        return Err(Error::config(format!(
                            "URL '{url}' is claimed by both streamer '{existing}' and '{}'",
                            entry.key
                        )));
                    }
                }
            }
            if streamers.insert(entry.key.clone(), entry).is_some() {
                return Err(Error::config("duplicate streamer key in configuration"));
            }
        }

        Ok(Self {
            streamers: Arc::new(streamers),
            url_index: Arc::new(url_index),
        })
    }

    pub fn streamer(&self, key: &str) -> Option<&StreamerEntry> {
        self.streamers.get(key)
    }

    pub fn streamer_key_for_url(&self, url: &str) -> Option<&str> {
        self.url_index.get(url).map(String::as_str)
    }

    pub fn all_urls(&self) -> Vec<String> {
        self.url_index.keys().cloned().collect()
    }

    pub fn entries(&self) -> impl Iterator<Item = &StreamerEntry> {
        self.streamers.values()
    }
}

/// Load a snapshot from a JSON file holding an array of `StreamerEntry`.
///
/// The on-disk format itself (and any web-admin surface that edits it)
/// is out of scope — this is the minimal loader `main` needs to turn a
/// file on disk into a `ConfigSnapshot` at startup and on SIGHUP-style
/// reloads.
pub async fn load_from_file(path: &Path) -> Result<ConfigSnapshot> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| Error::config(format!("reading {}: {e}", path.display())))?;
    let entries: Vec<StreamerEntry> = serde_json::from_str(&raw)?;
    ConfigSnapshot::build(entries)
}
