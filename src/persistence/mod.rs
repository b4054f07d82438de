//! C11: persistence facade.
//!
//! A thin interface over an opaque relational store (spec.md §1 puts the
//! concrete schema/engine out of scope). The facade only promises that
//! concurrent calls from multiple worker threads are safe and that reads
//! observe committed writes.

pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;

/// A persisted recording row plus the segment file names appended to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingRow {
    pub id: i64,
    pub streamer_key: String,
    pub url: String,
    pub start_time: DateTime<Utc>,
    pub title: String,
    pub cover_path: Option<String>,
}

#[async_trait]
pub trait RecordingStore: Send + Sync {
    async fn add_recording(
        &self,
        streamer_key: &str,
        url: &str,
        start_time: DateTime<Utc>,
    ) -> Result<i64>;

    async fn update_title(&self, id: i64, title: &str) -> Result<()>;

    async fn update_cover_path(&self, id: i64, path: &str) -> Result<()>;

    async fn append_file(&self, id: i64, file_name: &str) -> Result<()>;

    async fn get_files(&self, id: i64) -> Result<Vec<String>>;

    /// The most recent recording for a streamer key, used for
    /// upload-file discovery (spec.md §4.8 step 3).
    async fn get_latest_by_streamer(&self, streamer_key: &str) -> Result<Option<RecordingRow>>;

    /// Recover a recording's `stream_info` by one of its segment file
    /// names, used when UPLOAD needs the title for a file that wasn't
    /// discovered via the streamer-key substring match.
    async fn get_by_file_name(&self, file_name: &str) -> Result<Option<RecordingRow>>;
}

/// In-memory implementation used by unit and integration tests.
pub mod memory {
    use std::collections::HashMap;

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use parking_lot::Mutex;

    use super::{RecordingRow, RecordingStore};
    use crate::error::Result;

    #[derive(Default)]
    struct Inner {
        next_id: i64,
        rows: HashMap<i64, RecordingRow>,
        files: HashMap<i64, Vec<String>>,
        file_to_recording: HashMap<String, i64>,
    }

    #[derive(Default)]
    pub struct InMemoryRecordingStore {
        inner: Mutex<Inner>,
    }

    impl InMemoryRecordingStore {
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl RecordingStore for InMemoryRecordingStore {
        async fn add_recording(
            &self,
            streamer_key: &str,
            url: &str,
            start_time: DateTime<Utc>,
        ) -> Result<i64> {
            let mut inner = self.inner.lock();
            inner.next_id += 1;
            let id = inner.next_id;
            inner.rows.insert(
                id,
                RecordingRow {
                    id,
                    streamer_key: streamer_key.to_string(),
                    url: url.to_string(),
                    start_time,
                    title: String::new(),
                    cover_path: None,
                },
            );
            inner.files.insert(id, Vec::new());
            Ok(id)
        }

        async fn update_title(&self, id: i64, title: &str) -> Result<()> {
            let mut inner = self.inner.lock();
            if let Some(row) = inner.rows.get_mut(&id) {
                row.title = title.to_string();
            }
            Ok(())
        }

        async fn update_cover_path(&self, id: i64, path: &str) -> Result<()> {
            let mut inner = self.inner.lock();
            if let Some(row) = inner.rows.get_mut(&id) {
                row.cover_path = Some(path.to_string());
            }
            Ok(())
        }

        async fn append_file(&self, id: i64, file_name: &str) -> Result<()> {
            let mut inner = self.inner.lock();
            inner
                .files
                .entry(id)
                .or_default()
                .push(file_name.to_string());
            inner
                .file_to_recording
                .insert(file_name.to_string(), id);
            Ok(())
        }

        async fn get_files(&self, id: i64) -> Result<Vec<String>> {
            Ok(self.inner.lock().files.get(&id).cloned().unwrap_or_default())
        }

        async fn get_latest_by_streamer(&self, streamer_key: &str) -> Result<Option<RecordingRow>> {
            let inner = self.inner.lock();
            Ok(inner
                .rows
                .values()
                .filter(|r| r.streamer_key == streamer_key)
                .max_by_key(|r| r.start_time)
                .cloned())
        }

        async fn get_by_file_name(&self, file_name: &str) -> Result<Option<RecordingRow>> {
            let inner = self.inner.lock();
            Ok(inner
                .file_to_recording
                .get(file_name)
                .and_then(|id| inner.rows.get(id))
                .cloned())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[tokio::test]
        async fn round_trips_segments_and_latest_lookup() {
            let store = InMemoryRecordingStore::new();
            let id = store
                .add_recording("alice", "https://x/1", Utc::now())
                .await
                .unwrap();
            store.update_title(id, "My Stream").await.unwrap();
            store.append_file(id, "alice_001.flv").await.unwrap();
            store.append_file(id, "alice_002.flv").await.unwrap();

            assert_eq!(
                store.get_files(id).await.unwrap(),
                vec!["alice_001.flv", "alice_002.flv"]
            );

            let latest = store.get_latest_by_streamer("alice").await.unwrap().unwrap();
            assert_eq!(latest.title, "My Stream");

            let by_file = store.get_by_file_name("alice_002.flv").await.unwrap().unwrap();
            assert_eq!(by_file.id, id);
        }
    }
}
