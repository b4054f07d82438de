//! Default `RecordingStore` implementation, backed by `sqlx`/SQLite.
//!
//! Grounded in the teacher's `database/db.rs` connection-pool setup;
//! WAL journal mode and a busy timeout are configured here on top of
//! that, since a long-lived recorder with concurrent readers/writers on
//! one file needs both and the teacher's own pool setup configures
//! neither. Schema migration tooling is explicitly not part of this
//! facade's contract (spec.md §4.11), so the two tables are created ad
//! hoc with `CREATE TABLE IF NOT EXISTS` rather than via a migrations
//! directory. Queries use the runtime `sqlx::query` API rather than the
//! `query!` macro, since the macro requires a live database (or cached
//! offline metadata) at compile time.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};

use super::{RecordingRow, RecordingStore};
use crate::error::Result;

pub struct SqliteRecordingStore {
    pool: SqlitePool,
}

impl SqliteRecordingStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS recording (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                streamer_key TEXT NOT NULL,
                url TEXT NOT NULL,
                start_time TEXT NOT NULL,
                title TEXT NOT NULL DEFAULT '',
                cover_path TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS segment (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                recording_id INTEGER NOT NULL REFERENCES recording(id),
                file_name TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_segment_recording ON segment(recording_id)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn row_from(row: &sqlx::sqlite::SqliteRow) -> Result<RecordingRow> {
        let start_time_raw: String = row.try_get("start_time")?;
        let start_time = DateTime::parse_from_rfc3339(&start_time_raw)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());
        Ok(RecordingRow {
            id: row.try_get("id")?,
            streamer_key: row.try_get("streamer_key")?,
            url: row.try_get("url")?,
            start_time,
            title: row.try_get("title")?,
            cover_path: row.try_get("cover_path")?,
        })
    }
}

#[async_trait]
impl RecordingStore for SqliteRecordingStore {
    async fn add_recording(
        &self,
        streamer_key: &str,
        url: &str,
        start_time: DateTime<Utc>,
    ) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO recording (streamer_key, url, start_time) VALUES (?1, ?2, ?3)",
        )
        .bind(streamer_key)
        .bind(url)
        .bind(start_time.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    async fn update_title(&self, id: i64, title: &str) -> Result<()> {
        sqlx::query("UPDATE recording SET title = ?1 WHERE id = ?2")
            .bind(title)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_cover_path(&self, id: i64, path: &str) -> Result<()> {
        sqlx::query("UPDATE recording SET cover_path = ?1 WHERE id = ?2")
            .bind(path)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn append_file(&self, id: i64, file_name: &str) -> Result<()> {
        sqlx::query("INSERT INTO segment (recording_id, file_name) VALUES (?1, ?2)")
            .bind(id)
            .bind(file_name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_files(&self, id: i64) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT file_name FROM segment WHERE recording_id = ?1 ORDER BY id")
            .bind(id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("file_name").map_err(Into::into))
            .collect()
    }

    async fn get_latest_by_streamer(&self, streamer_key: &str) -> Result<Option<RecordingRow>> {
        let row = sqlx::query(
            "SELECT * FROM recording WHERE streamer_key = ?1 ORDER BY start_time DESC LIMIT 1",
        )
        .bind(streamer_key)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_from).transpose()
    }

    async fn get_by_file_name(&self, file_name: &str) -> Result<Option<RecordingRow>> {
        let row = sqlx::query(
            r#"
            SELECT recording.* FROM recording
            JOIN segment ON segment.recording_id = recording.id
            WHERE segment.file_name = ?1
            LIMIT 1
            "#,
        )
        .bind(file_name)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_from).transpose()
    }
}
