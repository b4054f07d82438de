//! Structured logging init: a reloadable `EnvFilter`, a console layer,
//! and a daily-rolling file sink, with local-timezone timestamps.
//!
//! Trimmed from the teacher's `logging/mod.rs`: the broadcast-to-
//! websocket-clients layer and the config-service-backed persisted
//! filter are part of the out-of-scope web admin surface (spec.md §1)
//! and are dropped; the reloadable filter, rolling file appender, and
//! retention cleanup are ambient concerns this crate keeps regardless.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::reload;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use crate::error::{Error, Result};
use crate::timer::PeriodicTimer;

pub const DEFAULT_LOG_FILTER: &str = "srec_sentinel=info,sqlx=warn";

const LOG_RETENTION_DAYS: i64 = 7;
const CLEANUP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Local-timezone timestamp formatter, so log lines line up with the
/// operator's wall clock rather than UTC.
#[derive(Debug, Clone, Copy)]
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

pub type FilterHandle = reload::Handle<EnvFilter, tracing_subscriber::Registry>;

/// Live handle to the running subscriber: lets an operator surface
/// change the log level without a restart.
pub struct LoggingConfig {
    handle: FilterHandle,
    log_dir: PathBuf,
}

impl LoggingConfig {
    pub fn get_filter(&self) -> String {
        self.handle.with_current(|f| f.to_string()).unwrap_or_default()
    }

    pub fn set_filter(&self, directive: &str) -> Result<()> {
        let filter = EnvFilter::try_new(directive)
            .map_err(|e| Error::Other(format!("invalid filter directive: {e}")))?;
        self.handle
            .reload(filter)
            .map_err(|e| Error::Other(format!("failed to reload filter: {e}")))?;
        tracing::info!(%directive, "log filter updated");
        Ok(())
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Start the daily log-retention sweep, built on the same periodic
    /// timer the scheduler's batch task uses (C2).
    pub fn start_retention_cleanup(&self) -> PeriodicTimer {
        let log_dir = self.log_dir.clone();
        PeriodicTimer::start(CLEANUP_INTERVAL, move |_token| {
            let log_dir = log_dir.clone();
            async move {
                if let Err(err) = cleanup_old_logs(&log_dir, LOG_RETENTION_DAYS).await {
                    tracing::warn!(error = %err, "failed to clean up old log files");
                }
            }
        })
    }
}

async fn cleanup_old_logs(log_dir: &Path, retention_days: i64) -> std::io::Result<()> {
    let cutoff = chrono::Utc::now() - chrono::Duration::days(retention_days);
    let mut entries = tokio::fs::read_dir(log_dir).await?;
    let mut deleted = 0u32;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some(date_str) = name.strip_prefix("srec-sentinel.log.") else {
            continue;
        };
        let Ok(file_date) = chrono::NaiveDate::parse_from_str(date_str, "%Y-%m-%d") else {
            continue;
        };
        let file_ts = file_date
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc().timestamp())
            .unwrap_or(0);
        if file_ts < cutoff.timestamp() {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => deleted += 1,
                Err(err) => tracing::warn!(path = %path.display(), error = %err, "failed to delete old log file"),
            }
        }
    }

    if deleted > 0 {
        tracing::info!(count = deleted, "cleaned up old log files");
    }
    Ok(())
}

/// Initialize the global subscriber. Returns the reload handle plus the
/// file appender's `WorkerGuard` — the caller must keep the guard alive
/// for the process lifetime or buffered file writes are lost on drop.
pub fn init(log_dir: &Path) -> Result<(Arc<LoggingConfig>, WorkerGuard)> {
    std::fs::create_dir_all(log_dir)?;

    let file_appender = tracing_appender::rolling::daily(log_dir, "srec-sentinel.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let initial_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let (filter_layer, handle) = reload::Layer::new(initial_filter);

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt::layer().with_ansi(true).with_timer(LocalTimer))
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_timer(LocalTimer),
        )
        .try_init()
        .map_err(|e| Error::Other(format!("failed to install global subscriber: {e}")))?;

    Ok((
        Arc::new(LoggingConfig {
            handle,
            log_dir: log_dir.to_path_buf(),
        }),
        guard,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_mentions_the_crate_and_sqlx() {
        assert!(DEFAULT_LOG_FILTER.contains("srec_sentinel=info"));
        assert!(DEFAULT_LOG_FILTER.contains("sqlx=warn"));
    }

    #[tokio::test]
    async fn retention_cleanup_deletes_only_old_rotated_logs() {
        let dir = tempfile::tempdir().unwrap();
        let old_name = format!(
            "srec-sentinel.log.{}",
            (chrono::Utc::now() - chrono::Duration::days(30)).format("%Y-%m-%d")
        );
        let fresh_name = format!(
            "srec-sentinel.log.{}",
            chrono::Utc::now().format("%Y-%m-%d")
        );
        tokio::fs::write(dir.path().join(&old_name), b"x").await.unwrap();
        tokio::fs::write(dir.path().join(&fresh_name), b"x").await.unwrap();

        cleanup_old_logs(dir.path(), LOG_RETENTION_DAYS).await.unwrap();

        assert!(!dir.path().join(&old_name).exists());
        assert!(dir.path().join(&fresh_name).exists());
    }
}
