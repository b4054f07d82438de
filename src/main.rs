//! Binary entrypoint: reads environment-driven configuration, wires up
//! logging, persistence, and the scheduler/handler pipeline, then waits
//! for a shutdown signal.
//!
//! Concrete download/upload adapters are out of scope for this crate
//! (spec.md §1) — `build_registry` below is the seam a real deployment
//! fills in with its own `register_download`/`register_upload` calls
//! before handing the registry to `Supervisor::start`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use srec_sentinel::config::{self, ConfigSnapshot};
use srec_sentinel::persistence::sqlite::SqliteRecordingStore;
use srec_sentinel::persistence::RecordingStore;
use srec_sentinel::plugin::PluginRegistry;
use srec_sentinel::reload::{ProcessExit, ReloadCoordinator};
use srec_sentinel::{Layout, Supervisor};

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_path(name: &str, default: &str) -> PathBuf {
    PathBuf::from(env_or(name, default))
}

/// Registers this deployment's concrete adapters. Empty by default;
/// a real build of this binary would call `register_download` /
/// `register_batch_download` / `register_upload` here.
fn build_registry() -> PluginRegistry {
    PluginRegistry::new()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let log_dir = env_path("SREC_LOG_DIR", "./logs");
    let (logging, _guard) = srec_sentinel::logging::init(&log_dir)?;
    let _retention_timer = logging.start_retention_cleanup();

    tracing::info!(filter = %logging.get_filter(), "starting supervisor");

    let config_path = env_path("SREC_CONFIG_PATH", "./config.json");
    let config = match config::load_from_file(&config_path).await {
        Ok(snapshot) => snapshot,
        Err(err) => {
            tracing::warn!(
                path = %config_path.display(),
                error = %err,
                "no usable configuration file found, starting with an empty streamer list"
            );
            ConfigSnapshot::build(vec![])?
        }
    };

    let database_url = env_or("SREC_DATABASE_URL", "sqlite://./srec-sentinel.db");
    let store: Arc<dyn RecordingStore> = Arc::new(SqliteRecordingStore::connect(&database_url).await?);

    let registry = Arc::new(build_registry());
    let layout = Layout {
        output_dir: env_path("SREC_OUTPUT_DIR", "./recordings"),
        cover_dir: env_path("SREC_COVER_DIR", "./recordings/covers"),
    };
    let event_loop_interval = Duration::from_millis(
        env_or("SREC_EVENT_LOOP_INTERVAL_MS", "1000")
            .parse()
            .unwrap_or(1000),
    );

    let supervisor = Supervisor::start(registry, store, config, layout.clone(), event_loop_interval);

    let watched_paths = vec![
        std::env::current_exe().unwrap_or_default(),
        config_path.clone(),
    ];
    let reload_timer = ReloadCoordinator::new(
        watched_paths,
        layout.output_dir.clone(),
        ReloadCoordinator::DEFAULT_CHECK_INTERVAL,
        Arc::new(ProcessExit),
    )
    .start();

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received, draining in-flight work");

    reload_timer.stop();
    supervisor.shutdown(Duration::from_secs(10)).await;

    Ok(())
}
