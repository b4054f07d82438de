//! C10: handlers wiring — binds `PreDownload`/`Download`/`Downloaded`/
//! `Upload` to the recording (C7) and upload (C8) sessions over the
//! event bus (C3), per spec.md §4.10.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::json;
use tracing::{info_span, warn, Instrument};
use uuid::Uuid;

use crate::bus::{Event, EventBus, EventKind, PoolId};
use crate::config::ConfigSnapshot;
use crate::hooks;
use crate::mutex::NamedMutexRegistry;
use crate::persistence::RecordingStore;
use crate::plugin::PluginRegistry;
use crate::recording::RecordingSession;
use crate::state::UrlStateTable;
use crate::upload::{InFlightStems, UploadSession};

/// Shared dependencies every handler needs, constructed once in the
/// process entrypoint and cloned (cheaply — everything behind an `Arc`)
/// into each registered closure.
pub struct HandlerContext {
    pub config: Arc<RwLock<ConfigSnapshot>>,
    pub state: Arc<UrlStateTable>,
    pub mutexes: Arc<NamedMutexRegistry>,
    pub registry: Arc<PluginRegistry>,
    pub store: Arc<dyn RecordingStore>,
    pub in_flight_stems: Arc<InFlightStems>,
    pub output_dir: PathBuf,
    pub cover_dir: PathBuf,
}

/// Register every handler named in spec.md §4.10 against `bus`.
pub fn wire(bus: &EventBus, ctx: Arc<HandlerContext>) {
    let pre_ctx = ctx.clone();
    bus.on_pooled(EventKind::PreDownload, PoolId::Pool1, move |event| {
        let ctx = pre_ctx.clone();
        async move { handle_pre_download(ctx, event).await }
    });

    let download_ctx = ctx.clone();
    bus.on_pooled(EventKind::Download, PoolId::Pool1, move |event| {
        let ctx = download_ctx.clone();
        async move { handle_download(ctx, event).await }
    });

    let downloaded_ctx = ctx.clone();
    bus.on_pooled(EventKind::Downloaded, PoolId::Pool1, move |event| {
        let ctx = downloaded_ctx.clone();
        async move { handle_downloaded(ctx, event).await }
    });

    let upload_ctx = ctx;
    bus.on_pooled(EventKind::Upload, PoolId::Pool2, move |event| {
        let ctx = upload_ctx.clone();
        async move { handle_upload(ctx, event).await }
    });
}

async fn handle_pre_download(ctx: Arc<HandlerContext>, event: Event) -> Vec<Event> {
    let Event::PreDownload { streamer_key, url } = event else {
        return vec![];
    };

    if ctx.state.is_downloading(&url) {
        return vec![];
    }

    let entry = ctx.config.read().streamer(&streamer_key).cloned();
    let Some(entry) = entry else {
        warn!(streamer_key, "pre_download for an unknown streamer key, dropping");
        return vec![];
    };

    let payload = json!({
        "name": streamer_key,
        "url": url,
        "start_time": chrono::Utc::now(),
    });
    hooks::run_json_hooks(&entry.preprocessor, &payload).await;

    vec![Event::Download { streamer_key, url }]
}

async fn handle_download(ctx: Arc<HandlerContext>, event: Event) -> Vec<Event> {
    let Event::Download { streamer_key, url } = event else {
        return vec![];
    };

    if !ctx.state.try_begin_download(&url) {
        return vec![];
    }

    let session_id = Uuid::new_v4();
    let span = info_span!("recording_session", %session_id, %streamer_key, %url);

    let entry = ctx.config.read().streamer(&streamer_key).cloned();
    let result = match entry {
        Some(entry) => {
            let adapter_name = ctx.registry.route(&url).to_string();
            let session = RecordingSession::new(
                Arc::new(entry),
                streamer_key.clone(),
                url.clone(),
                adapter_name,
                ctx.registry.clone(),
                ctx.store.clone(),
                ctx.output_dir.clone(),
                ctx.cover_dir.clone(),
            );
            session.run().instrument(span).await
        }
        None => {
            warn!(streamer_key, "download for an unknown streamer key, dropping");
            Ok(None)
        }
    };

    ctx.state.end_download(&url);

    match result {
        Ok(Some(info)) => vec![Event::Downloaded(info)],
        Ok(None) => vec![],
        Err(err) => {
            warn!(streamer_key, url, error = %err, "recording session failed");
            vec![]
        }
    }
}

async fn handle_downloaded(ctx: Arc<HandlerContext>, event: Event) -> Vec<Event> {
    let Event::Downloaded(info) = event else {
        return vec![];
    };

    let entry = ctx.config.read().streamer(&info.streamer_key).cloned();
    if let Some(entry) = entry {
        let file_list = ctx.store.get_files(info.recording_id).await.unwrap_or_default();
        let payload = json!({
            "name": info.streamer_key,
            "url": info.url,
            "room_title": info.title,
            "start_time": info.start_time,
            "end_time": info.end_time,
            "file_list": file_list,
        });
        hooks::run_json_hooks(&entry.downloaded_processor, &payload).await;
    }

    vec![Event::Upload(info)]
}

async fn handle_upload(ctx: Arc<HandlerContext>, event: Event) -> Vec<Event> {
    let Event::Upload(info) = event else {
        return vec![];
    };

    let entry = ctx.config.read().streamer(&info.streamer_key).cloned();
    let Some(entry) = entry else {
        warn!(streamer_key = %info.streamer_key, "upload for an unknown streamer key, dropping");
        return vec![];
    };

    let session = UploadSession::new(
        Arc::new(entry),
        ctx.state.clone(),
        ctx.mutexes.clone(),
        ctx.registry.clone(),
        ctx.store.clone(),
        ctx.in_flight_stems.clone(),
        ctx.output_dir.clone(),
    );

    if let Err(err) = session.run(&info).await {
        warn!(streamer_key = %info.streamer_key, error = %err, "upload session failed");
    }

    vec![]
}
