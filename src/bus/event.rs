//! Event and pool-identity types carried by the bus.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::StreamInfo;

/// Stable IPC identifiers within the bus (spec.md §6). Any additional
/// handler registers against one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    PreDownload,
    Download,
    Downloaded,
    Upload,
    Uploaded,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::PreDownload => "pre_download",
            EventKind::Download => "download",
            EventKind::Downloaded => "downloaded",
            EventKind::Upload => "upload",
            EventKind::Uploaded => "uploaded",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The named fixed-size worker pools the bus dispatches onto. Pool
/// assignment is static per spec.md §4.3: `PreDownload`/`Download`/
/// `Downloaded` go to `Pool1`, `Upload` goes to `Pool2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolId {
    Pool1,
    Pool2,
}

/// An event flowing through the bus. Each variant carries exactly the
/// args tuple the corresponding handler needs.
#[derive(Debug, Clone)]
pub enum Event {
    PreDownload { streamer_key: String, url: String },
    Download { streamer_key: String, url: String },
    Downloaded(StreamInfo),
    Upload(StreamInfo),
    Uploaded(StreamInfo),
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::PreDownload { .. } => EventKind::PreDownload,
            Event::Download { .. } => EventKind::Download,
            Event::Downloaded(_) => EventKind::Downloaded,
            Event::Upload(_) => EventKind::Upload,
            Event::Uploaded(_) => EventKind::Uploaded,
        }
    }

    /// The pool a handler registered against this event's kind runs on,
    /// if the handler carries no explicit pool tag override.
    pub fn default_pool(&self) -> PoolId {
        match self.kind() {
            EventKind::PreDownload | EventKind::Download | EventKind::Downloaded => {
                PoolId::Pool1
            }
            EventKind::Upload | EventKind::Uploaded => PoolId::Pool2,
        }
    }
}
