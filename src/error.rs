//! Crate-wide error taxonomy.
//!
//! Mirrors the behavioral taxonomy in the specification: each variant
//! carries the handling policy in its doc comment rather than in the
//! call sites that match on it.

use thiserror::Error;

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Crate-wide error type.
///
/// None of these propagate out of a registered event-bus handler or a
/// scheduler task top level — see `bus::EventBus::dispatch_one` and
/// `scheduler::watcher` for where each variant is caught and logged.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid or missing configuration. Fatal at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// `probe()` failed (network, parse, upstream protocol). Logged at
    /// WARN by the caller; the current polling iteration moves on.
    #[error("probe error for {url}: {source}")]
    Probe {
        url: String,
        #[source]
        source: anyhow::Error,
    },

    /// The recorder subprocess/library failed mid-session.
    #[error("record error for {url}: {source}")]
    Record {
        url: String,
        #[source]
        source: anyhow::Error,
    },

    /// A segment post-processor hook failed. The segment is still
    /// considered produced.
    #[error("segment post-processor failed for {segment}: {source}")]
    SegmentPost {
        segment: String,
        #[source]
        source: anyhow::Error,
    },

    /// The upload adapter failed. Files are not removed so a later
    /// UPLOAD event may retry.
    #[error("upload error for streamer {streamer_key}: {source}")]
    Upload {
        streamer_key: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("persistence error: {0}")]
    Persistence(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn probe(url: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        Self::Probe {
            url: url.into(),
            source: source.into(),
        }
    }

    pub fn record(url: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        Self::Record {
            url: url.into(),
            source: source.into(),
        }
    }

    pub fn segment_post(segment: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        Self::SegmentPost {
            segment: segment.into(),
            source: source.into(),
        }
    }

    pub fn upload(streamer_key: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        Self::Upload {
            streamer_key: streamer_key.into(),
            source: source.into(),
        }
    }
}
