//! C7: recording session.
//!
//! The probe → persist → record → segment → close lifecycle for a
//! single `(streamer_key, url)` pair. Driven by the `DOWNLOAD` handler
//! (`handlers::wire`), which owns the per-URL state transition and the
//! preprocessor/downloaded_processor hook points around it.

pub mod filename;
mod session;

pub use session::RecordingSession;
