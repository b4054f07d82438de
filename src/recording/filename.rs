//! Filename templating for a recording session's output base path.
//!
//! Grounded in the teacher's filename-template expansion, but scoped to
//! the three placeholders the spec names (`{streamer}`, `{title}`,
//! `{url}`) plus strftime, followed by `utils::filename::sanitize`.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};

use crate::utils::filename::sanitize;

/// Expand `template` against the session's placeholders and `at`, then
/// sanitize. `template` may contain `{streamer}`, `{title}`, `{url}`,
/// and any `chrono::format::strftime` directive.
pub fn expand(template: &str, streamer: &str, title: &str, url: &str, at: DateTime<Utc>) -> String {
    let substituted = template
        .replace("{streamer}", streamer)
        .replace("{title}", title)
        .replace("{url}", url);
    let timestamped = at.format(&substituted).to_string();
    sanitize(&timestamped)
}

/// Expand the template and, if the resulting base path already exists
/// (bare, `.part`, or with any recording-sentinel extension), advance
/// `at` by whole seconds until the name is unique (P8).
///
/// Returns the output base path (no extension) and the session start
/// time actually used, which may differ from `at` by the collision
/// shift.
pub fn unique_output_base(
    dir: &Path,
    template: &str,
    streamer: &str,
    title: &str,
    url: &str,
    mut at: DateTime<Utc>,
) -> (PathBuf, DateTime<Utc>) {
    loop {
        let base_name = expand(template, streamer, title, url, at);
        let base_path = dir.join(&base_name);
        if !candidate_exists(&base_path) {
            return (base_path, at);
        }
        at += Duration::seconds(1);
    }
}

fn candidate_exists(base_path: &Path) -> bool {
    if base_path.exists() {
        return true;
    }
    for ext in crate::utils::fs::RECORDING_SENTINEL_EXTENSIONS {
        if base_path.with_extension(ext).exists() {
            return true;
        }
        let mut part = base_path.as_os_str().to_owned();
        part.push(".");
        part.push(ext);
        part.push(".part");
        if Path::new(&part).exists() {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn expands_placeholders_and_strftime() {
        let at = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let name = expand("{streamer}_%Y%m%d_{title}", "alice", "My Show", "u", at);
        assert_eq!(name, "alice_20260102_My Show");
    }

    #[test]
    fn strips_characters_introduced_by_an_unsafe_title() {
        let at = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let name = expand("{streamer}_{title}", "alice", "a/b?c", "u", at);
        assert_eq!(name, "aliceabc");
    }

    #[test]
    fn shifts_start_time_on_collision() {
        let dir = tempfile::tempdir().unwrap();
        let at = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let (first, first_at) =
            unique_output_base(dir.path(), "{streamer}_%Y%m%d%H%M%S", "alice", "t", "u", at);
        std::fs::write(first.with_extension("flv"), b"x").unwrap();
        assert_eq!(first_at, at);

        let (second, second_at) =
            unique_output_base(dir.path(), "{streamer}_%Y%m%d%H%M%S", "alice", "t", "u", at);
        assert_ne!(second, first);
        assert_eq!(second_at, at + Duration::seconds(1));
    }
}
