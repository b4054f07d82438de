//! The postprocessor hook chain (`rm | {mv: dest_dir} | {run: shell}`),
//! run once per finished upload over the adapter's returned files plus
//! the session's cover, if any (spec.md §4.8 step 5, §6).

use std::path::{Path, PathBuf};

use tracing::warn;

use crate::domain::{FileInfo, HookStep};

fn media_paths(files: &[FileInfo]) -> Vec<PathBuf> {
    let mut paths = Vec::with_capacity(files.len() * 2);
    for file in files {
        paths.push(file.video_path.clone());
        if let Some(danmaku) = &file.danmaku_path {
            paths.push(danmaku.clone());
        }
    }
    paths
}

/// `None`, and `Some(&[])`, both mean "no postprocessor configured":
/// delete every returned file and the cover. A configured `mv`/`run`
/// step only ever touches the media files (video + danmaku) — the
/// cover is left in place, matching how `None`/`rm` is the only branch
/// that's meant to dispose of it too.
pub async fn run_postprocessor(
    chain: Option<&[HookStep]>,
    files: &[FileInfo],
    cover_path: Option<&Path>,
) {
    let media = media_paths(files);
    let effective = chain.filter(|steps| !steps.is_empty());

    let Some(steps) = effective else {
        let mut all = media;
        if let Some(cover) = cover_path {
            all.push(cover.to_path_buf());
        }
        delete_all(&all).await;
        return;
    };

    for step in steps {
        match step {
            HookStep::Rm => {
                let mut all = media.clone();
                if let Some(cover) = cover_path {
                    all.push(cover.to_path_buf());
                }
                delete_all(&all).await;
            }
            HookStep::Mv { dest_dir } => move_all(&media, dest_dir).await,
            HookStep::Run { shell } => {
                let stdin = media
                    .iter()
                    .map(|p| p.to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("\n");
                if let Err(err) = crate::hooks::run_one(shell, stdin.as_bytes()).await {
                    warn!(%shell, error = %err, "postprocessor run step failed");
                }
            }
        }
    }
}

async fn delete_all(paths: &[PathBuf]) {
    for path in paths {
        if let Err(err) = tokio::fs::remove_file(path).await {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %path.display(), error = %err, "postprocessor rm failed");
            }
        }
    }
}

async fn move_all(paths: &[PathBuf], dest_dir: &str) {
    if let Err(err) = tokio::fs::create_dir_all(dest_dir).await {
        warn!(%dest_dir, error = %err, "could not create postprocessor destination directory");
        return;
    }
    for path in paths {
        let Some(name) = path.file_name() else { continue };
        let target = Path::new(dest_dir).join(name);
        if let Err(err) = tokio::fs::rename(path, &target).await {
            warn!(path = %path.display(), error = %err, "postprocessor mv failed");
        }
    }
}
