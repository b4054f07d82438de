//! Hook-chain ABI shared by the preprocessor, segment, and
//! downloaded-processor hook points (spec.md §6). The postprocessor
//! chain (`rm | mv | run`) is specific enough to C8 that it lives in
//! `upload::hooks` instead.
//!
//! Each `run` step receives `payload` as JSON on stdin; exit code 0 is
//! success, anything else is logged and ignored — the chain always
//! continues to its next step.

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::warn;

use crate::domain::HookStep;

/// Run every `Run` step in `chain` sequentially, feeding each one
/// `payload` on stdin. Non-`Run` steps are logged and skipped — `rm`/
/// `mv` are only meaningful in a postprocessor chain.
pub async fn run_json_hooks(chain: &[HookStep], payload: &serde_json::Value) {
    let stdin_payload = payload.to_string();
    for step in chain {
        match step {
            HookStep::Run { shell } => {
                if let Err(err) = run_one(shell, stdin_payload.as_bytes()).await {
                    warn!(%shell, error = %err, "hook failed");
                }
            }
            HookStep::Rm | HookStep::Mv { .. } => {
                warn!(?step, "rm/mv hook step ignored outside a postprocessor chain");
            }
        }
    }
}

/// Spawn `shell` via `sh -c`, write `stdin` to it, and wait for exit.
/// Logs (doesn't propagate) a non-zero exit.
pub async fn run_one(shell: &str, stdin: &[u8]) -> std::io::Result<()> {
    let mut child = Command::new("sh")
        .arg("-c")
        .arg(shell)
        .stdin(std::process::Stdio::piped())
        .spawn()?;

    if let Some(mut child_stdin) = child.stdin.take() {
        let _ = child_stdin.write_all(stdin).await;
    }

    let status = child.wait().await?;
    if !status.success() {
        warn!(%shell, code = ?status.code(), "hook exited non-zero");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn runs_run_steps_and_skips_others() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("ran");
        let chain = vec![
            HookStep::Rm,
            HookStep::Run {
                shell: format!("cat > {}", marker.display()),
            },
        ];
        run_json_hooks(&chain, &json!({"name": "alice"})).await;
        let contents = tokio::fs::read_to_string(&marker).await.unwrap();
        assert!(contents.contains("alice"));
    }
}
