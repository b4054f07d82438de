//! C2: periodic repeating task, with a cooperative-async variant and a
//! dedicated-thread variant.
//!
//! `interval` is wall-clock seconds; drift is acceptable — both variants
//! sleep for the full interval between invocations rather than trying to
//! hit a fixed wall-clock cadence.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// A repeating task driven by the cooperative async scheduler.
///
/// `stop()` cancels any in-flight invocation at the next suspension
/// point inside `func` (the callback is expected to check the token, or
/// simply be raced against it by the timer itself).
pub struct PeriodicTimer {
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl PeriodicTimer {
    /// Start invoking `func` once per `interval` until `stop()` is
    /// called. `func` receives a child cancellation token it may poll
    /// for early exit from a long-running iteration.
    pub fn start<F, Fut>(interval: Duration, func: F) -> Self
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let token = CancellationToken::new();
        let task_token = token.clone();
        let func = Arc::new(func);

        let handle = tokio::spawn(async move {
            loop {
                let iter_token = task_token.child_token();
                tokio::select! {
                    _ = task_token.cancelled() => break,
                    _ = func(iter_token) => {}
                }
                tokio::select! {
                    _ = task_token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
        });

        Self {
            token,
            handle: Some(handle),
        }
    }

    /// Cancel the timer. Does not wait for the in-flight invocation to
    /// observe cancellation; call `join` for that.
    pub fn stop(&self) {
        self.token.cancel();
    }

    /// Wait for the underlying task to finish after `stop()`.
    pub async fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(err) = handle.await {
                warn!(?err, "periodic timer task panicked");
            }
        }
    }
}

impl Drop for PeriodicTimer {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// A repeating task driven on a dedicated OS thread, for callbacks that
/// perform blocking work (e.g. synchronous subprocess waits) and must
/// not be scheduled on the cooperative runtime.
pub struct PeriodicThreadTimer {
    stop_tx: std::sync::mpsc::Sender<()>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl PeriodicThreadTimer {
    pub fn start<F>(interval: Duration, func: F) -> Self
    where
        F: Fn() + Send + 'static,
    {
        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();

        let handle = std::thread::spawn(move || {
            loop {
                func();
                if stop_rx.recv_timeout(interval).is_ok() {
                    break;
                }
            }
        });

        Self {
            stop_tx,
            handle: Some(handle),
        }
    }

    pub fn stop(&self) {
        let _ = self.stop_tx.send(());
    }

    pub fn join(mut self) {
        self.stop();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for PeriodicThreadTimer {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn invokes_until_stopped() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let timer = PeriodicTimer::start(Duration::from_millis(5), move |_token| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(40)).await;
        timer.stop();
        let observed = count.load(Ordering::SeqCst);
        assert!(observed >= 2, "expected multiple ticks, got {observed}");

        tokio::time::sleep(Duration::from_millis(20)).await;
        let after_stop = count.load(Ordering::SeqCst);
        // allow one in-flight tick to land right after stop()
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(count.load(Ordering::SeqCst) <= after_stop + 1);
    }

    #[test]
    fn thread_timer_invokes_until_stopped() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let timer = PeriodicThreadTimer::start(Duration::from_millis(5), move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        std::thread::sleep(Duration::from_millis(40));
        timer.join();
        assert!(count.load(Ordering::SeqCst) >= 2);
    }
}
