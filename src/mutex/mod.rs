//! C1: process-wide named mutex registry.
//!
//! Callers serialize on a string key — e.g. `upload_file_list_<streamer>`,
//! `upload_count_<url>`, `upload_filename` — without pre-declaring the
//! set of names up front. The first `acquire` for a name creates its
//! mutex; every later `acquire` for the same name returns the same
//! mutex. Cardinality is bounded by `#active URLs + #active streamer
//! keys`, so entries are never evicted.
//!
//! Non-reentrant: a caller must not hold a name's guard and acquire the
//! same name again on the same task, or it will deadlock.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// A held named-mutex guard. Releases on drop — every call site relies
/// on this rather than an explicit `release()`, so the mutex is freed on
/// every exit path including panics and early returns.
pub struct NamedMutexGuard {
    _guard: OwnedMutexGuard<()>,
}

/// Process-wide registry of named mutexes.
#[derive(Default)]
pub struct NamedMutexRegistry {
    mutexes: DashMap<String, Arc<Mutex<()>>>,
}

impl NamedMutexRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn mutex_for(&self, name: &str) -> Arc<Mutex<()>> {
        if let Some(existing) = self.mutexes.get(name) {
            return existing.clone();
        }
        self.mutexes
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Acquire the named mutex, creating it on first use. Blocks (async)
    /// until the previous holder, if any, releases it.
    pub async fn acquire(&self, name: &str) -> NamedMutexGuard {
        let mutex = self.mutex_for(name);
        let guard = mutex.lock_owned().await;
        NamedMutexGuard { _guard: guard }
    }

    /// Number of distinct names ever registered. Test/diagnostic use
    /// only — the registry never shrinks this.
    pub fn len(&self) -> usize {
        self.mutexes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mutexes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn serializes_same_name() {
        let registry = Arc::new(NamedMutexRegistry::new());
        let counter = Arc::new(AtomicUsize::new(0));
        let mut tasks = Vec::new();

        for _ in 0..20 {
            let registry = registry.clone();
            let counter = counter.clone();
            tasks.push(tokio::spawn(async move {
                let _guard = registry.acquire("upload_filename").await;
                let before = counter.fetch_add(1, Ordering::SeqCst);
                // if two holders were ever inside concurrently this sleep
                // would let a racing task observe a torn increment
                tokio::time::sleep(Duration::from_millis(1)).await;
                assert_eq!(counter.load(Ordering::SeqCst), before + 1);
            }));
        }

        for t in tasks {
            t.await.unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 20);
    }

    #[tokio::test]
    async fn distinct_names_do_not_block_each_other() {
        let registry = Arc::new(NamedMutexRegistry::new());
        let g1 = registry.acquire("a").await;
        let g2_fut = registry.acquire("b");
        let g2 = tokio::time::timeout(Duration::from_millis(50), g2_fut)
            .await
            .expect("distinct name should not block");
        drop(g1);
        drop(g2);
    }

    #[test]
    fn first_acquire_creates_entry() {
        let registry = NamedMutexRegistry::new();
        assert_eq!(registry.len(), 0);
        let _ = registry.mutex_for("x");
        assert_eq!(registry.len(), 1);
        let _ = registry.mutex_for("x");
        assert_eq!(registry.len(), 1);
    }
}
