//! In-flight request coalescing.
//!
//! Expensive translation fetches are deduplicated process-wide: at most one
//! build runs per key at a time, and every concurrent caller awaits the same
//! shared future. Entries remove themselves once the future settles, but
//! only if the stored entry is still the one that settled.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;

type SharedResult<T> = Shared<BoxFuture<'static, T>>;

/// Map of pending results keyed by request fingerprint
/// (e.g. `"{document_id}:{language}"`).
pub struct InflightMap<T: Clone + Send + Sync + 'static> {
    inner: Arc<Mutex<HashMap<String, (u64, SharedResult<T>)>>>,
    next_generation: AtomicU64,
}

impl<T: Clone + Send + Sync + 'static> Default for InflightMap<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + Sync + 'static> InflightMap<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(0),
        }
    }

    /// The pending result for `key`, if one is in flight.
    pub fn get_inflight(&self, key: &str) -> Option<SharedResult<T>> {
        self.inner.lock().get(key).map(|(_, f)| f.clone())
    }

    /// Store a pending result and schedule its removal on settle. The
    /// removal is guarded: if the entry was replaced in the meantime, the
    /// replacement stays.
    pub fn set_inflight(
        &self,
        key: &str,
        fut: impl std::future::Future<Output = T> + Send + 'static,
    ) -> SharedResult<T> {
        let shared = fut.boxed().shared();
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        self.inner
            .lock()
            .insert(key.to_string(), (generation, shared.clone()));

        let inner = Arc::clone(&self.inner);
        let key = key.to_string();
        let watched = shared.clone();
        tokio::spawn(async move {
            let _ = watched.await;
            let mut map = inner.lock();
            if map.get(&key).is_some_and(|(g, _)| *g == generation) {
                map.remove(&key);
            }
        });

        shared
    }

    /// Join an in-flight build for `key` or start one with `build`.
    pub async fn coalesce<F>(&self, key: &str, build: F) -> T
    where
        F: std::future::Future<Output = T> + Send + 'static,
    {
        let shared = {
            // Hold the lock across the check-and-insert so two callers
            // cannot both start a build.
            let mut map = self.inner.lock();
            if let Some((_, existing)) = map.get(key) {
                existing.clone()
            } else {
                let shared = build.boxed().shared();
                let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                map.insert(key.to_string(), (generation, shared.clone()));

                let inner = Arc::clone(&self.inner);
                let key = key.to_string();
                let watched = shared.clone();
                tokio::spawn(async move {
                    let _ = watched.await;
                    let mut map = inner.lock();
                    if map.get(&key).is_some_and(|(g, _)| *g == generation) {
                        map.remove(&key);
                    }
                });
                shared
            }
        };
        shared.await
    }

    /// Number of keys currently in flight.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Fingerprint for a translation request.
pub fn translation_key(document_id: &str, language: &str) -> String {
    format!("{document_id}:{language}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrent_callers_share_one_build() {
        let map = Arc::new(InflightMap::<u32>::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let map = Arc::clone(&map);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                map.coalesce("doc-1:en", async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    7u32
                })
                .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), 7);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_entry_removed_after_settle() {
        let map = InflightMap::<u32>::new();
        map.coalesce("doc-2:en", async { 1 }).await;
        // Cleanup runs on a spawned task; give it a tick.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(map.get_inflight("doc-2:en").is_none());
    }

    #[tokio::test]
    async fn test_replacement_survives_old_settle() {
        let map = InflightMap::<u32>::new();
        let first = map.set_inflight("k", async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            1
        });
        // Replace before the first settles.
        map.set_inflight("k", async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            2
        });
        let _ = first.await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        // The old entry's cleanup must not remove the replacement.
        assert!(map.get_inflight("k").is_some());
    }

    #[test]
    fn test_translation_key() {
        assert_eq!(translation_key("page:12:34", "en"), "page:12:34:en");
    }
}
