//! Two-tier cached embedder: bounded in-memory TTL tier over a persistent
//! key-value tier over the remote back-end.

use std::sync::Arc;
use std::time::Duration;

use crate::cache::TtlCache;
use crate::config::EmbeddingConfig;
use crate::error::Result;
use crate::metrics::get_metrics;

use super::{EmbeddingBackend, EmbeddingModel, VectorBlobStore};

/// Entries dropped per eviction pass when the memory tier fills up.
const MEMORY_EVICT_COUNT: usize = 64;

/// Embedder with memory and persistent cache tiers in front of a back-end.
pub struct TieredEmbedder {
    memory: TtlCache<String, Arc<Vec<f32>>>,
    persistent: Option<Arc<dyn VectorBlobStore>>,
    backend: Arc<dyn EmbeddingBackend>,
    model: EmbeddingModel,
}

impl TieredEmbedder {
    pub fn new(
        config: &EmbeddingConfig,
        model: EmbeddingModel,
        backend: Arc<dyn EmbeddingBackend>,
        persistent: Option<Arc<dyn VectorBlobStore>>,
    ) -> Self {
        Self {
            memory: TtlCache::new(
                Duration::from_secs(config.cache_ttl_secs),
                config.cache_max_entries,
                MEMORY_EVICT_COUNT,
            ),
            persistent,
            backend,
            model,
        }
    }

    /// The model this embedder serves.
    pub fn model(&self) -> EmbeddingModel {
        self.model
    }

    /// Embed one text.
    pub async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed(&[text.to_string()]).await?;
        Ok(vectors.pop().unwrap_or_default())
    }

    /// Embed a batch. The result has the input's length and order.
    ///
    /// Misses in the memory tier go to the persistent tier in one call;
    /// persistent hits are promoted into memory. Whatever is still missing
    /// goes to the back-end in one pass, and new vectors are written to
    /// both tiers.
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        let metrics = get_metrics();

        let keys: Vec<String> = texts.iter().map(|t| self.model.cache_key(t)).collect();
        let mut results: Vec<Option<Vec<f32>>> = vec![None; texts.len()];

        let memory_hits = self.memory.get_many(&keys);
        let mut missing: Vec<usize> = Vec::new();
        for (i, key) in keys.iter().enumerate() {
            match memory_hits.get(key) {
                Some(vector) => {
                    results[i] = Some(vector.as_ref().clone());
                    metrics.embedding_cache_hits_total.inc();
                }
                None => missing.push(i),
            }
        }

        // Persistent tier, one round-trip for all memory misses.
        if !missing.is_empty() {
            if let Some(store) = &self.persistent {
                let lookup: Vec<String> = missing.iter().map(|&i| keys[i].clone()).collect();
                match store.get_many(&lookup).await {
                    Ok(found) => {
                        let mut promotions = Vec::new();
                        missing.retain(|&i| match found.get(&keys[i]) {
                            Some(vector) => {
                                results[i] = Some(vector.clone());
                                promotions.push((keys[i].clone(), Arc::new(vector.clone())));
                                metrics.embedding_cache_hits_total.inc();
                                false
                            }
                            None => true,
                        });
                        self.memory.set_many(promotions);
                    }
                    Err(e) => {
                        // The store is a hint; recompute on failure.
                        tracing::warn!(error = %e, "persistent embedding cache lookup failed");
                    }
                }
            }
        }

        // Back-end for the rest.
        if !missing.is_empty() {
            metrics
                .embedding_cache_misses_total
                .inc_by(missing.len() as u64);
            let uncached: Vec<String> = missing.iter().map(|&i| texts[i].clone()).collect();
            let timer = metrics.embedding_duration_seconds.start_timer();
            let vectors = self.backend.embed(&uncached).await?;
            timer.observe_duration();

            let mut fresh = Vec::with_capacity(missing.len());
            for (&i, vector) in missing.iter().zip(vectors.into_iter()) {
                self.memory
                    .set(keys[i].clone(), Arc::new(vector.clone()));
                fresh.push((keys[i].clone(), vector.clone()));
                results[i] = Some(vector);
            }

            if let Some(store) = &self.persistent {
                if let Err(e) = store.put_many(fresh).await {
                    tracing::warn!(error = %e, "persistent embedding cache write failed");
                }
            }
        }

        Ok(results.into_iter().map(Option::unwrap_or_default).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingBackend {
        calls: AtomicUsize,
        dimension: usize,
    }

    #[async_trait]
    impl EmbeddingBackend for CountingBackend {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts
                .iter()
                .map(|t| vec![t.chars().count() as f32; self.dimension])
                .collect())
        }

        fn dimension(&self) -> usize {
            self.dimension
        }
    }

    #[derive(Default)]
    struct MemoryBlobStore {
        map: Mutex<HashMap<String, Vec<f32>>>,
        gets: AtomicUsize,
    }

    #[async_trait]
    impl VectorBlobStore for MemoryBlobStore {
        async fn get_many(&self, keys: &[String]) -> Result<HashMap<String, Vec<f32>>> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            let map = self.map.lock();
            Ok(keys
                .iter()
                .filter_map(|k| map.get(k).map(|v| (k.clone(), v.clone())))
                .collect())
        }

        async fn put_many(&self, pairs: Vec<(String, Vec<f32>)>) -> Result<()> {
            self.map.lock().extend(pairs);
            Ok(())
        }
    }

    fn embedder(
        backend: Arc<CountingBackend>,
        store: Option<Arc<MemoryBlobStore>>,
    ) -> TieredEmbedder {
        TieredEmbedder::new(
            &EmbeddingConfig::default(),
            EmbeddingModel::Jina,
            backend,
            store.map(|s| s as Arc<dyn VectorBlobStore>),
        )
    }

    #[tokio::test]
    async fn test_preserves_input_order_and_length() {
        let backend = Arc::new(CountingBackend { calls: AtomicUsize::new(0), dimension: 4 });
        let tiered = embedder(backend, None);

        let texts = vec!["اب".to_string(), "ابجد".to_string(), "ا".to_string()];
        let vectors = tiered.embed(&texts).await.unwrap();
        assert_eq!(vectors.len(), 3);
        assert_eq!(vectors[0][0], 2.0);
        assert_eq!(vectors[1][0], 4.0);
        assert_eq!(vectors[2][0], 1.0);
    }

    #[tokio::test]
    async fn test_memory_hit_skips_backend() {
        let backend = Arc::new(CountingBackend { calls: AtomicUsize::new(0), dimension: 4 });
        let tiered = embedder(Arc::clone(&backend), None);

        let texts = vec!["الصلاه".to_string()];
        tiered.embed(&texts).await.unwrap();
        tiered.embed(&texts).await.unwrap();
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_persistent_hit_promotes_to_memory() {
        let backend = Arc::new(CountingBackend { calls: AtomicUsize::new(0), dimension: 4 });
        let store = Arc::new(MemoryBlobStore::default());
        store
            .put_many(vec![("jina:نص".to_string(), vec![9.0; 4])])
            .await
            .unwrap();

        let tiered = embedder(Arc::clone(&backend), Some(Arc::clone(&store)));
        let texts = vec!["نص".to_string()];

        let first = tiered.embed(&texts).await.unwrap();
        assert_eq!(first[0], vec![9.0; 4]);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
        assert_eq!(store.gets.load(Ordering::SeqCst), 1);

        // Promoted: the second call touches neither store nor back-end.
        tiered.embed(&texts).await.unwrap();
        assert_eq!(store.gets.load(Ordering::SeqCst), 1);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_fresh_vectors_written_to_both_tiers() {
        let backend = Arc::new(CountingBackend { calls: AtomicUsize::new(0), dimension: 4 });
        let store = Arc::new(MemoryBlobStore::default());
        let tiered = embedder(Arc::clone(&backend), Some(Arc::clone(&store)));

        tiered.embed(&["جديد".to_string()]).await.unwrap();
        assert!(store.map.lock().contains_key("jina:جديد"));
    }

    #[tokio::test]
    async fn test_mixed_batch_single_backend_call() {
        let backend = Arc::new(CountingBackend { calls: AtomicUsize::new(0), dimension: 4 });
        let tiered = embedder(Arc::clone(&backend), None);

        tiered.embed(&["اول".to_string()]).await.unwrap();
        let texts = vec!["اول".to_string(), "ثاني".to_string(), "ثالث".to_string()];
        tiered.embed(&texts).await.unwrap();
        // One call for the warm-up, one for the two misses together.
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }
}
