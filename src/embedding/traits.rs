//! Embedding trait definitions.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::Result;

/// A remote embedding back-end.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Embed texts, returning one vector per input in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Fixed vector dimension.
    fn dimension(&self) -> usize;

    /// Maximum texts per API call.
    fn max_batch_size(&self) -> usize {
        96
    }
}

/// Persistent key-value tier of the embedding cache.
///
/// The store is authoritative only as a hint: recomputation on miss is
/// always correct, so implementations may drop writes under pressure.
#[async_trait]
pub trait VectorBlobStore: Send + Sync {
    /// Fetch vectors for the given keys. Missing keys are absent from the
    /// returned map.
    async fn get_many(&self, keys: &[String]) -> Result<HashMap<String, Vec<f32>>>;

    /// Store vectors.
    async fn put_many(&self, pairs: Vec<(String, Vec<f32>)>) -> Result<()>;
}
