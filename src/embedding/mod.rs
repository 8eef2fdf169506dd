//! Embedding generation with a two-tier cache.
//!
//! Lookups go memory tier → persistent tier → back-end, promoting hits
//! upward. The back-end is one of two remote APIs selected by
//! [`EmbeddingModel`]; vector-store collection names and persistent cache
//! keys derive from the model so the tiers never mix dimensions.

mod api;
mod tiered;
mod traits;

pub use api::*;
pub use tiered::*;
pub use traits::*;

use serde::{Deserialize, Serialize};

/// The embedding model in effect for a request. Exactly one is selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingModel {
    /// OpenAI text-embedding-3-large, 3072 dimensions.
    #[default]
    Large,
    /// Jina embeddings v3, 1024 dimensions.
    Jina,
}

impl EmbeddingModel {
    /// API model identifier.
    pub fn api_name(&self) -> &'static str {
        match self {
            Self::Large => "text-embedding-3-large",
            Self::Jina => "jina-embeddings-v3",
        }
    }

    /// Fixed vector dimension.
    pub fn dimension(&self) -> usize {
        match self {
            Self::Large => 3072,
            Self::Jina => 1024,
        }
    }

    /// Vector-store collection for book pages.
    pub fn pages_collection(&self) -> &'static str {
        match self {
            Self::Large => "pages_v3",
            Self::Jina => "pages_jina",
        }
    }

    /// Vector-store collection for Quran verses.
    pub fn quran_collection(&self) -> &'static str {
        match self {
            Self::Large => "quran_v3",
            Self::Jina => "quran_jina",
        }
    }

    /// Vector-store collection for hadiths.
    pub fn hadith_collection(&self) -> &'static str {
        match self {
            Self::Large => "hadith_v3",
            Self::Jina => "hadith_jina",
        }
    }

    /// Persistent-cache key for a text. The first back-end predates the
    /// prefix scheme, so only the second is prefixed.
    pub fn cache_key(&self, text: &str) -> String {
        match self {
            Self::Large => text.to_string(),
            Self::Jina => format!("jina:{text}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_dimensions() {
        assert_eq!(EmbeddingModel::Large.dimension(), 3072);
        assert_eq!(EmbeddingModel::Jina.dimension(), 1024);
    }

    #[test]
    fn test_collection_names_derive_from_model() {
        assert_eq!(EmbeddingModel::Large.pages_collection(), "pages_v3");
        assert_eq!(EmbeddingModel::Jina.quran_collection(), "quran_jina");
    }

    #[test]
    fn test_cache_key_prefixing() {
        assert_eq!(EmbeddingModel::Large.cache_key("نص"), "نص");
        assert_eq!(EmbeddingModel::Jina.cache_key("نص"), "jina:نص");
    }
}
