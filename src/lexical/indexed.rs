//! Eligibility gate for content-level search: the set of books fully
//! present in both the lexical and vector stores.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::TtlCache;
use crate::config::SearchConfig;
use crate::embedding::EmbeddingModel;
use crate::repos::MetadataRepository;
use crate::vector::VectorEngine;

use super::LexicalEngine;

/// Resolves and caches the indexed-book set per embedding model.
///
/// A book is eligible when its page count in the lexical index and its
/// point count in the vector store both reach the metadata store's count.
/// Hadith-source books are always eligible. Any failure yields `None`,
/// meaning "do not filter".
pub struct IndexedBookSetResolver {
    lexical: Arc<dyn LexicalEngine>,
    vector: Arc<dyn VectorEngine>,
    metadata: Arc<dyn MetadataRepository>,
    cache: TtlCache<EmbeddingModel, Arc<HashSet<i64>>>,
    hadith_source_books: Vec<i64>,
}

impl IndexedBookSetResolver {
    pub fn new(
        lexical: Arc<dyn LexicalEngine>,
        vector: Arc<dyn VectorEngine>,
        metadata: Arc<dyn MetadataRepository>,
        config: &SearchConfig,
    ) -> Self {
        Self {
            lexical,
            vector,
            metadata,
            cache: TtlCache::new(Duration::from_secs(config.indexed_books_ttl_secs), 4, 1),
            hadith_source_books: config.hadith_source_book_ids.clone(),
        }
    }

    /// The indexed-book set, or `None` when it cannot be computed and
    /// filtering must be skipped.
    pub async fn indexed_books(&self, model: EmbeddingModel) -> Option<Arc<HashSet<i64>>> {
        if let Some(cached) = self.cache.get(&model) {
            return Some(cached);
        }

        let set = match self.compute(model).await {
            Ok(set) => Arc::new(set),
            Err(e) => {
                tracing::warn!(error = %e, "indexed-book set unavailable, skipping filter");
                return None;
            }
        };

        self.cache.set(model, Arc::clone(&set));
        Some(set)
    }

    async fn compute(&self, model: EmbeddingModel) -> crate::error::Result<HashSet<i64>> {
        let reference = self.metadata.page_counts().await?;
        let lexical_counts = self.lexical.page_counts().await?;

        // Books the lexical index holds in full.
        let candidates: Vec<i64> = reference
            .iter()
            .filter(|(book_id, &count)| {
                lexical_counts.get(*book_id).copied().unwrap_or(0) >= count
            })
            .map(|(&book_id, _)| book_id)
            .collect();

        // Of those, books the vector store also holds in full.
        let vector_counts = self.vector.count_by_book(model, &candidates).await?;
        let mut set: HashSet<i64> = candidates
            .into_iter()
            .filter(|book_id| {
                vector_counts.get(book_id).copied().unwrap_or(0)
                    >= reference.get(book_id).copied().unwrap_or(0)
            })
            .collect();

        set.extend(self.hadith_source_books.iter().copied());
        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{KashshafError, Result};
    use crate::lexical::LexicalOutcome;
    use crate::search::types::{
        AuthorRecord, AyahHit, BookCatalogRecord, BookMeta, HadithHit, PageHit,
    };
    use crate::text::AnalyzedQuery;
    use async_trait::async_trait;
    use std::collections::HashMap;

    struct StubLexical {
        counts: Result<HashMap<i64, u64>>,
    }

    #[async_trait]
    impl LexicalEngine for StubLexical {
        async fn search_pages(
            &self,
            _query: &AnalyzedQuery,
            _limit: usize,
            _book_id: Option<i64>,
            _indexed: Option<&HashSet<i64>>,
        ) -> LexicalOutcome<(PageHit, f32)> {
            LexicalOutcome::Hits(vec![])
        }

        async fn search_ayahs(
            &self,
            _query: &AnalyzedQuery,
            _limit: usize,
        ) -> LexicalOutcome<(AyahHit, f32)> {
            LexicalOutcome::Hits(vec![])
        }

        async fn search_hadiths(
            &self,
            _query: &AnalyzedQuery,
            _limit: usize,
        ) -> LexicalOutcome<(HadithHit, f32)> {
            LexicalOutcome::Hits(vec![])
        }

        async fn search_authors(
            &self,
            _query: &AnalyzedQuery,
            _limit: usize,
        ) -> LexicalOutcome<AuthorRecord> {
            LexicalOutcome::Hits(vec![])
        }

        async fn search_books_catalog(
            &self,
            _query: &AnalyzedQuery,
            _limit: usize,
        ) -> LexicalOutcome<BookCatalogRecord> {
            LexicalOutcome::Hits(vec![])
        }

        async fn page_counts(&self) -> Result<HashMap<i64, u64>> {
            match &self.counts {
                Ok(map) => Ok(map.clone()),
                Err(_) => Err(crate::error::LexicalError::Connection("down".into()).into()),
            }
        }
    }

    struct StubVector {
        counts: HashMap<i64, u64>,
    }

    #[async_trait]
    impl VectorEngine for StubVector {
        async fn search_pages(
            &self,
            _model: EmbeddingModel,
            _embedding: &[f32],
            _limit: usize,
            _threshold: f32,
            _book_id: Option<i64>,
        ) -> Result<Vec<(PageHit, f32)>> {
            Ok(vec![])
        }

        async fn search_ayahs(
            &self,
            _model: EmbeddingModel,
            _embedding: &[f32],
            _limit: usize,
            _threshold: f32,
        ) -> Result<Vec<(AyahHit, f32)>> {
            Ok(vec![])
        }

        async fn search_hadiths(
            &self,
            _model: EmbeddingModel,
            _embedding: &[f32],
            _limit: usize,
            _threshold: f32,
        ) -> Result<Vec<(HadithHit, f32)>> {
            Ok(vec![])
        }

        async fn count_by_book(
            &self,
            _model: EmbeddingModel,
            book_ids: &[i64],
        ) -> Result<HashMap<i64, u64>> {
            Ok(book_ids
                .iter()
                .filter_map(|id| self.counts.get(id).map(|&c| (*id, c)))
                .collect())
        }
    }

    struct StubMetadata {
        counts: HashMap<i64, u64>,
    }

    #[async_trait]
    impl MetadataRepository for StubMetadata {
        async fn page_counts(&self) -> Result<HashMap<i64, u64>> {
            Ok(self.counts.clone())
        }

        async fn books_meta(&self, _book_ids: &[i64]) -> Result<HashMap<i64, BookMeta>> {
            Ok(HashMap::new())
        }

        async fn authors_like(&self, _pattern: &str, _limit: usize) -> Result<Vec<AuthorRecord>> {
            Ok(vec![])
        }

        async fn books_like(
            &self,
            _pattern: &str,
            _limit: usize,
        ) -> Result<Vec<BookCatalogRecord>> {
            Ok(vec![])
        }

        async fn page_html(&self, _keys: &[(i64, i64)]) -> Result<HashMap<(i64, i64), String>> {
            Ok(HashMap::new())
        }
    }

    fn resolver(
        lexical_counts: Result<HashMap<i64, u64>>,
        vector_counts: HashMap<i64, u64>,
        meta_counts: HashMap<i64, u64>,
        hadith_books: Vec<i64>,
    ) -> IndexedBookSetResolver {
        IndexedBookSetResolver::new(
            Arc::new(StubLexical { counts: lexical_counts }),
            Arc::new(StubVector { counts: vector_counts }),
            Arc::new(StubMetadata { counts: meta_counts }),
            &SearchConfig {
                hadith_source_book_ids: hadith_books,
                ..SearchConfig::default()
            },
        )
    }

    #[tokio::test]
    async fn test_intersection_of_complete_books() {
        // Book 1 complete everywhere; book 2 short in lexical; book 3 short
        // in vector.
        let meta = HashMap::from([(1, 100), (2, 100), (3, 100)]);
        let lexical = HashMap::from([(1, 100), (2, 60), (3, 100)]);
        let vector = HashMap::from([(1, 100), (3, 40)]);
        let resolver = resolver(Ok(lexical), vector, meta, vec![]);

        let set = resolver.indexed_books(EmbeddingModel::Large).await.unwrap();
        assert!(set.contains(&1));
        assert!(!set.contains(&2));
        assert!(!set.contains(&3));
    }

    #[tokio::test]
    async fn test_hadith_source_books_always_present() {
        let resolver = resolver(Ok(HashMap::new()), HashMap::new(), HashMap::new(), vec![1681]);
        let set = resolver.indexed_books(EmbeddingModel::Large).await.unwrap();
        assert!(set.contains(&1681));
    }

    #[tokio::test]
    async fn test_failure_means_no_filter() {
        let resolver = resolver(
            Err(KashshafError::Repository("down".into())),
            HashMap::new(),
            HashMap::new(),
            vec![1681],
        );
        assert!(resolver.indexed_books(EmbeddingModel::Large).await.is_none());
    }

    #[tokio::test]
    async fn test_result_is_cached() {
        let meta = HashMap::from([(1, 10)]);
        let lexical = HashMap::from([(1, 10)]);
        let vector = HashMap::from([(1, 10)]);
        let resolver = resolver(Ok(lexical), vector, meta, vec![]);

        let first = resolver.indexed_books(EmbeddingModel::Large).await.unwrap();
        let second = resolver.indexed_books(EmbeddingModel::Large).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }
}
