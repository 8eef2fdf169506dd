//! Vector engine adapter: ANN queries against the Qdrant collections for
//! pages, Quran verses and hadiths.

use std::collections::HashMap;

use async_trait::async_trait;
use futures::future;
use qdrant_client::qdrant::{Condition, CountPointsBuilder, Filter, SearchPointsBuilder};
use qdrant_client::Qdrant;

use crate::config::QdrantConfig;
use crate::embedding::EmbeddingModel;
use crate::error::{Result, VectorError};
use crate::search::types::{AyahHit, HadithHit, PageHit};

/// Vector-store count lookups run in batches of this many books.
const COUNT_BATCH_SIZE: usize = 20;

/// ANN search across the three content collections.
#[async_trait]
pub trait VectorEngine: Send + Sync {
    async fn search_pages(
        &self,
        model: EmbeddingModel,
        embedding: &[f32],
        limit: usize,
        threshold: f32,
        book_id: Option<i64>,
    ) -> Result<Vec<(PageHit, f32)>>;

    async fn search_ayahs(
        &self,
        model: EmbeddingModel,
        embedding: &[f32],
        limit: usize,
        threshold: f32,
    ) -> Result<Vec<(AyahHit, f32)>>;

    async fn search_hadiths(
        &self,
        model: EmbeddingModel,
        embedding: &[f32],
        limit: usize,
        threshold: f32,
    ) -> Result<Vec<(HadithHit, f32)>>;

    /// Per-book point counts in the pages collection, for eligibility
    /// checks.
    async fn count_by_book(
        &self,
        model: EmbeddingModel,
        book_ids: &[i64],
    ) -> Result<HashMap<i64, u64>>;
}

/// Qdrant-backed vector engine.
pub struct QdrantSearcher {
    client: Qdrant,
}

impl QdrantSearcher {
    pub fn from_config(config: &QdrantConfig) -> Result<Self> {
        let client = Qdrant::from_url(&config.url)
            .api_key(config.api_key.clone())
            .timeout(std::time::Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| VectorError::Connection(e.to_string()))?;
        Ok(Self { client })
    }

    fn classify(collection: &str, e: impl std::fmt::Display) -> VectorError {
        let message = e.to_string();
        if message.to_lowercase().contains("not found")
            || message.to_lowercase().contains("doesn't exist")
        {
            VectorError::CollectionMissing(collection.to_string())
        } else {
            VectorError::Query(message)
        }
    }

    async fn search_collection(
        &self,
        collection: &str,
        embedding: &[f32],
        limit: usize,
        threshold: f32,
        filter: Option<Filter>,
    ) -> Result<Vec<qdrant_client::qdrant::ScoredPoint>> {
        let mut builder = SearchPointsBuilder::new(collection, embedding.to_vec(), limit as u64)
            .score_threshold(threshold)
            .with_payload(true);
        if let Some(f) = filter {
            builder = builder.filter(f);
        }

        let result = self
            .client
            .search_points(builder)
            .await
            .map_err(|e| Self::classify(collection, e))?;
        Ok(result.result)
    }
}

#[async_trait]
impl VectorEngine for QdrantSearcher {
    async fn search_pages(
        &self,
        model: EmbeddingModel,
        embedding: &[f32],
        limit: usize,
        threshold: f32,
        book_id: Option<i64>,
    ) -> Result<Vec<(PageHit, f32)>> {
        let filter = book_id.map(|id| Filter::must([Condition::matches("book_id", id)]));
        let points = self
            .search_collection(model.pages_collection(), embedding, limit, threshold, filter)
            .await?;

        Ok(points
            .into_iter()
            .filter_map(|point| {
                let payload = &point.payload;
                Some((
                    PageHit {
                        book_id: payload.get("book_id")?.as_integer()?,
                        page_number: payload.get("page_number")?.as_integer()?,
                        text_snippet: payload
                            .get("text")
                            .and_then(|v| v.as_str())
                            .map(|s| s.to_string())
                            .unwrap_or_default(),
                        highlighted_snippet: None,
                    },
                    point.score,
                ))
            })
            .collect())
    }

    async fn search_ayahs(
        &self,
        model: EmbeddingModel,
        embedding: &[f32],
        limit: usize,
        threshold: f32,
    ) -> Result<Vec<(AyahHit, f32)>> {
        let points = self
            .search_collection(model.quran_collection(), embedding, limit, threshold, None)
            .await?;

        Ok(points
            .into_iter()
            .filter_map(|point| {
                let payload = &point.payload;
                Some((
                    AyahHit {
                        surah_number: payload.get("surah_number")?.as_integer()? as u32,
                        ayah_number: payload.get("ayah_number")?.as_integer()? as u32,
                        ayah_end: payload
                            .get("ayah_end")
                            .and_then(|v| v.as_integer())
                            .map(|v| v as u32),
                        text: payload
                            .get("text")
                            .and_then(|v| v.as_str())
                            .map(|s| s.to_string())
                            .unwrap_or_default(),
                    },
                    point.score,
                ))
            })
            .collect())
    }

    async fn search_hadiths(
        &self,
        model: EmbeddingModel,
        embedding: &[f32],
        limit: usize,
        threshold: f32,
    ) -> Result<Vec<(HadithHit, f32)>> {
        let points = self
            .search_collection(model.hadith_collection(), embedding, limit, threshold, None)
            .await?;

        Ok(points
            .into_iter()
            .filter_map(|point| {
                let payload = &point.payload;
                Some((
                    HadithHit {
                        collection_slug: payload.get("collection_slug")?.as_str()?.to_string(),
                        hadith_number: payload.get("hadith_number")?.as_integer()?,
                        book_id: payload.get("book_id").and_then(|v| v.as_integer()),
                        text: payload
                            .get("text")
                            .and_then(|v| v.as_str())
                            .map(|s| s.to_string())
                            .unwrap_or_default(),
                        chapter: payload
                            .get("chapter")
                            .and_then(|v| v.as_str())
                            .map(|s| s.to_string()),
                    },
                    point.score,
                ))
            })
            .collect())
    }

    async fn count_by_book(
        &self,
        model: EmbeddingModel,
        book_ids: &[i64],
    ) -> Result<HashMap<i64, u64>> {
        let collection = model.pages_collection();
        let mut counts = HashMap::with_capacity(book_ids.len());

        for batch in book_ids.chunks(COUNT_BATCH_SIZE) {
            let lookups = batch.iter().map(|&book_id| async move {
                let result = self
                    .client
                    .count(
                        CountPointsBuilder::new(collection)
                            .filter(Filter::must([Condition::matches("book_id", book_id)]))
                            .exact(false),
                    )
                    .await
                    .map_err(|e| Self::classify(collection, e))?;
                Ok::<_, crate::error::KashshafError>((
                    book_id,
                    result.result.map(|r| r.count).unwrap_or(0),
                ))
            });

            for entry in future::join_all(lookups).await {
                let (book_id, count) = entry?;
                counts.insert(book_id, count);
            }
        }

        Ok(counts)
    }
}
