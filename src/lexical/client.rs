//! HTTP client for the inverted-index service.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use crate::config::ElasticConfig;
use crate::error::{LexicalError, Result};
use crate::search::types::{AuthorRecord, AyahHit, BookCatalogRecord, HadithHit, PageHit};
use crate::text::AnalyzedQuery;

use super::queries;
use super::{LexicalEngine, LexicalOutcome};

/// An eligibility filter larger than this is not pushed into the query;
/// the engine-side terms clause would dominate request size.
const MAX_TERMS_FILTER: usize = 2_000;

/// Elasticsearch-compatible lexical engine client.
pub struct ElasticClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    config: ElasticConfig,
}

struct RawHit {
    score: f32,
    source: Value,
    highlight: Option<String>,
}

impl ElasticClient {
    pub fn from_config(config: &ElasticConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| LexicalError::Connection(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            config: config.clone(),
        })
    }

    async fn search(&self, index: &str, body: Value) -> Result<Vec<RawHit>> {
        let url = format!("{}/{}/_search", self.base_url, index);
        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("ApiKey {key}"));
        }

        let response = request
            .send()
            .await
            .map_err(|e| LexicalError::Connection(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LexicalError::Query(format!("{index} search failed ({status}): {body}")).into());
        }

        let parsed: Value = response
            .json()
            .await
            .map_err(|e| LexicalError::Response(e.to_string()))?;

        let hits = parsed["hits"]["hits"]
            .as_array()
            .ok_or_else(|| LexicalError::Response("missing hits array".to_string()))?;

        Ok(hits
            .iter()
            .map(|hit| RawHit {
                score: hit["_score"].as_f64().unwrap_or(0.0) as f32,
                source: hit["_source"].clone(),
                highlight: hit["highlight"]["text"][0].as_str().map(str::to_string),
            })
            .collect())
    }

    /// Run a content query, degrading every failure to `Unavailable`.
    async fn content_outcome<T>(
        &self,
        index: &str,
        query: &AnalyzedQuery,
        limit: usize,
        filters: Vec<Value>,
        map: impl Fn(RawHit) -> Option<(T, f32)>,
    ) -> LexicalOutcome<(T, f32)> {
        if query.normalized.is_empty() {
            return LexicalOutcome::Hits(vec![]);
        }
        let body = queries::content_query(query, limit, filters);
        match self.search(index, body).await {
            Ok(hits) => LexicalOutcome::Hits(hits.into_iter().filter_map(map).collect()),
            Err(e) => {
                tracing::warn!(index, error = %e, "lexical search unavailable");
                LexicalOutcome::Unavailable
            }
        }
    }
}

#[async_trait]
impl LexicalEngine for ElasticClient {
    async fn search_pages(
        &self,
        query: &AnalyzedQuery,
        limit: usize,
        book_id: Option<i64>,
        indexed: Option<&HashSet<i64>>,
    ) -> LexicalOutcome<(PageHit, f32)> {
        let mut filters = Vec::new();
        if let Some(id) = book_id {
            filters.push(json!({ "term": { "book_id": id } }));
        } else if let Some(set) = indexed {
            if set.len() <= MAX_TERMS_FILTER {
                let ids: Vec<i64> = set.iter().copied().collect();
                filters.push(json!({ "terms": { "book_id": ids } }));
            }
        }

        self.content_outcome(&self.config.pages_index, query, limit, filters, |hit| {
            Some((
                PageHit {
                    book_id: hit.source["book_id"].as_i64()?,
                    page_number: hit.source["page_number"].as_i64()?,
                    text_snippet: hit.source["text"].as_str().unwrap_or_default().to_string(),
                    highlighted_snippet: hit.highlight,
                },
                hit.score,
            ))
        })
        .await
    }

    async fn search_ayahs(
        &self,
        query: &AnalyzedQuery,
        limit: usize,
    ) -> LexicalOutcome<(AyahHit, f32)> {
        self.content_outcome(&self.config.ayahs_index, query, limit, vec![], |hit| {
            Some((
                AyahHit {
                    surah_number: hit.source["surah_number"].as_u64()? as u32,
                    ayah_number: hit.source["ayah_number"].as_u64()? as u32,
                    ayah_end: hit.source["ayah_end"].as_u64().map(|v| v as u32),
                    text: hit.source["text"].as_str().unwrap_or_default().to_string(),
                },
                hit.score,
            ))
        })
        .await
    }

    async fn search_hadiths(
        &self,
        query: &AnalyzedQuery,
        limit: usize,
    ) -> LexicalOutcome<(HadithHit, f32)> {
        self.content_outcome(&self.config.hadiths_index, query, limit, vec![], |hit| {
            Some((
                HadithHit {
                    collection_slug: hit.source["collection_slug"].as_str()?.to_string(),
                    hadith_number: hit.source["hadith_number"].as_i64()?,
                    book_id: hit.source["book_id"].as_i64(),
                    text: hit.source["text"].as_str().unwrap_or_default().to_string(),
                    chapter: hit.source["chapter"].as_str().map(str::to_string),
                },
                hit.score,
            ))
        })
        .await
    }

    async fn search_authors(
        &self,
        query: &AnalyzedQuery,
        limit: usize,
    ) -> LexicalOutcome<AuthorRecord> {
        if query.normalized.is_empty() {
            return LexicalOutcome::Hits(vec![]);
        }
        let body = queries::authors_catalog_query(query, limit);
        match self.search(&self.config.authors_index, body).await {
            Ok(hits) => LexicalOutcome::Hits(
                hits.into_iter()
                    .filter_map(|hit| {
                        Some(AuthorRecord {
                            author_id: hit.source["id"].as_i64()?,
                            name_arabic: hit.source["name_arabic"].as_str().map(str::to_string),
                            name_latin: hit.source["name_latin"].as_str().map(str::to_string),
                            score: Some(hit.score),
                        })
                    })
                    .collect(),
            ),
            Err(e) => {
                tracing::warn!(error = %e, "author search unavailable");
                LexicalOutcome::Unavailable
            }
        }
    }

    async fn search_books_catalog(
        &self,
        query: &AnalyzedQuery,
        limit: usize,
    ) -> LexicalOutcome<BookCatalogRecord> {
        if query.normalized.is_empty() {
            return LexicalOutcome::Hits(vec![]);
        }
        let body = queries::books_catalog_query(query, limit);
        match self.search(&self.config.books_index, body).await {
            Ok(hits) => LexicalOutcome::Hits(
                hits.into_iter()
                    .filter_map(|hit| {
                        Some(BookCatalogRecord {
                            book_id: hit.source["id"].as_i64()?,
                            title_arabic: hit.source["title_arabic"].as_str().map(str::to_string),
                            title_latin: hit.source["title_latin"].as_str().map(str::to_string),
                            author_name: hit.source["author_name_arabic"]
                                .as_str()
                                .map(str::to_string),
                            score: Some(hit.score),
                        })
                    })
                    .collect(),
            ),
            Err(e) => {
                tracing::warn!(error = %e, "book catalog search unavailable");
                LexicalOutcome::Unavailable
            }
        }
    }

    async fn page_counts(&self) -> Result<HashMap<i64, u64>> {
        let url = format!("{}/{}/_search", self.base_url, self.config.pages_index);
        let mut request = self.client.post(&url).json(&queries::page_counts_query());
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("ApiKey {key}"));
        }

        let response = request
            .send()
            .await
            .map_err(|e| LexicalError::Connection(e.to_string()))?;
        if !response.status().is_success() {
            return Err(LexicalError::Query(format!(
                "page count aggregation failed ({})",
                response.status()
            ))
            .into());
        }

        let parsed: Value = response
            .json()
            .await
            .map_err(|e| LexicalError::Response(e.to_string()))?;
        let buckets = parsed["aggregations"]["by_book"]["buckets"]
            .as_array()
            .ok_or_else(|| LexicalError::Response("missing aggregation buckets".to_string()))?;

        Ok(buckets
            .iter()
            .filter_map(|bucket| {
                Some((bucket["key"].as_i64()?, bucket["doc_count"].as_u64()?))
            })
            .collect())
    }
}
