//! Repository seams onto the relational metadata store and the analytics
//! sink. Implementations live outside this crate; the pipeline only sees
//! these traits, and tests substitute in-memory versions.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::search::types::{AuthorRecord, BookCatalogRecord, BookMeta, SearchMode};

/// Typed access to book/page metadata.
#[async_trait]
pub trait MetadataRepository: Send + Sync {
    /// Per-book page counts, the reference for index-completeness checks.
    async fn page_counts(&self) -> Result<HashMap<i64, u64>>;

    /// Catalog metadata for a set of books.
    async fn books_meta(&self, book_ids: &[i64]) -> Result<HashMap<i64, BookMeta>>;

    /// SQL `LIKE` author lookup, the fallback when the lexical catalog is
    /// unavailable.
    async fn authors_like(&self, pattern: &str, limit: usize) -> Result<Vec<AuthorRecord>>;

    /// SQL `LIKE` book-title lookup, the catalog fallback for books.
    async fn books_like(&self, pattern: &str, limit: usize) -> Result<Vec<BookCatalogRecord>>;

    /// Raw page HTML for translation paragraph matching.
    async fn page_html(&self, keys: &[(i64, i64)]) -> Result<HashMap<(i64, i64), String>>;
}

/// A stored page translation: ordered per-paragraph records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageTranslation {
    pub paragraphs: Vec<ParagraphTranslation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParagraphTranslation {
    pub paragraph_index: usize,
    pub translation: String,
}

/// Batched translation lookups.
#[async_trait]
pub trait TranslationRepository: Send + Sync {
    /// Ayah translations for `(surah, ayah)` keys in the requested edition
    /// or language.
    async fn ayah_translations(
        &self,
        keys: &[(u32, u32)],
        edition: &str,
    ) -> Result<HashMap<(u32, u32), String>>;

    /// Hadith translations for `(book_id, hadith_number)` keys.
    async fn hadith_translations(
        &self,
        keys: &[(i64, i64)],
        language: &str,
    ) -> Result<HashMap<(i64, i64), String>>;

    /// Page translations for `(book_id, page_number)` keys.
    async fn page_translations(
        &self,
        keys: &[(i64, i64)],
        language: &str,
    ) -> Result<HashMap<(i64, i64), PageTranslation>>;
}

/// A search analytics event. Emission is fire-and-forget.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchEvent {
    pub query: String,
    pub mode: SearchMode,
    pub refined: bool,
    pub result_count: usize,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

/// Sink for analytics events.
#[async_trait]
pub trait AnalyticsSink: Send + Sync {
    async fn record_search(&self, event: SearchEvent) -> Result<()>;
}

/// A sink that drops every event; the default when analytics is not wired.
pub struct NullAnalyticsSink;

#[async_trait]
impl AnalyticsSink for NullAnalyticsSink {
    async fn record_search(&self, _event: SearchEvent) -> Result<()> {
        Ok(())
    }
}

/// A metadata repository that knows nothing. Deployments without a wired
/// database lose catalog fallbacks, metadata joins and index-completeness
/// filtering, but search still runs.
pub struct NullMetadataRepository;

#[async_trait]
impl MetadataRepository for NullMetadataRepository {
    async fn page_counts(&self) -> Result<HashMap<i64, u64>> {
        Err(crate::error::KashshafError::Repository(
            "metadata repository not configured".to_string(),
        ))
    }

    async fn books_meta(&self, _book_ids: &[i64]) -> Result<HashMap<i64, BookMeta>> {
        Ok(HashMap::new())
    }

    async fn authors_like(&self, _pattern: &str, _limit: usize) -> Result<Vec<AuthorRecord>> {
        Ok(vec![])
    }

    async fn books_like(&self, _pattern: &str, _limit: usize) -> Result<Vec<BookCatalogRecord>> {
        Ok(vec![])
    }

    async fn page_html(&self, _keys: &[(i64, i64)]) -> Result<HashMap<(i64, i64), String>> {
        Ok(HashMap::new())
    }
}

/// A translation repository with nothing stored.
pub struct NullTranslationRepository;

#[async_trait]
impl TranslationRepository for NullTranslationRepository {
    async fn ayah_translations(
        &self,
        _keys: &[(u32, u32)],
        _edition: &str,
    ) -> Result<HashMap<(u32, u32), String>> {
        Ok(HashMap::new())
    }

    async fn hadith_translations(
        &self,
        _keys: &[(i64, i64)],
        _language: &str,
    ) -> Result<HashMap<(i64, i64), String>> {
        Ok(HashMap::new())
    }

    async fn page_translations(
        &self,
        _keys: &[(i64, i64)],
        _language: &str,
    ) -> Result<HashMap<(i64, i64), PageTranslation>> {
        Ok(HashMap::new())
    }
}
