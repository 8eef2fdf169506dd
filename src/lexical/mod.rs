//! Lexical (inverted-index) engine adapter.
//!
//! Queries are per-domain BM25 searches with script-aware field boosts and
//! fuzzy fallback. A failed back-end never raises: it yields
//! [`LexicalOutcome::Unavailable`], which downstream code treats as "fall
//! back", distinct from an empty result.

mod client;
mod indexed;
mod queries;

pub use client::*;
pub use indexed::*;
pub use queries::*;

use std::collections::HashSet;

use async_trait::async_trait;

use crate::error::Result;
use crate::search::types::{AuthorRecord, AyahHit, BookCatalogRecord, HadithHit, PageHit};
use crate::text::AnalyzedQuery;

/// Result of a lexical query: hits, or a sentinel meaning the engine could
/// not answer and the caller should fall back.
#[derive(Debug, Clone, PartialEq)]
pub enum LexicalOutcome<T> {
    Hits(Vec<T>),
    Unavailable,
}

impl<T> LexicalOutcome<T> {
    /// The hits, with `Unavailable` degraded to empty.
    pub fn into_hits(self) -> Vec<T> {
        match self {
            Self::Hits(hits) => hits,
            Self::Unavailable => vec![],
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable)
    }
}

/// Content-level and catalog lexical queries.
#[async_trait]
pub trait LexicalEngine: Send + Sync {
    /// BM25 search over book-page content. `indexed` restricts hits to the
    /// eligible book set when present.
    async fn search_pages(
        &self,
        query: &AnalyzedQuery,
        limit: usize,
        book_id: Option<i64>,
        indexed: Option<&HashSet<i64>>,
    ) -> LexicalOutcome<(PageHit, f32)>;

    /// BM25 search over Quran verses.
    async fn search_ayahs(&self, query: &AnalyzedQuery, limit: usize)
        -> LexicalOutcome<(AyahHit, f32)>;

    /// BM25 search over hadiths.
    async fn search_hadiths(
        &self,
        query: &AnalyzedQuery,
        limit: usize,
    ) -> LexicalOutcome<(HadithHit, f32)>;

    /// Catalog search over author records.
    async fn search_authors(&self, query: &AnalyzedQuery, limit: usize)
        -> LexicalOutcome<AuthorRecord>;

    /// Catalog search over book title/author fields.
    async fn search_books_catalog(
        &self,
        query: &AnalyzedQuery,
        limit: usize,
    ) -> LexicalOutcome<BookCatalogRecord>;

    /// Per-book page counts in the content index, for eligibility checks.
    async fn page_counts(&self) -> Result<std::collections::HashMap<i64, u64>>;
}
