//! Request, result and response types for the search pipeline.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::embedding::EmbeddingModel;
use crate::error::{Result, SearchError};

/// Search execution mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    #[default]
    Hybrid,
    Semantic,
    Keyword,
}

/// Reranker selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RerankerChoice {
    #[default]
    None,
    Small,
    Large,
    Fast,
}

/// Which engines found a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    Semantic,
    Keyword,
    Both,
}

/// Validated search request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchParams {
    pub query: String,
    pub mode: SearchMode,
    pub include_books: bool,
    pub include_quran: bool,
    pub include_hadith: bool,
    /// Overall result cap.
    pub limit: usize,
    /// Per-domain caps.
    pub book_limit: usize,
    pub quran_limit: usize,
    pub hadith_limit: usize,
    /// Restrict content search to one book.
    pub book_id: Option<i64>,
    /// Caller override for the similarity cutoff.
    pub similarity_threshold: Option<f32>,
    pub reranker: RerankerChoice,
    /// Expand the query into paraphrases and search all variants.
    pub refine: bool,
    /// Quran translation edition or language code.
    pub quran_translation: Option<String>,
    /// Hadith translation language code.
    pub hadith_translation: Option<String>,
    /// Page-content translation language code; absent disables the join.
    pub page_translation: Option<String>,
    pub embedding_model: EmbeddingModel,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            query: String::new(),
            mode: SearchMode::Hybrid,
            include_books: true,
            include_quran: true,
            include_hadith: true,
            limit: 20,
            book_limit: 20,
            quran_limit: 10,
            hadith_limit: 10,
            book_id: None,
            similarity_threshold: None,
            reranker: RerankerChoice::None,
            refine: false,
            quran_translation: None,
            hadith_translation: None,
            page_translation: None,
            embedding_model: EmbeddingModel::default(),
        }
    }
}

impl SearchParams {
    /// Validate caller input and clamp limits into `[1, max_limit]`.
    pub fn validate(&mut self, max_limit: usize, max_query_len: usize) -> Result<()> {
        if self.query.trim().is_empty() {
            return Err(SearchError::InvalidQuery("query must not be empty".to_string()).into());
        }
        if self.query.chars().count() > max_query_len {
            return Err(SearchError::InvalidQuery(format!(
                "query exceeds {max_query_len} characters"
            ))
            .into());
        }
        if let Some(t) = self.similarity_threshold {
            if !(0.0..=1.0).contains(&t) {
                return Err(SearchError::InvalidParameter(
                    "similarityThreshold must be in [0, 1]".to_string(),
                )
                .into());
            }
        }
        for limit in [
            &mut self.limit,
            &mut self.book_limit,
            &mut self.quran_limit,
            &mut self.hadith_limit,
        ] {
            *limit = (*limit).clamp(1, max_limit);
        }
        Ok(())
    }
}

/// A book-page content hit, before and after fusion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageHit {
    pub book_id: i64,
    pub page_number: i64,
    pub text_snippet: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub highlighted_snippet: Option<String>,
}

/// A Quran verse hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AyahHit {
    pub surah_number: u32,
    pub ayah_number: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ayah_end: Option<u32>,
    pub text: String,
}

/// A hadith hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HadithHit {
    pub collection_slug: String,
    pub hadith_number: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub book_id: Option<i64>,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chapter: Option<String>,
}

/// Identity and merge policy for a content domain.
///
/// `absorb` implements the keep-best merge: the receiver keeps the most
/// informative snippet when another sighting of the same key arrives.
pub trait DomainHit {
    type Key: std::hash::Hash + Eq + Clone + std::fmt::Debug;

    fn key(&self) -> Self::Key;
    fn absorb(&mut self, other: &Self);
}

impl DomainHit for PageHit {
    type Key = (i64, i64);

    fn key(&self) -> Self::Key {
        (self.book_id, self.page_number)
    }

    fn absorb(&mut self, other: &Self) {
        if other.text_snippet.chars().count() > self.text_snippet.chars().count() {
            self.text_snippet = other.text_snippet.clone();
        }
        if self.highlighted_snippet.is_none() {
            self.highlighted_snippet = other.highlighted_snippet.clone();
        }
    }
}

impl DomainHit for AyahHit {
    type Key = (u32, u32);

    fn key(&self) -> Self::Key {
        (self.surah_number, self.ayah_number)
    }

    fn absorb(&mut self, other: &Self) {
        if other.text.chars().count() > self.text.chars().count() {
            self.text = other.text.clone();
        }
        if self.ayah_end.is_none() {
            self.ayah_end = other.ayah_end;
        }
    }
}

impl DomainHit for HadithHit {
    type Key = (String, i64);

    fn key(&self) -> Self::Key {
        (self.collection_slug.clone(), self.hadith_number)
    }

    fn absorb(&mut self, other: &Self) {
        if other.text.chars().count() > self.text.chars().count() {
            self.text = other.text.clone();
        }
        if self.book_id.is_none() {
            self.book_id = other.book_id;
        }
        if self.chapter.is_none() {
            self.chapter = other.chapter.clone();
        }
    }
}

/// A domain hit with the fusion fields attached. Scores and ranks are owned
/// here; engines fill their own side, fusion fills the rest.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Scored<T> {
    #[serde(flatten)]
    pub hit: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub semantic_score: Option<f32>,
    /// Raw BM25 score as returned by the lexical engine.
    #[serde(skip)]
    pub bm25_raw: Option<f32>,
    /// BM25 mapped into [0, 1).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyword_score: Option<f32>,
    #[serde(skip)]
    pub semantic_rank: Option<usize>,
    #[serde(skip)]
    pub keyword_rank: Option<usize>,
    pub fused_score: f32,
    #[serde(skip)]
    pub rrf_score: f32,
    pub match_type: MatchType,
}

impl<T> Scored<T> {
    /// Wrap a semantic engine hit at 1-based `rank`.
    pub fn semantic(hit: T, score: f32, rank: usize) -> Self {
        Self {
            hit,
            semantic_score: Some(score),
            bm25_raw: None,
            keyword_score: None,
            semantic_rank: Some(rank),
            keyword_rank: None,
            fused_score: score,
            rrf_score: 0.0,
            match_type: MatchType::Semantic,
        }
    }

    /// Wrap a lexical engine hit at 1-based `rank`.
    pub fn keyword(hit: T, bm25: f32, rank: usize) -> Self {
        Self {
            hit,
            semantic_score: None,
            bm25_raw: Some(bm25),
            keyword_score: None,
            semantic_rank: None,
            keyword_rank: Some(rank),
            fused_score: 0.0,
            rrf_score: 0.0,
            match_type: MatchType::Keyword,
        }
    }
}

/// A query paraphrase produced by the expander.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpandedQuery {
    pub text: String,
    /// Contribution weight in refine-mode dedupe, in [0, 1].
    pub weight: f32,
    /// Human-readable reason the model gave for this reformulation.
    pub reason: String,
}

/// Book catalog metadata joined onto page results.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title_arabic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title_latin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author_name: Option<String>,
}

/// A book catalog record, produced by title/author catalog queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookCatalogRecord {
    pub book_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title_arabic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title_latin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
}

/// An author catalog record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorRecord {
    pub author_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name_arabic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name_latin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
}

/// Related entities attached to the response by the graph resolver.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphContext {
    pub entities: Vec<GraphEntity>,
    /// Ayah keys whose scores should be raised post-hoc.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub ayah_boosts: Vec<AyahBoost>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphEntity {
    pub name: String,
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relation: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AyahBoost {
    pub surah_number: u32,
    pub ayah_number: u32,
    pub boost: f32,
}

/// One book-page record in the response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookSearchRecord {
    #[serde(flatten)]
    pub scored: Scored<PageHit>,
    #[serde(flatten)]
    pub book: BookMeta,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_translation: Option<String>,
}

/// One ayah record in the response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AyahSearchRecord {
    #[serde(flatten)]
    pub hit: AyahHit,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub translation: Option<String>,
    pub score: f32,
}

/// One hadith record in the response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HadithSearchRecord {
    #[serde(flatten)]
    pub hit: HadithHit,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub translation: Option<String>,
    pub score: f32,
}

/// Per-stage timings and branch failures, attached outside production.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugStats {
    pub total_ms: u64,
    pub timings_ms: HashMap<String, u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed_branches: Vec<String>,
}

impl DebugStats {
    pub fn record(&mut self, stage: &str, ms: u64) {
        self.timings_ms.insert(stage.to_string(), ms);
    }

    pub fn branch_failed(&mut self, branch: &str) {
        self.failed_branches.push(branch.to_string());
    }
}

/// The assembled search response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub query: String,
    pub mode: SearchMode,
    pub count: usize,
    pub results: Vec<BookSearchRecord>,
    /// Catalog matches on book title/author, strongest for numeric id
    /// queries.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub books: Vec<BookCatalogRecord>,
    pub authors: Vec<AuthorRecord>,
    pub ayahs: Vec<AyahSearchRecord>,
    pub hadiths: Vec<HadithSearchRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph_context: Option<GraphContext>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub refined: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub expanded_queries: Vec<ExpandedQuery>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug_stats: Option<DebugStats>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_empty_query() {
        let mut params = SearchParams::default();
        assert!(params.validate(100, 500).is_err());
    }

    #[test]
    fn test_validate_rejects_long_query() {
        let mut params = SearchParams {
            query: "ا".repeat(501),
            ..SearchParams::default()
        };
        assert!(params.validate(100, 500).is_err());
    }

    #[test]
    fn test_validate_clamps_limits() {
        let mut params = SearchParams {
            query: "الصلاة".to_string(),
            limit: 5000,
            quran_limit: 0,
            ..SearchParams::default()
        };
        params.validate(100, 500).unwrap();
        assert_eq!(params.limit, 100);
        assert_eq!(params.quran_limit, 1);
    }

    #[test]
    fn test_page_absorb_keeps_best_snippet() {
        let mut a = PageHit {
            book_id: 1,
            page_number: 2,
            text_snippet: "قصير".to_string(),
            highlighted_snippet: None,
        };
        let b = PageHit {
            book_id: 1,
            page_number: 2,
            text_snippet: "نص اطول من الاول".to_string(),
            highlighted_snippet: Some("<em>نص</em>".to_string()),
        };
        a.absorb(&b);
        assert_eq!(a.text_snippet, "نص اطول من الاول");
        assert!(a.highlighted_snippet.is_some());
    }

    #[test]
    fn test_hadith_key_includes_collection() {
        let hit = HadithHit {
            collection_slug: "bukhari".to_string(),
            hadith_number: 52,
            book_id: Some(1681),
            text: String::new(),
            chapter: None,
        };
        assert_eq!(hit.key(), ("bukhari".to_string(), 52));
    }

    #[test]
    fn test_params_deserialize_camel_case() {
        let params: SearchParams = serde_json::from_str(
            r#"{"query": "الصلاة", "mode": "hybrid", "bookLimit": 5, "refine": true}"#,
        )
        .unwrap();
        assert_eq!(params.book_limit, 5);
        assert!(params.refine);
        assert_eq!(params.mode, SearchMode::Hybrid);
    }

    #[test]
    fn test_response_serializes_camel_case() {
        let record = AyahSearchRecord {
            hit: AyahHit {
                surah_number: 1,
                ayah_number: 1,
                ayah_end: None,
                text: "بسم الله".to_string(),
            },
            translation: None,
            score: 0.9,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["surahNumber"], 1);
        assert!(json.get("translation").is_none());
    }
}
