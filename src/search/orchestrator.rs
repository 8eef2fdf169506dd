//! Top-level search pipeline.
//!
//! Two flavors share the same engines: the standard path fans out lexical
//! and semantic queries per domain and fuses them; the refine path first
//! expands the query into weighted paraphrases, fetches per variant,
//! dedupes with weighted RRF and applies the unified rerank. Every branch
//! degrades to empty on failure; the only remote error promoted to the
//! caller is a missing vector collection.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future;

use crate::config::{Config, SearchConfig};
use crate::embedding::{EmbeddingModel, TieredEmbedder};
use crate::error::{KashshafError, Result, SearchError, VectorError};
use crate::graph::{apply_ayah_boosts, GraphContextFetcher};
use crate::lexical::{IndexedBookSetResolver, LexicalEngine, LexicalOutcome};
use crate::metrics::get_metrics;
use crate::repos::{AnalyticsSink, MetadataRepository, SearchEvent};
use crate::text::{dynamic_similarity_threshold, AnalyzedQuery, Script};
use crate::translation::TranslationMerger;
use crate::vector::VectorEngine;

use super::expand::QueryExpander;
use super::fusion::{dedupe_weighted, fuse_hybrid, keyword_ranked, semantic_ranked, WeightedVariant};
use super::rerank::Reranker;
use super::types::{
    AuthorRecord, AyahHit, AyahSearchRecord, BookCatalogRecord, BookSearchRecord, DebugStats,
    ExpandedQuery, HadithHit, HadithSearchRecord, PageHit, RerankerChoice, Scored, SearchMode,
    SearchParams, SearchResponse,
};

/// Engines fetch this many times the requested limit so fusion has
/// candidates from both sides.
const FETCH_MULTIPLIER: usize = 2;

/// The search orchestrator and its injected collaborators.
pub struct SearchOrchestrator {
    search_config: SearchConfig,
    debug_output: bool,
    request_deadline: Duration,
    lexical: Arc<dyn LexicalEngine>,
    vector: Arc<dyn VectorEngine>,
    embedders: HashMap<EmbeddingModel, Arc<TieredEmbedder>>,
    indexed_books: Arc<IndexedBookSetResolver>,
    reranker: Arc<Reranker>,
    expander: Arc<QueryExpander>,
    merger: Arc<TranslationMerger>,
    graph: Arc<GraphContextFetcher>,
    metadata: Arc<dyn MetadataRepository>,
    analytics: Arc<dyn AnalyticsSink>,
}

/// Builder for the orchestrator.
pub struct SearchOrchestratorBuilder {
    config: Config,
    lexical: Option<Arc<dyn LexicalEngine>>,
    vector: Option<Arc<dyn VectorEngine>>,
    embedders: HashMap<EmbeddingModel, Arc<TieredEmbedder>>,
    indexed_books: Option<Arc<IndexedBookSetResolver>>,
    reranker: Option<Arc<Reranker>>,
    expander: Option<Arc<QueryExpander>>,
    merger: Option<Arc<TranslationMerger>>,
    graph: Option<Arc<GraphContextFetcher>>,
    metadata: Option<Arc<dyn MetadataRepository>>,
    analytics: Option<Arc<dyn AnalyticsSink>>,
}

impl SearchOrchestratorBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            lexical: None,
            vector: None,
            embedders: HashMap::new(),
            indexed_books: None,
            reranker: None,
            expander: None,
            merger: None,
            graph: None,
            metadata: None,
            analytics: None,
        }
    }

    pub fn lexical(mut self, lexical: Arc<dyn LexicalEngine>) -> Self {
        self.lexical = Some(lexical);
        self
    }

    pub fn vector(mut self, vector: Arc<dyn VectorEngine>) -> Self {
        self.vector = Some(vector);
        self
    }

    pub fn embedder(mut self, model: EmbeddingModel, embedder: Arc<TieredEmbedder>) -> Self {
        self.embedders.insert(model, embedder);
        self
    }

    pub fn indexed_books(mut self, resolver: Arc<IndexedBookSetResolver>) -> Self {
        self.indexed_books = Some(resolver);
        self
    }

    pub fn reranker(mut self, reranker: Arc<Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    pub fn expander(mut self, expander: Arc<QueryExpander>) -> Self {
        self.expander = Some(expander);
        self
    }

    pub fn merger(mut self, merger: Arc<TranslationMerger>) -> Self {
        self.merger = Some(merger);
        self
    }

    pub fn graph(mut self, graph: Arc<GraphContextFetcher>) -> Self {
        self.graph = Some(graph);
        self
    }

    pub fn metadata(mut self, metadata: Arc<dyn MetadataRepository>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn analytics(mut self, analytics: Arc<dyn AnalyticsSink>) -> Self {
        self.analytics = Some(analytics);
        self
    }

    pub fn build(self) -> Result<SearchOrchestrator> {
        let missing =
            |field: &str| SearchError::InvalidParameter(format!("{field} is required"));
        let lexical = self.lexical.ok_or_else(|| missing("lexical engine"))?;
        let vector = self.vector.ok_or_else(|| missing("vector engine"))?;
        let metadata = self.metadata.ok_or_else(|| missing("metadata repository"))?;
        let indexed_books = match self.indexed_books {
            Some(resolver) => resolver,
            None => Arc::new(IndexedBookSetResolver::new(
                Arc::clone(&lexical),
                Arc::clone(&vector),
                Arc::clone(&metadata),
                &self.config.search,
            )),
        };

        Ok(SearchOrchestrator {
            search_config: self.config.search.clone(),
            debug_output: self.config.debug_output(),
            request_deadline: Duration::from_millis(self.config.server.request_deadline_ms),
            lexical,
            vector,
            embedders: self.embedders,
            indexed_books,
            reranker: self.reranker.ok_or_else(|| missing("reranker"))?,
            expander: self.expander.ok_or_else(|| missing("expander"))?,
            merger: self.merger.ok_or_else(|| missing("translation merger"))?,
            graph: self
                .graph
                .unwrap_or_else(|| Arc::new(GraphContextFetcher::new(None))),
            metadata,
            analytics: self
                .analytics
                .unwrap_or_else(|| Arc::new(crate::repos::NullAnalyticsSink)),
        })
    }
}

/// Semantic fan-out output; failures are recorded, never raised, except a
/// missing collection.
#[derive(Default)]
struct SemanticHits {
    pages: Vec<(PageHit, f32)>,
    ayahs: Vec<(AyahHit, f32)>,
    hadiths: Vec<(HadithHit, f32)>,
    failures: Vec<String>,
}

async fn timed<T>(fut: impl std::future::Future<Output = T>) -> (T, u64) {
    let start = Instant::now();
    let out = fut.await;
    (out, start.elapsed().as_millis() as u64)
}

impl SearchOrchestrator {
    pub fn builder(config: Config) -> SearchOrchestratorBuilder {
        SearchOrchestratorBuilder::new(config)
    }

    /// Execute a search request end to end.
    pub async fn search(&self, mut params: SearchParams) -> Result<SearchResponse> {
        params.validate(self.search_config.max_limit, self.search_config.max_query_len)?;

        let metrics = get_metrics();
        metrics.search_requests_total.inc();
        let timer = metrics.search_duration_seconds.start_timer();
        let started = Instant::now();

        let query = AnalyzedQuery::new(&params.query);
        let mut debug = DebugStats::default();

        let refine = params.refine
            && params.mode == SearchMode::Hybrid
            && params.book_id.is_none();

        let inner = async {
            if refine {
                metrics.refine_requests_total.inc();
                self.refine_search(&params, &query, &mut debug).await
            } else {
                self.standard_search(&params, &query, &mut debug).await
            }
        };

        let mut response = match tokio::time::timeout(self.request_deadline, inner).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(
                    SearchError::Timeout(self.request_deadline.as_millis() as u64).into(),
                )
            }
        };
        timer.observe_duration();

        let duration_ms = started.elapsed().as_millis() as u64;
        debug.total_ms = duration_ms;
        for branch in &debug.failed_branches {
            tracing::debug!(branch = %branch, "branch returned empty");
            metrics.branch_failures_total.inc();
        }
        if self.debug_output {
            response.debug_stats = Some(debug);
        }

        self.emit_analytics(&params, &response, duration_ms);
        Ok(response)
    }

    fn emit_analytics(&self, params: &SearchParams, response: &SearchResponse, duration_ms: u64) {
        let analytics = Arc::clone(&self.analytics);
        let event = SearchEvent {
            query: params.query.clone(),
            mode: params.mode,
            refined: response.refined,
            result_count: response.count,
            duration_ms,
            timestamp: Utc::now(),
        };
        tokio::spawn(async move {
            if let Err(e) = analytics.record_search(event).await {
                tracing::debug!(error = %e, "analytics emission failed");
            }
        });
    }

    fn effective_threshold(&self, params: &SearchParams, query: &AnalyzedQuery) -> f32 {
        let base = params
            .similarity_threshold
            .unwrap_or(self.search_config.base_similarity_threshold);
        dynamic_similarity_threshold(&query.normalized, base)
    }

    /// §4.13 standard path.
    async fn standard_search(
        &self,
        params: &SearchParams,
        query: &AnalyzedQuery,
        debug: &mut DebugStats,
    ) -> Result<SearchResponse> {
        let skip_lexical = query.script == Script::Latin || params.mode == SearchMode::Semantic;
        let skip_semantic = params.mode == SearchMode::Keyword || query.skip_semantic();

        let include_books = params.include_books;
        let include_quran = params.include_quran && params.book_id.is_none();
        let include_hadith = params.include_hadith && params.book_id.is_none();

        let threshold = self.effective_threshold(params, query);
        let book_fetch = params.book_limit * FETCH_MULTIPLIER;
        let quran_fetch = params.quran_limit * FETCH_MULTIPLIER;
        let hadith_fetch = params.hadith_limit * FETCH_MULTIPLIER;

        // Eligibility set for content search; cached, and absent means
        // "do not filter".
        let indexed = if include_books && !skip_lexical && params.book_id.is_none() {
            self.indexed_books.indexed_books(params.embedding_model).await
        } else {
            None
        };

        let lex_pages_fut = timed(async {
            if skip_lexical || !include_books {
                LexicalOutcome::Hits(vec![])
            } else {
                self.lexical
                    .search_pages(query, book_fetch, params.book_id, indexed.as_deref())
                    .await
            }
        });
        let lex_ayahs_fut = timed(async {
            if skip_lexical || !include_quran {
                LexicalOutcome::Hits(vec![])
            } else {
                self.lexical.search_ayahs(query, quran_fetch).await
            }
        });
        let lex_hadiths_fut = timed(async {
            if skip_lexical || !include_hadith {
                LexicalOutcome::Hits(vec![])
            } else {
                self.lexical.search_hadiths(query, hadith_fetch).await
            }
        });

        // Semantic calls start as soon as the embedding lands; they do not
        // wait for the lexical branch.
        let semantic_fut = timed(self.semantic_fanout(
            params,
            query,
            threshold,
            (
                include_books.then_some(book_fetch),
                include_quran.then_some(quran_fetch),
                include_hadith.then_some(hadith_fetch),
            ),
            skip_semantic,
        ));

        let graph_fut = self.graph.fetch(&query.normalized);
        let authors_fut = self.lookup_authors(query);
        let catalog_fut = self.lookup_books_catalog(query);

        let (
            (lex_pages, lex_pages_ms),
            (lex_ayahs, lex_ayahs_ms),
            (lex_hadiths, lex_hadiths_ms),
            (semantic, semantic_ms),
            graph_context,
            authors,
            catalog_books,
        ) = tokio::join!(
            lex_pages_fut,
            lex_ayahs_fut,
            lex_hadiths_fut,
            semantic_fut,
            graph_fut,
            authors_fut,
            catalog_fut
        );

        debug.record("lexicalBooks", lex_pages_ms);
        debug.record("lexicalAyahs", lex_ayahs_ms);
        debug.record("lexicalHadiths", lex_hadiths_ms);
        debug.record("semantic", semantic_ms);

        if lex_pages.is_unavailable() {
            debug.branch_failed("lexical_books");
        }
        if lex_ayahs.is_unavailable() {
            debug.branch_failed("lexical_ayahs");
        }
        if lex_hadiths.is_unavailable() {
            debug.branch_failed("lexical_hadiths");
        }

        let semantic = semantic?;
        for failure in &semantic.failures {
            debug.branch_failed(failure);
        }

        let mut books = self.merge_domain(
            params.mode,
            semantic.pages,
            lex_pages.into_hits(),
            params.book_limit.min(params.limit),
        );
        let mut ayahs = self.merge_domain(
            params.mode,
            semantic.ayahs,
            lex_ayahs.into_hits(),
            params.quran_limit,
        );
        let mut hadiths = self.merge_domain(
            params.mode,
            semantic.hadiths,
            lex_hadiths.into_hits(),
            params.hadith_limit,
        );

        if params.reranker != RerankerChoice::None {
            let (reranked, rerank_ms) = timed(self.rerank_domains(
                params,
                query,
                books,
                ayahs,
                hadiths,
            ))
            .await;
            (books, ayahs, hadiths) = reranked;
            debug.record("rerank", rerank_ms);
        }

        self.assemble(
            params,
            query,
            books,
            ayahs,
            hadiths,
            authors,
            catalog_books,
            graph_context,
            false,
            vec![],
            debug,
        )
        .await
    }

    /// §4.14 refine path: expansions, per-variant fetches, weighted dedupe,
    /// unified rerank.
    async fn refine_search(
        &self,
        params: &SearchParams,
        query: &AnalyzedQuery,
        debug: &mut DebugStats,
    ) -> Result<SearchResponse> {
        let (expansions, expansion_ms) = timed(self.expander.expand(query.raw.trim())).await;
        debug.record("expansion", expansion_ms);

        let mut variants: Vec<(f32, AnalyzedQuery)> = vec![(1.0, query.clone())];
        variants.extend(
            expansions
                .iter()
                .map(|e| (e.weight, AnalyzedQuery::new(&e.text))),
        );

        // One batched embedding call covers every variant that runs the
        // semantic branch.
        let embeddings = self.embed_variants(params, &variants).await;

        let threshold = self.search_config.refine_similarity_threshold;
        let fetch = self.search_config.refine_fetch_limit;

        let fetches = variants.iter().map(|(weight, variant)| {
            let embedding = embeddings.get(&variant.normalized).cloned();
            self.variant_fetch(params, variant, *weight, embedding, threshold, fetch)
        });

        let graph_fut = self.graph.fetch(&query.normalized);
        let authors_fut = self.lookup_authors(query);
        let catalog_fut = self.lookup_books_catalog(query);

        let ((variant_results, fetch_ms), graph_context, authors, catalog_books) = tokio::join!(
            timed(future::join_all(fetches)),
            graph_fut,
            authors_fut,
            catalog_fut
        );
        debug.record("variantFetch", fetch_ms);

        let mut book_variants = Vec::new();
        let mut ayah_variants = Vec::new();
        let mut hadith_variants = Vec::new();
        for result in variant_results {
            let (weight, books, ayahs, hadiths, failures) = result?;
            for failure in failures {
                debug.branch_failed(&failure);
            }
            book_variants.push(WeightedVariant { weight, results: books });
            ayah_variants.push(WeightedVariant { weight, results: ayahs });
            hadith_variants.push(WeightedVariant { weight, results: hadiths });
        }

        // Dedupe keeps a generous pool; the unified rerank applies the
        // per-domain caps.
        let pool = fetch * variants.len();
        let books = dedupe_weighted(book_variants, pool);
        let ayahs = dedupe_weighted(ayah_variants, pool);
        let hadiths = dedupe_weighted(hadith_variants, pool);

        let choice = match params.reranker {
            RerankerChoice::None => RerankerChoice::Fast,
            choice => choice,
        };
        let (outcome, rerank_ms) = timed(self.reranker.rerank_unified(
            query.raw.trim(),
            books,
            ayahs,
            hadiths,
            (
                params.book_limit.min(params.limit),
                params.quran_limit,
                params.hadith_limit,
            ),
            choice,
        ))
        .await;
        debug.record("unifiedRerank", rerank_ms);
        if outcome.timed_out {
            debug.branch_failed("unified_rerank");
        }

        self.assemble(
            params,
            query,
            outcome.books,
            outcome.ayahs,
            outcome.hadiths,
            authors,
            catalog_books,
            graph_context,
            true,
            expansions,
            debug,
        )
        .await
    }

    /// Embedding + three-collection ANN fan-out for the standard path.
    async fn semantic_fanout(
        &self,
        params: &SearchParams,
        query: &AnalyzedQuery,
        threshold: f32,
        limits: (Option<usize>, Option<usize>, Option<usize>),
        skip: bool,
    ) -> Result<SemanticHits> {
        let (book_limit, quran_limit, hadith_limit) = limits;
        if skip || (book_limit.is_none() && quran_limit.is_none() && hadith_limit.is_none()) {
            return Ok(SemanticHits::default());
        }

        let Some(embedder) = self.embedders.get(&params.embedding_model) else {
            let mut hits = SemanticHits::default();
            hits.failures.push("embedding_unconfigured".to_string());
            return Ok(hits);
        };

        let embedding = match embedder.embed_one(&query.normalized).await {
            Ok(vector) if !vector.is_empty() => vector,
            Ok(_) => {
                let mut hits = SemanticHits::default();
                hits.failures.push("embedding".to_string());
                return Ok(hits);
            }
            Err(e) => {
                tracing::warn!(error = %e, "query embedding failed, skipping semantic branch");
                let mut hits = SemanticHits::default();
                hits.failures.push("embedding".to_string());
                return Ok(hits);
            }
        };

        let model = params.embedding_model;
        let (pages, ayahs, hadiths) = tokio::join!(
            async {
                match book_limit {
                    Some(limit) => {
                        self.vector
                            .search_pages(model, &embedding, limit, threshold, params.book_id)
                            .await
                    }
                    None => Ok(vec![]),
                }
            },
            async {
                match quran_limit {
                    Some(limit) => {
                        self.vector
                            .search_ayahs(model, &embedding, limit, threshold)
                            .await
                    }
                    None => Ok(vec![]),
                }
            },
            async {
                match hadith_limit {
                    Some(limit) => {
                        self.vector
                            .search_hadiths(model, &embedding, limit, threshold)
                            .await
                    }
                    None => Ok(vec![]),
                }
            }
        );

        let mut hits = SemanticHits::default();
        hits.pages = Self::unwrap_semantic(pages, "semantic_books", &mut hits.failures)?;
        hits.ayahs = Self::unwrap_semantic(ayahs, "semantic_ayahs", &mut hits.failures)?;
        hits.hadiths = Self::unwrap_semantic(hadiths, "semantic_hadiths", &mut hits.failures)?;
        Ok(hits)
    }

    /// Swallow vector errors to empty, except the missing-collection error
    /// which becomes the caller-visible 503.
    fn unwrap_semantic<T>(
        result: Result<Vec<T>>,
        branch: &str,
        failures: &mut Vec<String>,
    ) -> Result<Vec<T>> {
        match result {
            Ok(hits) => Ok(hits),
            Err(KashshafError::Vector(VectorError::CollectionMissing(collection))) => {
                Err(VectorError::CollectionMissing(collection).into())
            }
            Err(e) => {
                tracing::warn!(branch, error = %e, "semantic branch failed");
                failures.push(branch.to_string());
                Ok(vec![])
            }
        }
    }

    /// Batched embeddings for refine variants, keyed by normalized text.
    async fn embed_variants(
        &self,
        params: &SearchParams,
        variants: &[(f32, AnalyzedQuery)],
    ) -> HashMap<String, Vec<f32>> {
        let Some(embedder) = self.embedders.get(&params.embedding_model) else {
            return HashMap::new();
        };
        let texts: Vec<String> = variants
            .iter()
            .filter(|(_, v)| !v.skip_semantic())
            .map(|(_, v)| v.normalized.clone())
            .collect();
        if texts.is_empty() {
            return HashMap::new();
        }
        match embedder.embed(&texts).await {
            Ok(vectors) => texts.into_iter().zip(vectors).collect(),
            Err(e) => {
                tracing::warn!(error = %e, "variant embedding failed, lexical-only refine");
                HashMap::new()
            }
        }
    }

    /// One variant's tri-domain hybrid fetch for the refine path.
    #[allow(clippy::type_complexity)]
    async fn variant_fetch(
        &self,
        params: &SearchParams,
        variant: &AnalyzedQuery,
        weight: f32,
        embedding: Option<Vec<f32>>,
        threshold: f32,
        fetch: usize,
    ) -> Result<(
        f32,
        Vec<Scored<PageHit>>,
        Vec<Scored<AyahHit>>,
        Vec<Scored<HadithHit>>,
        Vec<String>,
    )> {
        let model = params.embedding_model;
        let skip_lexical = variant.script == Script::Latin;
        let mut failures = Vec::new();

        let semantic_fut = async {
            match &embedding {
                Some(vector) => {
                    tokio::join!(
                        async {
                            if params.include_books {
                                self.vector
                                    .search_pages(model, vector, fetch, threshold, None)
                                    .await
                            } else {
                                Ok(vec![])
                            }
                        },
                        async {
                            if params.include_quran {
                                self.vector.search_ayahs(model, vector, fetch, threshold).await
                            } else {
                                Ok(vec![])
                            }
                        },
                        async {
                            if params.include_hadith {
                                self.vector
                                    .search_hadiths(model, vector, fetch, threshold)
                                    .await
                            } else {
                                Ok(vec![])
                            }
                        }
                    )
                }
                None => (Ok(vec![]), Ok(vec![]), Ok(vec![])),
            }
        };

        let lexical_fut = async {
            if skip_lexical {
                (
                    LexicalOutcome::Hits(vec![]),
                    LexicalOutcome::Hits(vec![]),
                    LexicalOutcome::Hits(vec![]),
                )
            } else {
                tokio::join!(
                    async {
                        if params.include_books {
                            self.lexical.search_pages(variant, fetch, None, None).await
                        } else {
                            LexicalOutcome::Hits(vec![])
                        }
                    },
                    async {
                        if params.include_quran {
                            self.lexical.search_ayahs(variant, fetch).await
                        } else {
                            LexicalOutcome::Hits(vec![])
                        }
                    },
                    async {
                        if params.include_hadith {
                            self.lexical.search_hadiths(variant, fetch).await
                        } else {
                            LexicalOutcome::Hits(vec![])
                        }
                    }
                )
            }
        };

        let ((sem_pages, sem_ayahs, sem_hadiths), (lex_pages, lex_ayahs, lex_hadiths)) =
            tokio::join!(semantic_fut, lexical_fut);

        let sem_pages = Self::unwrap_semantic(sem_pages, "semantic_books", &mut failures)?;
        let sem_ayahs = Self::unwrap_semantic(sem_ayahs, "semantic_ayahs", &mut failures)?;
        let sem_hadiths = Self::unwrap_semantic(sem_hadiths, "semantic_hadiths", &mut failures)?;

        Ok((
            weight,
            fuse_hybrid(sem_pages, lex_pages.into_hits(), fetch),
            fuse_hybrid(sem_ayahs, lex_ayahs.into_hits(), fetch),
            fuse_hybrid(sem_hadiths, lex_hadiths.into_hits(), fetch),
            failures,
        ))
    }

    /// §4.13 step 5: per-domain merge by mode.
    fn merge_domain<T: super::types::DomainHit>(
        &self,
        mode: SearchMode,
        semantic: Vec<(T, f32)>,
        keyword: Vec<(T, f32)>,
        limit: usize,
    ) -> Vec<Scored<T>> {
        match mode {
            SearchMode::Keyword => keyword_ranked(keyword, limit),
            SearchMode::Semantic => semantic_ranked(semantic, limit),
            SearchMode::Hybrid => fuse_hybrid(semantic, keyword, limit),
        }
    }

    /// Single-domain rerank pass for the standard path, all domains
    /// concurrently.
    async fn rerank_domains(
        &self,
        params: &SearchParams,
        query: &AnalyzedQuery,
        books: Vec<Scored<PageHit>>,
        ayahs: Vec<Scored<AyahHit>>,
        hadiths: Vec<Scored<HadithHit>>,
    ) -> (
        Vec<Scored<PageHit>>,
        Vec<Scored<AyahHit>>,
        Vec<Scored<HadithHit>>,
    ) {
        let choice = params.reranker;
        let raw = query.raw.trim();
        let (books, ayahs, hadiths) = tokio::join!(
            self.reranker.rerank(
                raw,
                books,
                |s: &Scored<PageHit>| s.hit.text_snippet.as_str(),
                params.book_limit,
                choice,
            ),
            self.reranker.rerank(
                raw,
                ayahs,
                |s: &Scored<AyahHit>| s.hit.text.as_str(),
                params.quran_limit,
                choice,
            ),
            self.reranker.rerank(
                raw,
                hadiths,
                |s: &Scored<HadithHit>| s.hit.text.as_str(),
                params.hadith_limit,
                choice,
            )
        );
        if books.timed_out || ayahs.timed_out || hadiths.timed_out {
            get_metrics().rerank_timeouts_total.inc();
        }
        (books.items, ayahs.items, hadiths.items)
    }

    async fn lookup_authors(&self, query: &AnalyzedQuery) -> Vec<AuthorRecord> {
        match self.lexical.search_authors(query, 10).await {
            LexicalOutcome::Hits(authors) => authors,
            LexicalOutcome::Unavailable => {
                let pattern = format!("%{}%", query.normalized);
                match self.metadata.authors_like(&pattern, 10).await {
                    Ok(authors) => authors,
                    Err(e) => {
                        tracing::warn!(error = %e, "author LIKE fallback failed");
                        vec![]
                    }
                }
            }
        }
    }

    async fn lookup_books_catalog(&self, query: &AnalyzedQuery) -> Vec<BookCatalogRecord> {
        match self.lexical.search_books_catalog(query, 10).await {
            LexicalOutcome::Hits(books) => books,
            LexicalOutcome::Unavailable => {
                let pattern = format!("%{}%", query.normalized);
                match self.metadata.books_like(&pattern, 10).await {
                    Ok(books) => books,
                    Err(e) => {
                        tracing::warn!(error = %e, "book catalog LIKE fallback failed");
                        vec![]
                    }
                }
            }
        }
    }

    /// Final assembly: graph boosts, metadata join, translations, records.
    #[allow(clippy::too_many_arguments)]
    async fn assemble(
        &self,
        params: &SearchParams,
        _query: &AnalyzedQuery,
        books: Vec<Scored<PageHit>>,
        mut ayahs: Vec<Scored<AyahHit>>,
        hadiths: Vec<Scored<HadithHit>>,
        authors: Vec<AuthorRecord>,
        catalog_books: Vec<BookCatalogRecord>,
        graph_context: Option<crate::search::types::GraphContext>,
        refined: bool,
        expansions: Vec<ExpandedQuery>,
        debug: &mut DebugStats,
    ) -> Result<SearchResponse> {
        if let Some(context) = &graph_context {
            apply_ayah_boosts(&mut ayahs, &context.ayah_boosts);
        }

        // Book metadata in one batched call; a failure costs only the
        // titles.
        let book_ids: Vec<i64> = books
            .iter()
            .map(|s| s.hit.book_id)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let meta = if book_ids.is_empty() {
            HashMap::new()
        } else {
            match self.metadata.books_meta(&book_ids).await {
                Ok(meta) => meta,
                Err(e) => {
                    tracing::warn!(error = %e, "book metadata join failed");
                    debug.branch_failed("book_metadata");
                    HashMap::new()
                }
            }
        };

        let mut book_records: Vec<BookSearchRecord> = books
            .into_iter()
            .map(|scored| {
                let book = meta.get(&scored.hit.book_id).cloned().unwrap_or_default();
                BookSearchRecord {
                    scored,
                    book,
                    content_translation: None,
                }
            })
            .collect();
        let mut ayah_records: Vec<AyahSearchRecord> = ayahs
            .into_iter()
            .map(|scored| AyahSearchRecord {
                score: scored.fused_score,
                hit: scored.hit,
                translation: None,
            })
            .collect();
        let mut hadith_records: Vec<HadithSearchRecord> = hadiths
            .into_iter()
            .map(|scored| HadithSearchRecord {
                score: scored.fused_score,
                hit: scored.hit,
                translation: None,
            })
            .collect();

        let (_, translation_ms) = timed(async {
            let ayah_join = async {
                if let Some(edition) = &params.quran_translation {
                    self.merger.merge_ayahs(&mut ayah_records, edition).await;
                }
            };
            let hadith_join = async {
                if let Some(language) = &params.hadith_translation {
                    self.merger.merge_hadiths(&mut hadith_records, language).await;
                }
            };
            let page_join = async {
                if let Some(language) = &params.page_translation {
                    self.merger.merge_pages(&mut book_records, language).await;
                }
            };
            tokio::join!(ayah_join, hadith_join, page_join);
        })
        .await;
        debug.record("translations", translation_ms);

        Ok(SearchResponse {
            query: params.query.clone(),
            mode: params.mode,
            count: book_records.len(),
            results: book_records,
            books: catalog_books,
            authors,
            ayahs: ayah_records,
            hadiths: hadith_records,
            graph_context,
            refined,
            expanded_queries: expansions,
            debug_stats: None,
        })
    }
}
