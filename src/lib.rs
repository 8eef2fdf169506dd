//! Kashshaf: hybrid Arabic/Islamic search orchestrator.
//!
//! Dispatches parallel lookups against a lexical BM25 engine, a dense
//! vector engine and a relational metadata store; fuses and reranks their
//! outputs across three content domains (book pages, Quran verses,
//! hadiths); and assembles a unified response. Carries a tiered embedding
//! cache and an in-flight coalescer for expensive translations.

pub mod api;
pub mod cache;
pub mod config;
pub mod embedding;
pub mod error;
pub mod graph;
pub mod lexical;
pub mod metrics;
pub mod repos;
pub mod search;
pub mod text;
pub mod translation;
pub mod vector;

pub use api::{router, ApiState};
pub use cache::{translation_key, InflightMap, TtlCache, TtlCacheStats};
pub use config::Config;
pub use embedding::{
    ApiEmbeddingClient, EmbeddingBackend, EmbeddingModel, TieredEmbedder, VectorBlobStore,
};
pub use error::{KashshafError, Result};
pub use graph::{GraphContextFetcher, GraphResolver};
pub use lexical::{ElasticClient, IndexedBookSetResolver, LexicalEngine, LexicalOutcome};
pub use metrics::{get_metrics, Metrics};
pub use repos::{
    AnalyticsSink, MetadataRepository, NullAnalyticsSink, NullMetadataRepository,
    NullTranslationRepository, PageTranslation, ParagraphTranslation, SearchEvent,
    TranslationRepository,
};
pub use search::types::{SearchMode, SearchParams, SearchResponse};
pub use search::{
    ChatCompleter, OpenRouterChat, QueryExpander, Reranker, SearchOrchestrator,
    SearchOrchestratorBuilder,
};
pub use text::{normalize, AnalyzedQuery, Script};
pub use translation::TranslationMerger;
pub use vector::{QdrantSearcher, VectorEngine};
