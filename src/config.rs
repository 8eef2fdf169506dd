//! Configuration for the kashshaf search service.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub elastic: ElasticConfig,
    pub qdrant: QdrantConfig,
    pub embedding: EmbeddingConfig,
    pub llm: LlmConfig,
    pub database: DatabaseConfig,
    pub search: SearchConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            elastic: ElasticConfig::default(),
            qdrant: QdrantConfig::default(),
            embedding: EmbeddingConfig::default(),
            llm: LlmConfig::default(),
            database: DatabaseConfig::default(),
            search: SearchConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(ConfigError::ReadFile)?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string and apply environment overrides.
    pub fn parse(content: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from default locations or use defaults.
    pub fn load() -> Result<Self> {
        let config_paths = [
            PathBuf::from("kashshaf.toml"),
            PathBuf::from("config.toml"),
            dirs::config_dir()
                .map(|p| p.join("kashshaf/config.toml"))
                .unwrap_or_default(),
        ];

        for path in &config_paths {
            if path.exists() {
                tracing::info!("Loading config from: {}", path.display());
                return Self::from_file(path);
            }
        }

        tracing::info!("No config file found, using defaults");
        let mut config = Config::default();
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Environment variables take precedence over file values.
    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("ES_URL") {
            self.elastic.url = v;
        }
        if let Ok(v) = std::env::var("ES_API_KEY") {
            self.elastic.api_key = Some(v);
        }
        if let Ok(v) = std::env::var("QDRANT_URL") {
            self.qdrant.url = v;
        }
        if let Ok(v) = std::env::var("QDRANT_API_KEY") {
            self.qdrant.api_key = Some(v);
        }
        if let Ok(v) = std::env::var("JINA_API_KEY") {
            self.embedding.jina_api_key = Some(v);
        }
        if let Ok(v) = std::env::var("OPENROUTER_API_KEY") {
            self.llm.api_key = Some(v);
            if self.embedding.api_key.is_none() {
                self.embedding.api_key = Some(self.llm.api_key.clone().unwrap_or_default());
            }
        }
        if let Ok(v) = std::env::var("DATABASE_URL") {
            self.database.url = Some(v);
        }
        if let Ok(v) = std::env::var("INTERNAL_API_SECRET") {
            self.server.internal_api_secret = Some(v);
        }
        if let Ok(v) = std::env::var("APP_ENV") {
            self.server.environment = v;
        }
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<()> {
        if self.elastic.url.is_empty() {
            return Err(ConfigError::MissingField("elastic.url".to_string()).into());
        }
        if self.qdrant.url.is_empty() {
            return Err(ConfigError::MissingField("qdrant.url".to_string()).into());
        }
        if self.search.max_limit == 0 {
            return Err(ConfigError::Invalid("search.max_limit must be > 0".to_string()).into());
        }
        if !(0.0..=1.0).contains(&self.search.base_similarity_threshold) {
            return Err(ConfigError::Invalid(
                "search.base_similarity_threshold must be in [0, 1]".to_string(),
            )
            .into());
        }
        Ok(())
    }

    /// Whether debug stats should be attached to responses.
    pub fn debug_output(&self) -> bool {
        self.server.environment != "production"
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen port for the search API.
    pub port: u16,
    /// Deployment environment: "production" disables debug output.
    pub environment: String,
    /// Shared secret guarding internal endpoints.
    pub internal_api_secret: Option<String>,
    /// Overall per-request budget in milliseconds.
    pub request_deadline_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            environment: "development".to_string(),
            internal_api_secret: None,
            request_deadline_ms: 30_000,
        }
    }
}

/// Lexical engine (Elasticsearch-compatible) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ElasticConfig {
    pub url: String,
    pub api_key: Option<String>,
    /// Index names per content domain.
    pub books_index: String,
    pub pages_index: String,
    pub ayahs_index: String,
    pub hadiths_index: String,
    pub authors_index: String,
    /// Per-call deadline in milliseconds.
    pub timeout_ms: u64,
}

impl Default for ElasticConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:9200".to_string(),
            api_key: None,
            books_index: "books".to_string(),
            pages_index: "pages".to_string(),
            ayahs_index: "ayahs".to_string(),
            hadiths_index: "hadiths".to_string(),
            authors_index: "authors".to_string(),
            timeout_ms: 5_000,
        }
    }
}

/// Vector engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QdrantConfig {
    pub url: String,
    pub api_key: Option<String>,
    /// Per-call deadline in milliseconds.
    pub timeout_ms: u64,
}

impl Default for QdrantConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:6334".to_string(),
            api_key: None,
            timeout_ms: 5_000,
        }
    }
}

/// Embedding back-end configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// OpenAI-compatible embeddings endpoint.
    pub base_url: String,
    pub api_key: Option<String>,
    /// Jina embeddings endpoint (second back-end).
    pub jina_base_url: String,
    pub jina_api_key: Option<String>,
    /// Maximum texts per back-end call.
    pub max_batch_size: usize,
    /// Per-attempt deadline in milliseconds.
    pub timeout_ms: u64,
    /// Memory-tier TTL in seconds.
    pub cache_ttl_secs: u64,
    /// Memory-tier capacity.
    pub cache_max_entries: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            jina_base_url: "https://api.jina.ai/v1".to_string(),
            jina_api_key: None,
            max_batch_size: 96,
            timeout_ms: 15_000,
            cache_ttl_secs: 24 * 60 * 60,
            cache_max_entries: 10_000,
        }
    }
}

/// LLM configuration for reranking and query expansion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// OpenAI-compatible chat completions endpoint (OpenRouter).
    pub base_url: String,
    pub api_key: Option<String>,
    /// Model used by the `small` reranker choice.
    pub rerank_model_small: String,
    /// Model used by the `large` reranker choice.
    pub rerank_model_large: String,
    /// Model used by the `fast` reranker choice.
    pub rerank_model_fast: String,
    /// Model used for query expansion.
    pub expansion_model: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://openrouter.ai/api/v1".to_string(),
            api_key: None,
            rerank_model_small: "google/gemini-2.0-flash-001".to_string(),
            rerank_model_large: "anthropic/claude-3.5-sonnet".to_string(),
            rerank_model_fast: "google/gemini-2.0-flash-lite-001".to_string(),
            expansion_model: "google/gemini-2.0-flash-001".to_string(),
        }
    }
}

/// Relational metadata store location (consumed by repository implementations
/// outside this crate).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
}

/// Search pipeline tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Hard cap on any per-domain limit.
    pub max_limit: usize,
    /// Default per-domain result count.
    pub default_limit: usize,
    /// Maximum accepted query length in characters.
    pub max_query_len: usize,
    /// Base similarity cutoff for vector search.
    pub base_similarity_threshold: f32,
    /// Similarity cutoff applied before refine-mode dedupe.
    pub refine_similarity_threshold: f32,
    /// Per-variant fetch size in refine mode.
    pub refine_fetch_limit: usize,
    /// Expansion cache TTL in seconds.
    pub expansion_cache_ttl_secs: u64,
    /// Indexed-book-set refresh interval in seconds.
    pub indexed_books_ttl_secs: u64,
    /// Book ids whose content is indexed per-hadith; always eligible.
    pub hadith_source_book_ids: Vec<i64>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_limit: 100,
            default_limit: 20,
            max_query_len: 500,
            base_similarity_threshold: 0.25,
            refine_similarity_threshold: 0.25,
            refine_fetch_limit: 40,
            expansion_cache_ttl_secs: 10 * 60,
            indexed_books_ttl_secs: 5 * 60,
            hadith_source_book_ids: vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_overrides() {
        let config = Config::parse(
            r#"
            [server]
            port = 9999
            environment = "production"

            [search]
            default_limit = 10
            hadith_source_book_ids = [1681, 1682]
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 9999);
        assert!(!config.debug_output());
        assert_eq!(config.search.default_limit, 10);
        assert_eq!(config.search.hadith_source_book_ids, vec![1681, 1682]);
    }

    #[test]
    fn test_invalid_threshold_rejected() {
        let result = Config::parse(
            r#"
            [search]
            base_similarity_threshold = 1.5
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_debug_output_outside_production() {
        let config = Config::default();
        assert!(config.debug_output());
    }
}
