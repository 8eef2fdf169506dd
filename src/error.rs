//! Error types for the kashshaf search service.

use thiserror::Error;

/// Main error type for kashshaf operations.
#[derive(Error, Debug)]
pub enum KashshafError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Lexical engine error: {0}")]
    Lexical(#[from] LexicalError),

    #[error("Vector engine error: {0}")]
    Vector(#[from] VectorError),

    #[error("Rerank error: {0}")]
    Rerank(#[from] RerankError),

    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    #[error("Repository error: {0}")]
    Repository(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Configuration-related errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadFile(#[source] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Missing required field: {0}")]
    MissingField(String),
}

/// Embedding-related errors.
#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("API error: {0}")]
    Api(String),

    #[error("Rate limited after {0} attempts")]
    RateLimited(u32),

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Batch too large: {0} (max {1})")]
    BatchTooLarge(usize, usize),
}

/// Lexical engine (inverted index service) errors.
///
/// These rarely escape the adapter: a failed query is reported to callers as
/// `LexicalOutcome::Unavailable` so the pipeline can fall back.
#[derive(Error, Debug)]
pub enum LexicalError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Unexpected response shape: {0}")]
    Response(String),
}

/// Vector engine errors.
#[derive(Error, Debug)]
pub enum VectorError {
    #[error("Connection failed: {0}")]
    Connection(String),

    /// The one remote failure promoted to callers (HTTP 503).
    #[error("Collection not found: {0}")]
    CollectionMissing(String),

    #[error("Query error: {0}")]
    Query(String),
}

/// Reranking and query-expansion errors.
#[derive(Error, Debug)]
pub enum RerankError {
    #[error("API error: {0}")]
    Api(String),

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    #[error("Unparseable model output: {0}")]
    Parse(String),
}

/// Search pipeline errors.
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Timeout after {0}ms")]
    Timeout(u64),
}

/// Result type alias for kashshaf operations.
pub type Result<T> = std::result::Result<T, KashshafError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = KashshafError::Config(ConfigError::MissingField("qdrant.url".to_string()));
        assert!(err.to_string().contains("qdrant.url"));
    }

    #[test]
    fn test_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: KashshafError = io_err.into();
        assert!(matches!(err, KashshafError::Io(_)));
    }

    #[test]
    fn test_collection_missing_message() {
        let err = VectorError::CollectionMissing("pages_v3".to_string());
        assert!(err.to_string().contains("Collection not found"));
    }
}
