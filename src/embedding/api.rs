//! API-based embedding back-end (OpenAI-compatible; Jina speaks the same
//! shape).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::EmbeddingConfig;
use crate::error::{EmbeddingError, Result};

use super::{EmbeddingBackend, EmbeddingModel};

/// Backoff schedule for HTTP 429: `min(3000 * 2^attempt, 60000)` ms, at most
/// eight attempts. The request deadline governs one attempt, not the series.
const RATE_LIMIT_MAX_ATTEMPTS: u32 = 8;
const RATE_LIMIT_BASE_MS: u64 = 3_000;
const RATE_LIMIT_CAP_MS: u64 = 60_000;

/// Embedding client for a remote OpenAI-compatible API.
pub struct ApiEmbeddingClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: EmbeddingModel,
    max_batch_size: usize,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

impl ApiEmbeddingClient {
    /// Build a client for `model` from configuration. The API key comes from
    /// config, which the environment already overrode (`JINA_API_KEY` or
    /// `OPENROUTER_API_KEY`).
    pub fn from_config(config: &EmbeddingConfig, model: EmbeddingModel) -> Result<Self> {
        let (base_url, api_key) = match model {
            EmbeddingModel::Large => (config.base_url.clone(), config.api_key.clone()),
            EmbeddingModel::Jina => (config.jina_base_url.clone(), config.jina_api_key.clone()),
        };
        let api_key = api_key.ok_or_else(|| {
            EmbeddingError::Api(format!("no API key configured for {}", model.api_name()))
        })?;

        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| EmbeddingError::Api(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
            max_batch_size: config.max_batch_size,
        })
    }

    /// One API round-trip for up to `max_batch_size` texts, with 429 backoff.
    async fn request_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.base_url);
        let request = EmbeddingRequest {
            model: self.model.api_name(),
            input: texts,
        };

        for attempt in 0..RATE_LIMIT_MAX_ATTEMPTS {
            let response = self
                .client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&request)
                .send()
                .await
                .map_err(|e| {
                    if e.is_timeout() {
                        EmbeddingError::Api("request timed out".to_string())
                    } else {
                        EmbeddingError::Api(format!("request failed: {e}"))
                    }
                })?;

            let status = response.status();
            if status.as_u16() == 429 {
                let delay = (RATE_LIMIT_BASE_MS << attempt).min(RATE_LIMIT_CAP_MS);
                tracing::warn!(attempt, delay_ms = delay, "embedding API rate limited");
                tokio::time::sleep(Duration::from_millis(delay)).await;
                continue;
            }
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(EmbeddingError::Api(format!("API error ({status}): {body}")).into());
            }

            let result: EmbeddingResponse = response
                .json()
                .await
                .map_err(|e| EmbeddingError::Api(format!("failed to parse response: {e}")))?;

            // Responses may arrive out of order; align by returned index.
            let mut data = result.data;
            data.sort_by_key(|d| d.index);

            if data.len() != texts.len() {
                return Err(EmbeddingError::Api(format!(
                    "expected {} embeddings, got {}",
                    texts.len(),
                    data.len()
                ))
                .into());
            }
            for d in &data {
                if d.embedding.len() != self.model.dimension() {
                    return Err(EmbeddingError::DimensionMismatch {
                        expected: self.model.dimension(),
                        got: d.embedding.len(),
                    }
                    .into());
                }
            }

            return Ok(data.into_iter().map(|d| d.embedding).collect());
        }

        Err(EmbeddingError::RateLimited(RATE_LIMIT_MAX_ATTEMPTS).into())
    }
}

#[async_trait]
impl EmbeddingBackend for ApiEmbeddingClient {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let mut out = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.max_batch_size) {
            out.extend(self.request_batch(chunk).await?);
        }
        Ok(out)
    }

    fn dimension(&self) -> usize {
        self.model.dimension()
    }

    fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> EmbeddingConfig {
        EmbeddingConfig {
            api_key: Some("test-key".to_string()),
            jina_api_key: Some("test-jina-key".to_string()),
            ..EmbeddingConfig::default()
        }
    }

    #[test]
    fn test_from_config_selects_backend() {
        let client =
            ApiEmbeddingClient::from_config(&test_config(), EmbeddingModel::Jina).unwrap();
        assert_eq!(client.dimension(), 1024);
        assert!(client.base_url.contains("jina"));
    }

    #[test]
    fn test_missing_key_is_an_error() {
        let config = EmbeddingConfig {
            api_key: None,
            ..EmbeddingConfig::default()
        };
        assert!(ApiEmbeddingClient::from_config(&config, EmbeddingModel::Large).is_err());
    }

    #[test]
    fn test_backoff_schedule_caps() {
        let delays: Vec<u64> = (0..RATE_LIMIT_MAX_ATTEMPTS)
            .map(|attempt| (RATE_LIMIT_BASE_MS << attempt).min(RATE_LIMIT_CAP_MS))
            .collect();
        assert_eq!(delays[0], 3_000);
        assert_eq!(delays[1], 6_000);
        assert_eq!(delays[4], 48_000);
        assert_eq!(delays[5], 60_000);
        assert_eq!(*delays.last().unwrap(), 60_000);
    }

    #[test]
    fn test_response_alignment_by_index() {
        let mut data = vec![
            EmbeddingData { embedding: vec![2.0], index: 1 },
            EmbeddingData { embedding: vec![1.0], index: 0 },
        ];
        data.sort_by_key(|d| d.index);
        assert_eq!(data[0].embedding, vec![1.0]);
        assert_eq!(data[1].embedding, vec![2.0]);
    }
}
