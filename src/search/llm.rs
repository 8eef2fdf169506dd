//! OpenAI-compatible chat completion client used by the reranker and the
//! query expander.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::LlmConfig;
use crate::error::{RerankError, Result};

/// Seam for chat completions so the pipeline can be tested without a
/// network.
#[async_trait]
pub trait ChatCompleter: Send + Sync {
    /// One completion round-trip. Deadlines are the caller's concern.
    async fn complete(&self, model: &str, prompt: &str, temperature: f32) -> Result<String>;
}

/// OpenRouter-backed chat client.
pub struct OpenRouterChat {
    client: Client,
    base_url: String,
    api_key: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

impl OpenRouterChat {
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| RerankError::Api("no LLM API key configured".to_string()))?;
        Ok(Self {
            client: Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

/// Chat client for deployments with no LLM key: every call fails, and the
/// callers degrade (rerank keeps order, expansion yields nothing).
pub struct DisabledChat;

#[async_trait]
impl ChatCompleter for DisabledChat {
    async fn complete(&self, _model: &str, _prompt: &str, _temperature: f32) -> Result<String> {
        Err(RerankError::Api("LLM access not configured".to_string()).into())
    }
}

#[async_trait]
impl ChatCompleter for OpenRouterChat {
    async fn complete(&self, model: &str, prompt: &str, temperature: f32) -> Result<String> {
        let request = ChatRequest {
            model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| RerankError::Api(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RerankError::Api(format!("API error ({status})")).into());
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| RerankError::Api(format!("failed to parse response: {e}")))?;

        Ok(parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default())
    }
}
