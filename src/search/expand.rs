//! LLM-backed query expansion for refine mode.

use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;

use crate::cache::TtlCache;
use crate::config::{LlmConfig, SearchConfig};
use crate::metrics::get_metrics;

use super::llm::ChatCompleter;
use super::types::ExpandedQuery;

/// At most this many paraphrases per query.
const MAX_EXPANSIONS: usize = 4;

/// One-shot call; no retries.
const EXPANSION_DEADLINE: Duration = Duration::from_secs(10);

const MIN_WEIGHT: f32 = 0.3;
const MAX_WEIGHT: f32 = 1.0;

/// Query expander with a per-query-text cache. Failures degrade to zero
/// expansions; the original query always runs regardless.
pub struct QueryExpander {
    chat: Arc<dyn ChatCompleter>,
    model: String,
    cache: TtlCache<String, Vec<ExpandedQuery>>,
}

#[derive(Debug, Deserialize)]
struct RawExpansion {
    text: String,
    #[serde(default)]
    weight: Option<f32>,
    #[serde(default)]
    reason: Option<String>,
}

impl QueryExpander {
    pub fn new(chat: Arc<dyn ChatCompleter>, llm: &LlmConfig, search: &SearchConfig) -> Self {
        Self {
            chat,
            model: llm.expansion_model.clone(),
            cache: TtlCache::new(
                Duration::from_secs(search.expansion_cache_ttl_secs),
                1024,
                32,
            ),
        }
    }

    /// Paraphrases for `query`, from cache or the model. Never fails: an
    /// unusable model response yields an empty list.
    pub async fn expand(&self, query: &str) -> Vec<ExpandedQuery> {
        if let Some(cached) = self.cache.get(&query.to_string()) {
            return cached;
        }

        let metrics = get_metrics();
        let timer = metrics.expansion_duration_seconds.start_timer();
        let prompt = build_prompt(query);
        let outcome = tokio::time::timeout(
            EXPANSION_DEADLINE,
            self.chat.complete(&self.model, &prompt, 0.3),
        )
        .await;
        timer.observe_duration();

        let expansions = match outcome {
            Ok(Ok(content)) => parse_expansions(&content, query),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "query expansion failed");
                vec![]
            }
            Err(_) => {
                tracing::warn!("query expansion timed out");
                vec![]
            }
        };

        self.cache.set(query.to_string(), expansions.clone());
        expansions
    }
}

fn build_prompt(query: &str) -> String {
    format!(
        "Given the Arabic/Islamic library search query: \"{query}\"\n\n\
         Generate up to {MAX_EXPANSIONS} alternative phrasings that could \
         surface relevant passages the original wording would miss: \
         synonyms, classical terminology, and closely related concepts. \
         Keep each alternative in the query's language.\n\n\
         Respond with ONLY a JSON array of objects, e.g.\n\
         [{{\"text\": \"...\", \"weight\": 0.9, \"reason\": \"synonym\"}}]\n\
         where weight in [0.3, 1.0] reflects how faithful the rephrasing is. \
         Do not include any other text."
    )
}

fn array_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)\[.*\]").expect("array regex"))
}

/// Parse model output into expansions: weights clamped into [0.3, 1.0],
/// duplicates of the original query dropped, capped at [`MAX_EXPANSIONS`].
/// Unparseable output yields an empty list.
pub fn parse_expansions(content: &str, original: &str) -> Vec<ExpandedQuery> {
    let Some(raw) = array_regex().find(content) else {
        return vec![];
    };
    let Ok(parsed) = serde_json::from_str::<Vec<RawExpansion>>(raw.as_str()) else {
        return vec![];
    };

    parsed
        .into_iter()
        .filter(|e| !e.text.trim().is_empty() && e.text.trim() != original.trim())
        .take(MAX_EXPANSIONS)
        .map(|e| ExpandedQuery {
            text: e.text.trim().to_string(),
            weight: e.weight.unwrap_or(0.7).clamp(MIN_WEIGHT, MAX_WEIGHT),
            reason: e.reason.unwrap_or_default(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{RerankError, Result};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingChat {
        calls: AtomicUsize,
        response: String,
    }

    #[async_trait]
    impl ChatCompleter for CountingChat {
        async fn complete(&self, _model: &str, _prompt: &str, _temperature: f32) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.response == "fail" {
                return Err(RerankError::Api("boom".to_string()).into());
            }
            Ok(self.response.clone())
        }
    }

    fn expander(chat: Arc<CountingChat>) -> QueryExpander {
        QueryExpander::new(chat, &LlmConfig::default(), &SearchConfig::default())
    }

    #[test]
    fn test_parse_valid_expansions() {
        let content = r#"[
            {"text": "فقه الصيام", "weight": 0.9, "reason": "synonym"},
            {"text": "شروط الصوم", "weight": 0.7, "reason": "related"}
        ]"#;
        let expansions = parse_expansions(content, "أحكام الصيام");
        assert_eq!(expansions.len(), 2);
        assert_eq!(expansions[0].text, "فقه الصيام");
        assert_eq!(expansions[0].weight, 0.9);
    }

    #[test]
    fn test_parse_clamps_weights() {
        let content = r#"[{"text": "a", "weight": 0.1}, {"text": "b", "weight": 2.0}]"#;
        let expansions = parse_expansions(content, "q");
        assert_eq!(expansions[0].weight, 0.3);
        assert_eq!(expansions[1].weight, 1.0);
    }

    #[test]
    fn test_parse_drops_original_and_caps_count() {
        let content = r#"[
            {"text": "q"}, {"text": "a"}, {"text": "b"}, {"text": "c"},
            {"text": "d"}, {"text": "e"}
        ]"#;
        let expansions = parse_expansions(content, "q");
        assert_eq!(expansions.len(), MAX_EXPANSIONS);
        assert!(expansions.iter().all(|e| e.text != "q"));
    }

    #[test]
    fn test_parse_garbage_yields_empty() {
        assert!(parse_expansions("not json", "q").is_empty());
        assert!(parse_expansions("[1, 2, 3]", "q").is_empty());
    }

    #[tokio::test]
    async fn test_expansion_cached_by_query_text() {
        let chat = Arc::new(CountingChat {
            calls: AtomicUsize::new(0),
            response: r#"[{"text": "فقه الصيام", "weight": 0.9}]"#.to_string(),
        });
        let expander = expander(Arc::clone(&chat));

        let first = expander.expand("أحكام الصيام").await;
        let second = expander.expand("أحكام الصيام").await;
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
        assert_eq!(chat.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_call_yields_zero_expansions() {
        let chat = Arc::new(CountingChat {
            calls: AtomicUsize::new(0),
            response: "fail".to_string(),
        });
        let expander = expander(chat);
        assert!(expander.expand("الصلاة").await.is_empty());
    }
}
