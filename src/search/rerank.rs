//! LLM-based reranking with strict timeouts and safe passthrough.
//!
//! The model is asked for a bare JSON array of 1-based indices. Anything
//! else (timeouts, API failures, malformed or out-of-range output) falls
//! back to the incoming order; reranking can only ever reorder, never drop
//! a request.

use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;

use crate::config::LlmConfig;
use crate::metrics::get_metrics;

use super::llm::ChatCompleter;
use super::types::{AyahHit, HadithHit, PageHit, RerankerChoice, Scored};

/// Candidate texts are truncated to this many characters in the prompt.
const MAX_CANDIDATE_CHARS: usize = 800;

/// Deadlines per choice.
const FAST_DEADLINE: Duration = Duration::from_secs(15);
const STANDARD_DEADLINE: Duration = Duration::from_secs(20);
const UNIFIED_DEADLINE: Duration = Duration::from_secs(25);

/// Result of a rerank attempt.
pub struct RerankOutcome<T> {
    pub items: Vec<T>,
    /// True when the model call failed or ran out of time and the original
    /// order was kept.
    pub timed_out: bool,
}

/// Result of a unified tri-domain rerank.
pub struct UnifiedRerankOutcome {
    pub books: Vec<Scored<PageHit>>,
    pub ayahs: Vec<Scored<AyahHit>>,
    pub hadiths: Vec<Scored<HadithHit>>,
    pub timed_out: bool,
}

/// LLM reranker over an injected chat completer.
pub struct Reranker {
    chat: Arc<dyn ChatCompleter>,
    model_small: String,
    model_large: String,
    model_fast: String,
}

impl Reranker {
    pub fn new(chat: Arc<dyn ChatCompleter>, config: &LlmConfig) -> Self {
        Self {
            chat,
            model_small: config.rerank_model_small.clone(),
            model_large: config.rerank_model_large.clone(),
            model_fast: config.rerank_model_fast.clone(),
        }
    }

    fn model_for(&self, choice: RerankerChoice) -> &str {
        match choice {
            RerankerChoice::Small | RerankerChoice::None => &self.model_small,
            RerankerChoice::Large => &self.model_large,
            RerankerChoice::Fast => &self.model_fast,
        }
    }

    fn deadline_for(choice: RerankerChoice) -> Duration {
        match choice {
            RerankerChoice::Fast => FAST_DEADLINE,
            _ => STANDARD_DEADLINE,
        }
    }

    /// Rerank a single-domain candidate list.
    pub async fn rerank<T: Send>(
        &self,
        query: &str,
        items: Vec<T>,
        get_text: impl Fn(&T) -> &str,
        top_n: usize,
        choice: RerankerChoice,
    ) -> RerankOutcome<T> {
        if choice == RerankerChoice::None || items.len() < 2 {
            let mut items = items;
            items.truncate(top_n);
            return RerankOutcome { items, timed_out: false };
        }

        let prompt = build_prompt(
            query,
            items.iter().map(|item| (None, get_text(item))),
        );
        match self.ranked_indices(&prompt, items.len(), choice, Self::deadline_for(choice)).await {
            RankAttempt::Ranked(indices) => {
                let items = reorder(items, &indices, top_n);
                RerankOutcome { items, timed_out: false }
            }
            RankAttempt::Unparseable => {
                let mut items = items;
                items.truncate(top_n);
                RerankOutcome { items, timed_out: false }
            }
            RankAttempt::Failed => {
                let mut items = items;
                items.truncate(top_n);
                RerankOutcome { items, timed_out: true }
            }
        }
    }

    /// Unified refine rerank across the three content domains.
    ///
    /// Lists arrive already capped per domain. Candidates are packed into a
    /// single numbered list with a per-item type tag; the ranked indices are
    /// distributed back per type, each capped again, and a synthetic
    /// monotone score `1 - rank/100` replaces the fused score so downstream
    /// sorting stays stable.
    pub async fn rerank_unified(
        &self,
        query: &str,
        mut books: Vec<Scored<PageHit>>,
        mut ayahs: Vec<Scored<AyahHit>>,
        mut hadiths: Vec<Scored<HadithHit>>,
        caps: (usize, usize, usize),
        choice: RerankerChoice,
    ) -> UnifiedRerankOutcome {
        books.truncate(caps.0);
        ayahs.truncate(caps.1);
        hadiths.truncate(caps.2);

        let total = books.len() + ayahs.len() + hadiths.len();
        if choice == RerankerChoice::None || total < 3 {
            return UnifiedRerankOutcome { books, ayahs, hadiths, timed_out: false };
        }

        let candidates: Vec<(Option<&str>, &str)> = books
            .iter()
            .map(|b| (Some("book"), b.hit.text_snippet.as_str()))
            .chain(ayahs.iter().map(|a| (Some("quran"), a.hit.text.as_str())))
            .chain(hadiths.iter().map(|h| (Some("hadith"), h.hit.text.as_str())))
            .collect();
        let prompt = build_prompt(query, candidates.into_iter());

        let indices = match self
            .ranked_indices(&prompt, total, choice, UNIFIED_DEADLINE)
            .await
        {
            RankAttempt::Ranked(indices) => indices,
            RankAttempt::Unparseable => {
                return UnifiedRerankOutcome { books, ayahs, hadiths, timed_out: false };
            }
            RankAttempt::Failed => {
                return UnifiedRerankOutcome { books, ayahs, hadiths, timed_out: true };
            }
        };

        let book_count = books.len();
        let ayah_count = ayahs.len();
        let mut out_books = Vec::new();
        let mut out_ayahs = Vec::new();
        let mut out_hadiths = Vec::new();

        for (rank, index) in indices.into_iter().enumerate() {
            let score = 1.0 - (rank as f32 / 100.0);
            if index < book_count {
                if out_books.len() < caps.0 {
                    let mut scored = books[index].clone();
                    scored.fused_score = score;
                    out_books.push(scored);
                }
            } else if index < book_count + ayah_count {
                if out_ayahs.len() < caps.1 {
                    let mut scored = ayahs[index - book_count].clone();
                    scored.fused_score = score;
                    out_ayahs.push(scored);
                }
            } else if out_hadiths.len() < caps.2 {
                let mut scored = hadiths[index - book_count - ayah_count].clone();
                scored.fused_score = score;
                out_hadiths.push(scored);
            }
        }

        UnifiedRerankOutcome {
            books: out_books,
            ayahs: out_ayahs,
            hadiths: out_hadiths,
            timed_out: false,
        }
    }

    /// Run the model under its deadline and parse the ranked indices
    /// (0-based on return).
    async fn ranked_indices(
        &self,
        prompt: &str,
        candidate_count: usize,
        choice: RerankerChoice,
        deadline: Duration,
    ) -> RankAttempt {
        let metrics = get_metrics();
        let timer = metrics.rerank_duration_seconds.start_timer();
        let model = self.model_for(choice);

        let outcome = tokio::time::timeout(deadline, self.chat.complete(model, prompt, 0.0)).await;
        timer.observe_duration();

        match outcome {
            Ok(Ok(content)) => match parse_index_array(&content, candidate_count) {
                Some(indices) => RankAttempt::Ranked(indices),
                None => {
                    tracing::warn!(model, "rerank output unparseable, keeping original order");
                    RankAttempt::Unparseable
                }
            },
            Ok(Err(e)) => {
                tracing::warn!(model, error = %e, "rerank call failed");
                metrics.rerank_timeouts_total.inc();
                RankAttempt::Failed
            }
            Err(_) => {
                tracing::warn!(model, deadline_ms = deadline.as_millis() as u64, "rerank timed out");
                metrics.rerank_timeouts_total.inc();
                RankAttempt::Failed
            }
        }
    }
}

enum RankAttempt {
    Ranked(Vec<usize>),
    Unparseable,
    Failed,
}

/// Build the rerank prompt: the query followed by numbered candidates, each
/// truncated, with an optional content-type tag.
fn build_prompt<'a>(query: &str, candidates: impl Iterator<Item = (Option<&'a str>, &'a str)>) -> String {
    let mut body = String::new();
    for (i, (tag, text)) in candidates.enumerate() {
        let truncated: String = text.chars().take(MAX_CANDIDATE_CHARS).collect();
        match tag {
            Some(tag) => body.push_str(&format!("[{}] ({tag}) {truncated}\n", i + 1)),
            None => body.push_str(&format!("[{}] {truncated}\n", i + 1)),
        }
    }

    format!(
        "You are ranking search results for an Arabic/Islamic library. \
         Consider the intent of the query (a topic, a phrase lookup, a ruling, \
         or a named text) and order the passages below from most to least \
         relevant to it.\n\nQuery: {query}\n\nPassages:\n{body}\n\
         Respond with ONLY a JSON array of the passage numbers in ranked \
         order, e.g. [2, 1, 3]. Do not include any other text."
    )
}

fn bracket_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[[\d,\s]*\]").expect("bracket regex"))
}

/// Extract the first `[…]` of digits and commas from model output and
/// validate it as a permutation prefix of `1..=len`. Returns 0-based
/// indices; `None` on duplicates, out-of-range values or no match.
pub fn parse_index_array(content: &str, len: usize) -> Option<Vec<usize>> {
    let raw = bracket_regex().find(content)?.as_str();
    let parsed: Vec<usize> = serde_json::from_str(raw).ok()?;

    let mut seen = vec![false; len];
    let mut indices = Vec::with_capacity(parsed.len());
    for one_based in parsed {
        if one_based == 0 || one_based > len {
            return None;
        }
        if std::mem::replace(&mut seen[one_based - 1], true) {
            return None;
        }
        indices.push(one_based - 1);
    }
    if indices.is_empty() {
        return None;
    }
    Some(indices)
}

/// Reorder `items` by ranked indices; items the model omitted keep their
/// relative order at the tail.
fn reorder<T>(items: Vec<T>, indices: &[usize], top_n: usize) -> Vec<T> {
    let mut slots: Vec<Option<T>> = items.into_iter().map(Some).collect();
    let mut out = Vec::with_capacity(slots.len());
    for &i in indices {
        if let Some(item) = slots[i].take() {
            out.push(item);
        }
    }
    for slot in slots {
        if let Some(item) = slot {
            out.push(item);
        }
    }
    out.truncate(top_n);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{RerankError, Result};
    use async_trait::async_trait;

    struct FixedChat(String);

    #[async_trait]
    impl ChatCompleter for FixedChat {
        async fn complete(&self, _model: &str, _prompt: &str, _temperature: f32) -> Result<String> {
            Ok(self.0.clone())
        }
    }

    struct FailingChat;

    #[async_trait]
    impl ChatCompleter for FailingChat {
        async fn complete(&self, _model: &str, _prompt: &str, _temperature: f32) -> Result<String> {
            Err(RerankError::Api("boom".to_string()).into())
        }
    }

    fn reranker(chat: Arc<dyn ChatCompleter>) -> Reranker {
        Reranker::new(chat, &LlmConfig::default())
    }

    #[test]
    fn test_parse_plain_array() {
        assert_eq!(parse_index_array("[2, 1, 3]", 3), Some(vec![1, 0, 2]));
    }

    #[test]
    fn test_parse_array_embedded_in_prose() {
        let content = "Sure! Here is the ranking:\n[3,1,2]\nHope that helps.";
        assert_eq!(parse_index_array(content, 3), Some(vec![2, 0, 1]));
    }

    #[test]
    fn test_parse_rejects_out_of_range() {
        assert_eq!(parse_index_array("[1, 4]", 3), None);
        assert_eq!(parse_index_array("[0, 1]", 3), None);
    }

    #[test]
    fn test_parse_rejects_duplicates() {
        assert_eq!(parse_index_array("[1, 1, 2]", 3), None);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(parse_index_array("no array here", 3), None);
        assert_eq!(parse_index_array("[]", 3), None);
    }

    #[tokio::test]
    async fn test_none_choice_is_passthrough() {
        let reranker = reranker(Arc::new(FixedChat("[2, 1]".to_string())));
        let outcome = reranker
            .rerank("q", vec!["a", "b", "c"], |s| s, 2, RerankerChoice::None)
            .await;
        assert_eq!(outcome.items, vec!["a", "b"]);
        assert!(!outcome.timed_out);
    }

    #[tokio::test]
    async fn test_rerank_reorders() {
        let reranker = reranker(Arc::new(FixedChat("[3, 1, 2]".to_string())));
        let outcome = reranker
            .rerank("q", vec!["a", "b", "c"], |s| s, 3, RerankerChoice::Small)
            .await;
        assert_eq!(outcome.items, vec!["c", "a", "b"]);
        assert!(!outcome.timed_out);
    }

    #[tokio::test]
    async fn test_failure_keeps_original_order() {
        let reranker = reranker(Arc::new(FailingChat));
        let outcome = reranker
            .rerank("q", vec!["a", "b", "c"], |s| s, 2, RerankerChoice::Fast)
            .await;
        assert_eq!(outcome.items, vec!["a", "b"]);
        assert!(outcome.timed_out);
    }

    #[tokio::test]
    async fn test_unparseable_keeps_order_without_timeout_flag() {
        let reranker = reranker(Arc::new(FixedChat("I cannot rank these.".to_string())));
        let outcome = reranker
            .rerank("q", vec!["a", "b", "c"], |s| s, 3, RerankerChoice::Small)
            .await;
        assert_eq!(outcome.items, vec!["a", "b", "c"]);
        assert!(!outcome.timed_out);
    }

    fn scored_page(n: i64) -> Scored<PageHit> {
        Scored::semantic(
            PageHit {
                book_id: n,
                page_number: n,
                text_snippet: format!("نص {n}"),
                highlighted_snippet: None,
            },
            0.5,
            1,
        )
    }

    fn scored_ayah(n: u32) -> Scored<AyahHit> {
        Scored::semantic(
            AyahHit { surah_number: n, ayah_number: n, ayah_end: None, text: format!("ايه {n}") },
            0.5,
            1,
        )
    }

    fn scored_hadith(n: i64) -> Scored<HadithHit> {
        Scored::semantic(
            HadithHit {
                collection_slug: "bukhari".to_string(),
                hadith_number: n,
                book_id: None,
                text: format!("حديث {n}"),
                chapter: None,
            },
            0.5,
            1,
        )
    }

    #[tokio::test]
    async fn test_unified_distributes_by_type() {
        // Ranking puts the hadith first, then the ayah, then the books.
        let reranker = reranker(Arc::new(FixedChat("[4, 3, 1, 2]".to_string())));
        let outcome = reranker
            .rerank_unified(
                "q",
                vec![scored_page(1), scored_page(2)],
                vec![scored_ayah(1)],
                vec![scored_hadith(1)],
                (2, 1, 1),
                RerankerChoice::Small,
            )
            .await;

        assert!(!outcome.timed_out);
        assert_eq!(outcome.hadiths.len(), 1);
        assert!((outcome.hadiths[0].fused_score - 1.0).abs() < 1e-6);
        assert!((outcome.ayahs[0].fused_score - 0.99).abs() < 1e-6);
        // Books ranked third and fourth overall.
        assert!((outcome.books[0].fused_score - 0.98).abs() < 1e-6);
        assert!(outcome.books[0].fused_score > outcome.books[1].fused_score);
    }

    #[tokio::test]
    async fn test_unified_skips_below_three_candidates() {
        let reranker = reranker(Arc::new(FailingChat));
        let outcome = reranker
            .rerank_unified(
                "q",
                vec![scored_page(1)],
                vec![scored_ayah(1)],
                vec![],
                (5, 5, 5),
                RerankerChoice::Small,
            )
            .await;
        assert!(!outcome.timed_out);
        assert_eq!(outcome.books.len(), 1);
        assert_eq!(outcome.ayahs.len(), 1);
    }

    #[tokio::test]
    async fn test_unified_timeout_returns_capped_originals() {
        let reranker = reranker(Arc::new(FailingChat));
        let outcome = reranker
            .rerank_unified(
                "q",
                vec![scored_page(1), scored_page(2), scored_page(3)],
                vec![scored_ayah(1)],
                vec![scored_hadith(1)],
                (2, 1, 1),
                RerankerChoice::Small,
            )
            .await;
        assert!(outcome.timed_out);
        assert_eq!(outcome.books.len(), 2);
        assert_eq!(outcome.books[0].hit.book_id, 1);
    }
}
