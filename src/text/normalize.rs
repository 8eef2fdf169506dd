//! Arabic text normalization and query analysis.
//!
//! All transforms here are deterministic, idempotent and allocation-light;
//! nothing in this module suspends.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Script family detected for a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Script {
    Arabic,
    Latin,
    Numeric,
}

/// A query after normalization and analysis. Created once per request,
/// immutable afterwards.
#[derive(Debug, Clone)]
pub struct AnalyzedQuery {
    /// The query as received.
    pub raw: String,
    /// Diacritic-stripped, variant-folded, whitespace-collapsed form.
    pub normalized: String,
    pub script: Script,
    /// Whether the raw query contained at least one quoted phrase.
    pub has_quoted_phrase: bool,
    /// Whitespace tokens of the normalized form.
    pub tokens: Vec<String>,
    /// Quoted phrases of two or more tokens, normalized.
    pub phrases: Vec<String>,
}

impl AnalyzedQuery {
    /// Analyze a raw query string.
    pub fn new(raw: &str) -> Self {
        let normalized = normalize(raw);
        let tokens: Vec<String> = normalized.split_whitespace().map(str::to_string).collect();
        let phrases = extract_phrases(raw);
        Self {
            script: detect_script(raw),
            has_quoted_phrase: !phrases.is_empty(),
            raw: raw.to_string(),
            normalized,
            tokens,
            phrases,
        }
    }

    /// Whether the dense-vector branch should be skipped for this query:
    /// quoted phrases demand exact matching, and very short inputs embed
    /// to near-noise.
    pub fn skip_semantic(&self) -> bool {
        if self.has_quoted_phrase {
            return true;
        }
        let no_space: usize = self.normalized.chars().filter(|c| !c.is_whitespace()).count();
        no_space < 4
    }
}

/// Normalize Arabic text: strip diacritics, fold alef/yeh/teh-marbuta
/// variants, collapse whitespace, trim.
///
/// Idempotent: `normalize(normalize(s)) == normalize(s)`.
pub fn normalize(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut pending_space = false;
    let mut started = false;

    for c in s.chars() {
        let folded = match c {
            // Harakat, tanween and small marks, plus superscript alef.
            '\u{064B}'..='\u{065F}' | '\u{0670}' => continue,
            // Alef variants (madda, hamza above/below, wasla) fold to bare alef.
            '\u{0622}' | '\u{0623}' | '\u{0625}' | '\u{0671}' => '\u{0627}',
            // Standalone hamza is dropped.
            '\u{0621}' => continue,
            // Alef maqsura folds to yeh.
            '\u{0649}' => '\u{064A}',
            // Teh marbuta folds to heh.
            '\u{0629}' => '\u{0647}',
            c if c.is_whitespace() => {
                pending_space = started;
                continue;
            }
            c => c,
        };
        if pending_space {
            out.push(' ');
            pending_space = false;
        }
        out.push(folded);
        started = true;
    }

    out
}

/// Detect the script family of a string.
///
/// Any Arabic codepoint wins; an all-ASCII-digit string is numeric;
/// everything else is latin.
pub fn detect_script(s: &str) -> Script {
    let trimmed = s.trim();
    if trimmed.chars().any(is_arabic_char) {
        return Script::Arabic;
    }
    if !trimmed.is_empty() && trimmed.chars().all(|c| c.is_ascii_digit()) {
        return Script::Numeric;
    }
    Script::Latin
}

/// Whether a codepoint falls in the Arabic blocks.
pub fn is_arabic_char(c: char) -> bool {
    matches!(c,
        '\u{0600}'..='\u{06FF}'
        | '\u{0750}'..='\u{077F}'
        | '\u{08A0}'..='\u{08FF}'
        | '\u{FB50}'..='\u{FDFF}'
        | '\u{FE70}'..='\u{FEFF}')
}

fn quote_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#""([^"]+)"|«([^»]+)»|„([^“”"]+)[“”"]|“([^”]+)”"#).expect("quote regex")
    })
}

/// Extract quoted phrases from the raw query. Content between matched quote
/// pairs counts as a phrase only when it has at least two tokens.
pub fn extract_phrases(raw: &str) -> Vec<String> {
    quote_regex()
        .captures_iter(raw)
        .filter_map(|caps| {
            let inner = (1..=4).find_map(|i| caps.get(i))?.as_str();
            let normalized = normalize(inner);
            if normalized.split_whitespace().count() >= 2 {
                Some(normalized)
            } else {
                None
            }
        })
        .collect()
}

/// Compute the effective similarity cutoff for a normalized query.
///
/// Short queries produce noisy embeddings, so the cutoff rises as the query
/// shrinks. Single-word queries are capped at six effective characters so a
/// long single token is still treated as short.
pub fn dynamic_similarity_threshold(normalized: &str, base: f32) -> f32 {
    let chars = normalized.chars().filter(|c| !c.is_whitespace()).count();
    let words = normalized.split_whitespace().count();
    let effective = if words == 1 { chars.min(6) } else { chars };

    let floor = match effective {
        0..=3 => 0.55,
        4..=6 => 0.40,
        7..=12 => 0.30,
        _ => base,
    };
    base.max(floor)
}
