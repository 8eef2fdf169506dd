//! Translation joins onto ranked results.
//!
//! Ayah and hadith translations are cheap relational joins and run as one
//! batched call per domain. Page-content translations are expensive per
//! page, so they are fetched per key through the in-flight coalescer and
//! matched to the ranked snippet by paragraph.

use std::sync::Arc;

use futures::future;

use crate::cache::{translation_key, InflightMap};
use crate::repos::{MetadataRepository, TranslationRepository};
use crate::search::types::{AyahSearchRecord, BookSearchRecord, HadithSearchRecord};
use crate::text::{extract_paragraphs, normalize, strip_tags};

/// Joins translations onto ranked result lists. Failures are logged and the
/// affected results simply carry no translation.
pub struct TranslationMerger {
    translations: Arc<dyn TranslationRepository>,
    metadata: Arc<dyn MetadataRepository>,
    inflight: Arc<InflightMap<Option<String>>>,
}

impl TranslationMerger {
    pub fn new(
        translations: Arc<dyn TranslationRepository>,
        metadata: Arc<dyn MetadataRepository>,
        inflight: Arc<InflightMap<Option<String>>>,
    ) -> Self {
        Self {
            translations,
            metadata,
            inflight,
        }
    }

    /// Join ayah translations in one batched call.
    pub async fn merge_ayahs(&self, records: &mut [AyahSearchRecord], edition: &str) {
        let keys: Vec<(u32, u32)> = records
            .iter()
            .map(|r| (r.hit.surah_number, r.hit.ayah_number))
            .collect();
        if keys.is_empty() {
            return;
        }

        match self.translations.ayah_translations(&keys, edition).await {
            Ok(found) => {
                for record in records.iter_mut() {
                    record.translation = found
                        .get(&(record.hit.surah_number, record.hit.ayah_number))
                        .cloned();
                }
            }
            Err(e) => {
                tracing::warn!(edition, error = %e, "ayah translation join failed");
            }
        }
    }

    /// Join hadith translations in one batched call, keyed by
    /// `(book_id, hadith_number)`.
    pub async fn merge_hadiths(&self, records: &mut [HadithSearchRecord], language: &str) {
        let keys: Vec<(i64, i64)> = records
            .iter()
            .filter_map(|r| r.hit.book_id.map(|b| (b, r.hit.hadith_number)))
            .collect();
        if keys.is_empty() {
            return;
        }

        match self.translations.hadith_translations(&keys, language).await {
            Ok(found) => {
                for record in records.iter_mut() {
                    if let Some(book_id) = record.hit.book_id {
                        record.translation =
                            found.get(&(book_id, record.hit.hadith_number)).cloned();
                    }
                }
            }
            Err(e) => {
                tracing::warn!(language, error = %e, "hadith translation join failed");
            }
        }
    }

    /// Join page-content translations, one coalesced fetch per page.
    pub async fn merge_pages(&self, records: &mut [BookSearchRecord], language: &str) {
        let lookups = records.iter().map(|record| {
            let book_id = record.scored.hit.book_id;
            let page_number = record.scored.hit.page_number;
            let snippet = record.scored.hit.text_snippet.clone();
            let language = language.to_string();
            let translations = Arc::clone(&self.translations);
            let metadata = Arc::clone(&self.metadata);
            let inflight = Arc::clone(&self.inflight);
            let key = translation_key(&format!("page:{book_id}:{page_number}"), &language);

            async move {
                inflight
                    .coalesce(&key, async move {
                        resolve_page_translation(
                            translations,
                            metadata,
                            book_id,
                            page_number,
                            &snippet,
                            &language,
                        )
                        .await
                    })
                    .await
            }
        });

        let resolved: Vec<Option<String>> = future::join_all(lookups).await;
        for (record, translation) in records.iter_mut().zip(resolved) {
            record.content_translation = translation;
        }
    }
}

/// Fetch one page's stored translation and pick the paragraph matching the
/// ranked snippet.
async fn resolve_page_translation(
    translations: Arc<dyn TranslationRepository>,
    metadata: Arc<dyn MetadataRepository>,
    book_id: i64,
    page_number: i64,
    snippet: &str,
    language: &str,
) -> Option<String> {
    let key = (book_id, page_number);

    let stored = match translations.page_translations(&[key], language).await {
        Ok(mut found) => found.remove(&key)?,
        Err(e) => {
            tracing::warn!(book_id, page_number, error = %e, "page translation fetch failed");
            return None;
        }
    };

    let html = match metadata.page_html(&[key]).await {
        Ok(mut found) => found.remove(&key),
        Err(e) => {
            tracing::warn!(book_id, page_number, error = %e, "page html fetch failed");
            None
        }
    };

    let index = html
        .as_deref()
        .and_then(|html| nearest_paragraph_index(html, snippet));

    match index {
        Some(index) => stored
            .paragraphs
            .iter()
            .find(|p| p.paragraph_index == index)
            .map(|p| p.translation.clone()),
        // Without a match there is nothing to anchor to; a single-paragraph
        // translation is still unambiguous.
        None => match stored.paragraphs.as_slice() {
            [only] => Some(only.translation.clone()),
            _ => None,
        },
    }
}

/// Index of the paragraph in `html` whose text is nearest to `snippet`.
pub fn nearest_paragraph_index(html: &str, snippet: &str) -> Option<usize> {
    let needle = normalize(&strip_tags(snippet));
    if needle.is_empty() {
        return None;
    }

    extract_paragraphs(html)
        .into_iter()
        .map(|p| {
            let haystack = normalize(&p.text);
            let similarity = if haystack.contains(&needle) || needle.contains(&haystack) {
                1.0
            } else {
                strsim::normalized_levenshtein(&haystack, &needle)
            };
            (p.index, similarity)
        })
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        .filter(|&(_, similarity)| similarity > 0.3)
        .map(|(index, _)| index)
}
