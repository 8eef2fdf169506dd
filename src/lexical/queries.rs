//! Query-body builders for the inverted-index service.
//!
//! Pure functions from an analyzed query to a JSON search body, so the
//! boost tables stay testable without a live engine.

use serde_json::{json, Value};

use crate::text::{AnalyzedQuery, Script};

/// Boost for an exact id match on numeric catalog queries.
const ID_EXACT_BOOST: f32 = 100.0;
/// Boost for a prefix id match on numeric catalog queries.
const ID_PREFIX_BOOST: f32 = 10.0;

/// Catalog query over book title/author fields.
pub fn books_catalog_query(query: &AnalyzedQuery, limit: usize) -> Value {
    let inner = match query.script {
        Script::Numeric => numeric_id_query(&query.normalized),
        Script::Arabic => json!({
            "multi_match": {
                "query": query.normalized,
                "fields": ["title_arabic^3", "title_arabic.exact^2", "author_name_arabic^1"],
                "fuzziness": "AUTO"
            }
        }),
        Script::Latin => json!({
            "multi_match": {
                "query": query.raw.trim(),
                "fields": ["title_latin^3", "author_name_latin^1"],
                "fuzziness": "AUTO"
            }
        }),
    };
    json!({ "query": inner, "size": limit })
}

/// Catalog query over author name fields, including the classical name
/// parts (kunya, nasab, nisba, laqab).
pub fn authors_catalog_query(query: &AnalyzedQuery, limit: usize) -> Value {
    let inner = match query.script {
        Script::Numeric => numeric_id_query(&query.normalized),
        Script::Arabic => json!({
            "multi_match": {
                "query": query.normalized,
                "fields": [
                    "name_arabic^3", "name_arabic.exact^2",
                    "kunya^2", "nasab^1", "nisba^2", "laqab^1"
                ],
                "fuzziness": "AUTO"
            }
        }),
        Script::Latin => json!({
            "multi_match": {
                "query": query.raw.trim(),
                "fields": ["name_latin^3"],
                "fuzziness": "AUTO"
            }
        }),
    };
    json!({ "query": inner, "size": limit })
}

fn numeric_id_query(id: &str) -> Value {
    json!({
        "bool": {
            "should": [
                { "term": { "id": { "value": id, "boost": ID_EXACT_BOOST } } },
                { "prefix": { "id": { "value": id, "boost": ID_PREFIX_BOOST } } }
            ]
        }
    })
}

/// Content query over a text index. Quoted phrases switch to exact phrase
/// matching; otherwise best-fields with fuzzy fallback.
pub fn content_query(
    query: &AnalyzedQuery,
    limit: usize,
    extra_filters: Vec<Value>,
) -> Value {
    let fields = match query.script {
        Script::Latin => vec!["text_latin^3", "text^1"],
        _ => vec!["text^3", "text_normalized^2"],
    };

    let matcher = if query.has_quoted_phrase {
        let musts: Vec<Value> = query
            .phrases
            .iter()
            .map(|phrase| json!({ "match_phrase": { "text_normalized": phrase } }))
            .collect();
        json!({ "bool": { "must": musts } })
    } else {
        json!({
            "multi_match": {
                "query": query.normalized,
                "fields": fields,
                "type": "best_fields",
                "fuzziness": "AUTO"
            }
        })
    };

    let query_part = if extra_filters.is_empty() {
        matcher
    } else {
        json!({ "bool": { "must": [matcher], "filter": extra_filters } })
    };

    json!({
        "query": query_part,
        "size": limit,
        "highlight": {
            "fields": { "text": {} },
            "pre_tags": ["<em>"],
            "post_tags": ["</em>"]
        }
    })
}

/// Terms aggregation body for per-book page counts.
pub fn page_counts_query() -> Value {
    json!({
        "size": 0,
        "aggs": {
            "by_book": {
                "terms": { "field": "book_id", "size": 20_000 }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_catalog_query_boosts() {
        let q = AnalyzedQuery::new("1681");
        let body = books_catalog_query(&q, 10);
        let should = &body["query"]["bool"]["should"];
        assert_eq!(should[0]["term"]["id"]["boost"], 100.0);
        assert_eq!(should[1]["prefix"]["id"]["boost"], 10.0);
    }

    #[test]
    fn test_arabic_catalog_query_fields() {
        let q = AnalyzedQuery::new("صحيح البخاري");
        let body = books_catalog_query(&q, 10);
        let fields = body["query"]["multi_match"]["fields"].as_array().unwrap();
        assert!(fields.contains(&Value::String("title_arabic^3".into())));
        assert_eq!(body["query"]["multi_match"]["fuzziness"], "AUTO");
    }

    #[test]
    fn test_author_query_includes_name_parts() {
        let q = AnalyzedQuery::new("ابن تيمية");
        let body = authors_catalog_query(&q, 10);
        let fields = body["query"]["multi_match"]["fields"].as_array().unwrap();
        for field in ["kunya^2", "nasab^1", "nisba^2", "laqab^1"] {
            assert!(fields.contains(&Value::String(field.into())), "{field} missing");
        }
    }

    #[test]
    fn test_latin_catalog_query_uses_raw_text() {
        let q = AnalyzedQuery::new("Sahih al-Bukhari");
        let body = books_catalog_query(&q, 10);
        assert_eq!(body["query"]["multi_match"]["query"], "Sahih al-Bukhari");
    }

    #[test]
    fn test_content_query_phrase_mode() {
        let q = AnalyzedQuery::new("\"بسم الله الرحمن الرحيم\"");
        let body = content_query(&q, 10, vec![]);
        let musts = body["query"]["bool"]["must"].as_array().unwrap();
        assert_eq!(musts.len(), 1);
        assert!(musts[0]["match_phrase"]["text_normalized"].is_string());
    }

    #[test]
    fn test_content_query_fuzzy_mode_with_filters() {
        let q = AnalyzedQuery::new("الصلاة");
        let filter = json!({ "term": { "book_id": 5 } });
        let body = content_query(&q, 10, vec![filter]);
        assert_eq!(body["query"]["bool"]["filter"][0]["term"]["book_id"], 5);
        assert_eq!(
            body["query"]["bool"]["must"][0]["multi_match"]["fuzziness"],
            "AUTO"
        );
    }

    #[test]
    fn test_content_query_requests_highlights() {
        let q = AnalyzedQuery::new("الصلاة");
        let body = content_query(&q, 10, vec![]);
        assert!(body["highlight"]["fields"]["text"].is_object());
    }
}
