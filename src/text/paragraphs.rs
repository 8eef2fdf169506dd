//! Paragraph extraction from page HTML.
//!
//! Page content is stored as loose HTML fragments. Translations reference
//! paragraphs by index, so extraction must preserve the position each
//! paragraph had in the original markup even when blanks are filtered out.

use std::sync::OnceLock;

use regex::Regex;

/// A paragraph with its position in the source HTML.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paragraph {
    /// Sequential position in the original HTML, not the filtered output.
    pub index: usize,
    pub text: String,
}

fn p_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<p\b[^>]*>(.*?)</p>").expect("p regex"))
}

fn tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<[^>]+>").expect("tag regex"))
}

fn span_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<span\b[^>]*>.*?</span>").expect("span regex"))
}

/// Extract paragraphs from an HTML fragment.
///
/// `<p>` elements are used when present; otherwise the stripped text is
/// split on newlines, after joining title spans that were broken across
/// lines in the source.
pub fn extract_paragraphs(html: &str) -> Vec<Paragraph> {
    let from_p: Vec<Paragraph> = p_regex()
        .captures_iter(html)
        .enumerate()
        .filter_map(|(index, caps)| {
            let text = strip_tags(caps.get(1).map_or("", |m| m.as_str()));
            if text.is_empty() {
                None
            } else {
                Some(Paragraph { index, text })
            }
        })
        .collect();

    if !from_p.is_empty() || p_regex().is_match(html) {
        return from_p;
    }

    // No <p> markup: join spans that wrap across lines, then split.
    let joined = span_regex().replace_all(html, |caps: &regex::Captures<'_>| {
        caps[0].replace(['\n', '\r'], " ")
    });
    // Tags go, newlines stay: they are the paragraph boundaries here.
    let stripped = decode_entities(&tag_regex().replace_all(&joined, " "));

    stripped
        .lines()
        .enumerate()
        .filter_map(|(index, line)| {
            let text = line.trim();
            if text.is_empty() {
                None
            } else {
                Some(Paragraph {
                    index,
                    text: text.split_whitespace().collect::<Vec<_>>().join(" "),
                })
            }
        })
        .collect()
}

/// Remove markup, decode entities and collapse whitespace.
pub fn strip_tags(html: &str) -> String {
    let decoded = decode_entities(&tag_regex().replace_all(html, " "));
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn decode_entities(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_p_elements() {
        let html = "<p>الحمد لله</p><p>رب العالمين</p>";
        let paras = extract_paragraphs(html);
        assert_eq!(paras.len(), 2);
        assert_eq!(paras[0], Paragraph { index: 0, text: "الحمد لله".into() });
        assert_eq!(paras[1].index, 1);
    }

    #[test]
    fn test_empty_p_keeps_following_indices() {
        let html = "<p>اول</p><p>  </p><p>ثالث</p>";
        let paras = extract_paragraphs(html);
        assert_eq!(paras.len(), 2);
        assert_eq!(paras[0].index, 0);
        // The blank paragraph is filtered but its slot is not reused.
        assert_eq!(paras[1].index, 2);
    }

    #[test]
    fn test_newline_fallback() {
        let text = "سطر اول\n\nسطر ثالث";
        let paras = extract_paragraphs(text);
        assert_eq!(paras.len(), 2);
        assert_eq!(paras[0].index, 0);
        assert_eq!(paras[1].index, 2);
    }

    #[test]
    fn test_joins_multiline_title_spans() {
        let html = "<span class=\"title\">كتاب\nالطهارة</span>\nالفصل الاول";
        let paras = extract_paragraphs(html);
        assert_eq!(paras.len(), 2);
        assert_eq!(paras[0].text, "كتاب الطهارة");
        assert_eq!(paras[1].text, "الفصل الاول");
    }

    #[test]
    fn test_strip_tags_decodes_entities() {
        assert_eq!(strip_tags("a&nbsp;&amp;&lt;b&gt;"), "a &<b>");
    }

    #[test]
    fn test_p_markup_with_only_blanks_yields_empty() {
        assert!(extract_paragraphs("<p> </p>").is_empty());
    }
}
