use serde_json::Value;

use super::{DEFAULT_METHOD_FLOOR, ExtractionMethod, ExtractionOutcome};
use crate::parse::{Document, Element, normalize_text};

/// Reads article text from structured markup.
///
/// Tried in order:
/// 1. JSON-LD `articleBody`, including objects nested in `@graph` arrays
/// 2. an element marked `itemprop="articleBody"`
/// 3. the paragraphs of the largest `<article>` element
#[derive(Debug, Clone)]
pub struct StructuredContent {
    pub floor: usize,
}

impl Default for StructuredContent {
    fn default() -> Self {
        Self { floor: DEFAULT_METHOD_FLOOR }
    }
}

impl ExtractionMethod for StructuredContent {
    fn name(&self) -> &str {
        "structured"
    }

    fn extract(&self, raw_html: &str) -> ExtractionOutcome {
        let doc = Document::parse(raw_html);

        if let Some(body) = json_ld_article_body(&doc) {
            return ExtractionOutcome::from_text(body, 0.9, self.floor);
        }

        match doc.select_first(r#"[itemprop="articleBody"]"#) {
            Ok(Some(element)) => return ExtractionOutcome::from_text(paragraph_text(&element), 0.8, self.floor),
            Ok(None) => {}
            Err(e) => return ExtractionOutcome::error(e.to_string()),
        }

        let largest = doc
            .select("article")
            .unwrap_or_default()
            .into_iter()
            .map(|article| paragraph_text(&article))
            .max_by_key(|text| text.chars().count());

        match largest {
            Some(text) => ExtractionOutcome::from_text(text, 0.6, self.floor),
            None => ExtractionOutcome::TooShort { text_length: 0 },
        }
    }
}

/// First non-empty `articleBody` in any JSON-LD block. Blocks that fail to parse are skipped.
fn json_ld_article_body(doc: &Document) -> Option<String> {
    doc.select(r#"script[type="application/ld+json"]"#)
        .unwrap_or_default()
        .iter()
        .filter_map(|script| serde_json::from_str::<Value>(script.text().trim()).ok())
        .find_map(|value| find_article_body(&value))
}

fn find_article_body(value: &Value) -> Option<String> {
    match value {
        Value::Object(map) => {
            if let Some(body) = map.get("articleBody").and_then(Value::as_str).map(str::trim)
                && !body.is_empty()
            {
                return Some(body.to_string());
            }
            map.get("@graph").and_then(find_article_body)
        }
        Value::Array(items) => items.iter().find_map(find_article_body),
        _ => None,
    }
}

/// Paragraph texts joined by blank lines, or the element's whole text when it has no paragraphs.
pub(super) fn paragraph_text(element: &Element<'_>) -> String {
    let paragraphs: Vec<String> = element
        .select("p")
        .unwrap_or_default()
        .iter()
        .map(Element::normalized_text)
        .filter(|p| !p.is_empty())
        .collect();

    if paragraphs.is_empty() { normalize_text(&element.text()) } else { paragraphs.join("\n\n") }
}
