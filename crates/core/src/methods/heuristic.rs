use super::{DEFAULT_METHOD_FLOOR, ExtractionMethod, ExtractionOutcome};
use crate::parse::Document;
use crate::preprocess::{CHROME_TAGS, NON_CONTENT_TAGS, remove_tags};

/// Raw-markup heuristic: drop page chrome, keep meaningful paragraphs.
///
/// Falls back to the whole body text when no paragraph clears
/// `min_paragraph_chars`.
#[derive(Debug, Clone)]
pub struct MarkupHeuristic {
    pub min_paragraph_chars: usize,
    pub floor: usize,
}

impl Default for MarkupHeuristic {
    fn default() -> Self {
        Self { min_paragraph_chars: 40, floor: DEFAULT_METHOD_FLOOR }
    }
}

impl ExtractionMethod for MarkupHeuristic {
    fn name(&self) -> &str {
        "markup_heuristic"
    }

    fn extract(&self, raw_html: &str) -> ExtractionOutcome {
        let stripped = remove_tags(&remove_tags(raw_html, NON_CONTENT_TAGS), CHROME_TAGS);
        let doc = Document::parse(&stripped);

        let blocks: Vec<String> = doc
            .select("p")
            .unwrap_or_default()
            .iter()
            .map(|p| p.normalized_text())
            .filter(|text| text.chars().count() >= self.min_paragraph_chars)
            .collect();

        if !blocks.is_empty() {
            return ExtractionOutcome::from_text(blocks.join("\n\n"), 0.5, self.floor);
        }

        let body = doc.body().map(|b| b.normalized_text()).unwrap_or_default();
        ExtractionOutcome::from_text(body, 0.2, self.floor)
    }
}
