use super::structured::paragraph_text;
use super::{DEFAULT_METHOD_FLOOR, ExtractionMethod, ExtractionOutcome};
use crate::parse::{Document, Element};
use crate::preprocess::PreprocessConfig;
use crate::scoring::{ScoreConfig, calculate_score, link_density};

/// Tags considered as potential content containers
const CANDIDATE_TAGS: &[&str] = &["div", "article", "section", "main", "p", "td", "pre", "blockquote"];

/// Readability-style scoring over preprocessed markup.
///
/// Candidates are scored, their scores propagate to parent (half) and
/// grandparent (a third), the best one wins, and qualifying siblings under the
/// same parent are appended in document order.
#[derive(Debug, Clone)]
pub struct Readability {
    /// Minimum score for the top candidate
    pub min_score_threshold: f64,
    /// Non-container candidates need at least this many characters
    pub min_candidate_chars: usize,
    /// Sibling score threshold as a fraction of the top score
    pub sibling_threshold: f64,
    /// Maximum elements scanned
    pub max_elements: usize,
    pub floor: usize,
    pub scoring: ScoreConfig,
}

impl Default for Readability {
    fn default() -> Self {
        Self {
            min_score_threshold: 10.0,
            min_candidate_chars: 25,
            sibling_threshold: 0.2,
            max_elements: 1000,
            floor: DEFAULT_METHOD_FLOOR,
            scoring: ScoreConfig::default(),
        }
    }
}

struct Scored<'a> {
    element: Element<'a>,
    score: f64,
}

impl Readability {
    fn identify_candidates<'a>(&self, doc: &'a Document) -> Vec<Scored<'a>> {
        let mut candidates = Vec::new();

        for tag in CANDIDATE_TAGS {
            for element in doc.select(tag).unwrap_or_default() {
                if candidates.len() >= self.max_elements {
                    return candidates;
                }
                if !matches!(element.tag_name().as_str(), "article" | "section" | "main")
                    && element.text().chars().count() < self.min_candidate_chars
                {
                    continue;
                }
                let score = calculate_score(&element, &self.scoring).final_score;
                candidates.push(Scored { element, score });
            }
        }

        candidates
    }

    /// Adds half of each candidate's score to its parent and a third to its grandparent.
    fn propagate_scores<'a>(&self, candidates: &mut Vec<Scored<'a>>) {
        let mut boosts: Vec<(Element<'a>, f64)> = Vec::new();

        for candidate in candidates.iter() {
            let Some(parent) = candidate.element.parent().filter(is_propagation_target) else {
                continue;
            };
            add_boost(&mut boosts, parent, candidate.score / 2.0);

            if let Some(grandparent) = parent.parent().filter(is_propagation_target) {
                add_boost(&mut boosts, grandparent, candidate.score / 3.0);
            }
        }

        for (element, boost) in boosts {
            match candidates.iter_mut().find(|c| c.element == element) {
                Some(existing) => existing.score += boost,
                None => {
                    let score = calculate_score(&element, &self.scoring).final_score + boost;
                    candidates.push(Scored { element, score });
                }
            }
        }
    }

    /// The top candidate plus qualifying siblings, in document order.
    fn select_content<'a>(&self, top: &Scored<'a>, candidates: &[Scored<'a>]) -> Vec<Element<'a>> {
        let Some(parent) = top.element.parent() else {
            return vec![top.element];
        };

        let threshold = top.score * self.sibling_threshold;
        parent
            .children()
            .into_iter()
            .filter(|child| {
                if *child == top.element {
                    return true;
                }
                if candidates.iter().any(|c| c.element == *child && c.score >= threshold) {
                    return true;
                }
                child.tag_name() == "p" && child.text().chars().count() > 80 && link_density(child) < 0.25
            })
            .collect()
    }
}

fn is_propagation_target(element: &Element<'_>) -> bool {
    !matches!(element.tag_name().as_str(), "html" | "body")
}

fn add_boost<'a>(boosts: &mut Vec<(Element<'a>, f64)>, element: Element<'a>, boost: f64) {
    match boosts.iter_mut().find(|(e, _)| *e == element) {
        Some((_, total)) => *total += boost,
        None => boosts.push((element, boost)),
    }
}

impl ExtractionMethod for Readability {
    fn name(&self) -> &str {
        "readability"
    }

    fn extract(&self, raw_html: &str) -> ExtractionOutcome {
        let doc = Document::parse_with_preprocessing(raw_html, &PreprocessConfig::default());

        let mut candidates = self.identify_candidates(&doc);
        self.propagate_scores(&mut candidates);

        let Some(top) = candidates.iter().max_by(|a, b| a.score.total_cmp(&b.score)) else {
            return ExtractionOutcome::TooShort { text_length: 0 };
        };
        if top.score < self.min_score_threshold {
            return ExtractionOutcome::TooShort { text_length: top.element.normalized_text().chars().count() };
        }

        let text = self
            .select_content(top, &candidates)
            .iter()
            .map(|element| if element.tag_name() == "p" { element.normalized_text() } else { paragraph_text(element) })
            .filter(|block| !block.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n");

        ExtractionOutcome::from_text(text, top.score / 60.0, self.floor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARTICLE: &str = r#"
        <html><body>
            <div class="sidebar"><a href="/a">Link one</a> <a href="/b">Link two</a> <a href="/c">Link three</a></div>
            <div class="post-content">
                <p>The city council voted on Tuesday to approve the new transit plan, which adds three bus lines, extends service hours, and funds accessible stops.</p>
                <p>Supporters said the plan, years in the making, would cut commute times for thousands of residents, especially in the outer suburbs.</p>
                <p>Opponents argued that the cost, estimated at forty million dollars, should be covered by the state rather than by local taxpayers.</p>
            </div>
            <div class="comments"><p>First!</p></div>
        </body></html>
    "#;

    #[test]
    fn test_extracts_main_content() {
        match Readability::default().extract(ARTICLE) {
            ExtractionOutcome::Success { text, confidence_signal } => {
                assert!(text.starts_with("The city council voted"));
                assert!(text.contains("Opponents argued"));
                assert!(!text.contains("Link one"));
                assert!(!text.contains("First!"));
                assert!(confidence_signal > 0.0 && confidence_signal <= 1.0);
            }
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[test]
    fn test_nothing_scorable() {
        let outcome = Readability::default().extract("<html><body><span>hi</span></body></html>");
        assert!(matches!(outcome, ExtractionOutcome::TooShort { .. }));
    }

    #[test]
    fn test_propagation_boosts_container() {
        let doc = Document::parse_with_preprocessing(ARTICLE, &PreprocessConfig::default());
        let method = Readability::default();
        let mut candidates = method.identify_candidates(&doc);
        method.propagate_scores(&mut candidates);

        let top = candidates.iter().max_by(|a, b| a.score.total_cmp(&b.score)).unwrap();
        assert_eq!(top.element.attr("class"), Some("post-content"));
    }
}
