//! Element scoring for the readability method.

use std::sync::LazyLock;

use regex::Regex;

use crate::parse::Element;
use crate::preprocess::POSITIVE;

static NEGATIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(banner|breadcrumbs?|combx|comment|community|disqus|extra|foot|header|menu|related|remark|rss|shoutbox|sidebar|sponsor|ad-break|agegate|pagination|pager|popup|share|social|promo)",
    )
    .expect("negative pattern should compile")
});

/// Configuration for content scoring
#[derive(Debug, Clone)]
pub struct ScoreConfig {
    /// Weight for positive class/ID patterns
    pub positive_weight: f64,
    /// Weight for negative class/ID patterns
    pub negative_weight: f64,
    /// Maximum content density score from character count
    pub max_char_density_score: f64,
    /// Maximum content density score from comma count
    pub max_comma_density_score: f64,
    /// Characters per point for content density scoring
    pub chars_per_point: usize,
}

impl Default for ScoreConfig {
    fn default() -> Self {
        Self {
            positive_weight: 25.0,
            negative_weight: -25.0,
            max_char_density_score: 3.0,
            max_comma_density_score: 3.0,
            chars_per_point: 100,
        }
    }
}

/// Breakdown of an element's score
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreResult {
    pub base_score: f64,
    pub class_weight: f64,
    pub content_density: f64,
    /// Share of text inside links, 0.0 to 1.0
    pub link_density: f64,
    pub final_score: f64,
}

/// Base score by tag: content containers score up, lists and page chrome score down.
pub fn base_tag_score(element: &Element<'_>) -> f64 {
    match element.tag_name().as_str() {
        "article" => 10.0,
        "section" | "main" => 8.0,
        "div" => 5.0,
        "td" | "blockquote" => 3.0,
        "form" | "address" | "ol" | "ul" | "dl" | "dd" | "dt" | "li" => -3.0,
        "h1" | "h2" | "h3" | "h4" | "h5" | "h6" | "th" | "header" | "footer" | "nav" | "aside" => -5.0,
        _ => 0.0,
    }
}

/// Positive weight when the id or a class looks like content, negative when it looks like chrome.
///
/// The id is checked before classes; within each, a positive match wins.
pub fn class_id_weight(element: &Element<'_>, config: &ScoreConfig) -> f64 {
    let weigh = |value: &str| {
        if POSITIVE.is_match(value) {
            Some(config.positive_weight)
        } else if NEGATIVE.is_match(value) {
            Some(config.negative_weight)
        } else {
            None
        }
    };

    if let Some(weight) = element.attr("id").and_then(weigh) {
        return weight;
    }

    element.attr("class").and_then(|class| class.split_whitespace().find_map(weigh)).unwrap_or(0.0)
}

/// Points for text length and comma count, each capped.
pub fn content_density_score(element: &Element<'_>, config: &ScoreConfig) -> f64 {
    let text = element.text();
    let char_score = ((text.chars().count() / config.chars_per_point.max(1)) as f64).min(config.max_char_density_score);
    let comma_score = (text.matches(',').count() as f64).min(config.max_comma_density_score);

    char_score + comma_score
}

/// Ratio of link text characters to total text characters.
pub fn link_density(element: &Element<'_>) -> f64 {
    let text_length = element.text().chars().count();
    if text_length == 0 {
        return 0.0;
    }

    let link_text_length: usize =
        element.select("a").unwrap_or_default().iter().map(|link| link.text().chars().count()).sum();

    link_text_length as f64 / text_length as f64
}

/// Combines tag, class/id and density scores, then applies the link density penalty.
///
/// The penalty is halved for elements with a positive class/id or more than
/// 500 characters of text.
pub fn calculate_score(element: &Element<'_>, config: &ScoreConfig) -> ScoreResult {
    let base_score = base_tag_score(element);
    let class_weight = class_id_weight(element, config);
    let content_density = content_density_score(element, config);
    let ld = link_density(element);

    let content_rich = element.text().chars().count() > 500;
    let link_penalty = if class_weight > 0.0 || content_rich { 1.0 - ld * 0.5 } else { 1.0 - ld };

    let final_score = (base_score + class_weight + content_density) * link_penalty;

    ScoreResult { base_score, class_weight, content_density, link_density: ld, final_score }
}
