//! Per-template boilerplate removal for winner text.
//!
//! Rules are literal text blocks keyed by a template key: the URL host plus
//! its first two path segments (`example.com|news/world`), or `host|root`
//! for the site root.

use std::collections::HashMap;

use serde::Deserialize;
use url::Url;

use crate::parse::normalize_text;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct BoilerplateRules {
    /// Template key to literal blocks removed from matching pages.
    #[serde(default)]
    pub rules: HashMap<String, Vec<String>>,
    /// Path prefixes that never get rules, compared case-insensitively.
    #[serde(default)]
    pub ignore_paths: Vec<String>,
}

impl BoilerplateRules {
    /// Blocks that apply to `url`; empty when none match or the path is ignored.
    pub fn for_url(&self, url: &str) -> &[String] {
        let Ok(parsed) = Url::parse(url) else {
            return &[];
        };
        let path = parsed.path().to_lowercase();
        if self.ignore_paths.iter().any(|prefix| path.starts_with(&prefix.to_lowercase())) {
            return &[];
        }
        template_key(&parsed).and_then(|key| self.rules.get(&key)).map(Vec::as_slice).unwrap_or_default()
    }

    /// Removes the blocks for `url` from `text`.
    pub fn strip(&self, url: &str, text: &str) -> String {
        strip_boilerplate(text, self.for_url(url))
    }
}

/// `host[:port]|<first two path segments>` lower-cased, or `host|root`.
pub fn template_key(url: &Url) -> Option<String> {
    let host = url.host_str()?.to_lowercase();
    let host = match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host,
    };

    let segments: Vec<&str> = url.path().split('/').filter(|s| !s.is_empty()).take(2).collect();
    let group = if segments.is_empty() { "root".to_string() } else { segments.join("/").to_lowercase() };
    Some(format!("{host}|{group}"))
}

/// Removes each literal block, then collapses whitespace within paragraphs.
///
/// Paragraph breaks (blank lines) survive; paragraphs left empty are dropped.
pub fn strip_boilerplate(text: &str, blocks: &[String]) -> String {
    if blocks.is_empty() {
        return text.to_string();
    }

    let mut cleaned = text.to_string();
    for block in blocks.iter().filter(|b| !b.trim().is_empty()) {
        cleaned = cleaned.replace(block.as_str(), "");
    }

    cleaned.split("\n\n").map(normalize_text).filter(|p| !p.is_empty()).collect::<Vec<_>>().join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("https://Example.com/News/World/story-1", "example.com|news/world")]
    #[case("https://example.com/", "example.com|root")]
    #[case("https://example.com", "example.com|root")]
    #[case("https://example.com:8443/a", "example.com:8443|a")]
    fn test_template_key(#[case] url: &str, #[case] expected: &str) {
        assert_eq!(template_key(&Url::parse(url).unwrap()).unwrap(), expected);
    }

    fn rules() -> BoilerplateRules {
        BoilerplateRules {
            rules: HashMap::from([(
                "example.com|news/world".to_string(),
                vec!["Subscribe to our newsletter.".to_string(), "Share this:".to_string()],
            )]),
            ignore_paths: vec!["/News/World/live".to_string()],
        }
    }

    #[test]
    fn test_strip_matching_template() {
        let text = "Share this: First paragraph.\n\nSecond   paragraph.\n\nSubscribe to our newsletter.";
        let stripped = rules().strip("https://example.com/news/world/story", text);
        assert_eq!(stripped, "First paragraph.\n\nSecond paragraph.");
    }

    #[test]
    fn test_ignored_and_unmatched_paths_untouched() {
        let text = "Share this: story";
        assert_eq!(rules().strip("https://example.com/news/world/live/feed", text), text);
        assert_eq!(rules().strip("https://example.com/sport/story", text), text);
        assert_eq!(rules().strip("not a url", text), text);
    }
}
