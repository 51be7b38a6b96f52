//! Markup cleaning with `lol_html` ahead of parsing.

use std::sync::LazyLock;

use regex::Regex;

/// Elements that never carry article text.
pub const NON_CONTENT_TAGS: &[&str] = &["script", "style", "noscript", "iframe", "svg", "canvas", "template"];

/// Page chrome removed by the raw-markup heuristic.
pub const CHROME_TAGS: &[&str] = &["nav", "header", "footer", "aside", "form"];

static COMMENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").expect("comment pattern should compile"));

static UNLIKELY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(banner|breadcrumbs?|combx|comment|community|disqus|extra|foot|header|menu|related|remark|rss|shoutbox|sidebar|sponsor|ad-break|agegate|pagination|pager|popup)",
    )
    .expect("unlikely pattern should compile")
});

pub(crate) static POSITIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(article|body|content|entry|hentry|h-entry|main|page|post|text|blog|story|tweet)")
        .expect("positive pattern should compile")
});

static HIDDEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(display\s*:\s*none|visibility\s*:\s*hidden)").expect("hidden pattern should compile")
});

/// Configuration for HTML preprocessing
#[derive(Debug, Clone)]
pub struct PreprocessConfig {
    /// Tags removed together with their content
    pub remove_tags: Vec<&'static str>,
    /// Whether to unwrap elements whose class or id looks like page chrome
    pub remove_unlikely: bool,
    /// Whether to keep positive candidates even if they match unlikely patterns
    pub keep_positive: bool,
    /// Whether to remove elements hidden by inline style
    pub remove_hidden: bool,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self { remove_tags: NON_CONTENT_TAGS.to_vec(), remove_unlikely: true, keep_positive: true, remove_hidden: true }
    }
}

/// Preprocess HTML by removing unwanted elements and normalizing whitespace.
pub fn preprocess_html(html: &str, config: &PreprocessConfig) -> String {
    let mut processed = remove_tags(html, &config.remove_tags);
    processed = remove_comments(&processed);

    if config.remove_unlikely {
        processed = remove_unlikely_candidates(&processed, config.keep_positive);
    }

    if config.remove_hidden {
        processed = remove_hidden_elements(&processed);
    }

    normalize_whitespace(&processed)
}

/// Runs one `lol_html` pass, returning the input unchanged if rewriting fails.
fn rewrite(
    html: &str, handlers: Vec<(std::borrow::Cow<'_, lol_html::Selector>, lol_html::ElementContentHandlers<'_>)>,
) -> String {
    let mut output = String::new();
    let mut rewriter = lol_html::HtmlRewriter::new(
        lol_html::Settings { element_content_handlers: handlers, ..Default::default() },
        |c: &[u8]| {
            output.push_str(&String::from_utf8_lossy(c));
        },
    );

    if rewriter.write(html.as_bytes()).is_err() || rewriter.end().is_err() {
        return html.to_string();
    }

    if output.is_empty() { html.to_string() } else { output }
}

/// Remove the given tags and everything inside them.
pub fn remove_tags(html: &str, tags: &[&str]) -> String {
    if tags.is_empty() {
        return html.to_string();
    }
    let handlers = tags
        .iter()
        .map(|tag| {
            lol_html::element!(*tag, |el| {
                el.remove();
                Ok(())
            })
        })
        .collect();
    rewrite(html, handlers)
}

/// Remove HTML comments from the document
fn remove_comments(html: &str) -> String {
    COMMENT.replace_all(html, "").to_string()
}

/// Unwrap elements that match unlikely candidate patterns, keeping their content
fn remove_unlikely_candidates(html: &str, keep_positive: bool) -> String {
    let is_unlikely = |value: &str| UNLIKELY.is_match(value) && (!keep_positive || !POSITIVE.is_match(value));

    let handlers = vec![lol_html::element!("*", |el| {
        if el.get_attribute("id").is_some_and(|id| is_unlikely(&id)) {
            el.remove_and_keep_content();
            return Ok(());
        }

        if el.get_attribute("class").is_some_and(|class| class.split_whitespace().any(is_unlikely)) {
            el.remove_and_keep_content();
        }

        Ok(())
    })];
    rewrite(html, handlers)
}

/// Remove elements with display:none or visibility:hidden styles
fn remove_hidden_elements(html: &str) -> String {
    let handlers = vec![lol_html::element!("*", |el| {
        if el.get_attribute("style").is_some_and(|style| HIDDEN.is_match(&style)) {
            el.remove();
        }
        Ok(())
    })];
    rewrite(html, handlers)
}

/// Normalize whitespace in HTML
fn normalize_whitespace(html: &str) -> String {
    crate::parse::normalize_text(html)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remove_unwanted_tags() {
        let html = r#"
            <html>
                <head><script>alert('test');</script><style>body{color:red;}</style></head>
                <body>
                    <noscript>Enable JavaScript</noscript>
                    <iframe src="https://example.com"></iframe>
                    <svg><rect width="100" height="100"/></svg>
                    <canvas id="chart"></canvas>
                    <p>Content</p>
                </body>
            </html>
        "#;

        let result = remove_tags(html, NON_CONTENT_TAGS);
        assert!(!result.contains("<script"));
        assert!(!result.contains("<style"));
        assert!(!result.contains("<noscript"));
        assert!(!result.contains("<iframe"));
        assert!(!result.contains("<svg"));
        assert!(!result.contains("<canvas"));
        assert!(result.contains("<p>Content</p>"));
        assert!(!result.contains("alert"), "Script content should be removed");
        assert!(!result.contains("Enable JavaScript"), "Noscript content should be removed");
    }

    #[test]
    fn test_remove_chrome_tags() {
        let html = "<body><nav>Home | About</nav><header>Site</header><p>Story</p><footer>(c)</footer></body>";
        let result = remove_tags(html, CHROME_TAGS);
        assert!(!result.contains("Home"));
        assert!(!result.contains("Site"));
        assert!(!result.contains("(c)"));
        assert!(result.contains("Story"));
    }

    #[test]
    fn test_remove_comments() {
        let html = "<body><!-- one\nline two --><p>Visible content</p></body>";
        let result = remove_comments(html);
        assert!(!result.contains("<!--"));
        assert!(result.contains("Visible content"));
    }

    #[test]
    fn test_remove_unlikely_candidates() {
        let html = r#"
            <html>
                <body>
                    <div id="sidebar">Sidebar content</div>
                    <div id="main-content">Main content</div>
                    <div class="banner-ad">Ad</div>
                    <div class="article">Article content</div>
                </body>
            </html>
        "#;

        let result = remove_unlikely_candidates(html, true);
        assert!(!result.contains("sidebar"));
        assert!(!result.contains("banner-ad"));
        assert!(result.contains("main-content"));
        assert!(result.contains("article"));
    }

    #[test]
    fn test_remove_hidden_elements() {
        let html = r#"
            <div style="display:none">Hidden content</div>
            <div style="visibility: hidden">Invisible content</div>
            <div>Visible content</div>
        "#;

        let result = remove_hidden_elements(html);
        assert!(!result.contains("Hidden content"));
        assert!(!result.contains("Invisible content"));
        assert!(result.contains("Visible content"));
    }

    #[test]
    fn test_preprocess_full_pipeline() {
        let html = r#"
            <!DOCTYPE html>
            <html>
            <head>
                <script>console.log('test');</script>
                <!-- Comment -->
            </head>
            <body>
                <div id="sidebar" class="menu"><p>Sidebar</p></div>
                <div id="main" class="article">
                    <p style="display:none">Hidden</p>
                    <p>Content</p>
                </div>
            </body>
            </html>
        "#;

        let result = preprocess_html(html, &PreprocessConfig::default());

        assert!(!result.contains("<script"));
        assert!(!result.contains("<!--"));
        assert!(!result.contains("sidebar"));
        assert!(!result.contains("Hidden"));
        assert!(result.contains("Content"));
        assert!(!result.contains("  "));
    }
}
