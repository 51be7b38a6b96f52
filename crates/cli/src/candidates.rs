use std::io::BufRead;

use serde::Deserialize;
use time::OffsetDateTime;
use tracing::warn;

use gleaner_core::Candidate;

/// One JSON line of discovery output.
#[derive(Debug, Deserialize)]
struct CandidateLine {
    source_id: String,
    url: String,
    title: Option<String>,
    #[serde(with = "time::serde::rfc3339::option", default)]
    published_at: Option<OffsetDateTime>,
    metadata: Option<serde_json::Value>,
}

/// Candidates read from JSON lines, plus the number of lines skipped.
///
/// Blank lines are ignored. Malformed lines and invalid URLs are logged and skipped.
pub fn read_candidates(reader: impl BufRead) -> std::io::Result<(Vec<Candidate>, usize)> {
    let mut candidates = Vec::new();
    let mut skipped = 0;

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let line_number = index + 1;

        let parsed: CandidateLine = match serde_json::from_str(&line) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(line = line_number, error = %e, "Malformed candidate line");
                skipped += 1;
                continue;
            }
        };

        match Candidate::new(parsed.source_id, parsed.url) {
            Ok(mut candidate) => {
                candidate.title = parsed.title;
                candidate.published_at = parsed.published_at;
                if let Some(metadata) = parsed.metadata {
                    candidate.metadata = metadata;
                }
                candidates.push(candidate);
            }
            Err(e) => {
                warn!(line = line_number, error = %e, "Invalid candidate URL");
                skipped += 1;
            }
        }
    }

    Ok((candidates, skipped))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_valid_lines_and_skips_bad_ones() {
        let input = r#"{"source_id":"rss:a","url":"https://a.example/story?utm_source=x","title":"Story","published_at":"2026-03-02T06:00:00Z"}

not json
{"source_id":"rss:a","url":"ftp://a.example/file"}
{"source_id":"rss:b","url":"https://b.example/post","metadata":{"feed":"b"}}
"#;
        let (candidates, skipped) = read_candidates(input.as_bytes()).unwrap();

        assert_eq!(skipped, 2);
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].canonical_url, "https://a.example/story");
        assert_eq!(candidates[0].title.as_deref(), Some("Story"));
        assert!(candidates[0].published_at.is_some());
        assert_eq!(candidates[1].metadata["feed"], "b");
    }
}
