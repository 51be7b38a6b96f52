//! Extraction orchestrator: runs methods in plan order, audits every attempt,
//! and persists the first accepted output as the candidate's winner.
//!
//! Methods for one candidate run strictly one after another and stop at the
//! first acceptance. Each method runs on the blocking pool so a slow parse
//! never stalls other candidates' fetches. A method that panics is recorded
//! as an `error` attempt and the next method runs.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use gleaner_core::identity::Candidate;
//! use gleaner_core::methods::MethodRegistry;
//! use gleaner_core::orchestrator::{AcceptPolicy, CandidateOutcome, MethodPlan, Orchestrator};
//! use gleaner_core::stats::StatsWindows;
//! use gleaner_core::store::MemoryStore;
//!
//! # async fn example() -> gleaner_core::Result<()> {
//! let store = Arc::new(MemoryStore::new());
//! let orchestrator = Orchestrator::new(store.clone(), AcceptPolicy::new(200), StatsWindows::default());
//! let registry = MethodRegistry::with_defaults();
//!
//! let candidate = Candidate::new("rss:example.com", "https://example.com/story")?;
//! let plan = MethodPlan::for_domain(None, &registry);
//! let html = "<html><body><article><p>...</p></article></body></html>";
//!
//! match orchestrator.run(&candidate, html, "example.com", &plan).await? {
//!     CandidateOutcome::Extracted(winner) => println!("won by {}", winner.method_name),
//!     CandidateOutcome::Failed(failed) => println!("{} attempts, no winner", failed.attempts.len()),
//! }
//! # Ok(())
//! # }
//! ```

use std::any::Any;
use std::sync::Arc;
use std::time::Instant;

use serde_json::json;
use time::OffsetDateTime;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::boilerplate::BoilerplateRules;
use crate::identity::{Candidate, CandidateId};
use crate::methods::{ExtractionMethod, ExtractionOutcome, MethodRegistry};
use crate::model::{AttemptOutput, AttemptStatus, ExtractionAttempt, ExtractionResult};
use crate::parse::count_words;
use crate::prefs::DomainMethodPrefs;
use crate::stats::{StatsRecorder, StatsWindows};
use crate::store::{DocumentStore, Store};
use crate::{GleanerError, Result};

/// Decides whether a method's `Success` becomes the winner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcceptPolicy {
    /// Minimum trimmed text length in characters.
    pub min_text_length: usize,
    pub min_word_count: Option<usize>,
}

impl AcceptPolicy {
    pub fn new(min_text_length: usize) -> Self {
        Self { min_text_length, min_word_count: None }
    }

    pub fn with_min_word_count(mut self, min_word_count: Option<usize>) -> Self {
        self.min_word_count = min_word_count;
        self
    }

    pub fn accepts(&self, text: &str) -> bool {
        let text = text.trim();
        text.chars().count() >= self.min_text_length && self.min_word_count.is_none_or(|min| count_words(text) >= min)
    }
}

/// Ordered method list for one domain, fixed for the duration of a candidate's extraction.
#[derive(Clone)]
pub struct MethodPlan {
    methods: Vec<Arc<dyn ExtractionMethod>>,
}

impl MethodPlan {
    /// Primary, then fallbacks, then every other registered method in registration order.
    ///
    /// Names in `prefs` that are not registered are skipped. Without prefs the
    /// plan is the registration order.
    pub fn for_domain(prefs: Option<&DomainMethodPrefs>, registry: &MethodRegistry) -> Self {
        let mut methods: Vec<Arc<dyn ExtractionMethod>> = Vec::with_capacity(registry.len());
        let mut push = |method: &Arc<dyn ExtractionMethod>| {
            if !methods.iter().any(|m| m.name() == method.name()) {
                methods.push(method.clone());
            }
        };

        if let Some(prefs) = prefs {
            let preferred = std::iter::once(&prefs.primary_method).chain(prefs.fallback_methods.iter());
            for name in preferred {
                if let Some(method) = registry.get(name) {
                    push(method);
                }
            }
        }
        for method in registry.iter() {
            push(method);
        }

        Self { methods }
    }

    pub fn names(&self) -> Vec<&str> {
        self.methods.iter().map(|m| m.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

/// No method produced acceptable text for a candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionFailed {
    pub candidate_id: CandidateId,
    pub attempts: Vec<ExtractionAttempt>,
}

impl From<ExtractionFailed> for GleanerError {
    fn from(failed: ExtractionFailed) -> Self {
        GleanerError::ExtractionFailed { candidate_id: failed.candidate_id.to_string(), attempts: failed.attempts.len() }
    }
}

/// Result of orchestrating one candidate.
#[derive(Debug, Clone, PartialEq)]
pub enum CandidateOutcome {
    Extracted(ExtractionResult),
    Failed(ExtractionFailed),
}

pub struct Orchestrator {
    store: Arc<dyn Store>,
    documents: Option<Arc<dyn DocumentStore>>,
    stats: StatsRecorder,
    accept: AcceptPolicy,
    boilerplate: BoilerplateRules,
}

impl Orchestrator {
    pub fn new(store: Arc<dyn Store>, accept: AcceptPolicy, windows: StatsWindows) -> Self {
        Self {
            stats: StatsRecorder::new(store.clone(), windows),
            store,
            documents: None,
            accept,
            boilerplate: BoilerplateRules::default(),
        }
    }

    /// Keeps full method output in a document store.
    pub fn with_documents(mut self, documents: Arc<dyn DocumentStore>) -> Self {
        self.documents = Some(documents);
        self
    }

    pub fn with_boilerplate(mut self, boilerplate: BoilerplateRules) -> Self {
        self.boilerplate = boilerplate;
        self
    }

    /// Extracts one candidate following `plan`.
    ///
    /// # Errors
    ///
    /// Only persistence failures are returned as errors; a candidate no
    /// method could handle is [`CandidateOutcome::Failed`].
    pub async fn run(&self, candidate: &Candidate, raw_html: &str, domain: &str, plan: &MethodPlan) -> Result<CandidateOutcome> {
        if raw_html.trim().is_empty() {
            return self.skip_empty(candidate, domain, plan).await;
        }

        let mut attempts = Vec::with_capacity(plan.len());
        let html: Arc<str> = Arc::from(raw_html);

        for method in &plan.methods {
            let started_at = OffsetDateTime::now_utc();
            let clock = Instant::now();
            let outcome = run_method(method.clone(), html.clone()).await;
            let duration_ms = u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX);

            // Acceptance is judged on the text that would be stored.
            let (status, accepted_text) = match &outcome {
                ExtractionOutcome::Success { text, .. } => {
                    let stripped = self.boilerplate.strip(&candidate.canonical_url, text);
                    if self.accept.accepts(&stripped) {
                        (AttemptStatus::Success, Some(stripped))
                    } else {
                        (AttemptStatus::TooShort, None)
                    }
                }
                other => (other.status(), None),
            };

            let attempt = ExtractionAttempt {
                attempt_id: Uuid::new_v4(),
                candidate_id: candidate.candidate_id.clone(),
                domain: domain.to_string(),
                method_name: method.name().to_string(),
                status,
                started_at,
                ended_at: OffsetDateTime::now_utc(),
                duration_ms,
                error: match &outcome {
                    ExtractionOutcome::Error { reason } => Some(reason.clone()),
                    _ => None,
                },
                text_length: outcome.text_length(),
                metadata: attempt_metadata(&outcome, status),
            };

            self.store.insert_attempt(&attempt).await?;
            self.store_output(&attempt, &outcome).await?;
            self.stats.record(domain, &attempt.method_name, status, duration_ms).await?;

            debug!(
                candidate_id = %candidate.candidate_id,
                domain,
                method = %attempt.method_name,
                status = %status,
                duration_ms,
                text_length = attempt.text_length,
                "Extraction attempt"
            );
            attempts.push(attempt);

            if let Some(text) = accepted_text {
                let winner = ExtractionResult {
                    candidate_id: candidate.candidate_id.clone(),
                    method_name: method.name().to_string(),
                    body_text: text,
                    extracted_at: OffsetDateTime::now_utc(),
                };
                self.store.upsert_winner(&winner).await?;
                info!(
                    candidate_id = %candidate.candidate_id,
                    domain,
                    method = %winner.method_name,
                    attempts = attempts.len(),
                    "Extracted"
                );
                return Ok(CandidateOutcome::Extracted(winner));
            }
        }

        warn!(candidate_id = %candidate.candidate_id, domain, attempts = attempts.len(), "No method accepted");
        Ok(CandidateOutcome::Failed(ExtractionFailed { candidate_id: candidate.candidate_id.clone(), attempts }))
    }

    /// Records every planned method as skipped without running it or touching statistics.
    async fn skip_empty(&self, candidate: &Candidate, domain: &str, plan: &MethodPlan) -> Result<CandidateOutcome> {
        let mut attempts = Vec::with_capacity(plan.len());
        for method in &plan.methods {
            let now = OffsetDateTime::now_utc();
            let attempt = ExtractionAttempt {
                attempt_id: Uuid::new_v4(),
                candidate_id: candidate.candidate_id.clone(),
                domain: domain.to_string(),
                method_name: method.name().to_string(),
                status: AttemptStatus::Skipped,
                started_at: now,
                ended_at: now,
                duration_ms: 0,
                error: Some("empty_document".to_string()),
                text_length: 0,
                metadata: serde_json::Value::Null,
            };
            self.store.insert_attempt(&attempt).await?;
            attempts.push(attempt);
        }

        warn!(candidate_id = %candidate.candidate_id, domain, "Empty document; methods skipped");
        Ok(CandidateOutcome::Failed(ExtractionFailed { candidate_id: candidate.candidate_id.clone(), attempts }))
    }

    async fn store_output(&self, attempt: &ExtractionAttempt, outcome: &ExtractionOutcome) -> Result<()> {
        let Some(documents) = &self.documents else {
            return Ok(());
        };
        let text = match outcome {
            ExtractionOutcome::Success { text, .. } => Some(text.clone()),
            _ => None,
        };
        let output = AttemptOutput {
            attempt_id: attempt.attempt_id,
            candidate_id: attempt.candidate_id.clone(),
            method_name: attempt.method_name.clone(),
            status: attempt.status,
            text,
            recorded_at: attempt.ended_at,
        };
        documents.put_attempt_output(&output).await
    }
}

fn attempt_metadata(outcome: &ExtractionOutcome, status: AttemptStatus) -> serde_json::Value {
    match outcome {
        ExtractionOutcome::Success { text, confidence_signal } => json!({
            "confidence_signal": confidence_signal,
            "word_count": count_words(text),
            "accepted": status == AttemptStatus::Success,
        }),
        _ => serde_json::Value::Null,
    }
}

/// Runs one method on the blocking pool; a panic becomes an `Error` outcome.
async fn run_method(method: Arc<dyn ExtractionMethod>, html: Arc<str>) -> ExtractionOutcome {
    match tokio::task::spawn_blocking(move || method.extract(&html)).await {
        Ok(outcome) => outcome,
        Err(e) if e.is_panic() => ExtractionOutcome::error(format!("panicked: {}", panic_message(&e.into_panic()))),
        Err(e) => ExtractionOutcome::error(format!("aborted: {e}")),
    }
}

fn panic_message(panic: &Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::collections::HashMap;

    const LONG_TEXT: &str = "A sufficiently long body of article text that clears the acceptance threshold easily.";

    /// Returns a fixed outcome.
    struct Scripted {
        name: &'static str,
        outcome: ExtractionOutcome,
    }

    impl ExtractionMethod for Scripted {
        fn name(&self) -> &str {
            self.name
        }

        fn extract(&self, _raw_html: &str) -> ExtractionOutcome {
            self.outcome.clone()
        }
    }

    struct Panics;

    impl ExtractionMethod for Panics {
        fn name(&self) -> &str {
            "panics"
        }

        fn extract(&self, _raw_html: &str) -> ExtractionOutcome {
            panic!("selector exploded")
        }
    }

    fn success(text: &str) -> ExtractionOutcome {
        ExtractionOutcome::Success { text: text.to_string(), confidence_signal: 0.7 }
    }

    fn registry(methods: Vec<Arc<dyn ExtractionMethod>>) -> MethodRegistry {
        let mut registry = MethodRegistry::new();
        for method in methods {
            registry.register(method).unwrap();
        }
        registry
    }

    fn setup() -> (Arc<MemoryStore>, Orchestrator, Candidate) {
        let store = Arc::new(MemoryStore::new());
        let orchestrator = Orchestrator::new(store.clone(), AcceptPolicy::new(40), StatsWindows::default())
            .with_documents(store.clone());
        let candidate = Candidate::new("rss:news.example", "https://news.example/story").unwrap();
        (store, orchestrator, candidate)
    }

    #[tokio::test]
    async fn test_too_short_error_success_writes_three_attempts() {
        let (store, orchestrator, candidate) = setup();
        let registry = registry(vec![
            Arc::new(Scripted { name: "a", outcome: ExtractionOutcome::TooShort { text_length: 12 } }),
            Arc::new(Scripted { name: "b", outcome: ExtractionOutcome::error("boom") }),
            Arc::new(Scripted { name: "c", outcome: success(LONG_TEXT) }),
            Arc::new(Scripted { name: "d", outcome: success(LONG_TEXT) }),
        ]);
        let plan = MethodPlan::for_domain(None, &registry);

        let outcome = orchestrator.run(&candidate, "<p>page</p>", "news.example", &plan).await.unwrap();

        let CandidateOutcome::Extracted(winner) = outcome else {
            panic!("expected a winner");
        };
        assert_eq!(winner.method_name, "c");
        assert_eq!(winner.body_text, LONG_TEXT);

        let attempts = store.attempts_for_candidate(&candidate.candidate_id).await.unwrap();
        let statuses: Vec<_> = attempts.iter().map(|a| (a.method_name.as_str(), a.status)).collect();
        assert_eq!(
            statuses,
            vec![("a", AttemptStatus::TooShort), ("b", AttemptStatus::Error), ("c", AttemptStatus::Success)]
        );
        assert_eq!(attempts[1].error.as_deref(), Some("boom"));

        assert_eq!(store.get_winner(&candidate.candidate_id).await.unwrap(), Some(winner));
        let stats = store.method_stats("news.example").await.unwrap();
        let counts: Vec<_> = stats.iter().map(|s| (s.method.as_str(), s.attempts, s.successes)).collect();
        assert_eq!(counts, vec![("a", 1, 0), ("b", 1, 0), ("c", 1, 1)]);
        assert_eq!(store.attempt_outputs().len(), 3);
    }

    #[tokio::test]
    async fn test_short_success_recorded_as_too_short() {
        let (store, orchestrator, candidate) = setup();
        let registry = registry(vec![Arc::new(Scripted { name: "a", outcome: success("tiny") })]);
        let plan = MethodPlan::for_domain(None, &registry);

        let outcome = orchestrator.run(&candidate, "<p>page</p>", "news.example", &plan).await.unwrap();

        let CandidateOutcome::Failed(failed) = outcome else {
            panic!("expected failure");
        };
        assert_eq!(failed.attempts.len(), 1);
        assert_eq!(failed.attempts[0].status, AttemptStatus::TooShort);
        assert_eq!(failed.attempts[0].text_length, 4);

        let stats = store.method_stats("news.example").await.unwrap();
        assert_eq!((stats[0].attempts, stats[0].successes), (1, 0));
        assert!(store.get_winner(&candidate.candidate_id).await.unwrap().is_none());

        let err: GleanerError = failed.into();
        assert!(matches!(err, GleanerError::ExtractionFailed { attempts: 1, .. }));
    }

    #[tokio::test]
    async fn test_panicking_method_is_an_error_attempt() {
        let (store, orchestrator, candidate) = setup();
        let registry = registry(vec![Arc::new(Panics), Arc::new(Scripted { name: "b", outcome: success(LONG_TEXT) })]);
        let plan = MethodPlan::for_domain(None, &registry);

        let outcome = orchestrator.run(&candidate, "<p>page</p>", "news.example", &plan).await.unwrap();
        assert!(matches!(outcome, CandidateOutcome::Extracted(ref w) if w.method_name == "b"));

        let attempts = store.attempts_for_candidate(&candidate.candidate_id).await.unwrap();
        assert_eq!(attempts[0].status, AttemptStatus::Error);
        assert_eq!(attempts[0].error.as_deref(), Some("panicked: selector exploded"));
    }

    #[tokio::test]
    async fn test_acceptance_judged_after_boilerplate_stripping() {
        let store = Arc::new(MemoryStore::new());
        let footer = "Subscribe to our newsletter for the latest harbour news and council updates.";
        let boilerplate = BoilerplateRules {
            rules: HashMap::from([("news.example|story".to_string(), vec![footer.to_string()])]),
            ignore_paths: vec![],
        };
        let orchestrator = Orchestrator::new(store.clone(), AcceptPolicy::new(40), StatsWindows::default())
            .with_boilerplate(boilerplate);
        let candidate = Candidate::new("rss:news.example", "https://news.example/story").unwrap();
        let registry = registry(vec![
            Arc::new(Scripted { name: "a", outcome: success(&format!("Short lede.\n\n{footer}")) }),
            Arc::new(Scripted { name: "b", outcome: success(&format!("{LONG_TEXT}\n\n{footer}")) }),
        ]);
        let plan = MethodPlan::for_domain(None, &registry);

        let outcome = orchestrator.run(&candidate, "<p>page</p>", "news.example", &plan).await.unwrap();

        let CandidateOutcome::Extracted(winner) = outcome else {
            panic!("expected a winner");
        };
        assert_eq!(winner.method_name, "b");
        assert_eq!(winner.body_text, LONG_TEXT);
        assert!(AcceptPolicy::new(40).accepts(&winner.body_text));

        let attempts = store.attempts_for_candidate(&candidate.candidate_id).await.unwrap();
        assert_eq!(attempts[0].status, AttemptStatus::TooShort);
        let stats = store.method_stats("news.example").await.unwrap();
        assert_eq!((stats[0].method.as_str(), stats[0].successes), ("a", 0));
    }

    #[tokio::test]
    async fn test_empty_document_skips_without_stats() {
        let (store, orchestrator, candidate) = setup();
        let plan = MethodPlan::for_domain(None, &MethodRegistry::with_defaults());

        let outcome = orchestrator.run(&candidate, "  \n ", "news.example", &plan).await.unwrap();

        let CandidateOutcome::Failed(failed) = outcome else {
            panic!("expected failure");
        };
        assert_eq!(failed.attempts.len(), 4);
        assert!(failed.attempts.iter().all(|a| a.status == AttemptStatus::Skipped));
        assert!(failed.attempts.iter().all(|a| a.error.as_deref() == Some("empty_document")));
        assert!(store.method_stats("news.example").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_persistence_failure_propagates() {
        let (store, orchestrator, candidate) = setup();
        let plan = MethodPlan::for_domain(None, &registry(vec![Arc::new(Scripted { name: "a", outcome: success(LONG_TEXT) })]));
        store.set_unavailable(true);

        let result = orchestrator.run(&candidate, "<p>page</p>", "news.example", &plan).await;
        assert!(matches!(result, Err(GleanerError::PersistenceUnavailable(_))));
    }

    #[test]
    fn test_plan_orders_primary_fallbacks_then_rest() {
        let registry = MethodRegistry::with_defaults();
        let now = OffsetDateTime::now_utc();
        let prefs = DomainMethodPrefs {
            domain: "news.example".into(),
            primary_method: "markup_heuristic".into(),
            fallback_methods: vec!["retired".into(), "readability".into()],
            confidence: 0.5,
            last_changed_at: now,
            locked_until: now,
            drift_flag: false,
            drift_notes: None,
            updated_at: now,
        };

        let plan = MethodPlan::for_domain(Some(&prefs), &registry);
        assert_eq!(plan.names(), vec!["markup_heuristic", "readability", "structured", "advanced"]);

        let cold = MethodPlan::for_domain(None, &registry);
        assert_eq!(cold.names(), registry.names());
    }

    #[test]
    fn test_accept_policy() {
        let policy = AcceptPolicy::new(10);
        assert!(policy.accepts("  ten chars!  "));
        assert!(!policy.accepts("short"));

        let policy = policy.with_min_word_count(Some(3));
        assert!(!policy.accepts("onlytwo words"));
        assert!(policy.accepts("now three words"));
    }
}
