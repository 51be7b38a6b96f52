pub mod boilerplate;
pub mod config;
pub mod error;
pub mod fetch;
pub mod health;
pub mod identity;
pub mod methods;
pub mod model;
pub mod orchestrator;
pub mod parse;
pub mod pipeline;
pub mod prefs;
pub mod preprocess;
pub mod retry;
pub mod scoring;
pub mod stats;
pub mod store;

pub use boilerplate::BoilerplateRules;
pub use config::GleanerConfig;
pub use error::{GleanerError, Result};
#[cfg(feature = "fetch")]
pub use fetch::ReqwestTransport;
pub use fetch::{CacheKey, FetchOptions, FetchResult, Fetcher, Transport};
pub use health::{MethodHealthItem, build_method_health, method_health};
pub use identity::{Candidate, CandidateId, canonicalize, domain_of, identify};
pub use methods::{ExtractionMethod, ExtractionOutcome, MethodRegistry};
pub use model::{AttemptStatus, ExtractionAttempt, ExtractionResult};
pub use orchestrator::{AcceptPolicy, CandidateOutcome, ExtractionFailed, MethodPlan, Orchestrator};
pub use parse::Document;
pub use pipeline::{Pipeline, RunOptions, RunReport};
pub use prefs::{DomainMethodPrefs, PreferenceSelector, PrefsPolicy, select_method_prefs};
#[doc(hidden)]
pub use preprocess::PreprocessConfig;
pub use retry::{Backoff, RetryPolicy};
#[doc(hidden)]
pub use scoring::{ScoreConfig, ScoreResult, calculate_score};
pub use stats::{DomainMethodStats, StatsRecorder, StatsWindows};
pub use store::{DocumentStore, FsDocumentStore, MemoryStore, Store};
