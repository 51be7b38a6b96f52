//! Run configuration loaded from TOML.
//!
//! The thresholds that drive acceptance and method learning have no default:
//! a file missing any of them is rejected at startup.
//!
//! ```toml
//! [extraction]
//! min_text_length = 400
//!
//! [preferences]
//! cooldown_secs = 86400
//! drift_floor = 0.4
//! min_attempts = 5
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::boilerplate::BoilerplateRules;
use crate::fetch::{FetchOptions, Fetcher, Transport, default_user_agent};
use crate::methods::MethodRegistry;
use crate::orchestrator::{AcceptPolicy, Orchestrator};
use crate::pipeline::Pipeline;
use crate::prefs::{PreferenceSelector, PrefsPolicy};
use crate::retry::Backoff;
use crate::stats::StatsWindows;
use crate::store::{DocumentStore, Store};
use crate::{GleanerError, Result};

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "GLEANER_CONFIG";

pub const DEFAULT_CONFIG_FILE: &str = "gleaner.toml";

/// Name of the HTTP fetcher; part of every cache key.
pub const HTTP_FETCHER: &str = "http";

const DEFAULT_DRIFT_WINDOW: usize = 20;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    extraction: RawExtraction,
    #[serde(default)]
    preferences: RawPreferences,
    #[serde(default)]
    stats: RawStats,
    #[serde(default)]
    fetch: RawFetch,
    #[serde(default)]
    run: RawRun,
    #[serde(default)]
    storage: RawStorage,
    #[serde(default)]
    boilerplate: BoilerplateRules,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawExtraction {
    min_text_length: Option<usize>,
    min_word_count: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPreferences {
    cooldown_secs: Option<u64>,
    drift_floor: Option<f64>,
    min_attempts: Option<u64>,
    promote_margin: Option<f64>,
    drift_window: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawStats {
    duration_window: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawFetch {
    cache_enabled: Option<bool>,
    max_retries: Option<u32>,
    timeout_secs: Option<u64>,
    backoff_base_ms: Option<u64>,
    backoff_max_ms: Option<u64>,
    max_redirects: Option<usize>,
    #[serde(default)]
    user_agents: HashMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRun {
    concurrency: Option<usize>,
    deadline_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawStorage {
    database_url: Option<String>,
    documents_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionSettings {
    pub min_text_length: usize,
    pub min_word_count: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PreferenceSettings {
    pub cooldown: Duration,
    pub drift_floor: f64,
    pub min_attempts: u64,
    pub promote_margin: f64,
    pub drift_window: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchSettings {
    pub cache_enabled: bool,
    pub max_retries: u32,
    pub timeout: Duration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub max_redirects: usize,
    /// Fetcher name to User-Agent.
    pub user_agents: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSettings {
    pub concurrency: usize,
    pub deadline: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StorageSettings {
    /// PostgreSQL URL; the in-memory store is used when absent.
    pub database_url: Option<String>,
    pub documents_dir: PathBuf,
}

/// Validated configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct GleanerConfig {
    pub extraction: ExtractionSettings,
    pub preferences: PreferenceSettings,
    pub duration_window: usize,
    pub fetch: FetchSettings,
    pub run: RunSettings,
    pub storage: StorageSettings,
    pub boilerplate: BoilerplateRules,
}

fn required<T>(value: Option<T>, path: &str) -> Result<T> {
    value.ok_or_else(|| GleanerError::Config(format!("missing required setting: {path}")))
}

fn check(ok: bool, message: &str) -> Result<()> {
    if ok { Ok(()) } else { Err(GleanerError::Config(message.to_string())) }
}

impl GleanerConfig {
    /// Parses and validates TOML text.
    ///
    /// # Errors
    ///
    /// [`GleanerError::Config`] for malformed TOML, unknown keys, a missing
    /// required setting or an out-of-range value.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let raw: RawConfig = toml::from_str(text).map_err(|e| GleanerError::Config(e.to_string()))?;
        Self::validate(raw)
    }

    /// Reads the config file at `path`, else `$GLEANER_CONFIG`, else `gleaner.toml`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = resolve_path(path);
        let text = std::fs::read_to_string(&path)
            .map_err(|e| GleanerError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    fn validate(raw: RawConfig) -> Result<Self> {
        let min_text_length = required(raw.extraction.min_text_length, "extraction.min_text_length")?;
        let cooldown_secs = required(raw.preferences.cooldown_secs, "preferences.cooldown_secs")?;
        let drift_floor = required(raw.preferences.drift_floor, "preferences.drift_floor")?;
        let min_attempts = required(raw.preferences.min_attempts, "preferences.min_attempts")?;
        let promote_margin = raw.preferences.promote_margin.unwrap_or(0.0);
        let concurrency = raw.run.concurrency.unwrap_or(8);
        let max_retries = raw.fetch.max_retries.unwrap_or(3);

        check(min_text_length >= 1, "extraction.min_text_length must be at least 1")?;
        check((0.0..=1.0).contains(&drift_floor), "preferences.drift_floor must be within [0, 1]")?;
        check(min_attempts >= 1, "preferences.min_attempts must be at least 1")?;
        check((0.0..=1.0).contains(&promote_margin), "preferences.promote_margin must be within [0, 1]")?;
        check(concurrency >= 1, "run.concurrency must be at least 1")?;
        check(max_retries >= 1, "fetch.max_retries must be at least 1")?;

        // Drift needs `min_attempts` trailing outcomes, so the window must hold that many.
        let min_window = usize::try_from(min_attempts).unwrap_or(usize::MAX);
        let drift_window = raw.preferences.drift_window.unwrap_or(DEFAULT_DRIFT_WINDOW.max(min_window));
        check(drift_window >= min_window, "preferences.drift_window must be at least preferences.min_attempts")?;

        Ok(Self {
            extraction: ExtractionSettings { min_text_length, min_word_count: raw.extraction.min_word_count },
            preferences: PreferenceSettings {
                cooldown: Duration::from_secs(cooldown_secs),
                drift_floor,
                min_attempts,
                promote_margin,
                drift_window,
            },
            duration_window: raw.stats.duration_window.unwrap_or(25).max(1),
            fetch: FetchSettings {
                cache_enabled: raw.fetch.cache_enabled.unwrap_or(true),
                max_retries,
                timeout: Duration::from_secs(raw.fetch.timeout_secs.unwrap_or(20)),
                backoff_base: Duration::from_millis(raw.fetch.backoff_base_ms.unwrap_or(1000)),
                backoff_max: Duration::from_millis(raw.fetch.backoff_max_ms.unwrap_or(8000)),
                max_redirects: raw.fetch.max_redirects.unwrap_or(10),
                user_agents: raw.fetch.user_agents,
            },
            run: RunSettings { concurrency, deadline: raw.run.deadline_secs.map(Duration::from_secs) },
            storage: StorageSettings {
                database_url: raw.storage.database_url.filter(|url| !url.trim().is_empty()),
                documents_dir: raw.storage.documents_dir.unwrap_or_else(|| PathBuf::from("cache")),
            },
            boilerplate: raw.boilerplate,
        })
    }

    pub fn accept_policy(&self) -> AcceptPolicy {
        AcceptPolicy::new(self.extraction.min_text_length).with_min_word_count(self.extraction.min_word_count)
    }

    pub fn prefs_policy(&self) -> PrefsPolicy {
        let cooldown = time::Duration::try_from(self.preferences.cooldown).unwrap_or(time::Duration::MAX);
        PrefsPolicy::new(self.preferences.min_attempts, cooldown, self.preferences.drift_floor)
            .with_promote_margin(self.preferences.promote_margin)
    }

    pub fn stats_windows(&self) -> StatsWindows {
        StatsWindows { duration_window: self.duration_window, outcome_window: self.preferences.drift_window }
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(self.fetch.backoff_base, self.fetch.backoff_max)
    }

    /// Fetch options for a named fetcher, with its configured User-Agent.
    pub fn fetch_options(&self, fetcher_name: &str) -> FetchOptions {
        FetchOptions {
            use_cache: self.fetch.cache_enabled,
            force_refresh: false,
            max_retries: self.fetch.max_retries,
            timeout: self.fetch.timeout,
            user_agent: self.fetch.user_agents.get(fetcher_name).cloned().unwrap_or_else(default_user_agent),
        }
    }

    /// Wires the default method set, the HTTP fetcher, orchestrator and selector over the given stores.
    pub fn build_pipeline(
        &self, store: Arc<dyn Store>, documents: Arc<dyn DocumentStore>, transport: Arc<dyn Transport>,
    ) -> Pipeline {
        let registry = MethodRegistry::with_defaults();

        let mut fetcher = Fetcher::new(HTTP_FETCHER, transport).with_backoff(self.backoff());
        if self.fetch.cache_enabled {
            fetcher = fetcher.with_cache(documents.clone());
        }

        let orchestrator = Orchestrator::new(store.clone(), self.accept_policy(), self.stats_windows())
            .with_documents(documents)
            .with_boilerplate(self.boilerplate.clone());
        let known_methods = registry.names().into_iter().map(str::to_string).collect();
        let selector = PreferenceSelector::new(store.clone(), self.prefs_policy(), known_methods);

        Pipeline::new(store, fetcher, registry, orchestrator, selector)
            .with_fetch_options(self.fetch_options(HTTP_FETCHER))
            .with_concurrency(self.run.concurrency)
    }
}

fn resolve_path(path: Option<&Path>) -> PathBuf {
    match path {
        Some(path) => path.to_path_buf(),
        None => std::env::var_os(CONFIG_ENV).map(PathBuf::from).unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE)),
    }
}
