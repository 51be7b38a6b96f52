//! Method preference selection: ranking, cooldown-gated promotion and drift detection.
//!
//! [`select_method_prefs`] is a pure function over a snapshot of statistics and
//! the current preferences row. [`PreferenceSelector`] wraps it with storage and
//! a per-domain lock so recomputation for one domain never runs concurrently
//! with itself.
//!
//! # Example
//!
//! ```rust
//! use gleaner_core::prefs::{PrefsPolicy, select_method_prefs};
//! use gleaner_core::stats::{DomainMethodStats, MethodObservation, StatsWindows};
//! use time::OffsetDateTime;
//!
//! let now = OffsetDateTime::now_utc();
//! let mut stats = DomainMethodStats::new("news.example", "structured", now);
//! for _ in 0..5 {
//!     let observation = MethodObservation { accepted: true, duration_ms: 40, observed_at: now };
//!     stats.apply(&observation, StatsWindows::default());
//! }
//!
//! let policy = PrefsPolicy::new(3, time::Duration::hours(24), 0.4);
//! let known = vec!["structured".to_string(), "readability".to_string()];
//! let prefs = select_method_prefs("news.example", &[stats], None, &known, &policy, now).unwrap();
//! assert_eq!(prefs.primary_method, "structured");
//! ```

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};
use tracing::{debug, info, warn};

use crate::Result;
use crate::stats::DomainMethodStats;
use crate::store::Store;

/// Learned method ordering for one domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainMethodPrefs {
    pub domain: String,
    pub primary_method: String,
    /// Next-ranked methods; never contains `primary_method`.
    pub fallback_methods: Vec<String>,
    pub confidence: f64,
    #[serde(with = "time::serde::rfc3339")]
    pub last_changed_at: OffsetDateTime,
    /// No primary change is applied before this instant.
    #[serde(with = "time::serde::rfc3339")]
    pub locked_until: OffsetDateTime,
    pub drift_flag: bool,
    pub drift_notes: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Thresholds driving selection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrefsPolicy {
    /// Attempts a method needs before it may become primary.
    pub min_attempts: u64,
    /// Minimum time between primary changes.
    pub cooldown: time::Duration,
    /// Trailing success rate below which the primary is flagged as drifting.
    pub drift_floor: f64,
    /// Success-rate lead a challenger needs over an eligible primary.
    pub promote_margin: f64,
}

impl PrefsPolicy {
    pub fn new(min_attempts: u64, cooldown: time::Duration, drift_floor: f64) -> Self {
        Self { min_attempts: min_attempts.max(1), cooldown, drift_floor, promote_margin: 0.0 }
    }

    pub fn with_promote_margin(mut self, promote_margin: f64) -> Self {
        self.promote_margin = promote_margin;
        self
    }

    fn is_eligible(&self, stats: &DomainMethodStats) -> bool {
        stats.attempts >= self.min_attempts
    }

    fn confidence(&self, stats: Option<&DomainMethodStats>) -> f64 {
        stats.map_or(0.0, |s| {
            let attempts = s.attempts as f64;
            s.success_rate() * attempts / (attempts + self.min_attempts as f64)
        })
    }
}

/// Success rate descending, then lower median duration, then registration order.
fn compare_ranked(a: &(usize, &DomainMethodStats), b: &(usize, &DomainMethodStats)) -> Ordering {
    b.1.success_rate()
        .partial_cmp(&a.1.success_rate())
        .unwrap_or(Ordering::Equal)
        .then_with(|| {
            let a_median = a.1.median_duration_ms.unwrap_or(u64::MAX);
            let b_median = b.1.median_duration_ms.unwrap_or(u64::MAX);
            a_median.cmp(&b_median)
        })
        .then_with(|| a.0.cmp(&b.0))
}

/// Known methods with statistics, eligible ones first; each group ordered by [`compare_ranked`].
fn rank<'a>(stats: &'a [DomainMethodStats], known_methods: &[String], policy: &PrefsPolicy) -> Ranking<'a> {
    let mut eligible = Vec::new();
    let mut sparse = Vec::new();

    for s in stats {
        let Some(index) = known_methods.iter().position(|m| *m == s.method) else {
            continue;
        };
        if policy.is_eligible(s) { eligible.push((index, s)) } else { sparse.push((index, s)) }
    }

    eligible.sort_by(compare_ranked);
    sparse.sort_by(compare_ranked);
    Ranking {
        eligible: eligible.into_iter().map(|(_, s)| s).collect(),
        sparse: sparse.into_iter().map(|(_, s)| s).collect(),
    }
}

struct Ranking<'a> {
    eligible: Vec<&'a DomainMethodStats>,
    sparse: Vec<&'a DomainMethodStats>,
}

impl Ranking<'_> {
    fn ordered(&self) -> impl Iterator<Item = &DomainMethodStats> {
        self.eligible.iter().chain(self.sparse.iter()).copied()
    }
}

/// Recomputes preferences for a domain from a statistics snapshot.
///
/// Returns `None` when there is no eligible method and no registered primary
/// to keep: on cold start, or when the stored primary is no longer
/// registered. Callers then fall back to registration order.
pub fn select_method_prefs(
    domain: &str, stats: &[DomainMethodStats], stored: Option<&DomainMethodPrefs>, known_methods: &[String],
    policy: &PrefsPolicy, now: OffsetDateTime,
) -> Option<DomainMethodPrefs> {
    let ranking = rank(stats, known_methods, policy);
    let top = ranking.eligible.first().map(|s| s.method.as_str());

    let current = stored.filter(|c| known_methods.contains(&c.primary_method));
    if let Some(stale) = stored.filter(|_| current.is_none()) {
        warn!(domain, primary = %stale.primary_method, "Stored primary method is no longer registered");
    }

    let rate_of = |method: &str| stats.iter().find(|s| s.method == method).map_or(0.0, |s| s.success_rate());

    let (primary, last_changed_at, locked_until) = match (current, top) {
        // Cold start, or a stale row with nothing eligible to replace its primary.
        (None, None) => return None,
        (None, Some(top)) => (top.to_string(), now, cooldown_end(now, policy.cooldown)),
        (Some(current), None) => (current.primary_method.clone(), current.last_changed_at, current.locked_until),
        (Some(current), Some(top)) if current.primary_method == top => {
            (current.primary_method.clone(), current.last_changed_at, current.locked_until)
        }
        (Some(current), Some(top)) => {
            let current_eligible = stats.iter().any(|s| s.method == current.primary_method && policy.is_eligible(s));
            let lead = rate_of(top) - rate_of(&current.primary_method);

            if now < current.locked_until {
                debug!(domain, current = %current.primary_method, challenger = top, "Primary change held by cooldown");
                (current.primary_method.clone(), current.last_changed_at, current.locked_until)
            } else if current_eligible && lead < policy.promote_margin {
                debug!(domain, current = %current.primary_method, challenger = top, lead, "Challenger below promote margin");
                (current.primary_method.clone(), current.last_changed_at, current.locked_until)
            } else {
                info!(domain, from = %current.primary_method, to = top, "Primary method changed");
                (top.to_string(), now, cooldown_end(now, policy.cooldown))
            }
        }
    };

    let fallback_methods = ranking.ordered().map(|s| s.method.clone()).filter(|m| *m != primary).collect();

    let primary_stats = stats.iter().find(|s| s.method == primary);
    let previous = current.filter(|c| c.primary_method == primary);
    let (drift_flag, drift_notes) = detect_drift(primary_stats, policy, previous);
    if drift_flag {
        warn!(domain, primary = %primary, notes = drift_notes.as_deref().unwrap_or_default(), "Primary method drifting");
    }

    Some(DomainMethodPrefs {
        domain: domain.to_string(),
        confidence: policy.confidence(primary_stats),
        primary_method: primary,
        fallback_methods,
        last_changed_at,
        locked_until,
        drift_flag,
        drift_notes,
        updated_at: now,
    })
}

/// End of a cooldown starting at `now`, saturating at the latest representable instant.
fn cooldown_end(now: OffsetDateTime, cooldown: time::Duration) -> OffsetDateTime {
    now.checked_add(cooldown).unwrap_or_else(|| Date::MAX.midnight().assume_utc())
}

/// Drift state for the primary from its trailing success rate.
///
/// Needs at least `min_attempts` recent outcomes to decide; with fewer the
/// previous state for the same primary is carried over.
fn detect_drift(
    primary_stats: Option<&DomainMethodStats>, policy: &PrefsPolicy, previous: Option<&DomainMethodPrefs>,
) -> (bool, Option<String>) {
    let carried = || previous.map_or((false, None), |p| (p.drift_flag, p.drift_notes.clone()));

    let Some(stats) = primary_stats else {
        return carried();
    };
    if (stats.recent_outcomes.len() as u64) < policy.min_attempts {
        return carried();
    }
    let Some(trailing) = stats.trailing_success_rate() else {
        return carried();
    };

    if trailing < policy.drift_floor {
        let notes = format!(
            "trailing success rate {trailing:.2} over last {} attempts below floor {:.2} (all-time {:.2})",
            stats.recent_outcomes.len(),
            policy.drift_floor,
            stats.success_rate()
        );
        (true, Some(notes))
    } else {
        (false, None)
    }
}

/// Storage-backed selector with a per-domain recomputation lock.
pub struct PreferenceSelector {
    store: Arc<dyn Store>,
    policy: PrefsPolicy,
    known_methods: Vec<String>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl PreferenceSelector {
    pub fn new(store: Arc<dyn Store>, policy: PrefsPolicy, known_methods: Vec<String>) -> Self {
        Self { store, policy, known_methods, locks: Mutex::new(HashMap::new()) }
    }

    pub fn policy(&self) -> &PrefsPolicy {
        &self.policy
    }

    fn domain_lock(&self, domain: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(domain.to_string()).or_default().clone()
    }

    /// Recomputes and persists preferences for one domain.
    pub async fn select_method_prefs(&self, domain: &str) -> Result<Option<DomainMethodPrefs>> {
        let lock = self.domain_lock(domain);
        let _guard = lock.lock().await;

        let stats = self.store.method_stats(domain).await?;
        let current = self.store.get_prefs(domain).await?;
        let now = OffsetDateTime::now_utc();

        let Some(prefs) = select_method_prefs(domain, &stats, current.as_ref(), &self.known_methods, &self.policy, now)
        else {
            if current.is_some() {
                self.store.delete_prefs(domain).await?;
                info!(domain, "Dropped preferences with an unregistered primary; back to registration order");
            } else {
                debug!(domain, "No eligible method yet; keeping registration order");
            }
            return Ok(None);
        };

        self.store.upsert_prefs(&prefs).await?;
        debug!(
            domain,
            primary = %prefs.primary_method,
            fallbacks = ?prefs.fallback_methods,
            confidence = prefs.confidence,
            drift = prefs.drift_flag,
            "Preferences updated"
        );
        Ok(Some(prefs))
    }

    /// Recomputes preferences for every given domain.
    pub async fn refresh<I>(&self, domains: I) -> Result<Vec<DomainMethodPrefs>>
    where
        I: IntoIterator<Item = String>,
    {
        let mut updated = Vec::new();
        for domain in domains {
            if let Some(prefs) = self.select_method_prefs(&domain).await? {
                updated.push(prefs);
            }
        }
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::{MethodObservation, StatsWindows};
    use crate::store::MemoryStore;
    use time::Duration;

    fn known() -> Vec<String> {
        ["structured", "readability", "markup_heuristic", "advanced"].iter().map(|s| s.to_string()).collect()
    }

    fn policy() -> PrefsPolicy {
        PrefsPolicy::new(3, Duration::hours(24), 0.4)
    }

    /// Builds stats by replaying outcomes in order.
    fn stats_from(method: &str, outcomes: &[bool], duration_ms: u64) -> DomainMethodStats {
        let now = OffsetDateTime::now_utc();
        let mut stats = DomainMethodStats::new("news.example", method, now);
        let windows = StatsWindows { duration_window: 25, outcome_window: 5 };
        for &accepted in outcomes {
            stats.apply(&MethodObservation { accepted, duration_ms, observed_at: now }, windows);
        }
        stats
    }

    fn rate(method: &str, attempts: usize, successes: usize, duration_ms: u64) -> DomainMethodStats {
        let outcomes: Vec<bool> = (0..attempts).map(|i| i < successes).collect();
        stats_from(method, &outcomes, duration_ms)
    }

    #[test]
    fn test_ranks_by_success_rate_over_speed() {
        let stats = vec![rate("readability", 10, 5, 100), rate("structured", 10, 9, 200)];
        let prefs = select_method_prefs("news.example", &stats, None, &known(), &policy(), OffsetDateTime::now_utc())
            .unwrap();

        assert_eq!(prefs.primary_method, "structured");
        assert_eq!(prefs.fallback_methods, vec!["readability".to_string()]);
    }

    #[test]
    fn test_tie_broken_by_median_duration() {
        let stats = vec![rate("structured", 10, 8, 300), rate("readability", 10, 8, 50)];
        let prefs = select_method_prefs("news.example", &stats, None, &known(), &policy(), OffsetDateTime::now_utc())
            .unwrap();
        assert_eq!(prefs.primary_method, "readability");
    }

    #[test]
    fn test_sparse_methods_never_primary() {
        let stats = vec![rate("structured", 2, 2, 10), rate("readability", 5, 2, 100)];
        let prefs = select_method_prefs("news.example", &stats, None, &known(), &policy(), OffsetDateTime::now_utc())
            .unwrap();

        assert_eq!(prefs.primary_method, "readability");
        assert_eq!(prefs.fallback_methods, vec!["structured".to_string()]);
    }

    #[test]
    fn test_cold_start_writes_nothing() {
        let stats = vec![rate("structured", 2, 2, 10)];
        let now = OffsetDateTime::now_utc();
        assert!(select_method_prefs("news.example", &stats, None, &known(), &policy(), now).is_none());
        assert!(select_method_prefs("news.example", &[], None, &known(), &policy(), now).is_none());
    }

    #[test]
    fn test_cooldown_blocks_change_but_updates_fallbacks() {
        let t0 = OffsetDateTime::now_utc();
        let first = vec![rate("structured", 10, 9, 100), rate("readability", 10, 5, 100)];
        let prefs = select_method_prefs("news.example", &first, None, &known(), &policy(), t0).unwrap();
        assert_eq!(prefs.locked_until, t0 + Duration::hours(24));

        let flipped = vec![
            rate("structured", 10, 2, 100),
            rate("readability", 10, 10, 100),
            rate("markup_heuristic", 10, 6, 100),
        ];
        let held = select_method_prefs("news.example", &flipped, Some(&prefs), &known(), &policy(), t0 + Duration::hours(23))
            .unwrap();
        assert_eq!(held.primary_method, "structured");
        assert_eq!(held.last_changed_at, t0);
        assert_eq!(held.fallback_methods, vec!["readability".to_string(), "markup_heuristic".to_string()]);

        let changed = select_method_prefs("news.example", &flipped, Some(&held), &known(), &policy(), t0 + Duration::hours(24))
            .unwrap();
        assert_eq!(changed.primary_method, "readability");
        assert_eq!(changed.last_changed_at, t0 + Duration::hours(24));
        assert_eq!(changed.locked_until, t0 + Duration::hours(48));
        assert!(!changed.fallback_methods.contains(&changed.primary_method));
    }

    #[test]
    fn test_promote_margin() {
        let t0 = OffsetDateTime::now_utc();
        let policy = policy().with_promote_margin(0.15);
        let current = select_method_prefs("news.example", &[rate("structured", 10, 8, 100)], None, &known(), &policy, t0)
            .unwrap();

        let later = t0 + Duration::days(2);
        let close = vec![rate("structured", 10, 8, 100), rate("readability", 10, 9, 100)];
        let kept = select_method_prefs("news.example", &close, Some(&current), &known(), &policy, later).unwrap();
        assert_eq!(kept.primary_method, "structured");

        let clear = vec![rate("structured", 10, 7, 100), rate("readability", 10, 9, 100)];
        let changed = select_method_prefs("news.example", &clear, Some(&current), &known(), &policy, later).unwrap();
        assert_eq!(changed.primary_method, "readability");
    }

    fn stale_prefs(t0: OffsetDateTime) -> DomainMethodPrefs {
        DomainMethodPrefs {
            domain: "news.example".into(),
            primary_method: "retired".into(),
            fallback_methods: vec![],
            confidence: 0.9,
            last_changed_at: t0,
            locked_until: t0 + Duration::days(30),
            drift_flag: false,
            drift_notes: None,
            updated_at: t0,
        }
    }

    #[test]
    fn test_unknown_primary_replaced_despite_cooldown() {
        let t0 = OffsetDateTime::now_utc();
        let stale = stale_prefs(t0);

        let stats = vec![rate("readability", 10, 9, 100)];
        let prefs = select_method_prefs("news.example", &stats, Some(&stale), &known(), &policy(), t0).unwrap();
        assert_eq!(prefs.primary_method, "readability");

        assert_eq!(prefs.locked_until, t0 + Duration::hours(24));
    }

    #[test]
    fn test_unknown_primary_without_eligible_method_is_cold_start() {
        let t0 = OffsetDateTime::now_utc();
        let stale = stale_prefs(t0);

        let sparse = vec![rate("readability", 1, 1, 100), rate("structured", 2, 2, 50)];
        assert!(select_method_prefs("news.example", &sparse, Some(&stale), &known(), &policy(), t0).is_none());

        // The first real primary still starts a full cooldown.
        let later = t0 + Duration::seconds(1);
        let eligible = vec![rate("readability", 1, 1, 100), rate("structured", 3, 3, 50)];
        let prefs = select_method_prefs("news.example", &eligible, None, &known(), &policy(), later).unwrap();
        assert_eq!(prefs.primary_method, "structured");
        assert_eq!(prefs.locked_until, later + Duration::hours(24));
    }

    #[tokio::test]
    async fn test_selector_drops_row_with_unregistered_primary() {
        let store = Arc::new(MemoryStore::new());
        store.upsert_prefs(&stale_prefs(OffsetDateTime::now_utc())).await.unwrap();
        let observation = MethodObservation { accepted: true, duration_ms: 50, observed_at: OffsetDateTime::now_utc() };
        store.record_method_attempt("news.example", "readability", &observation, StatsWindows::default()).await.unwrap();

        let selector = PreferenceSelector::new(store.clone(), policy(), known());
        assert!(selector.select_method_prefs("news.example").await.unwrap().is_none());
        assert!(store.get_prefs("news.example").await.unwrap().is_none());
    }

    #[test]
    fn test_huge_cooldown_saturates() {
        let now = OffsetDateTime::now_utc();
        let policy = PrefsPolicy::new(3, Duration::MAX, 0.4);
        let prefs = select_method_prefs("news.example", &[rate("structured", 5, 5, 10)], None, &known(), &policy, now)
            .unwrap();

        assert_eq!(prefs.primary_method, "structured");
        assert!(prefs.locked_until > now + Duration::days(365 * 1000));
        assert_eq!(cooldown_end(now, Duration::hours(1)), now + Duration::hours(1));
    }

    #[test]
    fn test_drift_flag_on_recent_regression() {
        // All-time 20/25 but the last five attempts all failed.
        let mut outcomes = vec![true; 20];
        outcomes.extend([false; 5]);
        let stats = vec![stats_from("structured", &outcomes, 100)];

        let prefs = select_method_prefs("news.example", &stats, None, &known(), &policy(), OffsetDateTime::now_utc())
            .unwrap();
        assert_eq!(prefs.primary_method, "structured");
        assert!(stats[0].success_rate() >= 0.8);
        assert!(prefs.drift_flag);
        assert!(prefs.drift_notes.as_deref().unwrap().contains("floor 0.40"));
    }

    #[test]
    fn test_drift_clears_on_recovery() {
        let mut outcomes = vec![true; 20];
        outcomes.extend([false; 5]);
        let drifting = vec![stats_from("structured", &outcomes, 100)];
        let now = OffsetDateTime::now_utc();
        let flagged = select_method_prefs("news.example", &drifting, None, &known(), &policy(), now).unwrap();
        assert!(flagged.drift_flag);

        outcomes.extend([true; 5]);
        let recovered = vec![stats_from("structured", &outcomes, 100)];
        let cleared = select_method_prefs("news.example", &recovered, Some(&flagged), &known(), &policy(), now).unwrap();
        assert!(!cleared.drift_flag);
        assert!(cleared.drift_notes.is_none());
    }

    #[test]
    fn test_confidence_grows_with_attempts() {
        let now = OffsetDateTime::now_utc();
        let few = select_method_prefs("d", &[rate("structured", 3, 3, 10)], None, &known(), &policy(), now).unwrap();
        let many = select_method_prefs("d", &[rate("structured", 30, 30, 10)], None, &known(), &policy(), now).unwrap();
        assert!((few.confidence - 0.5).abs() < 1e-9);
        assert!(many.confidence > few.confidence);
        assert!(many.confidence < 1.0);
    }

    #[test]
    fn test_unregistered_stats_ignored() {
        let stats = vec![rate("legacy", 50, 50, 1), rate("readability", 10, 6, 100)];
        let prefs = select_method_prefs("news.example", &stats, None, &known(), &policy(), OffsetDateTime::now_utc())
            .unwrap();
        assert_eq!(prefs.primary_method, "readability");
        assert!(prefs.fallback_methods.is_empty());
    }

    #[tokio::test]
    async fn test_selector_persists_prefs() {
        let store = Arc::new(MemoryStore::new());
        let windows = StatsWindows::default();
        for i in 0..4 {
            let observation = MethodObservation { accepted: i > 0, duration_ms: 50, observed_at: OffsetDateTime::now_utc() };
            store.record_method_attempt("news.example", "readability", &observation, windows).await.unwrap();
        }

        let selector = PreferenceSelector::new(store.clone(), policy(), known());
        let updated = selector.refresh(vec!["news.example".to_string(), "quiet.example".to_string()]).await.unwrap();

        assert_eq!(updated.len(), 1);
        let stored = store.get_prefs("news.example").await.unwrap().unwrap();
        assert_eq!(stored.primary_method, "readability");
        assert!(store.get_prefs("quiet.example").await.unwrap().is_none());
    }
}
