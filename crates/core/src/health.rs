//! Method Health: read-only report of per-domain method success rates and drift.

use std::collections::HashMap;

use serde::Serialize;

use crate::Result;
use crate::prefs::DomainMethodPrefs;
use crate::stats::DomainMethodStats;
use crate::store::Store;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MethodHealthItem {
    pub domain: String,
    pub method: String,
    pub success_rate: f64,
    pub attempts: u64,
    pub drift_flag: bool,
}

/// Rows with at least `min_attempts` attempts, worst success rate first, at most `max_items`.
///
/// Equal rates keep their input order.
pub fn build_method_health<'a, I>(rows: I, max_items: usize, min_attempts: u64) -> Vec<MethodHealthItem>
where
    I: IntoIterator<Item = (&'a DomainMethodStats, bool)>,
{
    let mut items: Vec<MethodHealthItem> = rows
        .into_iter()
        .filter(|(stats, _)| stats.attempts >= min_attempts)
        .map(|(stats, drift_flag)| MethodHealthItem {
            domain: stats.domain.clone(),
            method: stats.method.clone(),
            success_rate: stats.success_rate(),
            attempts: stats.attempts,
            drift_flag,
        })
        .collect();

    items.sort_by(|a, b| a.success_rate.total_cmp(&b.success_rate));
    items.truncate(max_items);
    items
}

/// Pairs each stats row with its domain's drift flag.
///
/// Drift is a property of the domain's primary method, so only that row carries the flag.
pub fn health_rows<'a>(
    stats: &'a [DomainMethodStats], prefs: &[DomainMethodPrefs],
) -> Vec<(&'a DomainMethodStats, bool)> {
    let drifting: HashMap<&str, &str> = prefs
        .iter()
        .filter(|p| p.drift_flag)
        .map(|p| (p.domain.as_str(), p.primary_method.as_str()))
        .collect();

    stats
        .iter()
        .map(|row| (row, drifting.get(row.domain.as_str()).is_some_and(|primary| *primary == row.method)))
        .collect()
}

/// Builds the report from everything in the store.
pub async fn method_health(store: &dyn Store, max_items: usize, min_attempts: u64) -> Result<Vec<MethodHealthItem>> {
    let stats = store.all_method_stats().await?;
    let prefs = store.all_prefs().await?;
    Ok(build_method_health(health_rows(&stats, &prefs), max_items, min_attempts))
}
