//! Cashback and activation metrics — per-client program engagement.
//!
//! Supplemental table alongside the three contract tables: monthly
//! turnover/cashback, cashback rate, category activation ratio, spend
//! Herfindahl index, unrealized ("potential") cashback locked in
//! eligible-but-not-activated categories, and a premium flag.
//!
//! Activation flags may differ across periods; the latest row's flags
//! are taken as the client's current activation state.

use crate::{
    config::MetricsConfig,
    extract::{group_by_client, ActivationFlag, RawRecord},
    stats,
    types::ClientId,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CashbackMetrics {
    pub client_id: ClientId,
    pub monthly_turnover: f64,
    pub monthly_cashback: f64,
    /// cashback / (turnover + 1) per month.
    pub cashback_rate: f64,
    pub activated_categories: u64,
    pub available_categories: u64,
    /// activated / (available + 1).
    pub activation_ratio: f64,
    pub cashback_per_category: f64,
    /// Sum of squared per-category spend shares, in [0, 1].
    pub herfindahl_index: f64,
    /// Estimated monthly cashback left in eligible-not-activated
    /// categories.
    pub potential_cashback: f64,
    /// Monthly cashback above median + std across all clients.
    pub premium: bool,
}

pub fn compute_cashback_metrics(
    config: &MetricsConfig,
    records: &[RawRecord],
) -> Vec<CashbackMetrics> {
    let mut metrics: Vec<CashbackMetrics> = group_by_client(records)
        .into_iter()
        .map(|(client_id, rows)| metrics_for_client(config, client_id, &rows))
        .collect();

    // Premium status is relative to the whole book, so it is only
    // decidable after every client's monthly cashback is known.
    let cashbacks: Vec<f64> = metrics.iter().map(|m| m.monthly_cashback).collect();
    let threshold = stats::median(&cashbacks) + stats::std_dev(&cashbacks);
    for m in &mut metrics {
        m.premium = m.monthly_cashback > threshold;
    }

    log::info!(
        "cashback metrics for {} clients ({} premium)",
        metrics.len(),
        metrics.iter().filter(|m| m.premium).count()
    );

    metrics
}

fn metrics_for_client(
    config: &MetricsConfig,
    client_id: ClientId,
    rows: &[&RawRecord],
) -> CashbackMetrics {
    let periods = rows.len() as f64;

    let total_turnover: f64 = rows
        .iter()
        .flat_map(|r| r.turnover.iter())
        .filter(|v| **v > 0.0)
        .sum();
    let total_cashback: f64 = rows
        .iter()
        .flat_map(|r| r.cashback.iter())
        .filter(|v| **v > 0.0)
        .sum();

    let monthly_turnover = stats::guarded_div(total_turnover, periods);
    let monthly_cashback = stats::guarded_div(total_cashback, periods);
    let cashback_rate = monthly_cashback / (monthly_turnover + 1.0);

    let latest = rows[rows.len() - 1];
    let activated = latest
        .activation
        .iter()
        .filter(|f| **f == ActivationFlag::Activated)
        .count() as u64;
    let available = latest
        .activation
        .iter()
        .filter(|f| **f != ActivationFlag::NotEligible)
        .count() as u64;
    let activation_ratio = activated as f64 / (available as f64 + 1.0);
    let cashback_per_category = monthly_cashback / (activated as f64 + 1.0);

    // Per-category totals across all periods, for concentration-style
    // measures and the unrealized-cashback estimate.
    let category_count = latest.turnover.len();
    let mut category_totals = vec![0.0f64; category_count];
    for row in rows {
        for (i, v) in row.turnover.iter().enumerate().take(category_count) {
            if *v > 0.0 {
                category_totals[i] += v;
            }
        }
    }

    let herfindahl_index = if total_turnover > 0.0 {
        category_totals
            .iter()
            .map(|t| {
                let share = t / total_turnover;
                share * share
            })
            .sum()
    } else {
        0.0
    };

    let eligible_spend: f64 = category_totals
        .iter()
        .zip(latest.activation.iter())
        .filter(|(_, flag)| **flag == ActivationFlag::Eligible)
        .map(|(total, _)| *total)
        .sum();
    let potential_cashback =
        stats::guarded_div(eligible_spend * config.unrealized_cashback_rate, periods);

    CashbackMetrics {
        client_id,
        monthly_turnover,
        monthly_cashback,
        cashback_rate,
        activated_categories: activated,
        available_categories: available,
        activation_ratio,
        cashback_per_category,
        herfindahl_index,
        potential_cashback,
        premium: false, // decided once the whole book is known
    }
}
