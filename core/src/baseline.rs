//! Baseline statistics — each client's personal "normal range".
//!
//! For every client we pool all positive per-category turnover values
//! across all reporting periods and summarize them: central tendency,
//! a non-parametric percentile band, a scale-normalized dispersion
//! ratio, top-3 spending concentration, and an activity count.
//!
//! Clients with no positive observation are dropped, not errored:
//! they simply have no baseline to compare against.

use crate::{
    config::BaselineConfig,
    error::{PipelineError, PipelineResult},
    extract::{group_by_client, RawRecord},
    stats,
    types::ClientId,
};
use serde::{Deserialize, Serialize};

/// How many top categories the concentration measure sums over.
const CONCENTRATION_TOP_N: usize = 3;

/// One row of the baseline table. Created once per run, never updated;
/// the next run supersedes it wholesale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientBaselineProfile {
    pub client_id: ClientId,
    pub mean_turnover: f64,
    pub median_turnover: f64,
    pub std_turnover: f64,
    /// (high pct − low pct) of positive turnovers, divided by the median.
    pub dispersion_ratio: f64,
    pub band_lower: f64,
    pub band_upper: f64,
    /// Share of total spend held by the top 3 categories, in [0, 1].
    pub concentration: f64,
    /// Number of positive category-period entries.
    pub activity_count: u64,
    pub age: f64,
    pub region: Option<String>,
}

/// Compute baseline profiles for every client with at least one positive
/// turnover observation. Fails only if no client qualifies.
pub fn compute_baselines(
    config: &BaselineConfig,
    records: &[RawRecord],
) -> PipelineResult<Vec<ClientBaselineProfile>> {
    let mut profiles = Vec::new();

    for (client_id, rows) in group_by_client(records) {
        if let Some(profile) = baseline_for_client(config, client_id, &rows) {
            profiles.push(profile);
        }
    }

    if profiles.is_empty() {
        return Err(PipelineError::EmptyStage { stage: "baseline" });
    }

    log::info!(
        "baseline computed for {} clients (band {}/{} pct, dispersion {}/{} pct)",
        profiles.len(),
        config.band_pct_low,
        config.band_pct_high,
        config.dispersion_pct_low,
        config.dispersion_pct_high
    );

    Ok(profiles)
}

fn baseline_for_client(
    config: &BaselineConfig,
    client_id: ClientId,
    rows: &[&RawRecord],
) -> Option<ClientBaselineProfile> {
    // Pool positive observations across every category and period.
    let observations: Vec<f64> = rows
        .iter()
        .flat_map(|r| r.positive_turnovers())
        .collect();

    if observations.is_empty() {
        log::debug!("client {client_id} has no positive turnover, dropped from baseline");
        return None;
    }

    let mean = stats::mean(&observations);
    let median = stats::median(&observations);
    let std = stats::std_dev(&observations);

    let band_lower = stats::percentile(&observations, config.band_pct_low);
    let band_upper = stats::percentile(&observations, config.band_pct_high);

    let range = stats::percentile(&observations, config.dispersion_pct_high)
        - stats::percentile(&observations, config.dispersion_pct_low);
    let dispersion_ratio = stats::guarded_div(range, median);

    // Concentration looks at all positive spend cells, same pool as the
    // observations: with 3 or fewer nonzero categories it is exactly 1.
    let total_spend: f64 = observations.iter().sum();
    let concentration = stats::guarded_div(
        stats::top_n_sum(&observations, CONCENTRATION_TOP_N),
        total_spend,
    );

    let activity_count = observations.len() as u64;

    let first = rows[0];
    Some(ClientBaselineProfile {
        client_id,
        mean_turnover: mean,
        median_turnover: median,
        std_turnover: std,
        dispersion_ratio,
        band_lower,
        band_upper,
        concentration,
        activity_count,
        age: first.demographics.age,
        region: first.demographics.region.clone(),
    })
}
