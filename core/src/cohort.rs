//! Cohort profile aggregation — descriptive statistics per cohort.
//!
//! Joins the baseline table with the segmenter's assignments and
//! summarizes each realized cohort for cross-cohort comparison.
//! Cohorts left empty by row-dropping are omitted, not emitted as
//! zero rows.

use crate::{
    baseline::ClientBaselineProfile, segment::CohortAssignment, stats, types::CohortId,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CohortProfile {
    pub cohort_id: CohortId,
    pub member_count: u64,
    pub mean_turnover: f64,
    pub median_turnover: f64,
    pub std_turnover: f64,
    pub mean_dispersion_ratio: f64,
    pub mean_concentration: f64,
    pub mean_activity_count: f64,
    pub mean_age: f64,
}

pub fn aggregate_cohorts(
    baselines: &[ClientBaselineProfile],
    assignments: &[CohortAssignment],
) -> Vec<CohortProfile> {
    let by_client: HashMap<&str, &ClientBaselineProfile> = baselines
        .iter()
        .map(|p| (p.client_id.as_str(), p))
        .collect();

    // BTreeMap keeps the output ordered by cohort id.
    let mut members: BTreeMap<CohortId, Vec<&ClientBaselineProfile>> = BTreeMap::new();
    for assignment in assignments {
        if let Some(profile) = by_client.get(assignment.client_id.as_str()) {
            members.entry(assignment.cohort_id).or_default().push(profile);
        }
    }

    members
        .into_iter()
        .map(|(cohort_id, profiles)| {
            let turnovers: Vec<f64> = profiles.iter().map(|p| p.mean_turnover).collect();
            let field = |f: fn(&ClientBaselineProfile) -> f64| -> f64 {
                stats::mean(&profiles.iter().map(|p| f(p)).collect::<Vec<_>>())
            };
            CohortProfile {
                cohort_id,
                member_count: profiles.len() as u64,
                mean_turnover: stats::mean(&turnovers),
                median_turnover: stats::median(&turnovers),
                std_turnover: stats::std_dev(&turnovers),
                mean_dispersion_ratio: field(|p| p.dispersion_ratio),
                mean_concentration: field(|p| p.concentration),
                mean_activity_count: field(|p| p.activity_count as f64),
                mean_age: field(|p| p.age),
            }
        })
        .collect()
}
