//! Cohort profile aggregation over the baseline ⋈ assignment join.

use spendbase_core::{
    baseline::ClientBaselineProfile, cohort::aggregate_cohorts, segment::CohortAssignment,
};

fn profile(client: &str, mean: f64, age: f64) -> ClientBaselineProfile {
    ClientBaselineProfile {
        client_id: client.into(),
        mean_turnover: mean,
        median_turnover: mean,
        std_turnover: 0.0,
        dispersion_ratio: 0.2,
        band_lower: mean * 0.8,
        band_upper: mean * 1.2,
        concentration: 0.5,
        activity_count: 10,
        age,
        region: None,
    }
}

fn assign(client: &str, cohort_id: usize) -> CohortAssignment {
    CohortAssignment {
        client_id: client.into(),
        cohort_id,
    }
}

#[test]
fn aggregates_means_and_counts_per_cohort() {
    let baselines = vec![
        profile("a", 100.0, 20.0),
        profile("b", 300.0, 40.0),
        profile("c", 1000.0, 60.0),
    ];
    let assignments = vec![assign("a", 0), assign("b", 0), assign("c", 1)];

    let profiles = aggregate_cohorts(&baselines, &assignments);
    assert_eq!(profiles.len(), 2);

    let c0 = &profiles[0];
    assert_eq!(c0.cohort_id, 0);
    assert_eq!(c0.member_count, 2);
    assert!((c0.mean_turnover - 200.0).abs() < 1e-9);
    assert!((c0.median_turnover - 200.0).abs() < 1e-9);
    assert!((c0.mean_age - 30.0).abs() < 1e-9);

    let c1 = &profiles[1];
    assert_eq!(c1.member_count, 1);
    assert_eq!(c1.std_turnover, 0.0);
}

/// Clients dropped before clustering simply have no assignment; a
/// cohort that ends up with no members must not appear at all.
#[test]
fn unassigned_clients_produce_no_empty_cohorts() {
    let baselines = vec![profile("a", 100.0, 20.0), profile("dropped", 300.0, 40.0)];
    let assignments = vec![assign("a", 0)];

    let profiles = aggregate_cohorts(&baselines, &assignments);
    assert_eq!(profiles.len(), 1);
    assert_eq!(profiles[0].member_count, 1);
}

#[test]
fn output_is_ordered_by_cohort_id() {
    let baselines = vec![
        profile("a", 1.0, 1.0),
        profile("b", 2.0, 2.0),
        profile("c", 3.0, 3.0),
    ];
    let assignments = vec![assign("c", 2), assign("a", 0), assign("b", 1)];
    let profiles = aggregate_cohorts(&baselines, &assignments);
    let ids: Vec<usize> = profiles.iter().map(|p| p.cohort_id).collect();
    assert_eq!(ids, vec![0, 1, 2]);
}
