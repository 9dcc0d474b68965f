//! Cohort segmentation: the hard cohort-count cap, determinism of both
//! backends, and label hygiene.

use spendbase_core::{
    baseline::ClientBaselineProfile,
    config::{ClusteringMethod, PipelineConfig},
    segment::segment_clients,
};

fn profile(client: &str, mean: f64, dispersion: f64, concentration: f64, activity: u64) -> ClientBaselineProfile {
    ClientBaselineProfile {
        client_id: client.into(),
        mean_turnover: mean,
        median_turnover: mean,
        std_turnover: mean * 0.1,
        dispersion_ratio: dispersion,
        band_lower: mean * 0.8,
        band_upper: mean * 1.2,
        concentration,
        activity_count: activity,
        age: 40.0,
        region: None,
    }
}

/// A spread of 30 clients across three broad behavioral bands.
fn varied_baselines() -> Vec<ClientBaselineProfile> {
    let mut baselines = Vec::new();
    for i in 0..30u64 {
        let tier = i % 3;
        let mean = match tier {
            0 => 100.0 + i as f64,
            1 => 2_000.0 + 10.0 * i as f64,
            _ => 50_000.0 + 100.0 * i as f64,
        };
        baselines.push(profile(
            &format!("c{i}"),
            mean,
            0.1 + 0.05 * tier as f64 + 0.001 * i as f64,
            0.3 + 0.2 * tier as f64,
            5 + i,
        ));
    }
    baselines
}

#[test]
fn cohort_count_never_exceeds_the_cap() {
    let mut config = PipelineConfig::default_test();
    config.segmentation.max_cohorts = 4;

    let outcome = segment_clients(&config.segmentation, &varied_baselines()).unwrap();
    assert!(outcome.cohort_count <= 4);
    assert!(outcome.assignments.iter().all(|a| a.cohort_id < 4));
    assert_eq!(outcome.assignments.len(), 30);
}

#[test]
fn fewer_clients_than_cap_yields_one_cohort_each() {
    let config = PipelineConfig::default_test(); // cap 8
    let baselines = vec![
        profile("a", 100.0, 0.1, 0.9, 5),
        profile("b", 5000.0, 0.5, 0.4, 20),
        profile("c", 90000.0, 1.5, 0.6, 50),
    ];
    let outcome = segment_clients(&config.segmentation, &baselines).unwrap();
    assert_eq!(outcome.cohort_count, 3);
}

#[test]
fn ward_is_deterministic_for_fixed_input() {
    let config = PipelineConfig::default_test();
    let baselines = varied_baselines();

    let first = segment_clients(&config.segmentation, &baselines).unwrap();
    let second = segment_clients(&config.segmentation, &baselines).unwrap();
    for (a, b) in first.assignments.iter().zip(second.assignments.iter()) {
        assert_eq!(a.client_id, b.client_id);
        assert_eq!(a.cohort_id, b.cohort_id);
    }
}

#[test]
fn kmeans_with_fixed_seed_is_deterministic() {
    let mut config = PipelineConfig::default_test();
    config.segmentation.method = ClusteringMethod::KMeans;
    config.segmentation.seed = 1337;
    let baselines = varied_baselines();

    let first = segment_clients(&config.segmentation, &baselines).unwrap();
    let second = segment_clients(&config.segmentation, &baselines).unwrap();
    assert_eq!(first.cohort_count, second.cohort_count);
    for (a, b) in first.assignments.iter().zip(second.assignments.iter()) {
        assert_eq!(a.cohort_id, b.cohort_id);
    }
    assert!(first.cohort_count <= config.segmentation.max_cohorts);
}

/// Clearly separated behavioral tiers must not share a cohort.
#[test]
fn distinct_tiers_land_in_distinct_cohorts() {
    let mut config = PipelineConfig::default_test();
    config.segmentation.max_cohorts = 3;

    let baselines = vec![
        profile("low1", 100.0, 0.1, 0.3, 5),
        profile("low2", 110.0, 0.1, 0.3, 6),
        profile("mid1", 5000.0, 0.5, 0.5, 20),
        profile("mid2", 5200.0, 0.5, 0.5, 21),
        profile("high1", 90000.0, 1.5, 0.8, 60),
        profile("high2", 91000.0, 1.5, 0.8, 61),
    ];
    let outcome = segment_clients(&config.segmentation, &baselines).unwrap();
    let cohort_of = |id: &str| {
        outcome
            .assignments
            .iter()
            .find(|a| a.client_id == id)
            .unwrap()
            .cohort_id
    };
    assert_eq!(cohort_of("low1"), cohort_of("low2"));
    assert_eq!(cohort_of("mid1"), cohort_of("mid2"));
    assert_eq!(cohort_of("high1"), cohort_of("high2"));
    assert_ne!(cohort_of("low1"), cohort_of("mid1"));
    assert_ne!(cohort_of("mid1"), cohort_of("high1"));
}

#[test]
fn labels_start_at_zero_in_first_appearance_order() {
    let config = PipelineConfig::default_test();
    let outcome = segment_clients(&config.segmentation, &varied_baselines()).unwrap();
    // The first client always receives label 0, and labels are a
    // contiguous 0..count range.
    assert_eq!(outcome.assignments[0].cohort_id, 0);
    let max = outcome
        .assignments
        .iter()
        .map(|a| a.cohort_id)
        .max()
        .unwrap();
    assert_eq!(max + 1, outcome.cohort_count);
    for id in 0..outcome.cohort_count {
        assert!(outcome.assignments.iter().any(|a| a.cohort_id == id));
    }
}

#[test]
fn no_rows_dropped_for_well_defined_features() {
    let config = PipelineConfig::default_test();
    let outcome = segment_clients(&config.segmentation, &varied_baselines()).unwrap();
    assert!(outcome.dropped_clients.is_empty());
}
