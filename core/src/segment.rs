//! Cohort segmentation — bounded-cardinality clustering of baselines.
//!
//! Feature vector per client: mean turnover, dispersion ratio,
//! concentration, activity count. Exactly these four — adding a feature
//! changes cluster geometry and is a configuration change, not an
//! extension.
//!
//! Missing values are imputed with the column mean, falling back to the
//! column median, and rows still undefined after that are dropped and
//! reported. Features are standardized before clustering so the raw
//! turnover scale cannot dominate the distance metric.
//!
//! Two backends, selected by configuration:
//!   - Ward-linkage agglomerative clustering (default): merges the pair
//!     with the smallest within-cluster variance increase until at most
//!     `max_cohorts` clusters remain. Deterministic, no seed consumed.
//!   - Seeded k-means: Lloyd's iterations with a k-means++-style init
//!     drawn from the configured seed.

use crate::{
    baseline::ClientBaselineProfile,
    config::{ClusteringMethod, SegmentationConfig},
    error::{PipelineError, PipelineResult},
    rng::{StageRng, StageSlot},
    types::{ClientId, CohortId},
};
use serde::{Deserialize, Serialize};

const FEATURE_COUNT: usize = 4;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CohortAssignment {
    pub client_id: ClientId,
    pub cohort_id: CohortId,
}

/// The segmenter's full result: one assignment per surviving baseline
/// row, plus the ids of any rows dropped during imputation.
#[derive(Debug, Clone)]
pub struct SegmentationOutcome {
    pub assignments: Vec<CohortAssignment>,
    pub dropped_clients: Vec<ClientId>,
    pub cohort_count: usize,
}

pub fn segment_clients(
    config: &SegmentationConfig,
    baselines: &[ClientBaselineProfile],
) -> PipelineResult<SegmentationOutcome> {
    let mut features: Vec<[f64; FEATURE_COUNT]> = baselines
        .iter()
        .map(|p| {
            [
                p.mean_turnover,
                p.dispersion_ratio,
                p.concentration,
                p.activity_count as f64,
            ]
        })
        .collect();

    let dropped_rows = impute_missing(&mut features);
    let dropped_clients: Vec<ClientId> = dropped_rows
        .iter()
        .map(|&i| baselines[i].client_id.clone())
        .collect();
    if !dropped_clients.is_empty() {
        log::warn!(
            "segmenter dropped {} rows with undefined features after imputation",
            dropped_clients.len()
        );
    }

    let kept: Vec<usize> = (0..features.len())
        .filter(|i| !dropped_rows.contains(i))
        .collect();
    if kept.is_empty() {
        return Err(PipelineError::EmptyStage { stage: "segmenter" });
    }
    let mut matrix: Vec<[f64; FEATURE_COUNT]> = kept.iter().map(|&i| features[i]).collect();

    standardize(&mut matrix);

    let k = config.max_cohorts.min(matrix.len());
    let raw_labels = match config.method {
        ClusteringMethod::Ward => ward_cluster(&matrix, k),
        ClusteringMethod::KMeans => {
            let mut rng = StageSlot::Segmenter.rng(config.seed);
            kmeans_cluster(
                &matrix,
                k,
                config.kmeans_max_iters,
                config.kmeans_tolerance,
                &mut rng,
            )
        }
    };

    // Relabel by first appearance so labels are stable for fixed input
    // regardless of backend internals.
    let labels = relabel_by_first_appearance(&raw_labels);
    let cohort_count = labels.iter().copied().max().map_or(0, |m| m + 1);

    let assignments = kept
        .iter()
        .zip(labels.iter())
        .map(|(&row, &cohort_id)| CohortAssignment {
            client_id: baselines[row].client_id.clone(),
            cohort_id,
        })
        .collect();

    log::info!(
        "segmented {} clients into {} cohorts (cap {})",
        kept.len(),
        cohort_count,
        config.max_cohorts
    );

    Ok(SegmentationOutcome {
        assignments,
        dropped_clients,
        cohort_count,
    })
}

/// Mean imputation, median fallback, then row drop. Returns the indices
/// of rows that still held undefined values after both passes.
fn impute_missing(features: &mut [[f64; FEATURE_COUNT]]) -> Vec<usize> {
    for col in 0..FEATURE_COUNT {
        let defined: Vec<f64> = features
            .iter()
            .map(|row| row[col])
            .filter(|v| v.is_finite())
            .collect();
        if defined.is_empty() {
            // Nothing to impute from; rows in this column stay undefined
            // and get reported below.
            continue;
        }
        // Median fallback only matters if the mean itself is undefined.
        let mut fill = crate::stats::mean(&defined);
        if !fill.is_finite() {
            fill = crate::stats::median(&defined);
        }
        if fill.is_finite() {
            for row in features.iter_mut() {
                if !row[col].is_finite() {
                    row[col] = fill;
                }
            }
        }
    }

    (0..features.len())
        .filter(|&i| features[i].iter().any(|v| !v.is_finite()))
        .collect()
}

/// Zero mean, unit variance per column. Constant columns scale to 0.
fn standardize(matrix: &mut [[f64; FEATURE_COUNT]]) {
    for col in 0..FEATURE_COUNT {
        let column: Vec<f64> = matrix.iter().map(|row| row[col]).collect();
        let mean = crate::stats::mean(&column);
        let std = crate::stats::std_dev(&column);
        for row in matrix.iter_mut() {
            row[col] = crate::stats::guarded_div(row[col] - mean, std);
        }
    }
}

fn squared_distance(a: &[f64; FEATURE_COUNT], b: &[f64; FEATURE_COUNT]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum()
}

struct WardCluster {
    members: Vec<usize>,
    centroid: [f64; FEATURE_COUNT],
}

/// Ward's criterion via centroids: merging A and B increases the total
/// within-cluster sum of squares by |A||B|/(|A|+|B|) · ‖cA − cB‖².
fn ward_merge_cost(a: &WardCluster, b: &WardCluster) -> f64 {
    let na = a.members.len() as f64;
    let nb = b.members.len() as f64;
    (na * nb) / (na + nb) * squared_distance(&a.centroid, &b.centroid)
}

/// Bottom-up agglomerative clustering to exactly `k` clusters.
/// Ties break on the lowest cluster-index pair, so the result is fully
/// deterministic for fixed input order.
fn ward_cluster(matrix: &[[f64; FEATURE_COUNT]], k: usize) -> Vec<usize> {
    let mut clusters: Vec<WardCluster> = matrix
        .iter()
        .enumerate()
        .map(|(i, point)| WardCluster {
            members: vec![i],
            centroid: *point,
        })
        .collect();

    while clusters.len() > k {
        let mut best = (0usize, 1usize);
        let mut best_cost = f64::INFINITY;
        for i in 0..clusters.len() {
            for j in (i + 1)..clusters.len() {
                let cost = ward_merge_cost(&clusters[i], &clusters[j]);
                if cost < best_cost {
                    best_cost = cost;
                    best = (i, j);
                }
            }
        }

        let (i, j) = best;
        let absorbed = clusters.swap_remove(j);
        let target = &mut clusters[i];
        let na = target.members.len() as f64;
        let nb = absorbed.members.len() as f64;
        for col in 0..FEATURE_COUNT {
            target.centroid[col] =
                (target.centroid[col] * na + absorbed.centroid[col] * nb) / (na + nb);
        }
        target.members.extend(absorbed.members);
    }

    let mut labels = vec![0usize; matrix.len()];
    for (cluster_id, cluster) in clusters.iter().enumerate() {
        for &member in &cluster.members {
            labels[member] = cluster_id;
        }
    }
    labels
}

/// Seeded Lloyd's k-means with k-means++-style initialization.
fn kmeans_cluster(
    matrix: &[[f64; FEATURE_COUNT]],
    k: usize,
    max_iters: usize,
    tolerance: f64,
    rng: &mut StageRng,
) -> Vec<usize> {
    let n = matrix.len();
    let mut centroids: Vec<[f64; FEATURE_COUNT]> = Vec::with_capacity(k);
    centroids.push(matrix[rng.next_u64_below(n as u64) as usize]);

    // Each further centroid is drawn with probability proportional to
    // its squared distance from the nearest chosen centroid.
    while centroids.len() < k {
        let weights: Vec<f64> = matrix
            .iter()
            .map(|p| {
                centroids
                    .iter()
                    .map(|c| squared_distance(p, c))
                    .fold(f64::INFINITY, f64::min)
            })
            .collect();
        let total: f64 = weights.iter().sum();
        let pick = if total > 0.0 {
            let mut target = rng.next_f64() * total;
            let mut chosen = n - 1;
            for (i, w) in weights.iter().enumerate() {
                if target < *w {
                    chosen = i;
                    break;
                }
                target -= w;
            }
            chosen
        } else {
            // All points coincide with a centroid already.
            rng.next_u64_below(n as u64) as usize
        };
        centroids.push(matrix[pick]);
    }

    let mut labels = vec![0usize; n];
    for _ in 0..max_iters {
        // Assignment step.
        for (i, point) in matrix.iter().enumerate() {
            let mut best = 0usize;
            let mut best_dist = f64::INFINITY;
            for (c, centroid) in centroids.iter().enumerate() {
                let d = squared_distance(point, centroid);
                if d < best_dist {
                    best_dist = d;
                    best = c;
                }
            }
            labels[i] = best;
        }

        // Update step.
        let mut sums = vec![[0.0f64; FEATURE_COUNT]; k];
        let mut counts = vec![0usize; k];
        for (i, point) in matrix.iter().enumerate() {
            counts[labels[i]] += 1;
            for col in 0..FEATURE_COUNT {
                sums[labels[i]][col] += point[col];
            }
        }

        let mut shift = 0.0f64;
        for c in 0..k {
            if counts[c] == 0 {
                // Re-seat an empty cluster on the point farthest from
                // its current centroid.
                let far = (0..n)
                    .max_by(|&a, &b| {
                        let da = squared_distance(&matrix[a], &centroids[labels[a]]);
                        let db = squared_distance(&matrix[b], &centroids[labels[b]]);
                        da.total_cmp(&db)
                    })
                    .unwrap_or(0);
                shift += squared_distance(&centroids[c], &matrix[far]);
                centroids[c] = matrix[far];
                continue;
            }
            let mut updated = [0.0f64; FEATURE_COUNT];
            for col in 0..FEATURE_COUNT {
                updated[col] = sums[c][col] / counts[c] as f64;
            }
            shift += squared_distance(&centroids[c], &updated);
            centroids[c] = updated;
        }

        if shift < tolerance {
            break;
        }
    }

    labels
}

/// Map arbitrary labels onto 0..count in order of first appearance.
fn relabel_by_first_appearance(raw: &[usize]) -> Vec<usize> {
    let mut mapping: Vec<usize> = Vec::new();
    raw.iter()
        .map(|&label| {
            match mapping.iter().position(|&m| m == label) {
                Some(i) => i,
                None => {
                    mapping.push(label);
                    mapping.len() - 1
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ward_separates_two_obvious_blobs() {
        let matrix = vec![
            [0.0, 0.0, 0.0, 0.0],
            [0.1, 0.0, 0.0, 0.0],
            [0.0, 0.1, 0.0, 0.0],
            [5.0, 5.0, 5.0, 5.0],
            [5.1, 5.0, 5.0, 5.0],
        ];
        let labels = ward_cluster(&matrix, 2);
        assert_eq!(labels[0], labels[1]);
        assert_eq!(labels[1], labels[2]);
        assert_eq!(labels[3], labels[4]);
        assert_ne!(labels[0], labels[3]);
    }

    #[test]
    fn relabeling_is_first_appearance_order() {
        assert_eq!(relabel_by_first_appearance(&[7, 2, 7, 5]), vec![0, 1, 0, 2]);
    }

    #[test]
    fn imputation_fills_nan_with_column_mean() {
        let mut features = vec![
            [1.0, f64::NAN, 0.5, 2.0],
            [3.0, 4.0, 0.5, 2.0],
            [5.0, 6.0, 0.5, 2.0],
        ];
        let dropped = impute_missing(&mut features);
        assert!(dropped.is_empty());
        assert_eq!(features[0][1], 5.0); // mean of 4 and 6
    }

    #[test]
    fn fully_undefined_column_drops_nothing_but_rows_stay_defined() {
        let mut features = vec![[1.0, f64::NAN, 0.5, 2.0], [3.0, f64::NAN, 0.5, 2.0]];
        let dropped = impute_missing(&mut features);
        // Column stays NaN for every row, so every row is reported.
        assert_eq!(dropped, vec![0, 1]);
    }

    #[test]
    fn standardize_zeroes_constant_columns() {
        let mut matrix = vec![[10.0, 1.0, 3.0, 3.0], [20.0, 1.0, 5.0, 3.0]];
        standardize(&mut matrix);
        assert_eq!(matrix[0][1], 0.0);
        assert_eq!(matrix[1][1], 0.0);
        assert!((matrix[0][0] + matrix[1][0]).abs() < 1e-12);
    }
}
