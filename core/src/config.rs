//! Pipeline configuration.
//!
//! Every threshold, percentile pair, and the clustering seed live here —
//! never inline in a stage. Two runs with the same extract and the same
//! config must produce identical output tables.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractConfig {
    /// Name of the extract table in the input database.
    pub table: String,
    pub client_id_column: String,
    /// Column-family prefixes. Family membership is resolved by prefix
    /// match against the extract's columns, not by a fixed schema list.
    pub turnover_prefix: String,
    pub cashback_prefix: String,
    pub activation_prefix: String,
    pub age_column: String,
    #[serde(default)]
    pub region_column: Option<String>,
    #[serde(default)]
    pub city_column: Option<String>,
    #[serde(default)]
    pub gender_column: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaselineConfig {
    /// Non-parametric confidence band percentiles over positive turnovers.
    pub band_pct_low: f64,
    pub band_pct_high: f64,
    /// Percentile pair for the dispersion-ratio range. The legacy model
    /// used an asymmetric 35/65 pair; we default to the symmetric 25/75
    /// interquartile range. Both pairs must straddle the median.
    pub dispersion_pct_low: f64,
    pub dispersion_pct_high: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DetectorStrategy {
    /// Flag observations outside the baseline's percentile band.
    PercentileBand,
    /// Flag observations outside mean ± z·std, clipped at 0 below.
    ZBand,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyConfig {
    pub strategy: DetectorStrategy,
    /// z for the parametric band. 1.645 = two-sided ~90% normal interval.
    pub z_value: f64,
    /// |deviation %| above this is priority "high", otherwise "medium".
    pub high_priority_deviation_pct: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ClusteringMethod {
    /// Bottom-up Ward-linkage agglomerative clustering. Deterministic,
    /// consumes no randomness.
    Ward,
    /// Seeded Lloyd's k-means. The seed below fully determines the result.
    KMeans,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentationConfig {
    /// Hard upper bound on the number of cohorts in the output.
    pub max_cohorts: usize,
    pub method: ClusteringMethod,
    /// Master seed for the k-means alternative (unused by Ward).
    pub seed: u64,
    pub kmeans_max_iters: usize,
    pub kmeans_tolerance: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Cashback rate assumed for spend in eligible-but-not-activated
    /// categories when estimating unrealized cashback.
    pub unrealized_cashback_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub extract: ExtractConfig,
    pub baseline: BaselineConfig,
    pub anomaly: AnomalyConfig,
    pub segmentation: SegmentationConfig,
    pub metrics: MetricsConfig,
}

impl PipelineConfig {
    /// Load from the data/ directory.
    /// In tests, use PipelineConfig::default_test().
    pub fn load(data_dir: &str) -> anyhow::Result<Self> {
        let path = format!("{data_dir}/pipeline_config.json");
        let content = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let config: PipelineConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Config with hardcoded defaults for use in unit tests.
    pub fn default_test() -> Self {
        Self {
            extract: ExtractConfig {
                table: "client_extract".into(),
                client_id_column: "client_id".into(),
                turnover_prefix: "turnover_".into(),
                cashback_prefix: "cashback_".into(),
                activation_prefix: "activation_".into(),
                age_column: "age".into(),
                region_column: Some("region".into()),
                city_column: Some("city".into()),
                gender_column: Some("gender".into()),
            },
            baseline: BaselineConfig {
                band_pct_low: 15.0,
                band_pct_high: 85.0,
                dispersion_pct_low: 25.0,
                dispersion_pct_high: 75.0,
            },
            anomaly: AnomalyConfig {
                strategy: DetectorStrategy::PercentileBand,
                z_value: 1.645,
                high_priority_deviation_pct: 30.0,
            },
            segmentation: SegmentationConfig {
                max_cohorts: 8,
                method: ClusteringMethod::Ward,
                seed: 42,
                kmeans_max_iters: 100,
                kmeans_tolerance: 1e-4,
            },
            metrics: MetricsConfig {
                unrealized_cashback_rate: 0.05,
            },
        }
    }
}
