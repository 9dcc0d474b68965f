//! Anomaly detection — observed spend vs. the client's own baseline.
//!
//! Two interchangeable band strategies, selected by configuration:
//!   - percentile band: the baseline's [band_lower, band_upper],
//!   - parametric z-band: mean ± z·std, clipped at 0 below (turnover
//!     cannot be negative), with a volatility score attached.
//!
//! One extract row = one observation: the mean of the row's positive
//! turnovers. Rows for clients absent from the baseline table (no
//! positive history) are skipped silently, never flagged.

use crate::{
    baseline::ClientBaselineProfile,
    config::{AnomalyConfig, DetectorStrategy},
    extract::RawRecord,
    stats,
    types::ClientId,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    High,
    Low,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PriorityTier {
    High,
    Medium,
}

impl AnomalyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Low => "low",
        }
    }
}

impl PriorityTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
        }
    }
}

/// One flagged observation. Fully recomputed each run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyRecord {
    pub client_id: ClientId,
    pub kind: AnomalyKind,
    pub observed: f64,
    pub baseline_mean: f64,
    /// Signed, relative to (mean + 1) to avoid blow-up near zero.
    pub deviation_pct: f64,
    pub priority: PriorityTier,
    /// std/(mean+1); reported by the z-band strategy only.
    pub volatility: Option<f64>,
}

/// A band strategy turns one baseline profile into an expected-turnover
/// interval. Both strategies share all downstream classification.
pub trait BandStrategy {
    fn name(&self) -> &'static str;

    /// The [lower, upper] expected interval for this client.
    fn band(&self, profile: &ClientBaselineProfile) -> (f64, f64);

    /// Optional volatility score for reporting.
    fn volatility(&self, _profile: &ClientBaselineProfile) -> Option<f64> {
        None
    }
}

pub struct PercentileBand;

impl BandStrategy for PercentileBand {
    fn name(&self) -> &'static str {
        "percentile_band"
    }

    fn band(&self, profile: &ClientBaselineProfile) -> (f64, f64) {
        (profile.band_lower, profile.band_upper)
    }
}

pub struct ZBand {
    pub z_value: f64,
}

impl BandStrategy for ZBand {
    fn name(&self) -> &'static str {
        "z_band"
    }

    fn band(&self, profile: &ClientBaselineProfile) -> (f64, f64) {
        let half_width = self.z_value * profile.std_turnover;
        let lower = (profile.mean_turnover - half_width).max(0.0);
        let upper = profile.mean_turnover + half_width;
        (lower, upper)
    }

    fn volatility(&self, profile: &ClientBaselineProfile) -> Option<f64> {
        Some(profile.std_turnover / (profile.mean_turnover + 1.0))
    }
}

pub fn build_strategy(config: &AnomalyConfig) -> Box<dyn BandStrategy> {
    match config.strategy {
        DetectorStrategy::PercentileBand => Box::new(PercentileBand),
        DetectorStrategy::ZBand => Box::new(ZBand {
            z_value: config.z_value,
        }),
    }
}

/// Scan every extract row against its client's baseline band.
pub fn detect_anomalies(
    config: &AnomalyConfig,
    records: &[RawRecord],
    baselines: &[ClientBaselineProfile],
) -> Vec<AnomalyRecord> {
    let strategy = build_strategy(config);
    let by_client: HashMap<&str, &ClientBaselineProfile> = baselines
        .iter()
        .map(|p| (p.client_id.as_str(), p))
        .collect();

    let mut anomalies = Vec::new();

    for record in records {
        let observations = record.positive_turnovers();
        if observations.is_empty() {
            continue;
        }
        let observed = stats::mean(&observations);

        // No baseline row means no positive history: skip, never flag.
        let Some(profile) = by_client.get(record.client_id.as_str()) else {
            continue;
        };

        let (lower, upper) = strategy.band(profile);
        let kind = if observed > upper {
            AnomalyKind::High
        } else if observed < lower {
            AnomalyKind::Low
        } else {
            continue;
        };

        let deviation_pct =
            (observed - profile.mean_turnover) / (profile.mean_turnover + 1.0) * 100.0;
        let priority = if deviation_pct.abs() > config.high_priority_deviation_pct {
            PriorityTier::High
        } else {
            PriorityTier::Medium
        };

        anomalies.push(AnomalyRecord {
            client_id: record.client_id.clone(),
            kind,
            observed,
            baseline_mean: profile.mean_turnover,
            deviation_pct,
            priority,
            volatility: strategy.volatility(profile),
        });
    }

    let high = anomalies
        .iter()
        .filter(|a| a.kind == AnomalyKind::High)
        .count();
    log::info!(
        "{} detected {} anomalies ({} high, {} low)",
        strategy.name(),
        anomalies.len(),
        high,
        anomalies.len() - high
    );

    anomalies
}
