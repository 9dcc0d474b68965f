//! The raw extract rows the pipeline consumes.
//!
//! One RawRecord = one client in one reporting period. Records are
//! immutable input: no stage ever writes back into them.

use crate::types::ClientId;
use serde::{Deserialize, Serialize};

/// Tri-state activation flag for one cashback category.
/// Encoded 1 / 0 / -1 in the extract.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActivationFlag {
    Activated,
    Eligible,
    NotEligible,
}

impl ActivationFlag {
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => Self::Activated,
            0 => Self::Eligible,
            _ => Self::NotEligible,
        }
    }

    pub fn to_code(self) -> i64 {
        match self {
            Self::Activated => 1,
            Self::Eligible => 0,
            Self::NotEligible => -1,
        }
    }
}

/// Static demographic attributes carried on each extract row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Demographics {
    pub age: f64,
    pub region: Option<String>,
    pub city: Option<String>,
    pub gender: Option<String>,
}

/// One row of the extract: one client, one reporting period.
/// The per-category vectors are parallel to the resolved column
/// families, in extract column order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRecord {
    pub client_id: ClientId,
    pub turnover: Vec<f64>,
    pub cashback: Vec<f64>,
    pub activation: Vec<ActivationFlag>,
    pub demographics: Demographics,
}

impl RawRecord {
    /// The positive turnover observations on this row. Zero and negative
    /// entries mean "no spend in that category", not valid observations.
    pub fn positive_turnovers(&self) -> Vec<f64> {
        self.turnover.iter().copied().filter(|v| *v > 0.0).collect()
    }
}

/// Group records by client, preserving first-appearance order.
/// HashMap iteration order must never leak into pipeline output.
pub fn group_by_client(records: &[RawRecord]) -> Vec<(ClientId, Vec<&RawRecord>)> {
    let mut index: std::collections::HashMap<&str, usize> = std::collections::HashMap::new();
    let mut groups: Vec<(ClientId, Vec<&RawRecord>)> = Vec::new();

    for record in records {
        match index.get(record.client_id.as_str()) {
            Some(&i) => groups[i].1.push(record),
            None => {
                index.insert(record.client_id.as_str(), groups.len());
                groups.push((record.client_id.clone(), vec![record]));
            }
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(client: &str, turnover: Vec<f64>) -> RawRecord {
        RawRecord {
            client_id: client.into(),
            turnover,
            cashback: vec![],
            activation: vec![],
            demographics: Demographics {
                age: 30.0,
                region: None,
                city: None,
                gender: None,
            },
        }
    }

    #[test]
    fn positive_turnovers_drops_zero_and_negative() {
        let r = record("c1", vec![100.0, 0.0, -5.0, 20.0]);
        assert_eq!(r.positive_turnovers(), vec![100.0, 20.0]);
    }

    #[test]
    fn grouping_preserves_first_appearance_order() {
        let records = vec![
            record("b", vec![1.0]),
            record("a", vec![2.0]),
            record("b", vec![3.0]),
        ];
        let groups = group_by_client(&records);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, "b");
        assert_eq!(groups[0].1.len(), 2);
        assert_eq!(groups[1].0, "a");
    }

    #[test]
    fn activation_flag_round_trips_codes() {
        assert_eq!(ActivationFlag::from_code(1), ActivationFlag::Activated);
        assert_eq!(ActivationFlag::from_code(0), ActivationFlag::Eligible);
        assert_eq!(ActivationFlag::from_code(-1), ActivationFlag::NotEligible);
        assert_eq!(ActivationFlag::NotEligible.to_code(), -1);
    }
}
