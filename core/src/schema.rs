//! Column-family resolution for the raw extract.
//!
//! The extract carries one turnover / cashback / activation column per
//! spend category, named by a shared prefix. Family membership is
//! resolved here by prefix match over the actual column list — there is
//! no fixed schema. A missing client-id column or an empty required
//! family is fatal: the run aborts before any output is written.

use crate::{
    config::ExtractConfig,
    error::{PipelineError, PipelineResult},
};

/// The resolved layout of one extract table.
#[derive(Debug, Clone)]
pub struct ExtractSchema {
    pub client_id_column: String,
    pub turnover_columns: Vec<String>,
    pub cashback_columns: Vec<String>,
    pub activation_columns: Vec<String>,
    pub age_column: String,
    pub region_column: Option<String>,
    pub city_column: Option<String>,
    pub gender_column: Option<String>,
}

impl ExtractSchema {
    /// Resolve the schema from the extract's column names.
    pub fn resolve(config: &ExtractConfig, columns: &[String]) -> PipelineResult<Self> {
        let has = |name: &str| columns.iter().any(|c| c == name);

        if !has(&config.client_id_column) {
            return Err(PipelineError::MissingClientIdColumn {
                column: config.client_id_column.clone(),
            });
        }
        if !has(&config.age_column) {
            return Err(PipelineError::MissingColumn {
                column: config.age_column.clone(),
            });
        }

        let family = |prefix: &str| -> PipelineResult<Vec<String>> {
            let members: Vec<String> = columns
                .iter()
                .filter(|c| c.starts_with(prefix))
                .cloned()
                .collect();
            if members.is_empty() {
                return Err(PipelineError::ColumnFamilyNotFound {
                    prefix: prefix.to_string(),
                });
            }
            Ok(members)
        };

        let turnover_columns = family(&config.turnover_prefix)?;
        let cashback_columns = family(&config.cashback_prefix)?;
        let activation_columns = family(&config.activation_prefix)?;

        let optional = |name: &Option<String>| name.as_deref().filter(|n| has(n)).map(String::from);

        log::info!(
            "schema resolved: {} turnover, {} cashback, {} activation columns",
            turnover_columns.len(),
            cashback_columns.len(),
            activation_columns.len()
        );

        Ok(Self {
            client_id_column: config.client_id_column.clone(),
            turnover_columns,
            cashback_columns,
            activation_columns,
            age_column: config.age_column.clone(),
            region_column: optional(&config.region_column),
            city_column: optional(&config.city_column),
            gender_column: optional(&config.gender_column),
        })
    }
}
