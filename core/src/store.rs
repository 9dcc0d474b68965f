//! SQLite persistence layer.
//!
//! RULE: Only store.rs talks to the database.
//! Stages work on in-memory tables — they never execute SQL directly.
//!
//! NULL handling on load: numeric extract cells read as 0 (no spend),
//! activation cells read as not-eligible, text cells as None.

use crate::{
    config::ExtractConfig,
    error::{PipelineError, PipelineResult},
    extract::{ActivationFlag, Demographics, RawRecord},
    pipeline::PipelineOutput,
    schema::ExtractSchema,
    types::RunId,
};
use rusqlite::{params, Connection};

pub struct PipelineStore {
    conn: Connection,
    path: Option<String>, // None for :memory:, Some(path) for file
}

impl PipelineStore {
    pub fn open(path: &str) -> PipelineResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only for real files (:memory: ignores it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self {
            conn,
            path: Some(path.to_string()),
        })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> PipelineResult<Self> {
        let conn = Connection::open(":memory:")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn, path: None })
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> PipelineResult<()> {
        self.conn
            .execute_batch(include_str!("../../migrations/001_runs.sql"))?;
        self.conn
            .execute_batch(include_str!("../../migrations/002_outputs.sql"))?;
        Ok(())
    }

    // ── Run bookkeeping ────────────────────────────────────────

    pub fn insert_run(
        &self,
        run_id: &str,
        seed: u64,
        strategy: &str,
        clustering: &str,
        config_json: &str,
    ) -> PipelineResult<()> {
        self.conn.execute(
            "INSERT INTO pipeline_run (run_id, seed, strategy, clustering, config_json, started_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                run_id,
                seed as i64,
                strategy,
                clustering,
                config_json,
                chrono::Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    pub fn finish_run(
        &self,
        run_id: &str,
        baseline_rows: usize,
        anomaly_rows: usize,
        cohort_rows: usize,
    ) -> PipelineResult<()> {
        self.conn.execute(
            "UPDATE pipeline_run
             SET finished_at = ?1, baseline_rows = ?2, anomaly_rows = ?3, cohort_rows = ?4
             WHERE run_id = ?5",
            params![
                chrono::Utc::now().to_rfc3339(),
                baseline_rows as i64,
                anomaly_rows as i64,
                cohort_rows as i64,
                run_id
            ],
        )?;
        Ok(())
    }

    // ── Extract ────────────────────────────────────────────────

    /// Create an extract table for the given spend categories.
    /// Used by tests and the synthetic-extract generator; production
    /// extracts arrive in the database already.
    pub fn create_extract_table(
        &self,
        config: &ExtractConfig,
        categories: &[&str],
    ) -> PipelineResult<()> {
        let mut columns = vec![
            format!("\"{}\" TEXT NOT NULL", config.client_id_column),
            format!("\"{}\" REAL", config.age_column),
        ];
        for name in [&config.region_column, &config.city_column, &config.gender_column]
            .into_iter()
            .flatten()
        {
            columns.push(format!("\"{name}\" TEXT"));
        }
        for category in categories {
            columns.push(format!("\"{}{category}\" REAL", config.turnover_prefix));
            columns.push(format!("\"{}{category}\" REAL", config.cashback_prefix));
            columns.push(format!("\"{}{category}\" INTEGER", config.activation_prefix));
        }
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS \"{}\" ({})",
            config.table,
            columns.join(", ")
        );
        self.conn.execute_batch(&sql)?;
        Ok(())
    }

    /// Drop the extract table if present. Used before regenerating a
    /// synthetic extract.
    pub fn drop_extract_table(&self, table: &str) -> PipelineResult<()> {
        self.conn
            .execute_batch(&format!("DROP TABLE IF EXISTS \"{table}\""))?;
        Ok(())
    }

    /// Insert one extract row. The record's per-category vectors must be
    /// parallel to `categories`.
    pub fn insert_extract_row(
        &self,
        config: &ExtractConfig,
        categories: &[&str],
        record: &RawRecord,
    ) -> PipelineResult<()> {
        let mut names: Vec<String> = vec![
            config.client_id_column.clone(),
            config.age_column.clone(),
        ];
        let mut values: Vec<rusqlite::types::Value> = vec![
            record.client_id.clone().into(),
            record.demographics.age.into(),
        ];
        let text_cols = [
            (&config.region_column, &record.demographics.region),
            (&config.city_column, &record.demographics.city),
            (&config.gender_column, &record.demographics.gender),
        ];
        for (column, value) in text_cols {
            if let Some(name) = column {
                names.push(name.clone());
                values.push(match value {
                    Some(v) => v.clone().into(),
                    None => rusqlite::types::Value::Null,
                });
            }
        }
        for (i, category) in categories.iter().enumerate() {
            names.push(format!("{}{category}", config.turnover_prefix));
            values.push(record.turnover.get(i).copied().unwrap_or(0.0).into());
            names.push(format!("{}{category}", config.cashback_prefix));
            values.push(record.cashback.get(i).copied().unwrap_or(0.0).into());
            names.push(format!("{}{category}", config.activation_prefix));
            values.push(
                record
                    .activation
                    .get(i)
                    .copied()
                    .unwrap_or(ActivationFlag::NotEligible)
                    .to_code()
                    .into(),
            );
        }

        let quoted: Vec<String> = names.iter().map(|n| format!("\"{n}\"")).collect();
        let placeholders: Vec<String> = (1..=names.len()).map(|i| format!("?{i}")).collect();
        let sql = format!(
            "INSERT INTO \"{}\" ({}) VALUES ({})",
            config.table,
            quoted.join(", "),
            placeholders.join(", ")
        );
        self.conn
            .execute(&sql, rusqlite::params_from_iter(values))?;
        Ok(())
    }

    /// Column names of the extract table, in declaration order.
    pub fn extract_columns(&self, table: &str) -> PipelineResult<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare(&format!("PRAGMA table_info(\"{table}\")"))?;
        let columns: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<Result<_, _>>()?;
        if columns.is_empty() {
            return Err(PipelineError::MissingExtractTable {
                table: table.to_string(),
            });
        }
        Ok(columns)
    }

    /// Load every extract row as a RawRecord, in insertion order.
    pub fn load_extract(
        &self,
        table: &str,
        schema: &ExtractSchema,
    ) -> PipelineResult<Vec<RawRecord>> {
        let mut select: Vec<String> = vec![
            schema.client_id_column.clone(),
            schema.age_column.clone(),
        ];
        let text_offsets: Vec<Option<usize>> = [
            &schema.region_column,
            &schema.city_column,
            &schema.gender_column,
        ]
        .into_iter()
        .map(|col| {
            col.as_ref().map(|name| {
                select.push(name.clone());
                select.len() - 1
            })
        })
        .collect();

        let turnover_start = select.len();
        select.extend(schema.turnover_columns.iter().cloned());
        let cashback_start = select.len();
        select.extend(schema.cashback_columns.iter().cloned());
        let activation_start = select.len();
        select.extend(schema.activation_columns.iter().cloned());

        let quoted: Vec<String> = select.iter().map(|c| format!("\"{c}\"")).collect();
        let sql = format!(
            "SELECT {} FROM \"{table}\" ORDER BY rowid",
            quoted.join(", ")
        );
        let mut stmt = self.conn.prepare(&sql)?;

        let n_turnover = schema.turnover_columns.len();
        let n_cashback = schema.cashback_columns.len();
        let n_activation = schema.activation_columns.len();

        let rows = stmt.query_map([], |row| {
            let text_at = |offset: Option<usize>| -> Result<Option<String>, rusqlite::Error> {
                match offset {
                    Some(i) => row.get::<_, Option<String>>(i),
                    None => Ok(None),
                }
            };
            let turnover = (0..n_turnover)
                .map(|i| row.get::<_, Option<f64>>(turnover_start + i).map(|v| v.unwrap_or(0.0)))
                .collect::<Result<Vec<_>, _>>()?;
            let cashback = (0..n_cashback)
                .map(|i| row.get::<_, Option<f64>>(cashback_start + i).map(|v| v.unwrap_or(0.0)))
                .collect::<Result<Vec<_>, _>>()?;
            let activation = (0..n_activation)
                .map(|i| {
                    row.get::<_, Option<i64>>(activation_start + i)
                        .map(|v| ActivationFlag::from_code(v.unwrap_or(-1)))
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(RawRecord {
                client_id: row.get(0)?,
                turnover,
                cashback,
                activation,
                demographics: Demographics {
                    age: row.get::<_, Option<f64>>(1)?.unwrap_or(0.0),
                    region: text_at(text_offsets[0])?,
                    city: text_at(text_offsets[1])?,
                    gender: text_at(text_offsets[2])?,
                },
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    // ── Output tables ──────────────────────────────────────────

    /// Write all output tables in one transaction: a run either lands
    /// completely or not at all, and fully supersedes the prior run's
    /// output rows.
    pub fn write_outputs(&mut self, run_id: &RunId, output: &PipelineOutput) -> PipelineResult<()> {
        let tx = self.conn.transaction()?;

        tx.execute("DELETE FROM client_baseline", [])?;
        tx.execute("DELETE FROM anomalies", [])?;
        tx.execute("DELETE FROM cohort_profiles", [])?;
        tx.execute("DELETE FROM client_cashback_metrics", [])?;
        tx.execute("DELETE FROM segmentation_drops", [])?;

        let cohort_of = |client_id: &str| -> Option<i64> {
            output
                .assignments
                .iter()
                .find(|a| a.client_id == client_id)
                .map(|a| a.cohort_id as i64)
        };

        for p in &output.baselines {
            tx.execute(
                "INSERT INTO client_baseline (
                    client_id, run_id, mean_turnover, median_turnover, std_turnover,
                    dispersion_ratio, band_lower, band_upper, concentration,
                    activity_count, age, region, cohort_id
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    &p.client_id,
                    run_id,
                    p.mean_turnover,
                    p.median_turnover,
                    p.std_turnover,
                    p.dispersion_ratio,
                    p.band_lower,
                    p.band_upper,
                    p.concentration,
                    p.activity_count as i64,
                    p.age,
                    &p.region,
                    cohort_of(&p.client_id),
                ],
            )?;
        }

        for a in &output.anomalies {
            tx.execute(
                "INSERT INTO anomalies (
                    run_id, client_id, kind, observed, baseline_mean,
                    deviation_pct, priority, volatility
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    run_id,
                    &a.client_id,
                    a.kind.as_str(),
                    a.observed,
                    a.baseline_mean,
                    a.deviation_pct,
                    a.priority.as_str(),
                    a.volatility,
                ],
            )?;
        }

        for c in &output.cohort_profiles {
            tx.execute(
                "INSERT INTO cohort_profiles (
                    cohort_id, run_id, member_count, mean_turnover, median_turnover,
                    std_turnover, mean_dispersion_ratio, mean_concentration,
                    mean_activity_count, mean_age
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    c.cohort_id as i64,
                    run_id,
                    c.member_count as i64,
                    c.mean_turnover,
                    c.median_turnover,
                    c.std_turnover,
                    c.mean_dispersion_ratio,
                    c.mean_concentration,
                    c.mean_activity_count,
                    c.mean_age,
                ],
            )?;
        }

        for m in &output.cashback_metrics {
            tx.execute(
                "INSERT INTO client_cashback_metrics (
                    client_id, run_id, monthly_turnover, monthly_cashback, cashback_rate,
                    activated_categories, available_categories, activation_ratio,
                    cashback_per_category, herfindahl_index, potential_cashback, premium
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    &m.client_id,
                    run_id,
                    m.monthly_turnover,
                    m.monthly_cashback,
                    m.cashback_rate,
                    m.activated_categories as i64,
                    m.available_categories as i64,
                    m.activation_ratio,
                    m.cashback_per_category,
                    m.herfindahl_index,
                    m.potential_cashback,
                    if m.premium { 1 } else { 0 },
                ],
            )?;
        }

        for client_id in &output.dropped_clients {
            tx.execute(
                "INSERT INTO segmentation_drops (run_id, client_id) VALUES (?1, ?2)",
                params![run_id, client_id],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    // ── Queries (runner summaries and tests) ───────────────────

    pub fn count_rows(&self, table: &str) -> PipelineResult<i64> {
        let count = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM \"{table}\""), [], |row| {
                row.get(0)
            })?;
        Ok(count)
    }

    pub fn anomaly_count_by_kind(&self, kind: &str) -> PipelineResult<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM anomalies WHERE kind = ?1",
            params![kind],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn cohort_sizes(&self) -> PipelineResult<Vec<(i64, i64)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT cohort_id, member_count FROM cohort_profiles ORDER BY cohort_id")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn baseline_cohort(&self, client_id: &str) -> PipelineResult<Option<i64>> {
        let cohort = self.conn.query_row(
            "SELECT cohort_id FROM client_baseline WHERE client_id = ?1",
            params![client_id],
            |row| row.get(0),
        )?;
        Ok(cohort)
    }

    /// Dump a table's declared columns row by row as canonical strings,
    /// ordered by rowid. Used by the determinism test and the runner.
    pub fn table_dump(&self, table: &str) -> PipelineResult<Vec<String>> {
        let columns = self.extract_columns(table)?;
        let quoted: Vec<String> = columns.iter().map(|c| format!("\"{c}\"")).collect();
        let sql = format!(
            "SELECT {} FROM \"{table}\" ORDER BY rowid",
            quoted.join(", ")
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| {
            let mut cells = Vec::with_capacity(columns.len());
            for i in 0..columns.len() {
                use rusqlite::types::ValueRef;
                let cell = match row.get_ref(i)? {
                    ValueRef::Null => "null".to_string(),
                    ValueRef::Integer(v) => v.to_string(),
                    ValueRef::Real(v) => format!("{v}"),
                    ValueRef::Text(v) => String::from_utf8_lossy(v).into_owned(),
                    ValueRef::Blob(_) => "<blob>".to_string(),
                };
                cells.push(cell);
            }
            Ok(cells.join("|"))
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}
