//! spendbase-core: client spending baselines, anomaly detection, and
//! bounded-cardinality cohort segmentation over a periodic transaction
//! extract.
//!
//! One batch pass per run: schema resolution, baseline statistics,
//! anomaly detection (two interchangeable band strategies), cohort
//! clustering, cohort profiles, and an atomic write of the output
//! tables. Fully deterministic for a fixed extract, config, and seed.

pub mod anomaly;
pub mod baseline;
pub mod cohort;
pub mod config;
pub mod error;
pub mod extract;
pub mod metrics;
pub mod pipeline;
pub mod rng;
pub mod schema;
pub mod segment;
pub mod stats;
pub mod store;
pub mod types;

pub use config::PipelineConfig;
pub use error::{PipelineError, PipelineResult};
pub use pipeline::{run_and_store, run_pipeline, PipelineOutput, RunSummary};
pub use store::PipelineStore;
