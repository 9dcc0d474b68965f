//! Shared primitive types used across the entire pipeline.

/// A stable client identifier, as found in the extract's id column.
pub type ClientId = String;

/// The canonical run identifier.
pub type RunId = String;

/// A 0-based cohort label assigned by the segmenter.
/// Labels carry no ordinal meaning and are stable only within one run.
pub type CohortId = usize;
