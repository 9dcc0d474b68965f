use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Extract table '{table}' not found in database")]
    MissingExtractTable { table: String },

    #[error("Client id column '{column}' not found in extract")]
    MissingClientIdColumn { column: String },

    #[error("Required column '{column}' not found in extract")]
    MissingColumn { column: String },

    #[error("No extract columns match required family prefix '{prefix}'")]
    ColumnFamilyNotFound { prefix: String },

    #[error("Stage '{stage}' produced an empty result set")]
    EmptyStage { stage: &'static str },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type PipelineResult<T> = Result<T, PipelineError>;
