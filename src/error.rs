//! Error types for normeg

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Normeg error types
#[derive(Error, Debug)]
pub enum Error {
    /// Data precondition violated before any job was dispatched
    #[error("data precondition failed: {0}")]
    Precondition(String),

    /// A stratification level is too small for the requested train fraction
    #[error(
        "stratum {column}={level} has {rows} rows, too few for train fraction {fraction} \
         without an empty partition"
    )]
    StratumTooSmall {
        /// Stratification column name
        column: String,
        /// Offending level, rendered as its numeric code
        level: String,
        /// Number of rows in the level
        rows: usize,
        /// Requested global train fraction
        fraction: f64,
    },

    /// Response-variable ordering differs between seeds of one experiment
    #[error("biomarker list for seed {seed} differs from the first seed's list")]
    BiomarkerOrderMismatch {
        /// Seed whose split produced the divergent list
        seed: u64,
    },

    /// Invalid model-variant hyperparameter combination
    #[error("invalid model variant {name}: {reason}")]
    InvalidVariant {
        /// Variant name
        name: String,
        /// Why the combination is rejected
        reason: String,
    },

    /// Table-level error (unknown column, length mismatch, schema drift)
    #[error("table error: {0}")]
    Table(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Arrow error
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Parquet error
    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
