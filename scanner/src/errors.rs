use std::path::PathBuf;

use polars::error::PolarsError;
use thiserror::Error;

pub type ScanResult<T> = Result<T, ScanError>;

/// Everything that can go wrong while scanning a variant set.
///
/// Which of these are fatal depends on where they surface: a missing
/// chromosome only sinks the chunk that asked for it, while a broken model
/// artifact stops the whole run before any chunk is scheduled.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("chromosome {chrom} not found at {}", path.display())]
    ChromosomeMissing { chrom: String, path: PathBuf },

    #[error("position {pos} is outside chromosome {chrom}")]
    PositionOutOfRange { chrom: String, pos: u64 },

    #[error("malformed FASTA {}: {reason}", path.display())]
    MalformedFasta { path: PathBuf, reason: String },

    #[error("malformed variant row: {0}")]
    MalformedVariant(String),

    #[error("RNAduplex failed on {}: {reason}", input.display())]
    DuplexTool { input: PathBuf, reason: String },

    #[error("cannot parse RNAduplex record '{0}'")]
    DuplexParse(String),

    #[error("cannot load model {}: {reason}", path.display())]
    ModelLoad { path: PathBuf, reason: String },

    #[error("model schema mismatch: {0}")]
    ModelSchema(String),

    #[error("feature column '{0}' is missing from the feature table")]
    MissingFeature(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Polars(#[from] PolarsError),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Pool(#[from] rayon::ThreadPoolBuildError),
}
