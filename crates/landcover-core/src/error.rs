//! Error types for the land-cover pipeline.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LandcoverError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TIFF error: {0}")]
    Tiff(#[from] tiff::TiffError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The metadata filters left no acquisition for a sensor source.
    #[error("no acquisitions left for source '{source_name}' after filtering")]
    NoAcquisitions { source_name: String },

    /// Sampling produced zero usable pixels.
    #[error("sample is empty: no valid pixels inside the region")]
    EmptySample,

    #[error("grid mismatch: expected {expected_width}x{expected_height}, got {width}x{height} ({context})")]
    GridMismatch {
        expected_width: usize,
        expected_height: usize,
        width: usize,
        height: usize,
        context: String,
    },

    #[error("unknown band '{0}'")]
    UnknownBand(String),

    #[error("unsupported pixel type in {0}")]
    UnsupportedPixelType(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("cluster {cluster_id} is mapped to both '{first}' and '{second}'")]
    DuplicateClusterId {
        cluster_id: u16,
        first: String,
        second: String,
    },
}

pub type Result<T> = std::result::Result<T, LandcoverError>;
