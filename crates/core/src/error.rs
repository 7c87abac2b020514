//! Error types for birdocc

use thiserror::Error;

/// Main error type for birdocc operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid raster dimensions: {width}x{height}")]
    InvalidDimensions { width: usize, height: usize },

    #[error("Index out of bounds: ({row}, {col}) in raster of size ({rows}, {cols})")]
    IndexOutOfBounds {
        row: usize,
        col: usize,
        rows: usize,
        cols: usize,
    },

    #[error("Size mismatch: expected ({er}, {ec}), got ({ar}, {ac})")]
    SizeMismatch { er: usize, ec: usize, ar: usize, ac: usize },

    #[error("CRS mismatch: {0} vs {1}")]
    CrsMismatch(String, String),

    #[error("Unsupported data type: {0}")]
    UnsupportedDataType(String),

    #[error("Invalid parameter: {name} = {value} ({reason})")]
    InvalidParameter {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("Missing column: {0}")]
    MissingColumn(String),

    #[error("Cannot parse {field}: {value:?}")]
    Parse { field: &'static str, value: String },

    #[error("Optimizer did not converge after {iterations} iterations (|gradient| = {gradient_norm:.3e})")]
    Convergence { iterations: usize, gradient_norm: f64 },

    #[error("Model is not identifiable: {0}")]
    Unidentifiable(String),

    #[error("Algorithm error: {0}")]
    Algorithm(String),

    #[error("{0}")]
    Other(String),
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}

impl Error {
    /// Whether this error comes from a numerical fit rather than from bad input.
    ///
    /// Fit failures are tolerated per model and per species; everything else
    /// aborts the stage.
    pub fn is_numerical(&self) -> bool {
        matches!(
            self,
            Error::Convergence { .. } | Error::Unidentifiable(_) | Error::Algorithm(_)
        )
    }
}

/// Result type alias for birdocc operations
pub type Result<T> = std::result::Result<T, Error>;
