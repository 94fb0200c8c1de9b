use thiserror::Error;

#[derive(Error, Debug)]
pub enum SimError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Insufficient data: {found} valid points (minimum: {required})")]
    InsufficientData { found: usize, required: usize },

    #[error("Distribution fitting failed: {0}")]
    DistributionFitting(String),

    #[error("Correlation matrix error: {0}")]
    CorrelationMatrix(#[from] CorrelationMatrixError),

    #[error("Simulation error: {0}")]
    Simulation(String),

    #[error("Variable '{name}' not found")]
    UnknownVariable { name: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Failures specific to correlation matrices.
///
/// `NotPositiveDefinite` is kept apart from the structural variants so a
/// caller can tell "repairable" from "malformed".
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CorrelationMatrixError {
    #[error("matrix must be square with {expected} rows/columns, got {rows}x{cols}")]
    Shape { expected: usize, rows: usize, cols: usize },

    #[error("matrix is not symmetric at ({row}, {col})")]
    Asymmetric { row: usize, col: usize },

    #[error("diagonal entry {index} is {value}, expected 1.0")]
    Diagonal { index: usize, value: f64 },

    #[error("entry ({row}, {col}) = {value} lies outside [-1, 1]")]
    OutOfRange { row: usize, col: usize, value: f64 },

    #[error("correlation involving '{variable}' is undefined (zero variance or too few paired points)")]
    Degenerate { variable: String },

    #[error("matrix is not positive definite; Cholesky factorization failed")]
    NotPositiveDefinite,
}

pub type SimResult<T> = Result<T, SimError>;
