use thiserror::Error;

#[derive(Debug, Error)]
pub enum PortfolioError {
    #[error("Invalid input: {field} — {reason}")]
    InvalidInput { field: String, reason: String },

    #[error("Dimension mismatch in {field}: expected {expected}, got {actual}")]
    DimensionMismatch {
        field: String,
        expected: usize,
        actual: usize,
    },

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Singular matrix: {0}")]
    SingularMatrix(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<serde_json::Error> for PortfolioError {
    fn from(e: serde_json::Error) -> Self {
        PortfolioError::SerializationError(e.to_string())
    }
}
