use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Invalid symbol: {0}")]
    InvalidSymbol(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Daily request quota exhausted: {0}")]
    QuotaExhausted(String),

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Model error: {0}")]
    ModelError(String),

    #[error("Calculation error: {0}")]
    CalculationError(String),
}

impl AnalysisError {
    /// Whether a retry against the same upstream could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, AnalysisError::ApiError(_) | AnalysisError::RateLimited(_))
    }
}
