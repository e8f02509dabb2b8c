use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReconciliationError {
    #[error("Invalid confidence threshold {0}: must be between 0.0 and 1.0")]
    InvalidConfidenceThreshold(f64),

    #[error("Invalid match tolerance {0}: must be a finite, non-negative percentage")]
    InvalidTolerance(f64),

    #[error("Invalid discount ratio {0}: must be between 0.0 (exclusive) and 1.0 (exclusive)")]
    InvalidDiscountRatio(f64),

    #[error("Invalid max search quantity {0}: must be at least 1")]
    InvalidSearchQuantity(u32),

    #[error("Invalid pattern thresholds: {0}")]
    InvalidPatternThresholds(String),

    #[error("Allocation solver called with no price tiers for a quantity of {quantity}")]
    EmptyTierSet { quantity: u32 },

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ReconciliationError>;
