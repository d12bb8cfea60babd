//! Error types for the optimization engine

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Insufficient data: need at least {required} bars, got {available}")]
    DataInsufficient { required: usize, available: usize },

    #[error("Missing parameter: {0}")]
    MissingParameter(String),

    #[error("Invalid parameter {name}: {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("Candle series is not strictly increasing at bar {index}")]
    UnorderedSeries { index: usize },

    #[error("Data unavailable for {symbol}: {reason}")]
    DataUnavailable { symbol: String, reason: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Population is empty")]
    EmptyPopulation,

    #[error("Registry error: {0}")]
    Registry(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

impl From<persistence::DbError> for EngineError {
    fn from(e: persistence::DbError) -> Self {
        EngineError::Registry(e.to_string())
    }
}
