use thiserror::Error;

/// Error taxonomy for the condition-search core.
///
/// Configuration errors are raised at construction time; arithmetic
/// degeneracies (division by zero, NaN variances) are never surfaced as
/// errors — they are coerced to `0.0` per the aggregator's defined
/// semantics. Programmer-invariant violations (double-activate, a match
/// pointer crossing an `ix_population` boundary) are `debug_assert!`s, not
/// `CoreError` variants: they indicate a bug in the core itself, not bad
/// input, and recovering from them would hide the bug.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    #[error("unknown aggregation kind: {0}")]
    UnknownAggregationKind(String),

    #[error("data source {data_source} is incompatible with aggregation kind {kind}")]
    IncompatibleDataSource { data_source: String, kind: String },

    #[error("column not found: {0}")]
    ColumnNotFound(String),

    #[error("match sequence is empty")]
    EmptyMatches,

    #[error("same-unit declaration references columns of different shapes: {0}")]
    SameUnitMismatch(String),

    #[error("invalid hyperparameters: {0}")]
    InvalidHyperparameters(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::Serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
