//! Error types for the sentiment risk engine

use uuid::Uuid;

/// Result type alias using the engine's error type
pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A classification result references a label index outside 0..=4
    #[error("invalid label index: {0}")]
    InvalidLabelIndex(i64),

    /// A stored or supplied label name is not in the registry
    #[error("unknown label name: {0:?}")]
    UnknownLabelName(String),

    /// Confidence is not a finite value in [0, 1]
    #[error("invalid confidence: {0}")]
    InvalidConfidence(f64),

    #[error("session not found: {0}")]
    SessionNotFound(Uuid),

    /// Requested response ids that have no persisted record
    #[error("responses not found: {}", format_ids(.0))]
    ResponsesNotFound(Vec<Uuid>),

    /// The external store failed or timed out while serving a query
    #[error("aggregation unavailable: {0}")]
    AggregationUnavailable(String),
}

impl EngineError {
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::AggregationUnavailable(msg.into())
    }
}

fn format_ids(ids: &[Uuid]) -> String {
    ids.iter()
        .map(Uuid::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        Self::AggregationUnavailable(err.to_string())
    }
}
