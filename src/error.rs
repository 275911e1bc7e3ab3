use chrono::NaiveDate;
use thiserror::Error;

/// Failure taxonomy of the statistics engine.
///
/// Only `MissingCurrentObservation` and `Store` abort a single
/// (metric, date) evaluation. `InsufficientHistory` is raised by the
/// statistical helpers and degraded to an empty window by the builder.
/// `InvalidWindowSpec` is produced while loading configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("no observation for metric {metric_id} on {date}")]
    MissingCurrentObservation { metric_id: String, date: NaiveDate },
    #[error("insufficient history for metric {metric_id}")]
    InsufficientHistory { metric_id: String },
    #[error("invalid window spec: {reason}")]
    InvalidWindowSpec { reason: String },
    #[error("observation store error: {0}")]
    Store(String),
}

impl EngineError {
    pub fn invalid_window(reason: impl Into<String>) -> Self {
        Self::InvalidWindowSpec {
            reason: reason.into(),
        }
    }

    pub fn insufficient_history(metric_id: impl Into<String>) -> Self {
        Self::InsufficientHistory {
            metric_id: metric_id.into(),
        }
    }

    /// Errors that mean "skip this metric today" rather than "something broke".
    pub fn is_skippable(&self) -> bool {
        matches!(self, Self::MissingCurrentObservation { .. })
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
