//! Error taxonomy for the evaluation service.

use evalhub_store::{RetryError, StoreError};
use thiserror::Error;

use crate::evaluation::EvaluationStatus;

/// Result type for service operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by repositories, the aggregator and the service facade.
///
/// At an HTTP boundary these map to: `NotFound` -> 404; `Conflict`,
/// `DuplicateMetricRecord` and `InvalidTransition` -> 409; `Validation` ->
/// 400; `RetryExhausted` -> 503.
#[derive(Debug, Error)]
pub enum Error {
    /// The requested entity does not exist.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Entity kind ("usecase", "dataset", "evaluation", "metrics").
        kind: &'static str,
        /// The identifier that was looked up.
        id: String,
    },

    /// Duplicate identifier or a constraint violated by the request.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Metrics were already recorded for this evaluation.
    ///
    /// This is what makes metric recording idempotent under retry replay.
    #[error("metrics already recorded for evaluation {evaluation_id}")]
    DuplicateMetricRecord {
        /// The evaluation whose rollup already exists.
        evaluation_id: String,
    },

    /// The requested status change is not allowed by the lifecycle.
    #[error("invalid status transition: {} -> {}", .from.as_str(), .to.as_str())]
    InvalidTransition {
        /// Status the evaluation currently holds.
        from: EvaluationStatus,
        /// Status that was requested.
        to: EvaluationStatus,
    },

    /// Malformed payload; never retried.
    #[error("validation error: {0}")]
    Validation(String),

    /// Non-retryable store failure.
    #[error("store error: {0}")]
    Store(#[source] StoreError),

    /// A store operation kept failing transiently until the attempt budget
    /// ran out. Carries the last error and the attempt count.
    #[error("{operation} gave up after {attempts} attempts: {source}")]
    RetryExhausted {
        /// Name of the store operation.
        operation: &'static str,
        /// Number of attempts made.
        attempts: u32,
        /// The last transient error observed.
        #[source]
        source: StoreError,
    },

    /// JSON serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<RetryError> for Error {
    fn from(err: RetryError) -> Self {
        match err {
            RetryError::Fatal(StoreError::Conflict(msg)) => Self::Conflict(msg),
            RetryError::Fatal(StoreError::Validation(msg)) => Self::Validation(msg),
            RetryError::Fatal(other) => Self::Store(other),
            RetryError::Exhausted {
                operation,
                attempts,
                source,
                ..
            } => Self::RetryExhausted {
                operation,
                attempts,
                source,
            },
        }
    }
}

impl Error {
    /// Shorthand for a not-found error.
    pub(crate) fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn retry_exhaustion_preserves_kind_and_attempts() {
        let err: Error = RetryError::Exhausted {
            operation: "evaluations.find",
            attempts: 3,
            elapsed: Duration::from_secs(7),
            source: StoreError::Timeout("deadline".into()),
        }
        .into();

        match err {
            Error::RetryExhausted {
                operation,
                attempts,
                source,
            } => {
                assert_eq!(operation, "evaluations.find");
                assert_eq!(attempts, 3);
                assert_eq!(source.kind(), "timeout");
            }
            other => panic!("expected RetryExhausted, got {other:?}"),
        }
    }

    #[test]
    fn fatal_conflict_maps_to_conflict() {
        let err: Error = RetryError::Fatal(StoreError::Conflict("dup".into())).into();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[test]
    fn fatal_connection_maps_to_store() {
        let err: Error = RetryError::Fatal(StoreError::Connection("refused".into())).into();
        assert!(matches!(err, Error::Store(_)));
    }

    #[test]
    fn invalid_transition_names_both_statuses() {
        let err = Error::InvalidTransition {
            from: EvaluationStatus::Completed,
            to: EvaluationStatus::Running,
        };
        assert_eq!(
            err.to_string(),
            "invalid status transition: completed -> running"
        );
    }
}
