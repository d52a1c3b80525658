//! Analyzer error taxonomy.
//!
//! Decode failures and retry-exhausted inference failures reach the caller.
//! Model availability problems are absorbed by the analyzer (heuristic-only result).

use thiserror::Error;
use uuid::Uuid;

pub type AnalyzerResult<T> = Result<T, AnalyzerError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AnalyzerError {
    /// Unusable input. Terminal, never retried.
    #[error("decode error: {0}")]
    Decode(String),

    /// Classifier missing or failed to initialise.
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),

    /// A single inference call failed.
    #[error("inference error: {0}")]
    Inference(String),

    /// Queue admission refused at the hard limit.
    #[error("queue rejected: depth {depth} reached hard limit {limit}")]
    QueueRejected { depth: usize, limit: usize },

    #[error("analysis attempt timed out after {0} ms")]
    Timeout(u64),

    #[error("work item {0} was cancelled")]
    Cancelled(Uuid),

    #[error("scheduler is shut down")]
    ShutDown,

    #[error("config error: {0}")]
    Config(String),
}

impl AnalyzerError {
    /// Only single-call inference failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AnalyzerError::Inference(_))
    }

    /// Short machine-readable kind, used in metrics and failure reports
    pub fn kind(&self) -> &'static str {
        match self {
            AnalyzerError::Decode(_) => "decode",
            AnalyzerError::ModelUnavailable(_) => "model_unavailable",
            AnalyzerError::Inference(_) => "inference",
            AnalyzerError::QueueRejected { .. } => "queue_rejected",
            AnalyzerError::Timeout(_) => "timeout",
            AnalyzerError::Cancelled(_) => "cancelled",
            AnalyzerError::ShutDown => "shut_down",
            AnalyzerError::Config(_) => "config",
        }
    }
}

impl From<image::ImageError> for AnalyzerError {
    fn from(err: image::ImageError) -> Self {
        AnalyzerError::Decode(err.to_string())
    }
}

impl From<serde_json::Error> for AnalyzerError {
    fn from(err: serde_json::Error) -> Self {
        AnalyzerError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_inference_is_retryable() {
        assert!(AnalyzerError::Inference("boom".into()).is_retryable());
        assert!(!AnalyzerError::Decode("bad".into()).is_retryable());
        assert!(!AnalyzerError::ModelUnavailable("missing".into()).is_retryable());
        assert!(!AnalyzerError::Timeout(10).is_retryable());
        assert!(!AnalyzerError::QueueRejected { depth: 4, limit: 4 }.is_retryable());
    }

    #[test]
    fn test_queue_rejected_message() {
        let err = AnalyzerError::QueueRejected { depth: 8, limit: 8 };
        assert_eq!(err.to_string(), "queue rejected: depth 8 reached hard limit 8");
        assert_eq!(err.kind(), "queue_rejected");
    }
}
