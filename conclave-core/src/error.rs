//! Error types for CONCLAVE operations

use crate::batch::BatchStatus;
use crate::identity::BatchId;
use thiserror::Error;

/// Event bus errors. Handler failures are isolated per handler and
/// reported in dispatch outcomes; they never abort sibling handlers.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BusError {
    #[error("Handler {subscription} for '{topic}' timed out after {timeout_ms}ms on attempt {attempts}")]
    HandlerTimeout {
        topic: String,
        subscription: u64,
        timeout_ms: u64,
        attempts: u32,
    },

    #[error("Handler {subscription} for '{topic}' exhausted {attempts} attempts: {last_error}")]
    HandlerExhausted {
        topic: String,
        subscription: u64,
        attempts: u32,
        last_error: String,
    },

    #[error("Handler task for '{topic}' aborted: {reason}")]
    HandlerAborted { topic: String, reason: String },
}

/// Batch lifecycle errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BatchError {
    #[error("Unknown batch: {batch_id}")]
    UnknownBatch { batch_id: BatchId },

    #[error("Batch {batch_id} is not collecting (status: {status:?})")]
    NotCollecting {
        batch_id: BatchId,
        status: BatchStatus,
    },

    #[error("Invalid batch transition from {from:?} to {to:?}")]
    InvalidTransition { from: BatchStatus, to: BatchStatus },

    #[error("Decision rejected for batch {batch_id}: status is {status:?}")]
    DecisionOutOfPhase {
        batch_id: BatchId,
        status: BatchStatus,
    },

    #[error("Decision names unknown agent '{agent_id}' for batch {batch_id}")]
    UnknownWinner { batch_id: BatchId, agent_id: String },
}

/// Proposal validation errors, raised at the batch manager boundary.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationError {
    #[error("Proposal validation failed: {}", errors.join("; "))]
    Failed { errors: Vec<String> },

    #[error("Proposal kind {proposal_kind} does not match batch kind {batch_kind}")]
    KindMismatch {
        proposal_kind: String,
        batch_kind: String,
    },
}

/// Delegated generative backend errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BackendError {
    #[error("Request to {provider} failed with status {status}: {message}")]
    RequestFailed {
        provider: String,
        status: i32,
        message: String,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Backend {provider} unreachable: {reason}")]
    Unreachable { provider: String, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all CONCLAVE errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConclaveError {
    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    #[error("Batch error: {0}")]
    Batch(#[from] BatchError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for CONCLAVE operations.
pub type ConclaveResult<T> = Result<T, ConclaveError>;

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_bus_error_display_exhausted() {
        let err = BusError::HandlerExhausted {
            topic: "agent:proposal".to_string(),
            subscription: 7,
            attempts: 3,
            last_error: "boom".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("agent:proposal"));
        assert!(msg.contains("3 attempts"));
        assert!(msg.contains("boom"));
    }

    #[test]
    fn test_batch_error_display_not_collecting() {
        let err = BatchError::NotCollecting {
            batch_id: Uuid::nil(),
            status: BatchStatus::Judging,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("not collecting"));
        assert!(msg.contains("Judging"));
    }

    #[test]
    fn test_validation_error_joins_messages() {
        let err = ValidationError::Failed {
            errors: vec!["missing position".to_string(), "bad scale".to_string()],
        };
        let msg = format!("{}", err);
        assert!(msg.contains("missing position; bad scale"));
    }

    #[test]
    fn test_conclave_error_from_variants() {
        let bus = ConclaveError::from(BusError::HandlerAborted {
            topic: "t".to_string(),
            reason: "r".to_string(),
        });
        assert!(matches!(bus, ConclaveError::Bus(_)));

        let batch = ConclaveError::from(BatchError::UnknownBatch {
            batch_id: Uuid::nil(),
        });
        assert!(matches!(batch, ConclaveError::Batch(_)));

        let validation = ConclaveError::from(ValidationError::Failed { errors: vec![] });
        assert!(matches!(validation, ConclaveError::Validation(_)));

        let backend = ConclaveError::from(BackendError::Unreachable {
            provider: "test".to_string(),
            reason: "down".to_string(),
        });
        assert!(matches!(backend, ConclaveError::Backend(_)));
    }
}
