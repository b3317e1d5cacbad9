//! Node-wide error types.
//!
//! Errors are a closed set of kinds, each constructed with its kind at the
//! point of detection. The REST collaborator maps kinds to stable string
//! codes through [`ErrorCode`]; nothing in the tree classifies errors by
//! matching message text.

use crate::types::OutPoint;
use thiserror::Error;

/// What a validation rejection is about. Recorded at the detection site so
/// the external mapping never has to inspect message text.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValidationField {
    Signature,
    Address,
    Amount,
    Script,
    Version,
    Timestamp,
    Other,
}

/// The closed error set shared by every subsystem.
#[derive(Error, Debug)]
pub enum NodeError {
    /// Input rejected before any state change. Surfaced to caller; no retry.
    #[error("Validation failed: {reason}")]
    Validation {
        field: ValidationField,
        reason: String,
    },

    /// A referenced entity does not exist. Surfaced; idempotent.
    #[error("{what} not found: {key}")]
    NotFound { what: &'static str, key: String },

    /// Coin selection could not cover the requested amount plus fee.
    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: u64, available: u64 },

    /// An input UTXO is already spent.
    #[error("Double spend of {outpoint}")]
    DoubleSpend { outpoint: OutPoint },

    /// An ACK or reassembly deadline elapsed. Drives retry or dead-letter.
    #[error("Timed out: {operation}")]
    TimedOut { operation: String },

    /// Per-sender quota exceeded. Attributed as spam misbehavior.
    #[error("Rate limited: {subject}")]
    RateLimited { subject: String },

    /// Malformed frame, bad signature, path loop or stale sequence number.
    /// Attributed as invalid_message; repeat offenders are banned.
    #[error("Protocol violation: {reason}")]
    ProtocolViolation { peer: Option<String>, reason: String },

    /// Transport or storage error that may succeed on retry.
    #[error("Transient error: {0}")]
    Transient(String),

    /// Invariant violation. Chain application halts; never auto-recovered.
    #[error("Fatal: {0}")]
    Fatal(String),
}

impl NodeError {
    pub fn validation(field: ValidationField, reason: impl Into<String>) -> Self {
        NodeError::Validation {
            field,
            reason: reason.into(),
        }
    }

    pub fn bad_signature(reason: impl Into<String>) -> Self {
        NodeError::Validation {
            field: ValidationField::Signature,
            reason: reason.into(),
        }
    }

    pub fn not_found(what: &'static str, key: impl Into<String>) -> Self {
        NodeError::NotFound {
            what,
            key: key.into(),
        }
    }

    pub fn protocol(peer: Option<&str>, reason: impl Into<String>) -> Self {
        NodeError::ProtocolViolation {
            peer: peer.map(str::to_string),
            reason: reason.into(),
        }
    }

    /// Errors that a retry may clear. Counted toward circuit-breaker trips.
    pub fn is_retryable(&self) -> bool {
        matches!(self, NodeError::Transient(_) | NodeError::TimedOut { .. })
    }

    /// Errors attributed to a peer as misbehavior.
    pub fn is_misbehavior(&self) -> bool {
        matches!(
            self,
            NodeError::ProtocolViolation { .. }
                | NodeError::RateLimited { .. }
                | NodeError::DoubleSpend { .. }
        )
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, NodeError::Fatal(_))
    }
}

/// Stable error codes exposed on every external endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCode {
    InvalidInput,
    UtxoNotFound,
    InsufficientFunds,
    DoubleSpend,
    InvalidSignature,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::InvalidInput => "INVALID_INPUT",
            ErrorCode::UtxoNotFound => "UTXO_NOT_FOUND",
            ErrorCode::InsufficientFunds => "INSUFFICIENT_FUNDS",
            ErrorCode::DoubleSpend => "DOUBLE_SPEND",
            ErrorCode::InvalidSignature => "INVALID_SIGNATURE",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl From<&NodeError> for ErrorCode {
    fn from(err: &NodeError) -> Self {
        match err {
            NodeError::Validation {
                field: ValidationField::Signature,
                ..
            } => ErrorCode::InvalidSignature,
            NodeError::Validation { .. } => ErrorCode::InvalidInput,
            NodeError::NotFound { .. } => ErrorCode::UtxoNotFound,
            NodeError::InsufficientFunds { .. } => ErrorCode::InsufficientFunds,
            NodeError::DoubleSpend { .. } => ErrorCode::DoubleSpend,
            NodeError::ProtocolViolation { .. } => ErrorCode::InvalidSignature,
            NodeError::TimedOut { .. }
            | NodeError::RateLimited { .. }
            | NodeError::Transient(_)
            | NodeError::Fatal(_) => ErrorCode::InternalError,
        }
    }
}

pub type NodeResult<T> = Result<T, NodeError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OutPoint;

    #[test]
    fn classification_helpers() {
        assert!(NodeError::Transient("io".into()).is_retryable());
        assert!(NodeError::TimedOut {
            operation: "ack".into()
        }
        .is_retryable());
        assert!(!NodeError::validation(ValidationField::Amount, "dust output").is_retryable());

        assert!(NodeError::protocol(Some("peer-1"), "bad signature").is_misbehavior());
        assert!(NodeError::Fatal("merkle mismatch".into()).is_fatal());
    }

    #[test]
    fn rest_code_mapping() {
        let err = NodeError::InsufficientFunds {
            required: 100,
            available: 40,
        };
        assert_eq!(ErrorCode::from(&err), ErrorCode::InsufficientFunds);
        assert_eq!(ErrorCode::from(&err).as_str(), "INSUFFICIENT_FUNDS");

        let err = NodeError::DoubleSpend {
            outpoint: OutPoint::new([0u8; 32], 1),
        };
        assert_eq!(ErrorCode::from(&err), ErrorCode::DoubleSpend);

        let err = NodeError::not_found("UTXO", "deadbeef:0");
        assert_eq!(ErrorCode::from(&err), ErrorCode::UtxoNotFound);

        let err = NodeError::bad_signature("unlock script does not satisfy locking script");
        assert_eq!(ErrorCode::from(&err), ErrorCode::InvalidSignature);
    }
}
