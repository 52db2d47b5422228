//! # Domain Errors
//!
//! Error types for the Transaction Storage subsystem.
//!
//! No-op transitions (re-adding at an equal or lower status, removing a
//! record that is not in flight) are NOT errors. They are reported to the
//! caller as `false` results.

use crate::domain::entities::TxId;
use crate::domain::status::TransactionStatus;
use thiserror::Error;

/// Errors that can occur during transaction storage operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// A persisted status discriminant did not map to any known status.
    ///
    /// Fatal: the row is never coerced to a default status.
    #[error("Found unexpected status value {code:?} in transaction store")]
    UnexpectedStatus { code: String },

    /// A persisted row could not be turned back into a record.
    #[error("Corrupt transaction record {tx_id}: {reason}")]
    CorruptRecord { tx_id: String, reason: String },

    /// A signature attached to a bare transaction failed verification.
    #[error("Invalid signature on transaction {tx_id} by key {signer}")]
    InvalidSignature { tx_id: TxId, signer: String },

    /// A bare transaction arrived without any signature to verify.
    #[error("Transaction {tx_id} carries no signatures")]
    MissingSignatures { tx_id: TxId },

    /// Backing map failure, propagated unchanged.
    #[error("Database error: {0}")]
    Database(#[from] KVStoreError),

    /// Codec failure.
    #[error(transparent)]
    Serialization(#[from] SerializationError),

    /// The notification hub went away before the tracked transaction was verified.
    #[error("Tracking of transaction {tx_id} was abandoned before verification")]
    TrackingClosed { tx_id: TxId },

    /// The committed status changed after the unit of work decided on it.
    ///
    /// Nothing was written; the unit of work may be re-run.
    #[error("Write conflict on transaction {tx_id}: expected {expected:?}, found {found:?}")]
    WriteConflict {
        tx_id: TxId,
        expected: Option<TransactionStatus>,
        found: Option<TransactionStatus>,
    },
}

impl StorageError {
    /// Whether re-running the unit of work may succeed.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StorageError::WriteConflict { .. })
    }
}

/// Result type for transaction storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Key-value store errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KVStoreError {
    /// I/O error during read/write.
    #[error("KV store I/O error: {message}")]
    Io { message: String },
    /// Data corruption in the store.
    #[error("KV store corruption: {message}")]
    Corruption { message: String },
}

/// Serialization errors raised by the transaction codec.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Serialization error: {message}")]
pub struct SerializationError {
    pub message: String,
}

impl SerializationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unexpected_status_display() {
        let err = StorageError::UnexpectedStatus {
            code: "X".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Found unexpected status value \"X\" in transaction store"
        );
    }

    #[test]
    fn test_kv_error_conversion() {
        let kv_err = KVStoreError::Io {
            message: "disk failure".to_string(),
        };
        let storage_err: StorageError = kv_err.into();

        match storage_err {
            StorageError::Database(KVStoreError::Io { message }) => {
                assert!(message.contains("disk failure"));
            }
            other => panic!("Expected Database error, got {other:?}"),
        }
    }

    #[test]
    fn test_only_write_conflicts_are_retryable() {
        let conflict = StorageError::WriteConflict {
            tx_id: TxId::of(b"body"),
            expected: None,
            found: Some(TransactionStatus::Verified),
        };
        assert!(conflict.is_conflict());
        assert!(!StorageError::TrackingClosed {
            tx_id: TxId::of(b"body")
        }
        .is_conflict());
    }

    #[test]
    fn test_serialization_error_is_transparent() {
        let err: StorageError = SerializationError::new("truncated row").into();
        assert_eq!(err.to_string(), "Serialization error: truncated row");
    }
}
