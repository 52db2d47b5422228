//! # Outbound Ports (Driven Ports)
//!
//! Dependencies required by the Transaction Storage service.
//!
//! Default implementations live under `adapters/`.

use crate::domain::entities::{SignedTransaction, Timestamp, TransactionSignature};
use crate::domain::errors::{KVStoreError, SerializationError, StorageError};
use crate::domain::record::PersistedTransaction;

/// Result of a prefix scan: `(key, value)` pairs.
pub type ScanResult = Vec<(Vec<u8>, Vec<u8>)>;

/// Durable backing map.
///
/// Production: `FileBackedKVStore`
/// Testing: `InMemoryKVStore`
pub trait KeyValueStore: Send + Sync {
    /// Get a value by key.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KVStoreError>;

    /// Put a single key-value pair.
    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), KVStoreError>;

    /// Delete a key.
    fn delete(&mut self, key: &[u8]) -> Result<(), KVStoreError>;

    /// Execute an atomic batch write.
    ///
    /// Either ALL operations in the batch are applied, or NONE are.
    fn atomic_batch_write(&mut self, operations: Vec<BatchOperation>) -> Result<(), KVStoreError>;

    /// Check if a key exists.
    fn exists(&self, key: &[u8]) -> Result<bool, KVStoreError>;

    /// All entries whose key starts with `prefix`.
    fn prefix_scan(&self, prefix: &[u8]) -> Result<ScanResult, KVStoreError>;
}

/// Batch operation for atomic writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOperation {
    /// Put a key-value pair.
    Put { key: Vec<u8>, value: Vec<u8> },
    /// Delete a key.
    Delete { key: Vec<u8> },
}

impl BatchOperation {
    /// Create a Put operation.
    pub fn put(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        BatchOperation::Put {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Create a Delete operation.
    pub fn delete(key: impl Into<Vec<u8>>) -> Self {
        BatchOperation::Delete { key: key.into() }
    }
}

/// Byte codec for persisted rows and signature lists.
///
/// Transaction bodies are never interpreted; they pass through as blobs.
pub trait TransactionCodec: Send + Sync + 'static {
    fn encode_signatures(
        &self,
        sigs: &[TransactionSignature],
    ) -> Result<Vec<u8>, SerializationError>;

    fn decode_signatures(
        &self,
        data: &[u8],
    ) -> Result<Vec<TransactionSignature>, SerializationError>;

    fn encode_row(&self, row: &PersistedTransaction) -> Result<Vec<u8>, SerializationError>;

    fn decode_row(&self, data: &[u8]) -> Result<PersistedTransaction, SerializationError>;
}

/// Abstract interface for time operations (for testability).
pub trait TimeSource: Send + Sync {
    /// Milliseconds since epoch.
    fn now(&self) -> Timestamp;
}

/// Checks the signatures attached to a bare transaction.
pub trait SignatureVerifier: Send + Sync {
    /// Fails if any attached signature does not verify over the transaction id.
    fn verify_required_signatures(&self, tx: &SignedTransaction) -> Result<(), StorageError>;
}

/// Supplies the weight budget of a named cache.
pub trait CacheSizingProvider {
    fn weight_budget(&self, cache_name: &str) -> u64;
}
