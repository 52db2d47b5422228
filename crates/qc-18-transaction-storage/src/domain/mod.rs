//! # Domain Layer
//!
//! Pure domain logic for the Transaction Storage subsystem.
//!
//! ## Modules
//!
//! - `entities` - Transaction ids, signatures, signed transactions, recovery metadata
//! - `status` - Status state machine and its persisted discriminant
//! - `record` - Persisted row layout and key prefixes
//! - `cache` - Weight-bounded transaction cache
//! - `config` - Cache sizing configuration
//! - `errors` - Domain error types

pub mod cache;
pub mod config;
pub mod entities;
pub mod errors;
pub mod record;
pub mod status;

pub use cache::{estimate_weight, CacheLookup, CacheStats, WeightedCache};
pub use config::StorageConfig;
pub use entities::{
    merge_signatures, FlowTransactionMetadata, SignedTransaction, StatesToRecord, Timestamp,
    TransactionRecord, TransactionSignature, TxId, TX_ID_SIZE,
};
pub use errors::{KVStoreError, SerializationError, StorageError, StorageResult};
pub use record::{KeyPrefix, PersistedTransaction};
pub use status::TransactionStatus;
