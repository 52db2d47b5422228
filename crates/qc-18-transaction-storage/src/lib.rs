//! # Transaction Storage (qc-18)
//!
//! The transaction-finality store: durably records signed transactions,
//! tracks their verification status, fronts the backing map with a
//! weight-bounded cache, and notifies observers exactly once when a
//! transaction becomes final.
//!
//! ## Status Lifecycle
//!
//! ```text
//!   [UNVERIFIED] ──→ [VERIFIED] ←── [IN_FLIGHT] ──→ <deleted>
//! ```
//!
//! `VERIFIED` is terminal. Any other requested transition is a no-op
//! reported as `false`, never an error.
//!
//! ## Domain Invariants
//!
//! | Invariant | Description |
//! |-----------|-------------|
//! | Monotone status | Only `UNVERIFIED → VERIFIED` and `IN_FLIGHT → VERIFIED` |
//! | Finality is permanent | A `VERIFIED` record is never removed or downgraded |
//! | Map before cache | The backing map is never behind the cache |
//! | Deferred delivery | Verified events fire only after the unit of work commits |
//! | Exactly once | One event per transaction that newly becomes verified |
//! | Fail-fast decode | An unknown persisted status code is an error |
//!
//! ## Crate Structure (Hexagonal Architecture)
//!
//! - `domain/` - Entities, status machine, row layout, weighted cache, config, errors
//! - `ports/` - Port traits (inbound API, outbound SPI)
//! - `adapters/` - Backing maps, codec, clocks, signature verification
//! - `unit_of_work.rs` - Ambient atomic unit of work with commit hooks
//! - `notifications.rs` - Commit-deferred verified-transaction notifications
//! - `service/` - Application service implementing the API
//!
//! ## Usage
//!
//! ```ignore
//! use qc_18_transaction_storage::{
//!     InMemoryTransactionStorage, StorageConfig, TransactionStorageApi,
//! };
//!
//! let service = InMemoryTransactionStorage::new_in_memory(StorageConfig::default());
//! let mut feed = service.track()?;
//!
//! service
//!     .database()
//!     .transaction(|uow| service.add_transaction(uow, &tx))?;
//!
//! let verified = feed.updates.recv().await;
//! ```

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod adapters;
pub mod domain;
pub mod notifications;
pub mod ports;
pub mod service;
pub mod unit_of_work;

// Re-export key types for convenience
pub use adapters::{
    AcceptAllVerifier, BincodeTransactionCodec, Ed25519SignatureVerifier, FileBackedKVStore,
    InMemoryKVStore, ManualClock, SystemTimeSource,
};
pub use domain::{
    CacheStats, FlowTransactionMetadata, KVStoreError, SerializationError, SignedTransaction,
    StatesToRecord, StorageConfig, StorageError, StorageResult, TransactionRecord,
    TransactionSignature, TransactionStatus, TxId,
};
pub use notifications::{DataFeed, NotificationHub, TransactionFuture, VerifiedStream};
pub use ports::inbound::TransactionStorageApi;
pub use ports::outbound::{
    BatchOperation, CacheSizingProvider, KeyValueStore, SignatureVerifier, TimeSource,
    TransactionCodec,
};
pub use service::{
    InMemoryTransactionStorage, TransactionStorageDependencies, TransactionStorageService,
    TRANSACTION_ALREADY_IN_PROGRESS_WARNING,
};
pub use unit_of_work::{CommitHooks, CompletionOutcome, Database, UnitOfWork, UnitOfWorkId};
