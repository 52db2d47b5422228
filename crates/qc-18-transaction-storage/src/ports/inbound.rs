//! # Inbound Ports (Driving Ports)
//!
//! The primary API for the Transaction Storage subsystem.
//!
//! Mutations and reads run inside a caller-supplied [`UnitOfWork`]; their
//! effects, including notifications, become visible only when it commits.
//! Tracking operations read committed state.

use crate::domain::entities::{
    FlowTransactionMetadata, SignedTransaction, TransactionSignature, TxId,
};
use crate::domain::errors::StorageResult;
use crate::domain::status::TransactionStatus;
use crate::notifications::{DataFeed, TransactionFuture};
use crate::ports::outbound::KeyValueStore;
use crate::unit_of_work::{CommitHooks, UnitOfWork};

/// Primary API for the Transaction Storage subsystem.
///
/// Requests for illegal transitions are not errors; they return `Ok(false)`.
pub trait TransactionStorageApi {
    type Store: KeyValueStore;

    /// Record `tx` as `VERIFIED`.
    ///
    /// Creates the entry, or upgrades an `UNVERIFIED`/`IN_FLIGHT` one and
    /// merges the signatures of `tx` into it. Returns `true` if the
    /// transaction newly became verified.
    fn add_transaction(
        &self,
        uow: &UnitOfWork<Self::Store>,
        tx: &SignedTransaction,
    ) -> StorageResult<bool>;

    /// Record a bare transaction as `UNVERIFIED` after checking its signatures.
    ///
    /// ## Errors
    ///
    /// - `InvalidSignature` / `MissingSignatures`: raised before any write
    fn add_unverified_transaction(
        &self,
        uow: &UnitOfWork<Self::Store>,
        tx: &SignedTransaction,
    ) -> StorageResult<bool>;

    /// Record `tx` as `IN_FLIGHT` with its flow-recovery metadata.
    ///
    /// No-op if the id is already stored.
    fn record_unnotarised(
        &self,
        uow: &UnitOfWork<Self::Store>,
        tx: &SignedTransaction,
        metadata: FlowTransactionMetadata,
    ) -> StorageResult<bool>;

    /// Delete an `IN_FLIGHT` entry. Any other status is left untouched.
    fn remove_unnotarised(&self, uow: &UnitOfWork<Self::Store>, id: &TxId) -> StorageResult<bool>;

    /// Create or upgrade to `VERIFIED`, attaching `metadata`.
    fn finalize_transaction(
        &self,
        uow: &UnitOfWork<Self::Store>,
        tx: &SignedTransaction,
        metadata: FlowTransactionMetadata,
    ) -> StorageResult<bool>;

    /// Upgrade to `VERIFIED`, merging `extra_sigs` into the signature set.
    ///
    /// An `IN_FLIGHT` entry is tried first, then an `UNVERIFIED` one.
    fn finalize_transaction_with_extra_signatures(
        &self,
        uow: &UnitOfWork<Self::Store>,
        tx: &SignedTransaction,
        extra_sigs: &[TransactionSignature],
    ) -> StorageResult<bool>;

    /// The transaction, only if it is `VERIFIED`.
    fn get_transaction(
        &self,
        uow: &UnitOfWork<Self::Store>,
        id: &TxId,
    ) -> StorageResult<Option<SignedTransaction>>;

    /// The transaction and its status, whatever the status.
    fn get_transaction_internal(
        &self,
        uow: &UnitOfWork<Self::Store>,
        id: &TxId,
    ) -> StorageResult<Option<(SignedTransaction, TransactionStatus)>>;

    /// All committed verified transactions plus the stream of later ones.
    fn track(&self) -> StorageResult<DataFeed>;

    /// Future resolving once `id` is verified.
    ///
    /// Logs a warning when called from inside an open unit of work.
    fn track_transaction(
        &self,
        id: &TxId,
        ambient: Option<&dyn CommitHooks>,
    ) -> StorageResult<TransactionFuture>;

    /// As [`TransactionStorageApi::track_transaction`], without the warning.
    fn track_transaction_with_no_warning(&self, id: &TxId) -> StorageResult<TransactionFuture>;
}
