//! # Transaction Storage Service
//!
//! The finality store: implements `TransactionStorageApi` over a
//! [`Database`] of persisted rows fronted by a [`WeightedCache`].
//!
//! ## Locking
//!
//! Every compound read-modify-write runs under the cache mutex, which is the
//! single exclusive lock of the store. Lock order is always
//! cache → backing map → notification waiters. Commit hooks that settle the
//! cache run after the backing map lock is released.
//!
//! ## Views
//!
//! - Writers decide on the *effective* record: their own staged row first,
//!   then a pending write by any open unit of work, then committed state.
//!   Racing writers on one id serialize.
//! - Readers see their own pending writes plus committed state.
//!
//! Every writer decision also registers a commit check on the status it
//! observed. If the committed status differs at commit (a newer commit
//! landed, or the pending write it relied on rolled back) the unit of work
//! fails with `WriteConflict` and writes nothing.

mod mapping;

use crate::adapters::{
    BincodeTransactionCodec, Ed25519SignatureVerifier, InMemoryKVStore, SystemTimeSource,
};
use crate::domain::cache::{CacheLookup, CacheStats, WeightedCache};
use crate::domain::config::StorageConfig;
use crate::domain::entities::{
    FlowTransactionMetadata, SignedTransaction, TransactionRecord, TransactionSignature, TxId,
};
use crate::domain::errors::{StorageError, StorageResult};
use crate::domain::record::KeyPrefix;
use crate::domain::status::TransactionStatus;
use crate::notifications::{DataFeed, NotificationHub, TransactionFuture, VerifiedStream};
use crate::ports::inbound::TransactionStorageApi;
use crate::ports::outbound::{
    CacheSizingProvider, KeyValueStore, SignatureVerifier, TimeSource, TransactionCodec,
};
use crate::unit_of_work::{CommitHooks, Database, UnitOfWork};
use mapping::{from_row, status_of_row, to_row};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Logged when a transaction is tracked from inside an open unit of work.
pub const TRANSACTION_ALREADY_IN_PROGRESS_WARNING: &str =
    "track_transaction called inside an open unit of work; a verification staged by that \
     unit of work is only observed once it commits";

/// Dependencies for TransactionStorageService
pub struct TransactionStorageDependencies<KV: KeyValueStore, C, T, V> {
    pub database: Arc<Database<KV>>,
    pub codec: C,
    pub time_source: T,
    pub verifier: V,
}

/// Service wired to in-memory storage and the default adapters.
pub type InMemoryTransactionStorage = TransactionStorageService<
    InMemoryKVStore,
    BincodeTransactionCodec,
    SystemTimeSource,
    Ed25519SignatureVerifier,
>;

/// The Transaction Storage Service.
pub struct TransactionStorageService<KV, C, T, V>
where
    KV: KeyValueStore,
    C: TransactionCodec,
    T: TimeSource,
    V: SignatureVerifier,
{
    database: Arc<Database<KV>>,
    codec: Arc<C>,
    time_source: T,
    verifier: V,
    cache: Arc<Mutex<WeightedCache>>,
    hub: Arc<NotificationHub>,
    config: StorageConfig,
}

impl InMemoryTransactionStorage {
    /// Create a service with an empty in-memory backing map.
    pub fn new_in_memory(config: StorageConfig) -> Self {
        let deps = TransactionStorageDependencies {
            database: Arc::new(Database::new(InMemoryKVStore::new())),
            codec: BincodeTransactionCodec,
            time_source: SystemTimeSource,
            verifier: Ed25519SignatureVerifier,
        };
        Self::new(deps, config)
    }
}

impl<KV, C, T, V> TransactionStorageService<KV, C, T, V>
where
    KV: KeyValueStore,
    C: TransactionCodec,
    T: TimeSource,
    V: SignatureVerifier,
{
    pub fn new(deps: TransactionStorageDependencies<KV, C, T, V>, config: StorageConfig) -> Self {
        let budget = config.weight_budget(&config.cache_name);
        debug!(cache = %config.cache_name, budget, "Creating transaction storage");

        Self {
            database: deps.database,
            codec: Arc::new(deps.codec),
            time_source: deps.time_source,
            verifier: deps.verifier,
            cache: Arc::new(Mutex::new(WeightedCache::new(config.cache_name.clone(), budget))),
            hub: Arc::new(NotificationHub::new()),
            config,
        }
    }

    /// Source of units of work for this store.
    pub fn database(&self) -> &Arc<Database<KV>> {
        &self.database
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.lock().stats()
    }

    /// Full record, including flow-recovery metadata, whatever its status.
    pub fn get_record(
        &self,
        uow: &UnitOfWork<KV>,
        id: &TxId,
    ) -> StorageResult<Option<TransactionRecord>> {
        let mut cache = self.cache.lock();
        self.read_view(&mut cache, uow, id)
    }

    /// Committed verified transactions.
    pub fn transactions(&self) -> StorageResult<Vec<SignedTransaction>> {
        self.database
            .read_committed(|store| self.verified_snapshot(store))
    }

    /// Verified transactions committed from now on.
    pub fn updates(&self) -> VerifiedStream {
        self.hub.subscribe()
    }

    /// Tracking future plus the caveat to report, if any.
    pub fn track_transaction_internal(
        &self,
        id: &TxId,
        ambient: Option<&dyn CommitHooks>,
    ) -> StorageResult<(TransactionFuture, Option<&'static str>)> {
        let warning = ambient.map(|_| TRANSACTION_ALREADY_IN_PROGRESS_WARNING);
        let future = self.track_transaction_with_no_warning(id)?;
        Ok((future, warning))
    }

    // =========================================================================
    // Cache + backing map coupling
    // =========================================================================

    fn decode(&self, bytes: &[u8]) -> StorageResult<TransactionRecord> {
        let row = self.codec.decode_row(bytes)?;
        from_row(self.codec.as_ref(), row)
    }

    fn load_through(
        &self,
        cache: &mut WeightedCache,
        uow: &UnitOfWork<KV>,
        id: &TxId,
        populate: bool,
    ) -> StorageResult<Option<TransactionRecord>> {
        let key = KeyPrefix::transaction_key(id);
        let record = match uow.get(&key)? {
            Some(bytes) => Some(self.decode(&bytes)?),
            None => None,
        };

        if populate && !uow.is_staged(&key) {
            if let Some(record) = &record {
                cache.populate(record.clone());
            }
        }
        Ok(record)
    }

    /// Record as the writer must see it.
    fn effective(
        &self,
        cache: &mut WeightedCache,
        uow: &UnitOfWork<KV>,
        id: &TxId,
    ) -> StorageResult<Option<TransactionRecord>> {
        if uow.is_staged(&KeyPrefix::transaction_key(id)) {
            return self.load_through(cache, uow, id, false);
        }

        let record = match cache.effective(id) {
            CacheLookup::Resident(record) => record,
            CacheLookup::Bypass | CacheLookup::Miss => self.load_through(cache, uow, id, true)?,
        };
        self.guard_decision(uow, *id, record.as_ref().map(|r| r.status));
        Ok(record)
    }

    /// Fail the commit of `uow` unless the committed status of `id` is
    /// still `observed` by then.
    ///
    /// A mismatch also drops the cached copy, so a re-run reloads it.
    fn guard_decision(
        &self,
        uow: &UnitOfWork<KV>,
        id: TxId,
        observed: Option<TransactionStatus>,
    ) {
        let codec = Arc::clone(&self.codec);
        let stale = Arc::new(AtomicBool::new(false));
        let mismatch = Arc::clone(&stale);

        let registered = uow.check_on_commit(
            KeyPrefix::transaction_key(&id),
            Box::new(move |committed| {
                let found = committed
                    .map(|bytes| status_of_row(codec.as_ref(), bytes))
                    .transpose()?;
                if found == observed {
                    return Ok(());
                }
                mismatch.store(true, Ordering::Relaxed);
                Err(StorageError::WriteConflict {
                    tx_id: id,
                    expected: observed,
                    found,
                })
            }),
        );

        if registered {
            let cache = Arc::clone(&self.cache);
            uow.after_completion(Box::new(move |_| {
                if stale.load(Ordering::Relaxed) {
                    cache.lock().invalidate(&id);
                }
            }));
        }
    }

    /// Record as a reader in `uow` may see it.
    fn read_view(
        &self,
        cache: &mut WeightedCache,
        uow: &UnitOfWork<KV>,
        id: &TxId,
    ) -> StorageResult<Option<TransactionRecord>> {
        match cache.read(id, uow.id()) {
            CacheLookup::Resident(record) => Ok(record),
            CacheLookup::Bypass => self.load_through(cache, uow, id, false),
            CacheLookup::Miss => self.load_through(cache, uow, id, true),
        }
    }

    /// Stage `record` in the unit of work, then in the cache.
    fn write(
        &self,
        cache: &mut WeightedCache,
        uow: &UnitOfWork<KV>,
        record: TransactionRecord,
    ) -> StorageResult<()> {
        let row = to_row(
            self.codec.as_ref(),
            &record,
            self.time_source.now(),
            uow.flow_run_id(),
        )?;
        let bytes = self.codec.encode_row(&row)?;
        let id = record.id();

        uow.put(KeyPrefix::transaction_key(&id), bytes);
        self.stage(cache, uow, id, Some(record));
        Ok(())
    }

    fn stage(
        &self,
        cache: &mut WeightedCache,
        uow: &UnitOfWork<KV>,
        id: TxId,
        value: Option<TransactionRecord>,
    ) {
        let owner = uow.id();
        if cache.stage(id, owner, value) {
            let shared = Arc::clone(&self.cache);
            uow.after_completion(Box::new(move |outcome| {
                shared.lock().settle(&id, owner, outcome);
            }));
        }
    }

    /// Write `record` as newly verified and queue its notification.
    fn write_verified(
        &self,
        cache: &mut WeightedCache,
        uow: &UnitOfWork<KV>,
        record: TransactionRecord,
    ) -> StorageResult<()> {
        let tx = record.transaction.clone();
        self.write(cache, uow, record)?;
        debug!(tx_id = %tx.id(), signatures = tx.sigs().len(), "Transaction verified");
        self.hub.publish(tx, Some(uow));
        Ok(())
    }

    /// Upgrade `existing` to verified if its status is exactly `expected`.
    ///
    /// Returns `false` when nothing matched.
    fn upgrade_matching(
        &self,
        cache: &mut WeightedCache,
        uow: &UnitOfWork<KV>,
        existing: &TransactionRecord,
        expected: TransactionStatus,
        sigs: &[TransactionSignature],
    ) -> StorageResult<bool> {
        if existing.status != expected {
            return Ok(false);
        }
        let upgraded = existing.verified_with(sigs.iter().cloned(), None);
        self.write_verified(cache, uow, upgraded)?;
        Ok(true)
    }

    fn verified_snapshot(&self, store: &KV) -> StorageResult<Vec<SignedTransaction>> {
        let rows = store.prefix_scan(KeyPrefix::Transaction.as_bytes())?;
        let mut verified = Vec::new();
        for (_, bytes) in rows {
            let record = self.decode(&bytes)?;
            if record.status.is_verified() {
                verified.push(record.transaction);
            }
        }
        Ok(verified)
    }

    fn committed_record(&self, store: &KV, id: &TxId) -> StorageResult<Option<TransactionRecord>> {
        store
            .get(&KeyPrefix::transaction_key(id))?
            .map(|bytes| self.decode(&bytes))
            .transpose()
    }
}

impl<KV, C, T, V> TransactionStorageApi for TransactionStorageService<KV, C, T, V>
where
    KV: KeyValueStore,
    C: TransactionCodec,
    T: TimeSource,
    V: SignatureVerifier,
{
    type Store = KV;

    fn add_transaction(&self, uow: &UnitOfWork<KV>, tx: &SignedTransaction) -> StorageResult<bool> {
        let mut cache = self.cache.lock();
        let id = tx.id();

        match self.effective(&mut cache, uow, &id)? {
            None => {
                let record = TransactionRecord::new(tx.clone(), TransactionStatus::Verified, None);
                self.write_verified(&mut cache, uow, record)?;
                Ok(true)
            }
            Some(existing) if existing.status.permits(TransactionStatus::Verified) => {
                let upgraded = existing.verified_with(tx.sigs().iter().cloned(), None);
                self.write_verified(&mut cache, uow, upgraded)?;
                Ok(true)
            }
            Some(existing) => {
                debug!(tx_id = %id, status = %existing.status, "Transaction already verified");
                Ok(false)
            }
        }
    }

    fn add_unverified_transaction(
        &self,
        uow: &UnitOfWork<KV>,
        tx: &SignedTransaction,
    ) -> StorageResult<bool> {
        self.verifier.verify_required_signatures(tx)?;

        let mut cache = self.cache.lock();
        let id = tx.id();

        match self.effective(&mut cache, uow, &id)? {
            None => {
                let record = TransactionRecord::new(
                    tx.clone(),
                    TransactionStatus::Unverified,
                    None,
                );
                self.write(&mut cache, uow, record)?;
                debug!(tx_id = %id, "Recorded unverified transaction");
                Ok(true)
            }
            Some(existing) => {
                info!(
                    tx_id = %id,
                    status = %existing.status,
                    "Transaction already recorded, ignoring unverified copy"
                );
                Ok(false)
            }
        }
    }

    fn record_unnotarised(
        &self,
        uow: &UnitOfWork<KV>,
        tx: &SignedTransaction,
        metadata: FlowTransactionMetadata,
    ) -> StorageResult<bool> {
        let mut cache = self.cache.lock();
        let id = tx.id();

        match self.effective(&mut cache, uow, &id)? {
            None => {
                let record = TransactionRecord::new(
                    tx.clone(),
                    TransactionStatus::InFlight,
                    Some(metadata),
                );
                self.write(&mut cache, uow, record)?;
                debug!(tx_id = %id, "Recorded in-flight transaction");
                Ok(true)
            }
            Some(existing) => {
                debug!(tx_id = %id, status = %existing.status, "Transaction already recorded");
                Ok(false)
            }
        }
    }

    fn remove_unnotarised(&self, uow: &UnitOfWork<KV>, id: &TxId) -> StorageResult<bool> {
        let mut cache = self.cache.lock();

        match self.effective(&mut cache, uow, id)? {
            Some(existing) if existing.status.is_removable() => {
                uow.delete(KeyPrefix::transaction_key(id));
                self.stage(&mut cache, uow, *id, None);
                debug!(tx_id = %id, "Removed in-flight transaction");
                Ok(true)
            }
            Some(existing) => {
                debug!(tx_id = %id, status = %existing.status, "Refusing to remove transaction");
                Ok(false)
            }
            None => {
                debug!(tx_id = %id, "No transaction to remove");
                Ok(false)
            }
        }
    }

    fn finalize_transaction(
        &self,
        uow: &UnitOfWork<KV>,
        tx: &SignedTransaction,
        metadata: FlowTransactionMetadata,
    ) -> StorageResult<bool> {
        let mut cache = self.cache.lock();
        let id = tx.id();

        match self.effective(&mut cache, uow, &id)? {
            None => {
                let record = TransactionRecord::new(
                    tx.clone(),
                    TransactionStatus::Verified,
                    Some(metadata),
                );
                self.write_verified(&mut cache, uow, record)?;
                Ok(true)
            }
            Some(existing) if existing.status.permits(TransactionStatus::Verified) => {
                let upgraded = existing.verified_with(tx.sigs().iter().cloned(), Some(metadata));
                self.write_verified(&mut cache, uow, upgraded)?;
                Ok(true)
            }
            Some(existing) => {
                debug!(tx_id = %id, status = %existing.status, "Transaction already finalized");
                Ok(false)
            }
        }
    }

    fn finalize_transaction_with_extra_signatures(
        &self,
        uow: &UnitOfWork<KV>,
        tx: &SignedTransaction,
        extra_sigs: &[TransactionSignature],
    ) -> StorageResult<bool> {
        let mut cache = self.cache.lock();
        let id = tx.id();
        let sigs: Vec<TransactionSignature> =
            tx.sigs().iter().chain(extra_sigs).cloned().collect();

        let Some(existing) = self.effective(&mut cache, uow, &id)? else {
            let record = TransactionRecord::new(
                tx.with_additional_signatures(extra_sigs.iter().cloned()),
                TransactionStatus::Verified,
                None,
            );
            self.write_verified(&mut cache, uow, record)?;
            return Ok(true);
        };

        let upgraded =
            self.upgrade_matching(&mut cache, uow, &existing, TransactionStatus::InFlight, &sigs)?
                || self.upgrade_matching(
                    &mut cache,
                    uow,
                    &existing,
                    TransactionStatus::Unverified,
                    &sigs,
                )?;

        if !upgraded {
            debug!(
                tx_id = %id,
                status = %existing.status,
                "No unverified or in-flight entry to finalize"
            );
        }
        Ok(upgraded)
    }

    fn get_transaction(
        &self,
        uow: &UnitOfWork<KV>,
        id: &TxId,
    ) -> StorageResult<Option<SignedTransaction>> {
        let mut cache = self.cache.lock();
        Ok(self
            .read_view(&mut cache, uow, id)?
            .filter(|record| record.status.is_verified())
            .map(|record| record.transaction))
    }

    fn get_transaction_internal(
        &self,
        uow: &UnitOfWork<KV>,
        id: &TxId,
    ) -> StorageResult<Option<(SignedTransaction, TransactionStatus)>> {
        let mut cache = self.cache.lock();
        Ok(self
            .read_view(&mut cache, uow, id)?
            .map(|record| (record.transaction, record.status)))
    }

    fn track(&self) -> StorageResult<DataFeed> {
        self.database.read_committed(|store| {
            let snapshot = self.verified_snapshot(store)?;
            let updates = self.hub.subscribe();
            Ok(DataFeed { snapshot, updates })
        })
    }

    fn track_transaction(
        &self,
        id: &TxId,
        ambient: Option<&dyn CommitHooks>,
    ) -> StorageResult<TransactionFuture> {
        let (future, warning) = self.track_transaction_internal(id, ambient)?;
        if let Some(warning) = warning {
            warn!(tx_id = %id, "{warning}");
        }
        Ok(future)
    }

    fn track_transaction_with_no_warning(&self, id: &TxId) -> StorageResult<TransactionFuture> {
        self.database.read_committed(|store| {
            match self.committed_record(store, id)? {
                Some(record) if record.status.is_verified() => {
                    Ok(TransactionFuture::ready(record.transaction))
                }
                _ => Ok(self.hub.register_waiter(*id)),
            }
        })
    }
}
