//! # Finality Store Integration Tests
//!
//! End-to-end checks through the public API: concurrent writers, the
//! snapshot-plus-stream pairing, single-transaction tracking, the
//! file-backed store and backing-map failures at commit.

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::time::Duration;

use qc_18_transaction_storage::{
    AcceptAllVerifier, BatchOperation, BincodeTransactionCodec, Database, FileBackedKVStore,
    FlowTransactionMetadata, InMemoryKVStore, InMemoryTransactionStorage, KVStoreError,
    KeyValueStore, SignedTransaction, StatesToRecord, StorageConfig, StorageError,
    SystemTimeSource, TransactionSignature, TransactionStatus, TransactionStorageApi,
    TransactionStorageDependencies, TransactionStorageService, TxId,
};
use tokio::time::timeout;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn tx(body: &str) -> SignedTransaction {
    SignedTransaction::new(
        body.as_bytes().to_vec(),
        vec![TransactionSignature::new(vec![1; 32], vec![1; 64])],
    )
}

fn metadata() -> FlowTransactionMetadata {
    FlowTransactionMetadata::new("O=Alice", StatesToRecord::OnlyRelevant).with_peers(["O=Bob"])
}

// =============================================================================
// Concurrency
// =============================================================================

#[test]
fn concurrent_add_on_fresh_id_has_exactly_one_winner() {
    init_tracing();
    let service = InMemoryTransactionStorage::new_in_memory(StorageConfig::default());
    let t = tx("contended");
    let wins = AtomicUsize::new(0);

    std::thread::scope(|scope| {
        for _ in 0..8 {
            scope.spawn(|| {
                let won = service
                    .database()
                    .transaction(|uow| service.add_transaction(uow, &t))
                    .unwrap();
                if won {
                    wins.fetch_add(1, Ordering::SeqCst);
                }
            });
        }
    });

    assert_eq!(wins.load(Ordering::SeqCst), 1);

    let uow = service.database().begin();
    let (stored, status) = service
        .get_transaction_internal(&uow, &t.id())
        .unwrap()
        .unwrap();
    assert_eq!(status, TransactionStatus::Verified);
    assert_eq!(stored.sigs(), t.sigs());
}

#[test]
fn add_racing_a_writer_that_rolls_back_still_lands() {
    init_tracing();
    let service = InMemoryTransactionStorage::new_in_memory(StorageConfig::default());
    let t = tx("rolled-back-rival");
    let staged = Barrier::new(2);

    let won = std::thread::scope(|scope| {
        scope.spawn(|| {
            let rival = service.database().begin();
            assert!(service.add_transaction(&rival, &t).unwrap());
            staged.wait();
            std::thread::sleep(Duration::from_millis(5));
            rival.rollback();
        });

        staged.wait();
        service
            .database()
            .transaction(|uow| service.add_transaction(uow, &t))
            .unwrap()
    });

    assert!(won);
    let uow = service.database().begin();
    assert_eq!(
        service
            .get_transaction_internal(&uow, &t.id())
            .unwrap()
            .map(|(_, status)| status),
        Some(TransactionStatus::Verified)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_track_and_finalize_never_duplicates_or_drops() {
    init_tracing();
    let service = Arc::new(InMemoryTransactionStorage::new_in_memory(StorageConfig::default()));
    let txs: Vec<SignedTransaction> = (0..200).map(|i| tx(&format!("flow-{i}"))).collect();

    let writer = {
        let service = Arc::clone(&service);
        let txs = txs.clone();
        tokio::task::spawn_blocking(move || {
            for t in &txs {
                service
                    .database()
                    .transaction(|uow| {
                        service.record_unnotarised(uow, t, metadata())?;
                        service.finalize_transaction(uow, t, metadata())
                    })
                    .unwrap();
            }
        })
    };

    tokio::time::sleep(Duration::from_millis(1)).await;
    let mut feed = service.track().unwrap();
    writer.await.unwrap();

    let mut seen: Vec<TxId> = feed.snapshot.iter().map(SignedTransaction::id).collect();
    while let Ok(Some(t)) = timeout(Duration::from_millis(100), feed.updates.recv()).await {
        seen.push(t.id());
    }

    let unique: HashSet<TxId> = seen.iter().copied().collect();
    assert_eq!(seen.len(), txs.len(), "no verification delivered twice");
    assert_eq!(unique.len(), txs.len(), "no verification dropped");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn tracked_transaction_resolves_once_finalized_elsewhere() {
    init_tracing();
    let service = Arc::new(InMemoryTransactionStorage::new_in_memory(StorageConfig::default()));
    let t = tx("awaited");

    service
        .database()
        .transaction(|uow| service.record_unnotarised(uow, &t, metadata()))
        .unwrap();

    let future = service.track_transaction_with_no_warning(&t.id()).unwrap();
    let waiter = tokio::spawn(future);

    let finalizer = {
        let service = Arc::clone(&service);
        let t = t.clone();
        tokio::task::spawn_blocking(move || {
            service
                .database()
                .transaction(|uow| service.finalize_transaction(uow, &t, metadata()))
                .unwrap()
        })
    };
    assert!(finalizer.await.unwrap());

    let resolved = timeout(Duration::from_secs(5), waiter)
        .await
        .expect("tracking should resolve")
        .unwrap()
        .unwrap();

    let uow = service.database().begin();
    assert_eq!(Some(resolved), service.get_transaction(&uow, &t.id()).unwrap());
}

// =============================================================================
// Durable storage
// =============================================================================

type FileService = TransactionStorageService<
    FileBackedKVStore,
    BincodeTransactionCodec,
    SystemTimeSource,
    AcceptAllVerifier,
>;

fn open_file_service(path: &Path) -> FileService {
    let deps = TransactionStorageDependencies {
        database: Arc::new(Database::new(FileBackedKVStore::open(path).unwrap())),
        codec: BincodeTransactionCodec,
        time_source: SystemTimeSource,
        verifier: AcceptAllVerifier,
    };
    TransactionStorageService::new(deps, StorageConfig::default())
}

#[test]
fn file_backed_store_survives_restart() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("transactions.db");
    let verified = tx("verified");
    let in_flight = tx("in-flight");
    let aborted = tx("aborted");

    {
        let service = open_file_service(&path);
        service
            .database()
            .transaction(|uow| {
                service.add_transaction(uow, &verified)?;
                service.record_unnotarised(uow, &in_flight, metadata())?;
                service.record_unnotarised(uow, &aborted, metadata())
            })
            .unwrap();
        service
            .database()
            .transaction(|uow| service.remove_unnotarised(uow, &aborted.id()))
            .unwrap();
    }

    let service = open_file_service(&path);
    let uow = service.database().begin();
    assert_eq!(
        service.get_transaction(&uow, &verified.id()).unwrap(),
        Some(verified.clone())
    );
    assert_eq!(service.get_transaction(&uow, &in_flight.id()).unwrap(), None);
    assert_eq!(
        service.get_record(&uow, &in_flight.id()).unwrap().and_then(|r| r.metadata),
        Some(metadata())
    );
    assert_eq!(service.get_transaction_internal(&uow, &aborted.id()).unwrap(), None);
    assert_eq!(service.transactions().unwrap(), vec![verified]);
}

/// Backing map whose batch writes can be made to fail.
#[derive(Default)]
struct FlakyStore {
    inner: InMemoryKVStore,
    fail_writes: Arc<AtomicBool>,
}

impl KeyValueStore for FlakyStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KVStoreError> {
        self.inner.get(key)
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), KVStoreError> {
        self.inner.put(key, value)
    }

    fn delete(&mut self, key: &[u8]) -> Result<(), KVStoreError> {
        self.inner.delete(key)
    }

    fn atomic_batch_write(&mut self, operations: Vec<BatchOperation>) -> Result<(), KVStoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(KVStoreError::Io {
                message: "injected failure".to_string(),
            });
        }
        self.inner.atomic_batch_write(operations)
    }

    fn exists(&self, key: &[u8]) -> Result<bool, KVStoreError> {
        self.inner.exists(key)
    }

    fn prefix_scan(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KVStoreError> {
        self.inner.prefix_scan(prefix)
    }
}

#[tokio::test]
async fn failed_commit_propagates_and_never_notifies() {
    init_tracing();
    let fail_writes = Arc::new(AtomicBool::new(false));
    let store = FlakyStore {
        inner: InMemoryKVStore::new(),
        fail_writes: Arc::clone(&fail_writes),
    };
    let service = TransactionStorageService::new(
        TransactionStorageDependencies {
            database: Arc::new(Database::new(store)),
            codec: BincodeTransactionCodec,
            time_source: SystemTimeSource,
            verifier: AcceptAllVerifier,
        },
        StorageConfig::default(),
    );
    let t = tx("flaky");

    service
        .database()
        .transaction(|uow| service.record_unnotarised(uow, &t, metadata()))
        .unwrap();
    let mut updates = service.updates();

    fail_writes.store(true, Ordering::SeqCst);
    let err = service
        .database()
        .transaction(|uow| service.finalize_transaction(uow, &t, metadata()))
        .unwrap_err();
    assert!(matches!(err, StorageError::Database(KVStoreError::Io { .. })));
    assert!(timeout(Duration::from_millis(20), updates.recv()).await.is_err());
    assert_eq!(service.cache_stats().pending, 0);

    let uow = service.database().begin();
    assert_eq!(
        service.get_transaction_internal(&uow, &t.id()).unwrap(),
        Some((t.clone(), TransactionStatus::InFlight))
    );
    drop(uow);

    fail_writes.store(false, Ordering::SeqCst);
    assert!(service
        .database()
        .transaction(|uow| service.finalize_transaction(uow, &t, metadata()))
        .unwrap());
    assert_eq!(updates.recv().await, Some(t));
}
