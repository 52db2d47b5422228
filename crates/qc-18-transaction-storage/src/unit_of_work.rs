//! # Unit of Work
//!
//! Ambient atomic context in which every storage mutation runs.
//!
//! Writes are staged in a private overlay and applied to the backing map as
//! one atomic batch on [`UnitOfWork::commit`]. Reads see the overlay first,
//! then the committed map.
//!
//! ## Commit
//!
//! ```text
//! lock map ──→ commit checks ──ok──→ batch write ──ok──→ on_commit hooks
//!                   │                    │
//!                   └─WriteConflict──────┴─error──→ rolled back
//! unlock map ──→ after_completion hooks (outcome)
//! ```
//!
//! A commit check compares the committed value of a key with what the unit
//! of work based its decision on. Any mismatch fails the whole commit before
//! a single write lands.
//!
//! ## Hooks
//!
//! | Hook | Runs | Lock held |
//! |------|------|-----------|
//! | `on_commit` | after the batch is applied, commit only | backing map |
//! | `after_completion` | after commit or rollback, with the outcome | none |
//!
//! `on_commit` hooks must not block or take the cache lock. Dropping a unit
//! of work that was never completed rolls it back.

use crate::domain::errors::{StorageError, StorageResult};
use crate::ports::outbound::{BatchOperation, KeyValueStore};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Attempts [`Database::transaction`] makes before surfacing a write conflict.
pub const MAX_COMMIT_ATTEMPTS: u32 = 32;

/// Longest pause between two attempts.
const MAX_CONFLICT_BACKOFF: Duration = Duration::from_millis(1);

/// Identifies a unit of work for the lifetime of its `Database`.
pub type UnitOfWorkId = u64;

/// How a unit of work ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionOutcome {
    Committed,
    RolledBack,
}

pub type CommitHook = Box<dyn FnOnce() + Send>;
pub type CompletionHook = Box<dyn FnOnce(CompletionOutcome) + Send>;

/// Validates the committed value of one key (`None` if absent) at commit.
pub type CommitCheck = Box<dyn FnOnce(Option<&[u8]>) -> StorageResult<()> + Send>;

/// Hook registration, independent of the backing map type.
pub trait CommitHooks {
    fn unit_of_work_id(&self) -> UnitOfWorkId;

    /// Run `hook` once the unit of work's writes are applied.
    ///
    /// Discarded on rollback.
    fn on_commit(&self, hook: CommitHook);

    /// Run `hook` once the unit of work has committed or rolled back.
    fn after_completion(&self, hook: CompletionHook);
}

/// Committed backing map plus the source of units of work.
pub struct Database<KV: KeyValueStore> {
    store: Mutex<KV>,
    next_id: AtomicU64,
}

impl<KV: KeyValueStore> Database<KV> {
    pub fn new(store: KV) -> Self {
        Self {
            store: Mutex::new(store),
            next_id: AtomicU64::new(1),
        }
    }

    /// Start a unit of work not tied to any flow.
    pub fn begin(self: &Arc<Self>) -> UnitOfWork<KV> {
        self.open(None)
    }

    /// Start a unit of work on behalf of a flow run.
    pub fn begin_for_flow(self: &Arc<Self>, run_id: Uuid) -> UnitOfWork<KV> {
        self.open(Some(run_id))
    }

    /// Run `work` in a fresh unit of work.
    ///
    /// Commits on `Ok`, rolls back on `Err`. A commit that fails with a write
    /// conflict re-runs `work` in a new unit of work, up to
    /// [`MAX_COMMIT_ATTEMPTS`] times in total.
    pub fn transaction<T, E, F>(self: &Arc<Self>, mut work: F) -> Result<T, E>
    where
        F: FnMut(&UnitOfWork<KV>) -> Result<T, E>,
        E: From<StorageError>,
    {
        let mut attempt = 1;
        loop {
            let uow = self.begin();
            let value = match work(&uow) {
                Ok(value) => value,
                Err(err) => {
                    uow.rollback();
                    return Err(err);
                }
            };

            match uow.commit() {
                Ok(()) => return Ok(value),
                Err(err) if err.is_conflict() && attempt < MAX_COMMIT_ATTEMPTS => {
                    debug!(attempt, error = %err, "Retrying unit of work after write conflict");
                    std::thread::sleep(conflict_backoff(attempt));
                    attempt += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Read the committed map under its lock.
    pub fn read_committed<R>(&self, read: impl FnOnce(&KV) -> R) -> R {
        let store = self.store.lock();
        read(&store)
    }

    fn open(self: &Arc<Self>, flow_run_id: Option<Uuid>) -> UnitOfWork<KV> {
        UnitOfWork {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            database: Arc::clone(self),
            flow_run_id,
            staged: Mutex::new(Staged::default()),
        }
    }
}

fn conflict_backoff(attempt: u32) -> Duration {
    Duration::from_micros(10u64 << attempt.min(10)).min(MAX_CONFLICT_BACKOFF)
}

#[derive(Default)]
struct Staged {
    /// `None` stages a deletion.
    writes: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    checks: BTreeMap<Vec<u8>, CommitCheck>,
    commit_hooks: Vec<CommitHook>,
    completion_hooks: Vec<CompletionHook>,
    completed: bool,
}

/// An open atomic unit of work.
pub struct UnitOfWork<KV: KeyValueStore> {
    id: UnitOfWorkId,
    database: Arc<Database<KV>>,
    flow_run_id: Option<Uuid>,
    staged: Mutex<Staged>,
}

impl<KV: KeyValueStore> UnitOfWork<KV> {
    pub fn id(&self) -> UnitOfWorkId {
        self.id
    }

    /// Flow run on whose behalf this unit of work executes.
    pub fn flow_run_id(&self) -> Option<Uuid> {
        self.flow_run_id
    }

    /// Read through the overlay, then the committed map.
    pub fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        if let Some(staged) = self.staged.lock().writes.get(key) {
            return Ok(staged.clone());
        }
        self.database
            .read_committed(|store| store.get(key))
            .map_err(Into::into)
    }

    /// Whether this unit of work has a staged write for `key`.
    pub fn is_staged(&self, key: &[u8]) -> bool {
        self.staged.lock().writes.contains_key(key)
    }

    pub fn put(&self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.staged.lock().writes.insert(key.into(), Some(value.into()));
    }

    pub fn delete(&self, key: impl Into<Vec<u8>>) {
        self.staged.lock().writes.insert(key.into(), None);
    }

    /// Number of staged writes.
    pub fn pending_writes(&self) -> usize {
        self.staged.lock().writes.len()
    }

    /// Validate `key` with `check` when this unit of work commits.
    ///
    /// Only the first check registered for a key is kept. Returns whether
    /// `check` was registered.
    pub fn check_on_commit(&self, key: impl Into<Vec<u8>>, check: CommitCheck) -> bool {
        let mut staged = self.staged.lock();
        let key = key.into();
        if staged.checks.contains_key(&key) {
            return false;
        }
        staged.checks.insert(key, check);
        true
    }

    /// Validate, then apply staged writes atomically and run hooks.
    ///
    /// A failed check or a failing batch is treated as a rollback; the error
    /// is returned unchanged.
    pub fn commit(self) -> StorageResult<()> {
        let staged = self.take_staged();
        let writes = staged.writes.len();

        let operations: Vec<BatchOperation> = staged
            .writes
            .into_iter()
            .map(|(key, value)| match value {
                Some(value) => BatchOperation::put(key, value),
                None => BatchOperation::delete(key),
            })
            .collect();

        let result = {
            let mut store = self.database.store.lock();
            let result = validate(&*store, staged.checks).and_then(|()| {
                if operations.is_empty() {
                    return Ok(());
                }
                store.atomic_batch_write(operations).map_err(StorageError::from)
            });
            if result.is_ok() {
                for hook in staged.commit_hooks {
                    hook();
                }
            }
            result
        };

        let outcome = match &result {
            Ok(()) => {
                debug!(uow = self.id, writes, "Committed unit of work");
                CompletionOutcome::Committed
            }
            Err(err) if err.is_conflict() => {
                debug!(uow = self.id, error = %err, "Commit rejected, rolling back");
                CompletionOutcome::RolledBack
            }
            Err(err) => {
                warn!(uow = self.id, error = %err, "Commit failed, rolling back");
                CompletionOutcome::RolledBack
            }
        };
        for hook in staged.completion_hooks {
            hook(outcome);
        }

        result
    }

    /// Discard staged writes and on-commit hooks.
    pub fn rollback(self) {
        self.abandon();
    }

    fn abandon(&self) {
        let staged = self.take_staged();
        debug!(
            uow = self.id,
            discarded = staged.writes.len(),
            "Rolled back unit of work"
        );
        for hook in staged.completion_hooks {
            hook(CompletionOutcome::RolledBack);
        }
    }

    fn take_staged(&self) -> Staged {
        let mut staged = self.staged.lock();
        let taken = std::mem::take(&mut *staged);
        staged.completed = true;
        taken
    }
}

fn validate<KV: KeyValueStore>(
    store: &KV,
    checks: BTreeMap<Vec<u8>, CommitCheck>,
) -> StorageResult<()> {
    for (key, check) in checks {
        let committed = store.get(&key)?;
        check(committed.as_deref())?;
    }
    Ok(())
}

impl<KV: KeyValueStore> CommitHooks for UnitOfWork<KV> {
    fn unit_of_work_id(&self) -> UnitOfWorkId {
        self.id
    }

    fn on_commit(&self, hook: CommitHook) {
        self.staged.lock().commit_hooks.push(hook);
    }

    fn after_completion(&self, hook: CompletionHook) {
        self.staged.lock().completion_hooks.push(hook);
    }
}

impl<KV: KeyValueStore> Drop for UnitOfWork<KV> {
    fn drop(&mut self) {
        if !self.staged.lock().completed {
            self.abandon();
        }
    }
}
