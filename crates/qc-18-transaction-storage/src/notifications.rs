//! # Notification Hub
//!
//! Delivers "transaction verified" events exactly once per transaction that
//! newly reaches `VERIFIED`.
//!
//! ```text
//! publish(tx, Some(uow)) ──→ uow.on_commit ──commit──→ deliver(tx)
//!                                          ╰─rollback─→ (discarded)
//! publish(tx, None) ─────────────────────────────────→ deliver(tx)
//!
//! deliver(tx) ──→ single-transaction waiters for tx.id
//!             ──→ every open VerifiedStream
//! ```
//!
//! Each stream owns an unbounded channel, so a slow subscriber never loses
//! an event. Closed streams are pruned on the next delivery.
//!
//! Delivery from a commit runs while the backing map lock is held, so a
//! reader that takes a snapshot and subscribes under the same lock sees
//! each verification either in the snapshot or on the stream, never both.

use crate::domain::entities::{SignedTransaction, TxId};
use crate::domain::errors::{StorageError, StorageResult};
use crate::unit_of_work::CommitHooks;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::{Stream, StreamExt};
use tracing::debug;

/// Fan-out point for verified transactions.
#[derive(Default)]
pub struct NotificationHub {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<SignedTransaction>>>,
    waiters: Mutex<HashMap<TxId, Vec<oneshot::Sender<SignedTransaction>>>>,
    delivered: AtomicU64,
}

impl NotificationHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a newly verified transaction.
    ///
    /// Deferred to commit of `ambient` when given, immediate otherwise.
    pub fn publish(self: &Arc<Self>, tx: SignedTransaction, ambient: Option<&dyn CommitHooks>) {
        match ambient {
            Some(uow) => {
                debug!(
                    tx_id = %tx.id(),
                    uow = uow.unit_of_work_id(),
                    "Deferring notification to commit"
                );
                let hub = Arc::clone(self);
                uow.on_commit(Box::new(move || hub.deliver(tx)));
            }
            None => self.deliver(tx),
        }
    }

    /// Live stream of verified transactions from this point on.
    pub fn subscribe(&self) -> VerifiedStream {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.subscribers.lock().push(sender);
        VerifiedStream::new(receiver)
    }

    /// Future resolving once `id` is delivered.
    ///
    /// Dropping the future withdraws the registration.
    pub fn register_waiter(self: &Arc<Self>, id: TxId) -> TransactionFuture {
        let (sender, receiver) = oneshot::channel();
        self.waiters.lock().entry(id).or_default().push(sender);
        TransactionFuture::waiting(id, receiver, Arc::downgrade(self))
    }

    /// Number of registered single-transaction waiters still listening.
    pub fn pending_waiters(&self) -> usize {
        self.waiters
            .lock()
            .values()
            .flatten()
            .filter(|waiter| !waiter.is_closed())
            .count()
    }

    /// Number of ids with at least one registered waiter.
    pub fn waiting_ids(&self) -> usize {
        self.waiters.lock().len()
    }

    /// Number of open streams.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .iter()
            .filter(|subscriber| !subscriber.is_closed())
            .count()
    }

    /// Total notifications delivered.
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    fn deliver(&self, tx: SignedTransaction) {
        let id = tx.id();
        self.delivered.fetch_add(1, Ordering::Relaxed);

        if let Some(waiters) = self.waiters.lock().remove(&id) {
            for waiter in waiters {
                // Receiver dropped: the caller cancelled its wait.
                let _ = waiter.send(tx.clone());
            }
        }

        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|subscriber| subscriber.send(tx.clone()).is_ok());
        debug!(tx_id = %id, receivers = subscribers.len(), "Delivered verified transaction");
    }

    /// Drop closed waiters for `id`, and the entry once none remain.
    fn release_waiter(&self, id: &TxId) {
        let mut waiters = self.waiters.lock();
        if let Some(pending) = waiters.get_mut(id) {
            pending.retain(|waiter| !waiter.is_closed());
            if pending.is_empty() {
                waiters.remove(id);
            }
        }
    }
}

/// Stream of verified transactions.
pub struct VerifiedStream {
    inner: UnboundedReceiverStream<SignedTransaction>,
}

impl VerifiedStream {
    fn new(receiver: mpsc::UnboundedReceiver<SignedTransaction>) -> Self {
        Self {
            inner: UnboundedReceiverStream::new(receiver),
        }
    }

    /// Next verified transaction; `None` once the hub is gone.
    pub async fn recv(&mut self) -> Option<SignedTransaction> {
        self.next().await
    }
}

impl Stream for VerifiedStream {
    type Item = SignedTransaction;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl Drop for VerifiedStream {
    fn drop(&mut self) {
        debug!("Verified-transaction subscription dropped");
    }
}

/// Snapshot of verified transactions paired with the stream of later ones.
pub struct DataFeed {
    pub snapshot: Vec<SignedTransaction>,
    pub updates: VerifiedStream,
}

enum FutureState {
    Ready(Option<SignedTransaction>),
    Waiting {
        receiver: oneshot::Receiver<SignedTransaction>,
        hub: Weak<NotificationHub>,
    },
}

/// Resolves once with the verified transaction.
///
/// Dropping it cancels the wait and removes its registration from the hub.
pub struct TransactionFuture {
    tx_id: TxId,
    state: FutureState,
}

impl TransactionFuture {
    pub fn ready(tx: SignedTransaction) -> Self {
        Self {
            tx_id: tx.id(),
            state: FutureState::Ready(Some(tx)),
        }
    }

    fn waiting(
        tx_id: TxId,
        receiver: oneshot::Receiver<SignedTransaction>,
        hub: Weak<NotificationHub>,
    ) -> Self {
        Self {
            tx_id,
            state: FutureState::Waiting { receiver, hub },
        }
    }

    pub fn tx_id(&self) -> TxId {
        self.tx_id
    }

    /// Whether the transaction was already verified when tracking began.
    pub fn is_ready(&self) -> bool {
        matches!(self.state, FutureState::Ready(Some(_)))
    }
}

impl Future for TransactionFuture {
    type Output = StorageResult<SignedTransaction>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let tx_id = this.tx_id;
        match &mut this.state {
            FutureState::Ready(tx) => {
                Poll::Ready(tx.take().ok_or(StorageError::TrackingClosed { tx_id }))
            }
            FutureState::Waiting { receiver, .. } => Pin::new(receiver)
                .poll(cx)
                .map(|result| result.map_err(|_| StorageError::TrackingClosed { tx_id })),
        }
    }
}

impl Drop for TransactionFuture {
    fn drop(&mut self) {
        if let FutureState::Waiting { receiver, hub } = &mut self.state {
            receiver.close();
            if let Some(hub) = hub.upgrade() {
                hub.release_waiter(&self.tx_id);
            }
        }
    }
}
