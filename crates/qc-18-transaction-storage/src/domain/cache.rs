//! # Weighted Transaction Cache
//!
//! Bounded in-memory view over the backing map, keyed by transaction id.
//! Eviction is driven by an estimated byte weight per entry rather than an
//! entry count, least-recently-used first.
//!
//! ## Slots
//!
//! - **Committed**: mirrors the committed backing map. Evictable.
//! - **Pending**: written by a still-open unit of work. Pinned until that
//!   unit of work settles it; invisible to readers in other units of work.
//!
//! Eviction only ever drops memory. The backing map is the source of truth.

use crate::domain::entities::{TransactionRecord, TxId, TX_ID_SIZE};
use crate::unit_of_work::{CompletionOutcome, UnitOfWorkId};
use lru::LruCache;
use tracing::debug;

/// Overhead of the hash object wrapping a transaction id.
pub const SECURE_HASH_OVERHEAD_BYTES: u64 = 24;

/// Overhead of a cached transaction value.
pub const CACHE_VALUE_OVERHEAD_BYTES: u64 = 80;

/// Rough average for a signer key plus signature metadata.
pub const SIGNATURE_OVERHEAD_BYTES: u64 = 1024;

/// Weight of an id with no value attached.
const KEY_WEIGHT: u64 = SECURE_HASH_OVERHEAD_BYTES + TX_ID_SIZE as u64;

/// Estimated resident size of a cached record.
pub fn estimate_weight(record: &TransactionRecord) -> u64 {
    let sigs: u64 = record
        .transaction
        .sigs()
        .iter()
        .map(|sig| sig.size() as u64 + SIGNATURE_OVERHEAD_BYTES)
        .sum();
    KEY_WEIGHT + CACHE_VALUE_OVERHEAD_BYTES + sigs + record.transaction.tx_bits().len() as u64
}

#[derive(Debug, Clone)]
enum Slot {
    Committed(TransactionRecord),
    /// `None` is a pending deletion.
    Pending {
        owner: UnitOfWorkId,
        value: Option<TransactionRecord>,
    },
}

#[derive(Debug)]
struct CacheEntry {
    slot: Slot,
    weight: u64,
}

impl CacheEntry {
    fn new(slot: Slot) -> Self {
        let weight = match &slot {
            Slot::Committed(record) | Slot::Pending { value: Some(record), .. } => {
                estimate_weight(record)
            }
            Slot::Pending { value: None, .. } => KEY_WEIGHT,
        };
        Self { slot, weight }
    }
}

/// Result of a cache lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup {
    /// Resident; `None` means known absent (pending deletion).
    Resident(Option<TransactionRecord>),
    /// Owned by another open unit of work; read the committed map instead.
    Bypass,
    /// Not resident.
    Miss,
}

/// Cache statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
    pub pending: usize,
    pub resident_weight: u64,
    pub weight_budget: u64,
}

/// Weight-bounded LRU cache of transaction records.
pub struct WeightedCache {
    name: String,
    entries: LruCache<TxId, CacheEntry>,
    weight_budget: u64,
    resident_weight: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl WeightedCache {
    pub fn new(name: impl Into<String>, weight_budget: u64) -> Self {
        Self {
            name: name.into(),
            entries: LruCache::unbounded(),
            weight_budget,
            resident_weight: 0,
            hits: 0,
            misses: 0,
            evictions: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Lookup on behalf of a reader running in unit of work `reader`.
    ///
    /// Pending slots owned by other units of work are not visible.
    pub fn read(&mut self, id: &TxId, reader: UnitOfWorkId) -> CacheLookup {
        let lookup = match self.entries.get(id).map(|entry| &entry.slot) {
            Some(Slot::Committed(record)) => CacheLookup::Resident(Some(record.clone())),
            Some(Slot::Pending { owner, value }) if *owner == reader => {
                CacheLookup::Resident(value.clone())
            }
            Some(Slot::Pending { .. }) => CacheLookup::Bypass,
            None => CacheLookup::Miss,
        };
        self.count(&lookup);
        lookup
    }

    /// Lookup on behalf of a writer.
    ///
    /// Any pending slot counts as the current state, so concurrent writers
    /// on the same id observe each other's reservations.
    pub fn effective(&mut self, id: &TxId) -> CacheLookup {
        let lookup = match self.entries.get(id).map(|entry| &entry.slot) {
            Some(Slot::Committed(record)) => CacheLookup::Resident(Some(record.clone())),
            Some(Slot::Pending { value, .. }) => CacheLookup::Resident(value.clone()),
            None => CacheLookup::Miss,
        };
        self.count(&lookup);
        lookup
    }

    /// Insert a record just loaded from the committed backing map.
    pub fn populate(&mut self, record: TransactionRecord) {
        let id = record.id();
        if matches!(
            self.entries.peek(&id).map(|entry| &entry.slot),
            Some(Slot::Pending { .. })
        ) {
            return;
        }
        self.insert(id, Slot::Committed(record));
    }

    /// Record an uncommitted write by `owner`.
    ///
    /// Returns `true` when `owner` did not already hold this slot, i.e. the
    /// caller must arrange for [`WeightedCache::settle`] to run.
    pub fn stage(
        &mut self,
        id: TxId,
        owner: UnitOfWorkId,
        value: Option<TransactionRecord>,
    ) -> bool {
        let newly_owned = !matches!(
            self.entries.peek(&id).map(|entry| &entry.slot),
            Some(Slot::Pending { owner: current, .. }) if *current == owner
        );
        self.insert(id, Slot::Pending { owner, value });
        newly_owned
    }

    /// Resolve `owner`'s pending slot once its unit of work completes.
    pub fn settle(&mut self, id: &TxId, owner: UnitOfWorkId, outcome: CompletionOutcome) {
        // `None` drops the slot.
        let promoted = match (self.entries.peek(id).map(|entry| &entry.slot), outcome) {
            (None, _) => return,
            (Some(Slot::Pending { owner: current, value }), CompletionOutcome::Committed)
                if *current == owner =>
            {
                value.clone()
            }
            (Some(Slot::Pending { owner: current, .. }), CompletionOutcome::RolledBack)
                if *current == owner =>
            {
                None
            }
            // Overwritten by a later unit of work; that owner settles it.
            (Some(Slot::Pending { .. }), _) => return,
            // Another writer committed first; our commit may have landed on
            // top of it in the backing map, so reload on next access.
            (Some(Slot::Committed(_)), CompletionOutcome::Committed) => None,
            (Some(Slot::Committed(_)), CompletionOutcome::RolledBack) => return,
        };

        match promoted {
            Some(record) => self.insert(*id, Slot::Committed(record)),
            None => self.remove(id),
        }
    }

    /// Drop a committed entry from memory.
    ///
    /// Pending slots stay pinned until their owner settles them.
    pub fn invalidate(&mut self, id: &TxId) {
        if matches!(
            self.entries.peek(id).map(|entry| &entry.slot),
            Some(Slot::Committed(_))
        ) {
            self.remove(id);
        }
    }

    pub fn contains(&self, id: &TxId) -> bool {
        self.entries.contains(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn resident_weight(&self) -> u64 {
        self.resident_weight
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
            entries: self.entries.len(),
            pending: self
                .entries
                .iter()
                .filter(|(_, entry)| matches!(entry.slot, Slot::Pending { .. }))
                .count(),
            resident_weight: self.resident_weight,
            weight_budget: self.weight_budget,
        }
    }

    fn count(&mut self, lookup: &CacheLookup) {
        match lookup {
            CacheLookup::Resident(_) => self.hits += 1,
            CacheLookup::Bypass | CacheLookup::Miss => self.misses += 1,
        }
    }

    fn insert(&mut self, id: TxId, slot: Slot) {
        let entry = CacheEntry::new(slot);
        self.resident_weight += entry.weight;
        if let Some(previous) = self.entries.put(id, entry) {
            self.resident_weight -= previous.weight;
        }
        self.evict_to_budget();
    }

    fn remove(&mut self, id: &TxId) {
        if let Some(entry) = self.entries.pop(id) {
            self.resident_weight -= entry.weight;
        }
    }

    fn evict_to_budget(&mut self) {
        if self.resident_weight <= self.weight_budget {
            return;
        }

        let mut excess = self.resident_weight - self.weight_budget;
        let victims: Vec<TxId> = self
            .entries
            .iter()
            .rev()
            .filter(|(_, entry)| matches!(entry.slot, Slot::Committed(_)))
            .take_while(|(_, entry)| {
                let needed = excess > 0;
                excess = excess.saturating_sub(entry.weight);
                needed
            })
            .map(|(id, _)| *id)
            .collect();

        if victims.is_empty() {
            return;
        }
        for id in &victims {
            self.remove(id);
        }
        self.evictions += victims.len() as u64;

        debug!(
            cache = %self.name,
            evicted = victims.len(),
            resident_weight = self.resident_weight,
            budget = self.weight_budget,
            "Evicted transactions from cache"
        );
    }
}
