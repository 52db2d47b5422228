//! Volatile backing map for transaction rows.
//!
//! The store takes no lock of its own: `Database` owns it behind the map
//! mutex, and a committing unit of work applies its whole overlay through
//! one `atomic_batch_write` call. Keys are kept ordered because `track` and
//! `transactions` read every row under the `tx:` prefix.

use crate::domain::errors::KVStoreError;
use crate::ports::outbound::{BatchOperation, KeyValueStore, ScanResult};
use std::collections::BTreeMap;

/// Transaction rows held in memory, lost on restart.
#[derive(Debug, Default)]
pub struct InMemoryKVStore {
    data: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl InMemoryKVStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Apply a committed overlay; also used by the file-backed store before it
/// persists.
pub(super) fn apply(data: &mut BTreeMap<Vec<u8>, Vec<u8>>, operations: Vec<BatchOperation>) {
    for op in operations {
        match op {
            BatchOperation::Put { key, value } => {
                data.insert(key, value);
            }
            BatchOperation::Delete { key } => {
                data.remove(&key);
            }
        }
    }
}

/// Rows whose key starts with `prefix`, as one range walk.
pub(super) fn scan(data: &BTreeMap<Vec<u8>, Vec<u8>>, prefix: &[u8]) -> ScanResult {
    data.range(prefix.to_vec()..)
        .take_while(|(key, _)| key.starts_with(prefix))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

impl KeyValueStore for InMemoryKVStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KVStoreError> {
        Ok(self.data.get(key).cloned())
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), KVStoreError> {
        self.data.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<(), KVStoreError> {
        self.data.remove(key);
        Ok(())
    }

    fn atomic_batch_write(&mut self, operations: Vec<BatchOperation>) -> Result<(), KVStoreError> {
        apply(&mut self.data, operations);
        Ok(())
    }

    fn exists(&self, key: &[u8]) -> Result<bool, KVStoreError> {
        Ok(self.data.contains_key(key))
    }

    fn prefix_scan(&self, prefix: &[u8]) -> Result<ScanResult, KVStoreError> {
        Ok(scan(&self.data, prefix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::TxId;
    use crate::domain::record::KeyPrefix;

    #[test]
    fn test_in_memory_kv_store() {
        let mut store = InMemoryKVStore::new();

        store.put(b"key1", b"value1").unwrap();
        store.put(b"key2", b"value2").unwrap();

        assert_eq!(store.get(b"key1").unwrap(), Some(b"value1".to_vec()));
        assert_eq!(store.get(b"key3").unwrap(), None);
        assert!(store.exists(b"key1").unwrap());
        assert!(!store.exists(b"key3").unwrap());

        store.delete(b"key1").unwrap();
        assert!(!store.exists(b"key1").unwrap());
    }

    #[test]
    fn test_batch_write_mixes_puts_and_deletes() {
        let mut store = InMemoryKVStore::new();
        store.put(b"a", b"0").unwrap();

        store
            .atomic_batch_write(vec![
                BatchOperation::delete(b"a".to_vec()),
                BatchOperation::put(b"b".to_vec(), b"2".to_vec()),
            ])
            .unwrap();

        assert_eq!(store.get(b"a").unwrap(), None);
        assert_eq!(store.get(b"b").unwrap(), Some(b"2".to_vec()));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_prefix_scan() {
        let mut store = InMemoryKVStore::new();

        store.put(b"tx:1", b"data1").unwrap();
        store.put(b"tx:2", b"data2").unwrap();
        store.put(b"ty:1", b"other").unwrap();
        store.put(b"t", b"short").unwrap();

        let rows = store.prefix_scan(b"tx:").unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|(k, _)| k.starts_with(b"tx:")));
    }

    #[test]
    fn test_committed_overlay_is_visible_to_row_scan() {
        let mut store = InMemoryKVStore::new();
        let keys: Vec<Vec<u8>> = [3u8, 1, 2]
            .iter()
            .map(|b| KeyPrefix::transaction_key(&TxId::new([*b; 32])))
            .collect();
        store.put(&keys[0], b"stale").unwrap();

        store
            .atomic_batch_write(vec![
                BatchOperation::delete(keys[0].clone()),
                BatchOperation::put(keys[1].clone(), b"one".to_vec()),
                BatchOperation::put(keys[2].clone(), b"two".to_vec()),
            ])
            .unwrap();

        let rows = store.prefix_scan(KeyPrefix::Transaction.as_bytes()).unwrap();
        assert_eq!(
            rows,
            vec![
                (keys[1].clone(), b"one".to_vec()),
                (keys[2].clone(), b"two".to_vec()),
            ]
        );
    }
}
