//! # Persisted Row Layout
//!
//! One row per transaction id:
//!
//! | Column | Type | Notes |
//! |--------|------|-------|
//! | `tx_id` | hex string | primary key, 64 chars |
//! | `state_machine_run_id` | nullable string | originating flow run |
//! | `transaction` | blob | serialized body |
//! | `status` | 1 char | `U`, `V` or `F` |
//! | `timestamp` | ms since epoch | set on every mutation |
//! | `signatures` | nullable blob | codec-serialized signature list |
//! | `initiator` | nullable string | recovery metadata |
//! | `participants` | nullable string | `;`-joined identities |
//! | `states_to_record` | nullable tag | recovery metadata |

use crate::domain::entities::{Timestamp, TxId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Separator used for the `participants` column.
pub const PARTICIPANT_SEPARATOR: char = ';';

/// Maximum width of the `tx_id` column.
pub const TX_ID_COLUMN_WIDTH: usize = 144;

/// A transaction row as written to the backing map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedTransaction {
    pub tx_id: String,
    pub state_machine_run_id: Option<String>,
    pub transaction: Vec<u8>,
    pub status: String,
    pub timestamp: Timestamp,
    pub signatures: Option<Vec<u8>>,
    pub initiator: Option<String>,
    pub participants: Option<String>,
    pub states_to_record: Option<String>,
}

/// Join participant identities; an empty set is stored as null.
pub fn join_participants(peers: &BTreeSet<String>) -> Option<String> {
    if peers.is_empty() {
        return None;
    }
    let joined: Vec<&str> = peers.iter().map(String::as_str).collect();
    Some(joined.join(&PARTICIPANT_SEPARATOR.to_string()))
}

/// Split the `participants` column back into identities.
pub fn split_participants(column: Option<&str>) -> BTreeSet<String> {
    column
        .map(|joined| {
            joined
                .split(PARTICIPANT_SEPARATOR)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Key prefixes for the key-value store.
#[derive(Debug, Clone, Copy)]
pub enum KeyPrefix {
    /// Transaction rows: `tx:{id}` -> PersistedTransaction
    Transaction,
}

impl KeyPrefix {
    pub fn as_bytes(&self) -> &'static [u8] {
        match self {
            KeyPrefix::Transaction => b"tx:",
        }
    }

    /// Build a full key with the given suffix.
    pub fn key(&self, suffix: &[u8]) -> Vec<u8> {
        let mut key = self.as_bytes().to_vec();
        key.extend_from_slice(suffix);
        key
    }

    /// Build a transaction row key from an id.
    pub fn transaction_key(id: &TxId) -> Vec<u8> {
        KeyPrefix::Transaction.key(id.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_participants_stored_as_null() {
        assert_eq!(join_participants(&BTreeSet::new()), None);
        assert!(split_participants(None).is_empty());
    }

    #[test]
    fn test_participants_are_joined_with_separator() {
        let peers: BTreeSet<String> = ["O=Bob", "O=Alice"].iter().map(|s| s.to_string()).collect();
        let joined = join_participants(&peers).unwrap();

        assert_eq!(joined, "O=Alice;O=Bob");
        assert_eq!(split_participants(Some(&joined)), peers);
    }

    #[test]
    fn test_transaction_key_layout() {
        let id = TxId::new([0xAB; 32]);
        let key = KeyPrefix::transaction_key(&id);

        assert!(key.starts_with(b"tx:"));
        assert_eq!(key.len(), 3 + 32);
        assert!(id.to_hex().len() <= TX_ID_COLUMN_WIDTH);
    }
}
