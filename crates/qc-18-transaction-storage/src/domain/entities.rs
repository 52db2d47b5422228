//! # Domain Entities
//!
//! Signed transactions as this subsystem sees them: an opaque serialized
//! body, identified by its SHA-256 content hash, plus a growing set of
//! signatures and optional flow-recovery metadata.

use crate::domain::status::TransactionStatus;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt;

/// Milliseconds since UNIX epoch.
pub type Timestamp = u64;

/// Size of a transaction id in bytes.
pub const TX_ID_SIZE: usize = 32;

/// Content hash identifying a transaction.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TxId([u8; TX_ID_SIZE]);

impl TxId {
    pub const fn new(bytes: [u8; TX_ID_SIZE]) -> Self {
        Self(bytes)
    }

    /// Hash a serialized transaction body.
    pub fn of(tx_bits: &[u8]) -> Self {
        Self(Sha256::digest(tx_bits).into())
    }

    pub fn as_bytes(&self) -> &[u8; TX_ID_SIZE] {
        &self.0
    }

    /// Lowercase hex, the persisted form of the id.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse the persisted hex form.
    pub fn from_hex(value: &str) -> Option<Self> {
        let bytes = hex::decode(value).ok()?;
        let bytes: [u8; TX_ID_SIZE] = bytes.try_into().ok()?;
        Some(Self(bytes))
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxId({}..)", &self.to_hex()[..8])
    }
}

/// A signature over a transaction id.
///
/// Two signatures are the same signature when both the signer key and the
/// signature bytes match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionSignature {
    /// Signer public key.
    pub by: Vec<u8>,
    /// Raw signature bytes.
    pub bytes: Vec<u8>,
}

impl TransactionSignature {
    pub fn new(by: impl Into<Vec<u8>>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            by: by.into(),
            bytes: bytes.into(),
        }
    }

    /// Number of bytes held by this signature.
    pub fn size(&self) -> usize {
        self.by.len() + self.bytes.len()
    }
}

/// Append `extra` to `existing`, skipping signatures already present.
///
/// Order of first appearance is preserved.
pub fn merge_signatures<I>(existing: &[TransactionSignature], extra: I) -> Vec<TransactionSignature>
where
    I: IntoIterator<Item = TransactionSignature>,
{
    let mut merged = Vec::with_capacity(existing.len());
    for sig in existing.iter().cloned().chain(extra) {
        if !merged.contains(&sig) {
            merged.push(sig);
        }
    }
    merged
}

/// A serialized transaction body plus its signatures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    id: TxId,
    tx_bits: Vec<u8>,
    sigs: Vec<TransactionSignature>,
}

impl SignedTransaction {
    /// Build a transaction from its serialized body; the id is its content hash.
    pub fn new(tx_bits: impl Into<Vec<u8>>, sigs: Vec<TransactionSignature>) -> Self {
        let tx_bits = tx_bits.into();
        Self {
            id: TxId::of(&tx_bits),
            tx_bits,
            sigs: merge_signatures(&[], sigs),
        }
    }

    pub fn id(&self) -> TxId {
        self.id
    }

    pub fn tx_bits(&self) -> &[u8] {
        &self.tx_bits
    }

    pub fn sigs(&self) -> &[TransactionSignature] {
        &self.sigs
    }

    /// Same body with `extra` merged into the signature set.
    pub fn with_additional_signatures<I>(&self, extra: I) -> Self
    where
        I: IntoIterator<Item = TransactionSignature>,
    {
        Self {
            id: self.id,
            tx_bits: self.tx_bits.clone(),
            sigs: merge_signatures(&self.sigs, extra),
        }
    }
}

/// Which output states a node records once the transaction is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatesToRecord {
    None,
    AllVisible,
    OnlyRelevant,
}

impl StatesToRecord {
    /// Persisted tag name.
    pub const fn as_tag(self) -> &'static str {
        match self {
            StatesToRecord::None => "NONE",
            StatesToRecord::AllVisible => "ALL_VISIBLE",
            StatesToRecord::OnlyRelevant => "ONLY_RELEVANT",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "NONE" => Some(StatesToRecord::None),
            "ALL_VISIBLE" => Some(StatesToRecord::AllVisible),
            "ONLY_RELEVANT" => Some(StatesToRecord::OnlyRelevant),
            _ => None,
        }
    }
}

/// Metadata kept with an in-flight transaction so an interrupted finality
/// flow can be resumed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowTransactionMetadata {
    /// Identity of the flow initiator.
    pub initiator: String,
    /// Recording policy for the transaction's states.
    pub states_to_record: StatesToRecord,
    /// Identities of the other flow participants.
    pub peers: BTreeSet<String>,
}

impl FlowTransactionMetadata {
    pub fn new(initiator: impl Into<String>, states_to_record: StatesToRecord) -> Self {
        Self {
            initiator: initiator.into(),
            states_to_record,
            peers: BTreeSet::new(),
        }
    }

    pub fn with_peers<I, S>(mut self, peers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.peers = peers.into_iter().map(Into::into).collect();
        self
    }
}

/// What the store holds for one transaction id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRecord {
    pub transaction: SignedTransaction,
    pub status: TransactionStatus,
    pub metadata: Option<FlowTransactionMetadata>,
}

impl TransactionRecord {
    pub fn new(
        transaction: SignedTransaction,
        status: TransactionStatus,
        metadata: Option<FlowTransactionMetadata>,
    ) -> Self {
        Self {
            transaction,
            status,
            metadata,
        }
    }

    pub fn id(&self) -> TxId {
        self.transaction.id()
    }

    /// Upgrade to `VERIFIED`, growing the signature set with `sigs`.
    ///
    /// Existing metadata is kept unless `metadata` replaces it.
    pub fn verified_with<I>(&self, sigs: I, metadata: Option<FlowTransactionMetadata>) -> Self
    where
        I: IntoIterator<Item = TransactionSignature>,
    {
        Self {
            transaction: self.transaction.with_additional_signatures(sigs),
            status: TransactionStatus::Verified,
            metadata: metadata.or_else(|| self.metadata.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig(by: u8, bytes: u8) -> TransactionSignature {
        TransactionSignature::new(vec![by; 32], vec![bytes; 64])
    }

    #[test]
    fn test_id_is_content_hash() {
        let a = SignedTransaction::new(b"body".to_vec(), vec![]);
        let b = SignedTransaction::new(b"body".to_vec(), vec![sig(1, 1)]);
        let c = SignedTransaction::new(b"other".to_vec(), vec![]);

        assert_eq!(a.id(), b.id());
        assert_ne!(a.id(), c.id());
    }

    #[test]
    fn test_hex_round_trip() {
        let id = TxId::of(b"payload");
        let hex = id.to_hex();
        assert_eq!(hex.len(), 64);
        assert_eq!(TxId::from_hex(&hex), Some(id));
        assert_eq!(TxId::from_hex("zz"), None);
        assert_eq!(TxId::from_hex("abcd"), None);
    }

    #[test]
    fn test_duplicate_signatures_are_collapsed() {
        let tx = SignedTransaction::new(b"body".to_vec(), vec![sig(1, 1), sig(1, 1)]);
        assert_eq!(tx.sigs().len(), 1);

        let merged = tx.with_additional_signatures(vec![sig(2, 2), sig(1, 1), sig(2, 2)]);
        assert_eq!(merged.sigs(), &[sig(1, 1), sig(2, 2)]);
        assert_eq!(merged.id(), tx.id());
    }

    #[test]
    fn test_same_signer_different_bytes_are_distinct() {
        let merged = merge_signatures(&[sig(1, 1)], vec![sig(1, 2)]);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_states_to_record_tags() {
        for policy in [
            StatesToRecord::None,
            StatesToRecord::AllVisible,
            StatesToRecord::OnlyRelevant,
        ] {
            assert_eq!(StatesToRecord::from_tag(policy.as_tag()), Some(policy));
        }
        assert_eq!(StatesToRecord::from_tag("SOME"), None);
    }

    #[test]
    fn test_verified_with_keeps_metadata_unless_replaced() {
        let metadata = FlowTransactionMetadata::new("O=Alice", StatesToRecord::OnlyRelevant);
        let record = TransactionRecord::new(
            SignedTransaction::new(b"body".to_vec(), vec![sig(1, 1)]),
            TransactionStatus::InFlight,
            Some(metadata.clone()),
        );

        let upgraded = record.verified_with(vec![sig(2, 2)], None);
        assert_eq!(upgraded.status, TransactionStatus::Verified);
        assert_eq!(upgraded.metadata, Some(metadata));
        assert_eq!(upgraded.transaction.sigs().len(), 2);

        let replacement = FlowTransactionMetadata::new("O=Bob", StatesToRecord::AllVisible);
        let replaced = record.verified_with(vec![], Some(replacement.clone()));
        assert_eq!(replaced.metadata, Some(replacement));
    }
}
