//! # Signature Verification
//!
//! Checks run on bare transactions before they are recorded as
//! `UNVERIFIED`. Each signature must be an Ed25519 signature by `by` over the
//! 32-byte transaction id.

use crate::domain::entities::{SignedTransaction, TransactionSignature};
use crate::domain::errors::StorageError;
use crate::ports::outbound::SignatureVerifier;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use tracing::debug;

/// Verifies every attached signature; at least one is required.
#[derive(Debug, Default, Clone, Copy)]
pub struct Ed25519SignatureVerifier;

impl Ed25519SignatureVerifier {
    fn verify_one(tx: &SignedTransaction, sig: &TransactionSignature) -> Result<(), StorageError> {
        let invalid = || StorageError::InvalidSignature {
            tx_id: tx.id(),
            signer: hex::encode(&sig.by),
        };

        let key_bytes: [u8; 32] = sig.by.as_slice().try_into().map_err(|_| invalid())?;
        let key = VerifyingKey::from_bytes(&key_bytes).map_err(|_| invalid())?;
        let signature = Signature::from_slice(&sig.bytes).map_err(|_| invalid())?;

        key.verify(tx.id().as_bytes(), &signature)
            .map_err(|_| invalid())
    }
}

impl SignatureVerifier for Ed25519SignatureVerifier {
    fn verify_required_signatures(&self, tx: &SignedTransaction) -> Result<(), StorageError> {
        if tx.sigs().is_empty() {
            return Err(StorageError::MissingSignatures { tx_id: tx.id() });
        }

        for sig in tx.sigs() {
            Self::verify_one(tx, sig)?;
        }

        debug!(tx_id = %tx.id(), signatures = tx.sigs().len(), "Signatures verified");
        Ok(())
    }
}

/// Accepts everything. For hosts that verify upstream, and tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAllVerifier;

impl SignatureVerifier for AcceptAllVerifier {
    fn verify_required_signatures(&self, _tx: &SignedTransaction) -> Result<(), StorageError> {
        Ok(())
    }
}
