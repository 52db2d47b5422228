//! # Adapters
//!
//! Default implementations of the outbound ports.
//!
//! - `storage` - `KeyValueStore` backends (in-memory, file-backed)
//! - `codec` - bincode row and signature-list codec
//! - `clock` - system and manual time sources
//! - `verifier` - Ed25519 signature verification

pub mod clock;
pub mod codec;
pub mod storage;
pub mod verifier;

pub use clock::{ManualClock, SystemTimeSource};
pub use codec::BincodeTransactionCodec;
pub use storage::{FileBackedKVStore, InMemoryKVStore};
pub use verifier::{AcceptAllVerifier, Ed25519SignatureVerifier};
