//! # Transaction Status
//!
//! Lifecycle of a stored transaction:
//!
//! ```text
//!   create ──→ [UNVERIFIED] ──verify──→ [VERIFIED] (terminal)
//!                                            ↑
//!   create ──→ [IN_FLIGHT] ────verify────────┘
//!                   │
//!                   └──abort──→ <deleted>
//! ```
//!
//! Any other requested transition is a no-op reported as `false`.

use crate::domain::errors::StorageError;
use std::fmt;

/// Verification status of a stored transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionStatus {
    /// Received outside a flow, not yet verified.
    Unverified,
    /// Received mid-finality, carrying recovery metadata.
    InFlight,
    /// Final. Never removed or downgraded.
    Verified,
}

impl TransactionStatus {
    /// Single-character code used in the persisted row.
    pub const fn code(self) -> char {
        match self {
            TransactionStatus::Unverified => 'U',
            TransactionStatus::Verified => 'V',
            TransactionStatus::InFlight => 'F',
        }
    }

    /// Decode a persisted status column.
    ///
    /// Anything other than exactly one known code is rejected.
    pub fn from_code(code: &str) -> Result<Self, StorageError> {
        match code {
            "V" => Ok(TransactionStatus::Verified),
            "U" => Ok(TransactionStatus::Unverified),
            "F" => Ok(TransactionStatus::InFlight),
            other => Err(StorageError::UnexpectedStatus {
                code: other.to_string(),
            }),
        }
    }

    pub const fn is_verified(self) -> bool {
        matches!(self, TransactionStatus::Verified)
    }

    /// Only in-flight records may be deleted.
    pub const fn is_removable(self) -> bool {
        matches!(self, TransactionStatus::InFlight)
    }

    /// Whether moving an existing record from `self` to `next` is legal.
    pub const fn permits(self, next: TransactionStatus) -> bool {
        matches!(
            (self, next),
            (TransactionStatus::Unverified, TransactionStatus::Verified)
                | (TransactionStatus::InFlight, TransactionStatus::Verified)
        )
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionStatus::Unverified => "UNVERIFIED",
            TransactionStatus::InFlight => "IN_FLIGHT",
            TransactionStatus::Verified => "VERIFIED",
        };
        f.write_str(name)
    }
}
