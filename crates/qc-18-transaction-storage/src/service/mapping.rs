//! Conversion between domain records and persisted rows.

use crate::domain::entities::{
    FlowTransactionMetadata, SignedTransaction, StatesToRecord, Timestamp, TransactionRecord,
    TxId,
};
use crate::domain::errors::{StorageError, StorageResult};
use crate::domain::record::{join_participants, split_participants, PersistedTransaction};
use crate::domain::status::TransactionStatus;
use crate::ports::outbound::TransactionCodec;
use uuid::Uuid;

pub(crate) fn to_row<C: TransactionCodec>(
    codec: &C,
    record: &TransactionRecord,
    timestamp: Timestamp,
    state_machine_run_id: Option<Uuid>,
) -> StorageResult<PersistedTransaction> {
    let sigs = record.transaction.sigs();
    let signatures = if sigs.is_empty() {
        None
    } else {
        Some(codec.encode_signatures(sigs)?)
    };

    let metadata = record.metadata.as_ref();
    Ok(PersistedTransaction {
        tx_id: record.id().to_hex(),
        state_machine_run_id: state_machine_run_id.map(|id| id.to_string()),
        transaction: record.transaction.tx_bits().to_vec(),
        status: record.status.code().to_string(),
        timestamp,
        signatures,
        initiator: metadata.map(|m| m.initiator.clone()),
        participants: metadata.and_then(|m| join_participants(&m.peers)),
        states_to_record: metadata.map(|m| m.states_to_record.as_tag().to_string()),
    })
}

/// Status column of an encoded row, without decoding the rest of the record.
pub(crate) fn status_of_row<C: TransactionCodec>(
    codec: &C,
    bytes: &[u8],
) -> StorageResult<TransactionStatus> {
    let row = codec.decode_row(bytes)?;
    TransactionStatus::from_code(&row.status)
}

pub(crate) fn from_row<C: TransactionCodec>(
    codec: &C,
    row: PersistedTransaction,
) -> StorageResult<TransactionRecord> {
    let corrupt = |reason: &str| StorageError::CorruptRecord {
        tx_id: row.tx_id.clone(),
        reason: reason.to_string(),
    };

    let status = TransactionStatus::from_code(&row.status)?;
    let id = TxId::from_hex(&row.tx_id).ok_or_else(|| corrupt("malformed transaction id"))?;

    let metadata = match (&row.initiator, &row.states_to_record) {
        (None, _) => None,
        (Some(initiator), Some(tag)) => {
            let policy = StatesToRecord::from_tag(tag)
                .ok_or_else(|| corrupt("unknown states-to-record tag"))?;
            Some(FlowTransactionMetadata {
                initiator: initiator.clone(),
                states_to_record: policy,
                peers: split_participants(row.participants.as_deref()),
            })
        }
        (Some(_), None) => return Err(corrupt("initiator without states-to-record policy")),
    };

    let sigs = row
        .signatures
        .as_deref()
        .map(|bytes| codec.decode_signatures(bytes))
        .transpose()?
        .unwrap_or_default();

    let transaction = SignedTransaction::new(row.transaction, sigs);
    if transaction.id() != id {
        return Err(corrupt("body does not hash to transaction id"));
    }

    Ok(TransactionRecord::new(transaction, status, metadata))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::BincodeTransactionCodec;
    use crate::domain::entities::TransactionSignature;

    fn record(metadata: Option<FlowTransactionMetadata>) -> TransactionRecord {
        let sig = TransactionSignature::new(vec![1; 32], vec![2; 64]);
        TransactionRecord::new(
            SignedTransaction::new(b"body".to_vec(), vec![sig]),
            TransactionStatus::InFlight,
            metadata,
        )
    }

    #[test]
    fn test_row_columns() {
        let metadata = FlowTransactionMetadata::new("O=Alice", StatesToRecord::OnlyRelevant)
            .with_peers(["O=Bob", "O=Carol"]);
        let run_id = Uuid::new_v4();
        let row =
            to_row(&BincodeTransactionCodec, &record(Some(metadata)), 77, Some(run_id)).unwrap();

        assert_eq!(row.status, "F");
        assert_eq!(row.timestamp, 77);
        assert_eq!(row.state_machine_run_id, Some(run_id.to_string()));
        assert_eq!(row.initiator.as_deref(), Some("O=Alice"));
        assert_eq!(row.participants.as_deref(), Some("O=Bob;O=Carol"));
        assert_eq!(row.states_to_record.as_deref(), Some("ONLY_RELEVANT"));
        assert!(row.signatures.is_some());
    }

    #[test]
    fn test_row_back_to_record() {
        let metadata = FlowTransactionMetadata::new("O=Alice", StatesToRecord::AllVisible)
            .with_peers(["O=Bob"]);
        let original = record(Some(metadata));
        let row = to_row(&BincodeTransactionCodec, &original, 1, None).unwrap();

        assert_eq!(from_row(&BincodeTransactionCodec, row).unwrap(), original);
    }

    #[test]
    fn test_no_metadata_and_no_signatures_are_null() {
        let bare = TransactionRecord::new(
            SignedTransaction::new(b"body".to_vec(), vec![]),
            TransactionStatus::Unverified,
            None,
        );
        let row = to_row(&BincodeTransactionCodec, &bare, 1, None).unwrap();

        assert_eq!(row.signatures, None);
        assert_eq!(row.initiator, None);
        assert_eq!(row.participants, None);
        assert_eq!(row.states_to_record, None);
        assert_eq!(from_row(&BincodeTransactionCodec, row).unwrap(), bare);
    }

    #[test]
    fn test_unknown_status_is_fatal() {
        let mut row = to_row(&BincodeTransactionCodec, &record(None), 1, None).unwrap();
        row.status = "Q".to_string();

        assert_eq!(
            from_row(&BincodeTransactionCodec, row).unwrap_err(),
            StorageError::UnexpectedStatus {
                code: "Q".to_string()
            }
        );
    }

    #[test]
    fn test_initiator_without_policy_is_corrupt() {
        let metadata = FlowTransactionMetadata::new("O=Alice", StatesToRecord::None);
        let mut row = to_row(&BincodeTransactionCodec, &record(Some(metadata)), 1, None).unwrap();
        row.states_to_record = None;

        assert!(matches!(
            from_row(&BincodeTransactionCodec, row),
            Err(StorageError::CorruptRecord { .. })
        ));
    }

    #[test]
    fn test_body_not_matching_id_is_corrupt() {
        let mut row = to_row(&BincodeTransactionCodec, &record(None), 1, None).unwrap();
        row.transaction = b"tampered".to_vec();

        assert!(matches!(
            from_row(&BincodeTransactionCodec, row),
            Err(StorageError::CorruptRecord { .. })
        ));
    }
}
