use crate::domain::entities::TransactionSignature;
use crate::domain::errors::SerializationError;
use crate::domain::record::PersistedTransaction;
use crate::ports::outbound::TransactionCodec;

/// Default codec using bincode.
#[derive(Debug, Default, Clone, Copy)]
pub struct BincodeTransactionCodec;

fn serialization_error(e: bincode::Error) -> SerializationError {
    SerializationError::new(e.to_string())
}

impl TransactionCodec for BincodeTransactionCodec {
    fn encode_signatures(
        &self,
        sigs: &[TransactionSignature],
    ) -> Result<Vec<u8>, SerializationError> {
        bincode::serialize(sigs).map_err(serialization_error)
    }

    fn decode_signatures(
        &self,
        data: &[u8],
    ) -> Result<Vec<TransactionSignature>, SerializationError> {
        bincode::deserialize(data).map_err(serialization_error)
    }

    fn encode_row(&self, row: &PersistedTransaction) -> Result<Vec<u8>, SerializationError> {
        bincode::serialize(row).map_err(serialization_error)
    }

    fn decode_row(&self, data: &[u8]) -> Result<PersistedTransaction, SerializationError> {
        bincode::deserialize(data).map_err(serialization_error)
    }
}
