//! On-disk encoding of one account key slot.

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::ACCOUNT_KEY_LEN;
use crate::{StorageError, StorageResult};

const RECORD_VERSION: u32 = 1;

/// CBOR record stored under `fp/ak/<slot>`.
///
/// `sequence` grows by one with every saved key and orders keys by age, so
/// eviction of the oldest key never needs a separate index record.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub(crate) struct SlotRecord {
    pub(crate) version: u32,
    pub(crate) key: [u8; ACCOUNT_KEY_LEN],
    pub(crate) sequence: u64,
}

impl SlotRecord {
    pub(crate) const fn new(key: [u8; ACCOUNT_KEY_LEN], sequence: u64) -> Self {
        Self {
            version: RECORD_VERSION,
            key,
            sequence,
        }
    }

    pub(crate) fn serialize(&self) -> StorageResult<Vec<u8>> {
        let mut bytes = Vec::new();
        ciborium::ser::into_writer(self, &mut bytes)
            .map_err(|err| StorageError::Serialization(err.to_string()))?;
        Ok(bytes)
    }

    pub(crate) fn deserialize(key: &str, bytes: &[u8]) -> StorageResult<Self> {
        let record: Self = ciborium::de::from_reader(bytes)
            .map_err(|err| StorageError::invalid_record(key, err.to_string()))?;
        if record.version != RECORD_VERSION {
            return Err(StorageError::invalid_record(
                key,
                format!("unsupported record version {}", record.version),
            ));
        }
        Ok(record)
    }
}
