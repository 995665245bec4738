// MeshStore - Persistent transaction storage using sled
//
// Provides content-addressed storage for:
// - Encoded transaction payloads (keyed by message hash)
// - Raw (pre-signed, sender-only) transactions

use crate::payload::{MessageHash, RawTransaction};
use std::path::Path;
use thiserror::Error;

/// Key prefixes for organizing data
mod keys {
    pub const TRANSACTION_PREFIX: &[u8] = b"tx:";
    pub const RAW_TRANSACTION_PREFIX: &[u8] = b"raw:";
}

/// Errors from storage operations
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to open database: {0}")]
    OpenFailed(String),

    #[error("Database operation failed: {0}")]
    DatabaseError(String),

    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    #[error("Flush failed: {0}")]
    FlushFailed(String),
}

impl From<sled::Error> for StoreError {
    fn from(err: sled::Error) -> Self {
        StoreError::DatabaseError(err.to_string())
    }
}

/// A stored transaction row: the hash it is keyed by and its encoded payload
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredTransaction {
    pub hash: MessageHash,
    pub encoded_payload: Vec<u8>,
}

/// Storage of encoded payloads keyed by content hash
///
/// `save` is an upsert: saving the same hash twice replaces the row.
pub trait TransactionStore: Send + Sync {
    fn save(&self, hash: &MessageHash, encoded_payload: &[u8]) -> Result<(), StoreError>;

    fn retrieve_by_hash(&self, hash: &MessageHash) -> Result<Option<StoredTransaction>, StoreError>;

    /// Rows for the hashes that exist; missing hashes are skipped
    fn find_by_hashes(&self, hashes: &[MessageHash]) -> Result<Vec<StoredTransaction>, StoreError>;

    fn delete(&self, hash: &MessageHash) -> Result<bool, StoreError>;

    /// A page of rows in key order
    fn retrieve_transactions(&self, offset: usize, limit: usize) -> Result<Vec<StoredTransaction>, StoreError>;

    fn transaction_count(&self) -> Result<usize, StoreError>;
}

/// Storage of pre-signed transactions awaiting distribution
pub trait RawTransactionStore: Send + Sync {
    fn save_raw(&self, raw: &RawTransaction) -> Result<MessageHash, StoreError>;

    fn retrieve_raw_by_hash(&self, hash: &MessageHash) -> Result<Option<RawTransaction>, StoreError>;
}

/// Persistent key-value store for transactions
///
/// Uses sled for crash-safe, embedded storage.
/// All writes are atomic and durable after flush.
pub struct MeshStore {
    db: sled::Db,
}

impl MeshStore {
    /// Open or create a store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(path).map_err(|e| StoreError::OpenFailed(e.to_string()))?;
        Ok(Self { db })
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.db.is_empty())
    }

    /// Flush all pending writes to disk
    pub fn flush(&self) -> Result<(), StoreError> {
        self.db
            .flush()
            .map_err(|e| StoreError::FlushFailed(e.to_string()))?;
        Ok(())
    }

    fn tx_key(hash: &MessageHash) -> Vec<u8> {
        [keys::TRANSACTION_PREFIX, hash.as_bytes()].concat()
    }

    fn raw_key(hash: &MessageHash) -> Vec<u8> {
        [keys::RAW_TRANSACTION_PREFIX, hash.as_bytes()].concat()
    }

    fn to_row(key: &[u8], value: &[u8]) -> StoredTransaction {
        StoredTransaction {
            hash: MessageHash::from_bytes(&key[keys::TRANSACTION_PREFIX.len()..]),
            encoded_payload: value.to_vec(),
        }
    }
}

impl TransactionStore for MeshStore {
    fn save(&self, hash: &MessageHash, encoded_payload: &[u8]) -> Result<(), StoreError> {
        self.db.insert(Self::tx_key(hash), encoded_payload)?;
        Ok(())
    }

    fn retrieve_by_hash(&self, hash: &MessageHash) -> Result<Option<StoredTransaction>, StoreError> {
        Ok(self.db.get(Self::tx_key(hash))?.map(|value| StoredTransaction {
            hash: hash.clone(),
            encoded_payload: value.to_vec(),
        }))
    }

    fn find_by_hashes(&self, hashes: &[MessageHash]) -> Result<Vec<StoredTransaction>, StoreError> {
        let mut found = Vec::new();
        for hash in hashes {
            if let Some(row) = self.retrieve_by_hash(hash)? {
                found.push(row);
            }
        }
        Ok(found)
    }

    fn delete(&self, hash: &MessageHash) -> Result<bool, StoreError> {
        Ok(self.db.remove(Self::tx_key(hash))?.is_some())
    }

    fn retrieve_transactions(&self, offset: usize, limit: usize) -> Result<Vec<StoredTransaction>, StoreError> {
        let mut rows = Vec::new();
        for result in self.db.scan_prefix(keys::TRANSACTION_PREFIX).skip(offset).take(limit) {
            let (key, value) = result?;
            rows.push(Self::to_row(&key, &value));
        }
        Ok(rows)
    }

    fn transaction_count(&self) -> Result<usize, StoreError> {
        let mut count = 0;
        for result in self.db.scan_prefix(keys::TRANSACTION_PREFIX) {
            result?;
            count += 1;
        }
        Ok(count)
    }
}

impl RawTransactionStore for MeshStore {
    fn save_raw(&self, raw: &RawTransaction) -> Result<MessageHash, StoreError> {
        let hash = raw.hash();
        let bytes = postcard::to_allocvec(raw)
            .map_err(|e| StoreError::SerializationFailed(e.to_string()))?;
        self.db.insert(Self::raw_key(&hash), bytes)?;
        Ok(hash)
    }

    fn retrieve_raw_by_hash(&self, hash: &MessageHash) -> Result<Option<RawTransaction>, StoreError> {
        match self.db.get(Self::raw_key(hash))? {
            Some(bytes) => {
                let raw = postcard::from_bytes(&bytes)
                    .map_err(|e| StoreError::DeserializationFailed(e.to_string()))?;
                Ok(Some(raw))
            }
            None => Ok(None),
        }
    }
}
