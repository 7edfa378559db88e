pub mod in_memory;

use async_trait::async_trait;
use bytes::Bytes;

/// A key-value record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
    pub key: Bytes,
    pub value: Bytes,
}

impl Record {
    pub fn new(key: Bytes, value: Bytes) -> Self {
        Self { key, value }
    }
}

/// Error type for storage operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Storage-related errors
    Storage(String),
    /// Internal errors
    Internal(String),
}

impl std::error::Error for StorageError {}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            StorageError::Storage(msg) => write!(f, "Storage error: {}", msg),
            StorageError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

/// Result type alias for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// A batch of writes applied atomically on commit.
///
/// Either every put in the batch becomes visible or none does. A batch
/// that is dropped without `commit` writes nothing.
#[async_trait]
pub trait WriteBatch: Send {
    /// Stages a key-value pair for the next commit.
    fn put(&mut self, key: Bytes, value: Bytes);

    /// Number of staged pairs.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Atomically applies every staged pair.
    async fn commit(self: Box<Self>) -> StorageResult<()>;
}

/// The key-value capabilities this layer requires of a storage engine:
/// point reads, ordered ranged scans, atomic batched writes, and bulk
/// puts. Keys are opaque byte strings constructed by the caller.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: Bytes) -> StorageResult<Option<Record>>;

    /// Returns records with `beg <= key < end` in ascending key order.
    async fn get_range(&self, beg: Bytes, end: Bytes) -> StorageResult<Vec<Record>>;

    /// Starts a new atomic write batch.
    fn new_batch(&self) -> Box<dyn WriteBatch>;

    /// Writes records in one bulk operation.
    async fn put_range(&self, records: Vec<Record>) -> StorageResult<()>;
}
