use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use bytes::Bytes;

use super::{KeyValueStore, Record, StorageError, StorageResult, WriteBatch};

/// In-memory implementation of [`KeyValueStore`] using a BTreeMap.
///
/// Stores all data in memory; useful for testing or scenarios where
/// durability is not required. Batch commits count toward
/// [`commit_count`](Self::commit_count) so tests can observe batching
/// behavior.
pub struct InMemoryStore {
    data: Arc<RwLock<BTreeMap<Bytes, Bytes>>>,
    commits: Arc<AtomicUsize>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            data: Arc::new(RwLock::new(BTreeMap::new())),
            commits: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of batch commits applied so far.
    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    /// Number of records currently stored.
    pub fn len(&self) -> usize {
        self.data.read().map(|d| d.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    #[tracing::instrument(level = "trace", skip_all)]
    async fn get(&self, key: Bytes) -> StorageResult<Option<Record>> {
        let data = self
            .data
            .read()
            .map_err(|e| StorageError::Internal(format!("Failed to acquire read lock: {}", e)))?;
        Ok(data.get(&key).map(|v| Record::new(key, v.clone())))
    }

    #[tracing::instrument(level = "trace", skip_all)]
    async fn get_range(&self, beg: Bytes, end: Bytes) -> StorageResult<Vec<Record>> {
        let data = self
            .data
            .read()
            .map_err(|e| StorageError::Internal(format!("Failed to acquire read lock: {}", e)))?;
        Ok(data
            .range(beg..end)
            .map(|(k, v)| Record::new(k.clone(), v.clone()))
            .collect())
    }

    fn new_batch(&self) -> Box<dyn WriteBatch> {
        Box::new(InMemoryBatch {
            data: Arc::clone(&self.data),
            commits: Arc::clone(&self.commits),
            writes: Vec::new(),
        })
    }

    #[tracing::instrument(level = "trace", skip_all)]
    async fn put_range(&self, records: Vec<Record>) -> StorageResult<()> {
        let mut data = self
            .data
            .write()
            .map_err(|e| StorageError::Internal(format!("Failed to acquire write lock: {}", e)))?;
        for r in records {
            data.insert(r.key, r.value);
        }
        Ok(())
    }
}

struct InMemoryBatch {
    data: Arc<RwLock<BTreeMap<Bytes, Bytes>>>,
    commits: Arc<AtomicUsize>,
    writes: Vec<(Bytes, Bytes)>,
}

#[async_trait]
impl WriteBatch for InMemoryBatch {
    fn put(&mut self, key: Bytes, value: Bytes) {
        self.writes.push((key, value));
    }

    fn len(&self) -> usize {
        self.writes.len()
    }

    async fn commit(self: Box<Self>) -> StorageResult<()> {
        let mut data = self
            .data
            .write()
            .map_err(|e| StorageError::Internal(format!("Failed to acquire write lock: {}", e)))?;
        for (k, v) in self.writes {
            data.insert(k, v);
        }
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Wraps a store and injects failures into selected operations.
///
/// Failures are sticky until cleared; operations not configured to fail
/// pass through to the inner store.
pub struct FailingStore {
    inner: Arc<dyn KeyValueStore>,
    fail_commit: Arc<Mutex<Option<StorageError>>>,
    fail_get_range: Arc<Mutex<Option<StorageError>>>,
}

impl FailingStore {
    pub fn wrap(inner: Arc<dyn KeyValueStore>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            fail_commit: Arc::new(Mutex::new(None)),
            fail_get_range: Arc::new(Mutex::new(None)),
        })
    }

    /// Makes every subsequent batch commit fail with `err`.
    pub fn fail_commit(&self, err: StorageError) {
        *self.fail_commit.lock().expect("failure flag lock poisoned") = Some(err);
    }

    /// Makes every subsequent ranged scan fail with `err`.
    pub fn fail_get_range(&self, err: StorageError) {
        *self.fail_get_range.lock().expect("failure flag lock poisoned") = Some(err);
    }
}

#[async_trait]
impl KeyValueStore for FailingStore {
    async fn get(&self, key: Bytes) -> StorageResult<Option<Record>> {
        self.inner.get(key).await
    }

    async fn get_range(&self, beg: Bytes, end: Bytes) -> StorageResult<Vec<Record>> {
        if let Some(err) = self
            .fail_get_range
            .lock()
            .expect("failure flag lock poisoned")
            .clone()
        {
            return Err(err);
        }
        self.inner.get_range(beg, end).await
    }

    fn new_batch(&self) -> Box<dyn WriteBatch> {
        Box::new(FailingBatch {
            inner: self.inner.new_batch(),
            fail_commit: Arc::clone(&self.fail_commit),
        })
    }

    async fn put_range(&self, records: Vec<Record>) -> StorageResult<()> {
        self.inner.put_range(records).await
    }
}

struct FailingBatch {
    inner: Box<dyn WriteBatch>,
    fail_commit: Arc<Mutex<Option<StorageError>>>,
}

#[async_trait]
impl WriteBatch for FailingBatch {
    fn put(&mut self, key: Bytes, value: Bytes) {
        self.inner.put(key, value);
    }

    fn len(&self) -> usize {
        self.inner.len()
    }

    async fn commit(self: Box<Self>) -> StorageResult<()> {
        if let Some(err) = self
            .fail_commit
            .lock()
            .expect("failure flag lock poisoned")
            .clone()
        {
            return Err(err);
        }
        self.inner.commit().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b(s: &str) -> Bytes {
        Bytes::from(s.to_string())
    }

    #[tokio::test]
    async fn should_get_what_was_committed() {
        // given
        let store = InMemoryStore::new();
        let mut batch = store.new_batch();
        batch.put(b("k1"), b("v1"));
        batch.put(b("k2"), b("v2"));

        // when
        batch.commit().await.unwrap();

        // then
        let r = store.get(b("k1")).await.unwrap().unwrap();
        assert_eq!(r.value, b("v1"));
        assert_eq!(store.len(), 2);
        assert_eq!(store.commit_count(), 1);
    }

    #[tokio::test]
    async fn should_write_nothing_for_dropped_batch() {
        // given
        let store = InMemoryStore::new();
        let mut batch = store.new_batch();
        batch.put(b("k1"), b("v1"));

        // when - dropped without commit
        drop(batch);

        // then
        assert!(store.is_empty());
        assert_eq!(store.commit_count(), 0);
    }

    #[tokio::test]
    async fn should_scan_range_in_ascending_order() {
        // given
        let store = InMemoryStore::new();
        store
            .put_range(vec![
                Record::new(b("c"), b("3")),
                Record::new(b("a"), b("1")),
                Record::new(b("b"), b("2")),
                Record::new(b("d"), b("4")),
            ])
            .await
            .unwrap();

        // when - end is exclusive
        let records = store.get_range(b("a"), b("d")).await.unwrap();

        // then
        let keys: Vec<Bytes> = records.iter().map(|r| r.key.clone()).collect();
        assert_eq!(keys, vec![b("a"), b("b"), b("c")]);
    }

    #[tokio::test]
    async fn should_overwrite_on_repeated_put() {
        // given
        let store = InMemoryStore::new();
        store
            .put_range(vec![Record::new(b("k"), b("old"))])
            .await
            .unwrap();

        // when
        let mut batch = store.new_batch();
        batch.put(b("k"), b("new"));
        batch.commit().await.unwrap();

        // then
        let r = store.get(b("k")).await.unwrap().unwrap();
        assert_eq!(r.value, b("new"));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn should_inject_commit_failure() {
        // given
        let inner = Arc::new(InMemoryStore::new());
        let failing = FailingStore::wrap(inner.clone());
        failing.fail_commit(StorageError::Storage("test commit error".into()));

        // when
        let mut batch = failing.new_batch();
        batch.put(b("k"), b("v"));
        let result = batch.commit().await;

        // then
        assert_eq!(
            result,
            Err(StorageError::Storage("test commit error".into()))
        );
        assert!(inner.is_empty());
    }

    #[tokio::test]
    async fn should_inject_scan_failure() {
        // given
        let inner = Arc::new(InMemoryStore::new());
        let failing = FailingStore::wrap(inner);
        failing.fail_get_range(StorageError::Storage("test scan error".into()));

        // when
        let result = failing.get_range(b("a"), b("z")).await;

        // then
        assert!(result.is_err());
    }
}
