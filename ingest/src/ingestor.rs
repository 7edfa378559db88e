//! Bulk block writer: bounded encode pool plus a batching writer task.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use common::{BCoord, KeyValueStore, Point3d, Record, Runtime, WriteLockRegistry};
use labelblock::{Block, PositionedBlock};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::DataContext;

/// Number of key-value pairs written as one atomic batch.
pub const KV_WRITE_SIZE: usize = 500;

/// A dense voxel buffer destined for one block coordinate.
#[derive(Debug, Clone)]
pub struct BlockWrite {
    pub bcoord: BCoord,
    pub dense: Bytes,
}

/// Writes and reads label blocks against a key-value store.
///
/// Writes for one (instance, version) are serialized under a write lock
/// so concurrent ingests cannot interleave their block merges; reads
/// never take the lock.
pub struct BlockIngestor {
    storage: Arc<dyn KeyValueStore>,
    runtime: Runtime,
    locks: WriteLockRegistry,
    config: Config,
}

impl BlockIngestor {
    pub fn new(storage: Arc<dyn KeyValueStore>, runtime: Runtime, config: Config) -> Self {
        Self {
            storage,
            runtime,
            locks: WriteLockRegistry::new(),
            config,
        }
    }

    /// Compresses and stores a set of dense blocks.
    ///
    /// Each buffer is encoded by its own task, gated by the runtime's
    /// handler tokens; encoded blocks stream to a writer task that
    /// commits batches in arrival order, [`KV_WRITE_SIZE`] pairs per
    /// commit with a final partial commit. The first error is returned
    /// after in-flight work drains.
    pub async fn put_blocks(
        &self,
        ctx: &DataContext,
        block_size: Point3d,
        writes: Vec<BlockWrite>,
    ) -> Result<()> {
        if writes.is_empty() {
            return Ok(());
        }
        let _guard = self.locks.acquire(&ctx.instance, ctx.version).await;

        let (tx, rx) = mpsc::channel::<Record>(self.config.queue_capacity);
        let writer: JoinHandle<Result<usize>> =
            tokio::spawn(write_batches(Arc::clone(&self.storage), rx));

        let mut encoders = Vec::with_capacity(writes.len());
        for write in writes {
            let token = self.runtime.handler_token().await;
            let tx = tx.clone();
            let key = ctx.block_key(&write.bcoord);
            encoders.push(tokio::spawn(async move {
                let _token = token;
                let block = Block::make(&write.dense, block_size)?;
                tx.send(Record::new(key, block.serialization().clone()))
                    .await
                    .map_err(|_| Error::Shutdown)
            }));
        }
        drop(tx);

        let mut first_err = None;
        for encoder in encoders {
            match encoder.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    first_err.get_or_insert(e);
                }
                Err(e) => {
                    first_err.get_or_insert(Error::Encoding(format!("encode task failed: {}", e)));
                }
            }
        }
        let written = match writer.await {
            Ok(Ok(written)) => written,
            Ok(Err(e)) => return Err(first_err.unwrap_or(e)),
            Err(_) => return Err(first_err.unwrap_or(Error::Shutdown)),
        };
        debug!(
            instance = %ctx.instance,
            version = ctx.version,
            blocks = written,
            "wrote label blocks"
        );
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Reads back the blocks in the inclusive coordinate span
    /// `[beg, end]`, in ZYX scan order.
    pub async fn read_blocks(
        &self,
        ctx: &DataContext,
        beg: BCoord,
        end: BCoord,
    ) -> Result<Vec<PositionedBlock>> {
        let (lo, hi) = ctx.block_range(&beg, &end);
        let records = self.storage.get_range(lo, hi).await?;
        records
            .into_iter()
            .map(|record| {
                let bcoord = ctx.bcoord_from_key(&record.key)?;
                let block = Block::from_bytes(record.value)?;
                Ok(PositionedBlock::new(block, bcoord))
            })
            .collect()
    }
}

/// Writer loop: drains encoded blocks and commits them in batches.
async fn write_batches(
    storage: Arc<dyn KeyValueStore>,
    mut rx: mpsc::Receiver<Record>,
) -> Result<usize> {
    let mut batch = storage.new_batch();
    let mut written = 0usize;
    while let Some(record) = rx.recv().await {
        batch.put(record.key, record.value);
        written += 1;
        if batch.len() >= KV_WRITE_SIZE {
            batch.commit().await?;
            batch = storage.new_batch();
        }
    }
    if !batch.is_empty() {
        batch.commit().await?;
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::storage::in_memory::{FailingStore, InMemoryStore};
    use common::StorageError;

    fn dense_bytes(labels: &[u64]) -> Bytes {
        let mut out = Vec::with_capacity(labels.len() * 8);
        for l in labels {
            out.extend_from_slice(&l.to_le_bytes());
        }
        Bytes::from(out)
    }

    fn solid_write(bcoord: BCoord, label: u64) -> BlockWrite {
        BlockWrite {
            bcoord,
            dense: dense_bytes(&vec![label; 512]),
        }
    }

    fn ingestor(storage: Arc<dyn KeyValueStore>) -> BlockIngestor {
        BlockIngestor::new(storage, Runtime::new(4), Config::default())
    }

    #[tokio::test]
    async fn should_write_and_read_back_blocks() {
        // given
        let store = Arc::new(InMemoryStore::new());
        let ingestor = ingestor(store.clone());
        let ctx = DataContext::new("segmentation", 1);
        let size = Point3d::new(8, 8, 8);
        let writes = vec![
            solid_write(BCoord::new(0, 0, 0), 4),
            solid_write(BCoord::new(1, 0, 0), 5),
            solid_write(BCoord::new(0, 1, 0), 6),
        ];

        // when
        ingestor.put_blocks(&ctx, size, writes).await.unwrap();
        let blocks = ingestor
            .read_blocks(&ctx, BCoord::new(0, 0, 0), BCoord::new(1, 1, 0))
            .await
            .unwrap();

        // then - all three back, in ZYX scan order
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0].bcoord, BCoord::new(0, 0, 0));
        assert_eq!(blocks[0].block.solid_label(), Some(4));
        assert_eq!(blocks[1].bcoord, BCoord::new(1, 0, 0));
        assert_eq!(blocks[1].block.solid_label(), Some(5));
        assert_eq!(blocks[2].bcoord, BCoord::new(0, 1, 0));
        assert_eq!(blocks[2].block.solid_label(), Some(6));
    }

    #[tokio::test]
    async fn should_commit_in_batches_of_at_most_500() {
        // given - enough blocks for two full batches and one partial
        let store = Arc::new(InMemoryStore::new());
        let ingestor = ingestor(store.clone());
        let ctx = DataContext::new("segmentation", 1);
        let size = Point3d::new(8, 8, 8);
        let writes: Vec<BlockWrite> = (0..1200)
            .map(|i| solid_write(BCoord::new(i % 40, i / 40, 0), i as u64))
            .collect();

        // when
        ingestor.put_blocks(&ctx, size, writes).await.unwrap();

        // then - 500 + 500 + 200
        assert_eq!(store.len(), 1200);
        assert_eq!(store.commit_count(), 3);
    }

    #[tokio::test]
    async fn should_round_trip_voxels_through_storage() {
        // given - a block with distinct labels
        let store = Arc::new(InMemoryStore::new());
        let ingestor = ingestor(store);
        let ctx = DataContext::new("segmentation", 1);
        let size = Point3d::new(8, 8, 8);
        let volume: Vec<u64> = (0..512u64).collect();
        let write = BlockWrite {
            bcoord: BCoord::new(2, 3, 4),
            dense: dense_bytes(&volume),
        };

        // when
        ingestor
            .put_blocks(&ctx, size, vec![write.clone()])
            .await
            .unwrap();
        let blocks = ingestor
            .read_blocks(&ctx, BCoord::new(2, 3, 4), BCoord::new(2, 3, 4))
            .await
            .unwrap();

        // then
        assert_eq!(blocks.len(), 1);
        let (decoded, got_size) = blocks[0].block.label_volume().unwrap();
        assert_eq!(got_size, size);
        assert_eq!(Bytes::from(decoded), write.dense);
    }

    #[tokio::test]
    async fn should_not_return_blocks_of_other_versions() {
        // given - same coordinates under two versions
        let store = Arc::new(InMemoryStore::new());
        let ingestor = ingestor(store);
        let v1 = DataContext::new("segmentation", 1);
        let v2 = DataContext::new("segmentation", 2);
        let size = Point3d::new(8, 8, 8);
        ingestor
            .put_blocks(&v1, size, vec![solid_write(BCoord::new(0, 0, 0), 1)])
            .await
            .unwrap();
        ingestor
            .put_blocks(&v2, size, vec![solid_write(BCoord::new(0, 0, 0), 2)])
            .await
            .unwrap();

        // when
        let blocks = ingestor
            .read_blocks(&v1, BCoord::new(0, 0, 0), BCoord::new(0, 0, 0))
            .await
            .unwrap();

        // then
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].block.solid_label(), Some(1));
    }

    #[tokio::test]
    async fn should_propagate_encoding_errors() {
        // given - a buffer one voxel short
        let store = Arc::new(InMemoryStore::new());
        let ingestor = ingestor(store);
        let ctx = DataContext::new("segmentation", 1);
        let bad = BlockWrite {
            bcoord: BCoord::new(0, 0, 0),
            dense: dense_bytes(&vec![0u64; 511]),
        };

        // when
        let result = ingestor
            .put_blocks(&ctx, Point3d::new(8, 8, 8), vec![bad])
            .await;

        // then
        assert!(matches!(result, Err(Error::Encoding(_))));
    }

    #[tokio::test]
    async fn should_keep_good_blocks_when_one_encode_fails() {
        // given - one bad buffer among good ones
        let store = Arc::new(InMemoryStore::new());
        let ingestor = ingestor(store.clone());
        let ctx = DataContext::new("segmentation", 1);
        let size = Point3d::new(8, 8, 8);
        let writes = vec![
            solid_write(BCoord::new(0, 0, 0), 1),
            BlockWrite {
                bcoord: BCoord::new(1, 0, 0),
                dense: dense_bytes(&vec![0u64; 10]),
            },
            solid_write(BCoord::new(2, 0, 0), 3),
        ];

        // when
        let result = ingestor.put_blocks(&ctx, size, writes).await;

        // then - error surfaces, surviving blocks are still written
        assert!(matches!(result, Err(Error::Encoding(_))));
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn should_propagate_commit_failure() {
        // given
        let inner: Arc<dyn KeyValueStore> = Arc::new(InMemoryStore::new());
        let failing = FailingStore::wrap(inner);
        failing.fail_commit(StorageError::Storage("test commit error".into()));
        let ingestor = ingestor(failing);
        let ctx = DataContext::new("segmentation", 1);

        // when
        let result = ingestor
            .put_blocks(
                &ctx,
                Point3d::new(8, 8, 8),
                vec![solid_write(BCoord::new(0, 0, 0), 1)],
            )
            .await;

        // then
        assert!(
            matches!(&result, Err(Error::Storage(msg)) if msg.contains("test commit error")),
            "expected commit error, got: {:?}",
            result,
        );
    }

    #[tokio::test]
    async fn should_propagate_scan_failure() {
        // given
        let inner: Arc<dyn KeyValueStore> = Arc::new(InMemoryStore::new());
        let failing = FailingStore::wrap(inner);
        failing.fail_get_range(StorageError::Storage("test scan error".into()));
        let ingestor = ingestor(failing);
        let ctx = DataContext::new("segmentation", 1);

        // when
        let result = ingestor
            .read_blocks(&ctx, BCoord::new(0, 0, 0), BCoord::new(1, 1, 1))
            .await;

        // then
        assert!(matches!(result, Err(Error::Storage(_))));
    }

    #[tokio::test]
    async fn should_handle_empty_write_set() {
        // given
        let store = Arc::new(InMemoryStore::new());
        let ingestor = ingestor(store.clone());
        let ctx = DataContext::new("segmentation", 1);

        // when
        ingestor
            .put_blocks(&ctx, Point3d::new(8, 8, 8), Vec::new())
            .await
            .unwrap();

        // then
        assert!(store.is_empty());
        assert_eq!(store.commit_count(), 0);
    }
}
