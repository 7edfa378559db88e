//! Multi-scale down-resolution of mutated block sets.
//!
//! A [`Mutation`] stashes the latest full-resolution block written at
//! each coordinate. `done` hands the stash to a background task that
//! chains [`Downreser::store_downres`] from scale 0 upward, each call
//! returning the next-coarser block map. Per-scale updating counters let
//! readers detect scales that are mid-update; they are modified only by
//! the mutation lifecycle and read lock-free.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{error, info};

use common::{BCoord, Point3d, VersionId};

use crate::block::Block;
use crate::error::{Error, Result};

/// Blocks of one scale keyed by their grid coordinate.
pub type BlockMap = HashMap<BCoord, Block>;

/// Per-scale updating counters for one data instance.
///
/// A scale's counter is positive while some mutation's down-resolution
/// pass has yet to store that scale. Reads never lock and may observe
/// the counter mid-change; callers needing consistent reads across
/// scales consult [`any_scale_updating`](Self::any_scale_updating).
pub struct ScaleUpdater {
    counters: Vec<AtomicU32>,
}

impl ScaleUpdater {
    pub fn new(levels: u8) -> Self {
        Self {
            counters: (0..levels).map(|_| AtomicU32::new(0)).collect(),
        }
    }

    pub fn start_scale_update(&self, scale: u8) {
        match self.counters.get(scale as usize) {
            Some(c) => {
                c.fetch_add(1, Ordering::SeqCst);
            }
            None => error!(scale, "start of update for unknown scale"),
        }
    }

    /// Decrements the scale's counter, saturating at zero with a logged
    /// error rather than wrapping.
    pub fn stop_scale_update(&self, scale: u8) {
        let Some(counter) = self.counters.get(scale as usize) else {
            error!(scale, "stop of update for unknown scale");
            return;
        };
        let mut current = counter.load(Ordering::SeqCst);
        loop {
            if current == 0 {
                error!(scale, "stop of update would drop counter below zero");
                return;
            }
            match counter.compare_exchange(
                current,
                current - 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }

    pub fn scale_updating(&self, scale: u8) -> bool {
        self.counters
            .get(scale as usize)
            .map(|c| c.load(Ordering::SeqCst) > 0)
            .unwrap_or(false)
    }

    pub fn any_scale_updating(&self) -> bool {
        self.counters.iter().any(|c| c.load(Ordering::SeqCst) > 0)
    }
}

/// A data instance that can compute and persist down-resolution scales.
#[async_trait]
pub trait Downreser: Send + Sync + 'static {
    /// Name of the data instance, used in log output.
    fn data_name(&self) -> &str;

    /// Number of coarser scales past full resolution, at least 1.
    fn downres_levels(&self) -> u8;

    /// The instance's per-scale updating counters.
    fn updater(&self) -> &ScaleUpdater;

    /// Computes and stores the down-resolution of `hires` at the given
    /// scale, returning the blocks at half resolution for the next
    /// scale's pass.
    async fn store_downres(
        &self,
        version: VersionId,
        scale: u8,
        hires: BlockMap,
    ) -> Result<BlockMap>;
}

/// A stash of block changes whose coarser-scale propagation runs when
/// the mutation is done.
pub struct Mutation {
    d: Arc<dyn Downreser>,
    version: VersionId,
    id: u64,
    stash: Mutex<Option<BlockMap>>,
}

impl Mutation {
    /// Opens a mutation, marking every scale of the instance as
    /// updating until the down-resolution pass stores it.
    pub fn new(d: Arc<dyn Downreser>, version: VersionId, id: u64) -> Self {
        for scale in 0..d.downres_levels() {
            d.updater().start_scale_update(scale);
        }
        Self {
            d,
            version,
            id,
            stash: Mutex::new(Some(BlockMap::new())),
        }
    }

    /// Stashes the latest value of a mutated block at full resolution.
    /// The last write for a coordinate wins within one mutation.
    pub fn block_mutated(&self, bcoord: BCoord, block: Block) -> Result<()> {
        let mut stash = self
            .stash
            .lock()
            .map_err(|e| Error::Internal(format!("mutation lock poisoned: {}", e)))?;
        match stash.as_mut() {
            Some(map) => {
                map.insert(bcoord, block);
                Ok(())
            }
            None => Err(Error::MutationClosed),
        }
    }

    /// Closes the mutation and launches the scale chain in a background
    /// task, returning its handle for callers that need completion.
    ///
    /// The task stores each scale in order, decrementing that scale's
    /// updating counter after a successful store. A store error logs
    /// and halts the chain; counters for unreached scales stay positive
    /// so readers keep seeing those scales as stale.
    pub fn done(&self) -> Result<JoinHandle<()>> {
        let hires = self
            .stash
            .lock()
            .map_err(|e| Error::Internal(format!("mutation lock poisoned: {}", e)))?
            .take()
            .ok_or(Error::MutationClosed)?;

        let d = Arc::clone(&self.d);
        let version = self.version;
        let id = self.id;
        Ok(tokio::spawn(async move {
            let mut current = hires;
            for scale in 0..d.downres_levels() {
                info!(
                    data = d.data_name(),
                    scale, "computing down-resolution blocks"
                );
                match d.store_downres(version, scale, current).await {
                    Ok(next) => {
                        d.updater().stop_scale_update(scale);
                        current = next;
                    }
                    Err(e) => {
                        error!(
                            data = d.data_name(),
                            mutation = id,
                            scale,
                            "down-resolution halted: {}",
                            e
                        );
                        return;
                    }
                }
            }
        }))
    }
}

/// Reduces a dense label volume by 2 along each axis.
///
/// Each output voxel is the most frequent label of its 2×2×2 source
/// group; ties break to the smallest label. Dimensions must be positive
/// and even.
pub fn downsample_dense(dense: &[u64], size: Point3d) -> Result<(Vec<u64>, Point3d)> {
    if size.x <= 0 || size.y <= 0 || size.z <= 0 || size.x % 2 != 0 || size.y % 2 != 0
        || size.z % 2 != 0
    {
        return Err(Error::BadDimensions(format!(
            "volume size {} must have positive even dimensions",
            size
        )));
    }
    let voxels = size.voxel_count() as usize;
    if dense.len() != voxels {
        return Err(Error::BufferTooShort {
            expected: voxels * 8,
            got: dense.len() * 8,
        });
    }

    let (bx, by) = (size.x as usize, size.y as usize);
    let half = Point3d::new(size.x / 2, size.y / 2, size.z / 2);
    let (hx, hy, hz) = (half.x as usize, half.y as usize, half.z as usize);
    let mut out = Vec::with_capacity(hx * hy * hz);
    let mut group = [0u64; 8];
    for z in 0..hz {
        for y in 0..hy {
            for x in 0..hx {
                let mut g = 0;
                for dz in 0..2 {
                    for dy in 0..2 {
                        for dx in 0..2 {
                            group[g] =
                                dense[((2 * z + dz) * by + 2 * y + dy) * bx + 2 * x + dx];
                            g += 1;
                        }
                    }
                }
                out.push(mode_of_group(&group));
            }
        }
    }
    Ok((out, half))
}

/// Most frequent label of a group; ties break to the smallest label.
fn mode_of_group(group: &[u64; 8]) -> u64 {
    let mut best = 0u64;
    let mut best_count = 0;
    for &candidate in group {
        let count = group.iter().filter(|&&v| v == candidate).count();
        if count > best_count || (count == best_count && candidate < best) {
            best = candidate;
            best_count = count;
        }
    }
    best
}

/// Reduces a block map to the next coarser scale.
///
/// Every hi-res block fills one octant of its parent block at half
/// resolution; parent octants with no source block stay at label 0. All
/// blocks must share `block_size`, and parent blocks come out at the
/// same size.
pub fn downres_blockmap(hires: &BlockMap, block_size: Point3d) -> Result<BlockMap> {
    let voxels = block_size.voxel_count() as usize;
    let (bx, by) = (block_size.x as usize, block_size.y as usize);
    let mut parents: HashMap<BCoord, Vec<u64>> = HashMap::new();

    for (bcoord, block) in hires {
        if block.size() != block_size {
            return Err(Error::BadDimensions(format!(
                "block at {} has size {}, expected {}",
                bcoord,
                block.size(),
                block_size
            )));
        }
        let dense = block.label_array()?;
        let (down, half) = downsample_dense(&dense, block_size)?;
        let (hx, hy, hz) = (half.x as usize, half.y as usize, half.z as usize);

        let parent = BCoord::new(bcoord.x >> 1, bcoord.y >> 1, bcoord.z >> 1);
        let ox = (bcoord.x & 1) as usize * hx;
        let oy = (bcoord.y & 1) as usize * hy;
        let oz = (bcoord.z & 1) as usize * hz;
        let pdense = parents
            .entry(parent)
            .or_insert_with(|| vec![0u64; voxels]);
        for z in 0..hz {
            for y in 0..hy {
                let src = (z * hy + y) * hx;
                let dst = ((oz + z) * by + oy + y) * bx + ox;
                pdense[dst..dst + hx].copy_from_slice(&down[src..src + hx]);
            }
        }
    }

    parents
        .into_iter()
        .map(|(bcoord, dense)| Ok((bcoord, Block::make_from_labels(&dense, block_size)?)))
        .collect()
}
