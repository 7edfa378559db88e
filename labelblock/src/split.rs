//! Relabeling of voxel runs under a target label.

use common::Rle;

use crate::block::{encode_with_table, Block, PositionedBlock};
use crate::error::Result;

/// A split: voxels covered by `rles` whose label equals `target` are
/// relabeled to `new_label`. Runs are in global voxel coordinates.
#[derive(Debug, Clone)]
pub struct SplitOp {
    pub target: u64,
    pub new_label: u64,
    pub rles: Vec<Rle>,
}

impl PositionedBlock {
    /// Applies a split, returning the relabeled block plus the counts of
    /// target voxels kept and split. The input block is not mutated.
    ///
    /// Runs are clipped to the block's voxel bounds; runs entirely
    /// outside are ignored. A target absent from the block is not an
    /// error: the result is the unchanged block with both counts zero.
    /// The result's label table preserves the input table's order, with
    /// the target removed if no voxels remain and the new label appended
    /// if newly introduced.
    pub fn split(&self, op: &SplitOp) -> Result<(Block, u64, u64)> {
        let size = self.block.size();
        let mut dense = self.block.label_array()?;
        let total = dense.iter().filter(|&&l| l == op.target).count() as u64;
        if total == 0 {
            return Ok((self.block.clone(), 0, 0));
        }

        let min = self.min_voxel();
        let max = self.max_voxel();
        let (bx, by) = (size.x as usize, size.y as usize);
        let mut split_count = 0u64;
        for rle in &op.rles {
            let start = rle.start;
            if start.y < min.y || start.y > max.y || start.z < min.z || start.z > max.z {
                continue;
            }
            let x0 = start.x.max(min.x);
            let x1 = (start.x + rle.length - 1).min(max.x);
            if x1 < x0 {
                continue;
            }
            let row =
                ((start.z - min.z) as usize * by + (start.y - min.y) as usize) * bx;
            for x in x0..=x1 {
                let i = row + (x - min.x) as usize;
                if dense[i] == op.target {
                    dense[i] = op.new_label;
                    split_count += 1;
                }
            }
        }

        let kept = total - split_count;
        if split_count == 0 {
            return Ok((self.block.clone(), kept, 0));
        }

        let mut table = self.block.labels();
        if kept == 0 {
            table.retain(|&l| l != op.target);
        }
        if !table.contains(&op.new_label) {
            table.push(op.new_label);
        }
        let data = encode_with_table(&dense, size, &table)?;
        Ok((Block::from_parts(size, data), kept, split_count))
    }
}
