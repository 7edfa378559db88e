//! Compressed label-block codec and block-level operators for dense 3-D
//! label volumes (64-bit segmentation IDs, one per voxel).
//!
//! Volumes are stored in fixed-size blocks whose dimensions are each a
//! positive multiple of 8. The serialized block format exploits the
//! sparsity of distinct labels per block: a block-level label table plus
//! 8×8×8 sub-blocks packed at the minimum bit width for their local
//! label count, with an O(1) representation for single-label blocks.
//!
//! On top of the codec sit the block operators: [`PositionedBlock::split`]
//! relabels voxel runs under a target label, [`OutputOp`] projects a
//! block's voxels for a label set into run-length-encoded spans in global
//! coordinates, and [`Mutation`] drives multi-scale down-resolution of
//! mutated block sets.

pub mod block;
pub mod downres;
pub mod error;
pub mod project;
pub mod split;

pub use block::{Block, PositionedBlock, SUB_BLOCK_EDGE, SUB_BLOCK_VOXELS};
pub use downres::{downres_blockmap, downsample_dense, BlockMap, Downreser, Mutation, ScaleUpdater};
pub use error::{Error, Result};
pub use project::{LabelSet, OutputOp};
pub use split::SplitOp;
