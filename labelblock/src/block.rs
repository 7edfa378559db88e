//! Compressed label block codec.
//!
//! A block holds `bx·by·bz` voxels (each dimension a positive multiple
//! of 8) of 64-bit labels. The serialized form stores the block's
//! distinct labels once, then references them indirectly from 8×8×8
//! sub-blocks packed at the minimum bit width for their local label
//! count.
//!
//! # Serialized layout
//!
//! All fields are little-endian:
//!
//! ```text
//! | u32 gx | u32 gy | u32 gz |        sub-block grid dims (block dims / 8)
//! | u32 N  |                          label table length
//! | u64 L[0] .. u64 L[N-1] |          labels, first-appearance order
//! for each sub-block in ZYX order (x fastest):
//!   | u16 n |                         local label count (>= 1)
//!   | u32 idx[0] .. u32 idx[n-1] |    indices into L
//!   if n > 1:
//!     512 * ceil(log2(n)) bits, LSB-first within each byte,
//!     zero-padded to the next byte, voxels in ZYX order
//! ```
//!
//! A block with a single label (`N == 1`) carries no sub-block bytes at
//! all: the whole serialization is the 24-byte header plus label.
//! Sub-block voxel values are indices into the sub-block's local index
//! list, not into the label table directly.

use std::collections::HashMap;

use bytes::{BufMut, Bytes, BytesMut};
use common::{BCoord, Point3d};

use crate::error::{Error, Result};

/// Edge length of a sub-block in voxels.
pub const SUB_BLOCK_EDGE: usize = 8;

/// Number of voxels in a sub-block.
pub const SUB_BLOCK_VOXELS: usize = 512;

/// Byte length of the serialized header through the label count.
const HEADER_LEN: usize = 16;

/// Largest accepted sub-block grid dimension (1024 voxels per side).
/// Headers claiming more describe no block this layer would ever write
/// and would otherwise drive decode allocations from 24 hostile bytes.
const MAX_GRID_DIM: u32 = 128;

/// A compressed block of labels.
///
/// Holds the serialized form; decoding allocates. Construction always
/// validates, so every `Block` in hand carries a structurally sound
/// serialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    size: Point3d,
    data: Bytes,
}

impl Block {
    /// Compresses a dense volume of little-endian u64 labels, row-major
    /// with x fastest, into a block.
    pub fn make(dense: &[u8], size: Point3d) -> Result<Block> {
        validate_dims(size)?;
        let expected = size.voxel_count() as usize * 8;
        if dense.len() != expected {
            return Err(Error::BufferTooShort {
                expected,
                got: dense.len(),
            });
        }
        let labels: Vec<u64> = dense.chunks_exact(8).map(read_u64_le).collect();
        Self::make_from_labels(&labels, size)
    }

    /// Compresses a dense volume already materialized as u64 labels.
    pub fn make_from_labels(dense: &[u64], size: Point3d) -> Result<Block> {
        validate_dims(size)?;
        let voxels = size.voxel_count() as usize;
        if dense.len() != voxels {
            return Err(Error::BufferTooShort {
                expected: voxels * 8,
                got: dense.len() * 8,
            });
        }

        // First pass: distinct labels in order of first appearance.
        let mut table = Vec::new();
        let mut index: HashMap<u64, u32> = HashMap::new();
        for &label in dense {
            if !index.contains_key(&label) {
                index.insert(label, table.len() as u32);
                table.push(label);
            }
        }

        let data = if table.len() == 1 {
            encode_solid(size, table[0])
        } else {
            encode_with_table(dense, size, &table)?
        };
        Ok(Block { size, data })
    }

    /// Parses and validates a serialized block.
    ///
    /// Checks the header, the label table, and every sub-block record:
    /// counts in `[1, 512]`, table indices in range, packed-bit extents,
    /// and that the stream ends exactly at the last sub-block. Packed
    /// local index values are range-checked when decoded.
    pub fn from_bytes(data: Bytes) -> Result<Block> {
        let mut cur = Cursor::new(&data);
        let (size, n_labels) = read_header(&mut cur)?;
        cur.skip(n_labels * 8)?;

        if n_labels > 1 {
            let grid = size.voxel_count() as usize / SUB_BLOCK_VOXELS;
            for _ in 0..grid {
                let n = cur.u16_le()? as usize;
                if n == 0 {
                    return Err(Error::MalformedBlock(
                        "sub-block with empty label set".to_string(),
                    ));
                }
                if n > SUB_BLOCK_VOXELS {
                    return Err(Error::MalformedBlock(format!(
                        "sub-block label count {} exceeds {}",
                        n, SUB_BLOCK_VOXELS
                    )));
                }
                for _ in 0..n {
                    let idx = cur.u32_le()? as usize;
                    if idx >= n_labels {
                        return Err(Error::MalformedBlock(format!(
                            "label index {} out of range for table of {}",
                            idx, n_labels
                        )));
                    }
                }
                if n > 1 {
                    cur.skip(packed_len(bit_width(n)))?;
                }
            }
        }

        if !cur.done() {
            return Err(Error::MalformedBlock(format!(
                "{} trailing bytes after final sub-block",
                cur.remaining()
            )));
        }
        Ok(Block { size, data })
    }

    /// Block dimensions in voxels.
    pub fn size(&self) -> Point3d {
        self.size
    }

    /// The serialized form.
    pub fn serialization(&self) -> &Bytes {
        &self.data
    }

    /// The block's label table, in first-appearance order.
    pub fn labels(&self) -> Vec<u64> {
        let n = read_u32_le(&self.data[12..]) as usize;
        (0..n)
            .map(|i| read_u64_le(&self.data[HEADER_LEN + i * 8..]))
            .collect()
    }

    /// The single label of a solid block, or `None` if the block holds
    /// more than one distinct label.
    pub fn solid_label(&self) -> Option<u64> {
        if read_u32_le(&self.data[12..]) == 1 {
            Some(read_u64_le(&self.data[HEADER_LEN..]))
        } else {
            None
        }
    }

    /// Decompresses into a freshly allocated dense buffer of
    /// little-endian u64 labels, returning the buffer and the block's
    /// voxel dimensions.
    pub fn label_volume(&self) -> Result<(Vec<u8>, Point3d)> {
        let labels = self.label_array()?;
        let mut out = Vec::with_capacity(labels.len() * 8);
        for label in labels {
            out.extend_from_slice(&label.to_le_bytes());
        }
        Ok((out, self.size))
    }

    /// Decompresses into a dense u64 label array, row-major, x fastest.
    pub fn label_array(&self) -> Result<Vec<u64>> {
        let mut cur = Cursor::new(&self.data);
        let (size, n_labels) = read_header(&mut cur)?;
        let table: Vec<u64> = (0..n_labels)
            .map(|_| cur.u64_le())
            .collect::<Result<_>>()?;

        let (bx, by) = (size.x as usize, size.y as usize);
        let mut out = vec![0u64; size.voxel_count() as usize];
        if n_labels == 1 {
            out.fill(table[0]);
            return Ok(out);
        }

        let (gx, gy, gz) = (bx / 8, by / 8, size.z as usize / 8);
        let mut sub_table = Vec::with_capacity(8);
        let mut locals = [0u16; SUB_BLOCK_VOXELS];
        for sz in 0..gz {
            for sy in 0..gy {
                for sx in 0..gx {
                    let n = cur.u16_le()? as usize;
                    if n == 0 || n > SUB_BLOCK_VOXELS {
                        return Err(Error::MalformedBlock(format!(
                            "sub-block label count {} out of range",
                            n
                        )));
                    }
                    sub_table.clear();
                    for _ in 0..n {
                        let idx = cur.u32_le()? as usize;
                        if idx >= n_labels {
                            return Err(Error::MalformedBlock(format!(
                                "label index {} out of range for table of {}",
                                idx, n_labels
                            )));
                        }
                        sub_table.push(table[idx]);
                    }

                    if n == 1 {
                        fill_sub_block(&mut out, bx, by, sx, sy, sz, sub_table[0]);
                        continue;
                    }

                    let w = bit_width(n);
                    let bits = cur.take(packed_len(w))?;
                    for (i, local) in locals.iter_mut().enumerate() {
                        let v = unpack_bits(bits, i, w);
                        if v as usize >= n {
                            return Err(Error::MalformedBlock(format!(
                                "packed index {} out of range for sub-block set of {}",
                                v, n
                            )));
                        }
                        *local = v;
                    }
                    let mut i = 0;
                    for z in 0..SUB_BLOCK_EDGE {
                        for y in 0..SUB_BLOCK_EDGE {
                            let row = ((sz * 8 + z) * by + sy * 8 + y) * bx + sx * 8;
                            for slot in &mut out[row..row + SUB_BLOCK_EDGE] {
                                *slot = sub_table[locals[i] as usize];
                                i += 1;
                            }
                        }
                    }
                }
            }
        }
        Ok(out)
    }

    pub(crate) fn from_parts(size: Point3d, data: Bytes) -> Block {
        Block { size, data }
    }
}

/// A block paired with its position on the block grid.
#[derive(Debug, Clone)]
pub struct PositionedBlock {
    pub block: Block,
    pub bcoord: BCoord,
}

impl PositionedBlock {
    pub fn new(block: Block, bcoord: BCoord) -> Self {
        Self { block, bcoord }
    }

    /// Global coordinate of the block's first voxel.
    pub fn min_voxel(&self) -> Point3d {
        self.bcoord.min_voxel(self.block.size())
    }

    /// Global coordinate of the block's last voxel (inclusive).
    pub fn max_voxel(&self) -> Point3d {
        self.bcoord.max_voxel(self.block.size())
    }
}

fn validate_dims(size: Point3d) -> Result<()> {
    let max = MAX_GRID_DIM as i32 * SUB_BLOCK_EDGE as i32;
    let ok = |d: i32| d > 0 && d % SUB_BLOCK_EDGE as i32 == 0 && d <= max;
    if !ok(size.x) || !ok(size.y) || !ok(size.z) {
        return Err(Error::BadDimensions(format!(
            "block size {} must have positive dimensions divisible by {} and at most {}",
            size, SUB_BLOCK_EDGE, max
        )));
    }
    Ok(())
}

/// Serializes a dense volume against a prescribed label table.
///
/// The table must contain every distinct label of `dense`; extra labels
/// are carried through unchanged. Used by operators that must preserve
/// an existing table's ordering.
pub(crate) fn encode_with_table(dense: &[u64], size: Point3d, table: &[u64]) -> Result<Bytes> {
    if table.len() == 1 {
        return Ok(encode_solid(size, table[0]));
    }
    let index: HashMap<u64, u32> = table
        .iter()
        .enumerate()
        .map(|(i, &label)| (label, i as u32))
        .collect();

    let (bx, by) = (size.x as usize, size.y as usize);
    let (gx, gy, gz) = (bx / 8, by / 8, size.z as usize / 8);
    let mut buf = BytesMut::with_capacity(HEADER_LEN + table.len() * 8 + gx * gy * gz * 16);
    buf.put_u32_le(gx as u32);
    buf.put_u32_le(gy as u32);
    buf.put_u32_le(gz as u32);
    buf.put_u32_le(table.len() as u32);
    for &label in table {
        buf.put_u64_le(label);
    }

    let mut sub_indices: Vec<u32> = Vec::with_capacity(8);
    let mut seen: HashMap<u32, u16> = HashMap::new();
    let mut locals = [0u16; SUB_BLOCK_VOXELS];
    for sz in 0..gz {
        for sy in 0..gy {
            for sx in 0..gx {
                sub_indices.clear();
                seen.clear();
                let mut i = 0;
                for z in 0..SUB_BLOCK_EDGE {
                    for y in 0..SUB_BLOCK_EDGE {
                        let row = ((sz * 8 + z) * by + sy * 8 + y) * bx + sx * 8;
                        for &label in &dense[row..row + SUB_BLOCK_EDGE] {
                            let gi = *index.get(&label).ok_or_else(|| {
                                Error::Internal(format!(
                                    "label {} missing from prescribed table",
                                    label
                                ))
                            })?;
                            let local = match seen.get(&gi) {
                                Some(&l) => l,
                                None => {
                                    let l = sub_indices.len() as u16;
                                    sub_indices.push(gi);
                                    seen.insert(gi, l);
                                    l
                                }
                            };
                            locals[i] = local;
                            i += 1;
                        }
                    }
                }

                let n = sub_indices.len();
                buf.put_u16_le(n as u16);
                for &gi in &sub_indices {
                    buf.put_u32_le(gi);
                }
                if n > 1 {
                    let w = bit_width(n);
                    let start = buf.len();
                    buf.resize(start + packed_len(w), 0);
                    let bits = &mut buf[start..];
                    for (i, &local) in locals.iter().enumerate() {
                        pack_bits(bits, i, w, local);
                    }
                }
            }
        }
    }
    Ok(buf.freeze())
}

/// The 24-byte serialization of a single-label block.
fn encode_solid(size: Point3d, label: u64) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + 8);
    buf.put_u32_le((size.x / 8) as u32);
    buf.put_u32_le((size.y / 8) as u32);
    buf.put_u32_le((size.z / 8) as u32);
    buf.put_u32_le(1);
    buf.put_u64_le(label);
    buf.freeze()
}

/// Parses the grid dims and label count, returning voxel dims.
fn read_header(cur: &mut Cursor) -> Result<(Point3d, usize)> {
    let gx = cur.u32_le()?;
    let gy = cur.u32_le()?;
    let gz = cur.u32_le()?;
    if gx == 0 || gy == 0 || gz == 0 {
        return Err(Error::MalformedBlock(
            "zero sub-block grid dimension".to_string(),
        ));
    }
    if gx > MAX_GRID_DIM || gy > MAX_GRID_DIM || gz > MAX_GRID_DIM {
        return Err(Error::MalformedBlock(format!(
            "sub-block grid ({},{},{}) too large",
            gx, gy, gz
        )));
    }
    let n_labels = cur.u32_le()? as usize;
    if n_labels == 0 {
        return Err(Error::MalformedBlock("empty label table".to_string()));
    }
    let size = Point3d::new(gx as i32 * 8, gy as i32 * 8, gz as i32 * 8);
    Ok((size, n_labels))
}

/// Fills one uniform sub-block of a dense volume with a single label.
fn fill_sub_block(
    out: &mut [u64],
    bx: usize,
    by: usize,
    sx: usize,
    sy: usize,
    sz: usize,
    label: u64,
) {
    for z in 0..SUB_BLOCK_EDGE {
        for y in 0..SUB_BLOCK_EDGE {
            let row = ((sz * 8 + z) * by + sy * 8 + y) * bx + sx * 8;
            out[row..row + SUB_BLOCK_EDGE].fill(label);
        }
    }
}

/// Bits needed per voxel for a sub-block with `n` local labels, `n >= 2`.
fn bit_width(n: usize) -> usize {
    (usize::BITS - (n - 1).leading_zeros()) as usize
}

/// Byte length of a sub-block's packed voxel data at width `w`.
fn packed_len(w: usize) -> usize {
    (SUB_BLOCK_VOXELS * w + 7) / 8
}

/// Writes value `v` at voxel position `i` and width `w`, LSB-first.
fn pack_bits(bits: &mut [u8], i: usize, w: usize, v: u16) {
    let bitpos = i * w;
    let mut byte = bitpos >> 3;
    let mut acc = (v as u32) << (bitpos & 7);
    while acc != 0 {
        bits[byte] |= (acc & 0xff) as u8;
        acc >>= 8;
        byte += 1;
    }
}

/// Reads the value at voxel position `i` and width `w`, LSB-first.
fn unpack_bits(bits: &[u8], i: usize, w: usize) -> u16 {
    let bitpos = i * w;
    let mut byte = bitpos >> 3;
    let shift = bitpos & 7;
    let mut acc = (bits[byte] as u32) >> shift;
    let mut have = 8 - shift;
    while have < w {
        byte += 1;
        acc |= (bits[byte] as u32) << have;
        have += 8;
    }
    (acc & ((1u32 << w) - 1)) as u16
}

fn read_u32_le(data: &[u8]) -> u32 {
    u32::from_le_bytes([data[0], data[1], data[2], data[3]])
}

fn read_u64_le(data: &[u8]) -> u64 {
    u64::from_le_bytes([
        data[0], data[1], data[2], data[3], data[4], data[5], data[6], data[7],
    ])
}

/// Bounds-checked reader over a serialized block.
struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn done(&self) -> bool {
        self.pos == self.data.len()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(Error::BufferTooShort {
                expected: self.pos + n,
                got: self.data.len(),
            });
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn skip(&mut self, n: usize) -> Result<()> {
        self.take(n).map(|_| ())
    }

    fn u16_le(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32_le(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(read_u32_le(b))
    }

    fn u64_le(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        Ok(read_u64_le(b))
    }
}
