//! Geometry primitives for block-organized voxel volumes.
//!
//! Voxel space is a 3-D integer lattice. Volumes are stored in fixed-size
//! blocks addressed by a block-grid coordinate ([`BCoord`]); a block's
//! global voxel origin is `bcoord * block_size`. Run-length segments
//! ([`Rle`]) describe spans of voxels along +x in global coordinates and
//! have a 16-byte little-endian wire form.

use bytes::{BufMut, Bytes, BytesMut};

/// Number of bytes in the sortable ZYX key of a block coordinate.
pub const ZYX_KEY_LEN: usize = 12;

/// Number of bytes in the wire form of an [`Rle`].
pub const RLE_WIRE_LEN: usize = 16;

/// A point in voxel space, or a 3-D extent when used as a size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Point3d {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl Point3d {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// The number of voxels in a volume of this size.
    pub fn voxel_count(&self) -> i64 {
        self.x as i64 * self.y as i64 * self.z as i64
    }
}

impl std::fmt::Display for Point3d {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({},{},{})", self.x, self.y, self.z)
    }
}

/// A block's position on the block grid.
///
/// The block covering voxels `[c * s, (c + 1) * s)` along each axis has
/// coordinate `c` for block size `s`. Coordinates may be negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BCoord {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BCoord {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Global coordinate of the block's first voxel.
    pub fn min_voxel(&self, block_size: Point3d) -> Point3d {
        Point3d::new(
            self.x * block_size.x,
            self.y * block_size.y,
            self.z * block_size.z,
        )
    }

    /// Global coordinate of the block's last voxel (inclusive).
    pub fn max_voxel(&self, block_size: Point3d) -> Point3d {
        let min = self.min_voxel(block_size);
        Point3d::new(
            min.x + block_size.x - 1,
            min.y + block_size.y - 1,
            min.z + block_size.z - 1,
        )
    }

    /// Encodes the coordinate as a 12-byte key whose lexicographic order
    /// matches ZYX scan order (z-major, then y, then x, negatives first).
    ///
    /// Each component is written big-endian with its sign bit flipped so
    /// that signed ordering survives the byte-wise comparison.
    pub fn zyx_key(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(ZYX_KEY_LEN);
        buf.put_u32(self.z as u32 ^ 0x8000_0000);
        buf.put_u32(self.y as u32 ^ 0x8000_0000);
        buf.put_u32(self.x as u32 ^ 0x8000_0000);
        buf.freeze()
    }

    /// Decodes a coordinate from its 12-byte ZYX key. Returns `None` if
    /// the slice is not exactly [`ZYX_KEY_LEN`] bytes.
    pub fn from_zyx_key(data: &[u8]) -> Option<Self> {
        if data.len() != ZYX_KEY_LEN {
            return None;
        }
        let read = |i: usize| {
            let raw = u32::from_be_bytes([data[i], data[i + 1], data[i + 2], data[i + 3]]);
            (raw ^ 0x8000_0000) as i32
        };
        Some(Self {
            z: read(0),
            y: read(4),
            x: read(8),
        })
    }
}

impl std::fmt::Display for BCoord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({},{},{})", self.x, self.y, self.z)
    }
}

/// A run of voxels along +x starting at `start`, in global coordinates.
///
/// Wire form is 16 bytes: `i32 x, i32 y, i32 z, i32 length`, all
/// little-endian, `length ≥ 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rle {
    pub start: Point3d,
    pub length: i32,
}

impl Rle {
    pub const fn new(start: Point3d, length: i32) -> Self {
        Self { start, length }
    }

    /// Appends the 16-byte wire form to `buf`.
    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.put_i32_le(self.start.x);
        buf.put_i32_le(self.start.y);
        buf.put_i32_le(self.start.z);
        buf.put_i32_le(self.length);
    }

    /// Decodes one run from a 16-byte slice. Returns `None` if the slice
    /// is not exactly [`RLE_WIRE_LEN`] bytes.
    pub fn decode(data: &[u8]) -> Option<Self> {
        if data.len() != RLE_WIRE_LEN {
            return None;
        }
        let read = |i: usize| i32::from_le_bytes([data[i], data[i + 1], data[i + 2], data[i + 3]]);
        Some(Self {
            start: Point3d::new(read(0), read(4), read(8)),
            length: read(12),
        })
    }

    /// Decodes a concatenation of 16-byte runs. Returns `None` if the
    /// buffer length is not a multiple of [`RLE_WIRE_LEN`].
    pub fn decode_all(data: &[u8]) -> Option<Vec<Self>> {
        if data.len() % RLE_WIRE_LEN != 0 {
            return None;
        }
        Some(
            data.chunks_exact(RLE_WIRE_LEN)
                .filter_map(Self::decode)
                .collect(),
        )
    }
}

/// Optional inclusive voxel bounds. The default is unbounded on all axes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Bounds {
    pub min: Option<Point3d>,
    pub max: Option<Point3d>,
}

impl Bounds {
    pub const fn new(min: Point3d, max: Point3d) -> Self {
        Self {
            min: Some(min),
            max: Some(max),
        }
    }

    pub fn is_unbounded(&self) -> bool {
        self.min.is_none() && self.max.is_none()
    }

    /// Whether the row at global `(y, z)` intersects the bounds at all.
    pub fn contains_yz(&self, y: i32, z: i32) -> bool {
        if let Some(min) = self.min {
            if y < min.y || z < min.z {
                return false;
            }
        }
        if let Some(max) = self.max {
            if y > max.y || z > max.z {
                return false;
            }
        }
        true
    }

    /// Clips an x-run `[x, x + length)` to the bounds, returning the
    /// clipped start and length, or `None` if nothing remains.
    pub fn clip_x(&self, x: i32, length: i32) -> Option<(i32, i32)> {
        let mut beg = x;
        let mut end = x + length - 1;
        if let Some(min) = self.min {
            beg = beg.max(min.x);
        }
        if let Some(max) = self.max {
            end = end.min(max.x);
        }
        if end < beg {
            return None;
        }
        Some((beg, end - beg + 1))
    }
}
