//! Storage key layout for block records.
//!
//! Keys preserve lexicographic grouping by data instance, then version,
//! then block coordinate in ZYX scan order:
//!
//! ```text
//! | version (u8) | type (u8) | instance (TerminatedBytes) | version id (u64 BE) | zyx coord (12 bytes) |
//! ```
//!
//! Variable-length instance names use a terminated encoding so that no
//! instance's keys interleave with another's: `0x00` and `0x01` in the
//! name are escaped with `0x01`, and the name ends with a `0x00`
//! terminator, which sorts before any continuation byte.

use bytes::{BufMut, Bytes, BytesMut};
use common::{BCoord, VersionId};

use crate::error::{Error, Result};

/// Key format version (currently 0x01)
pub const KEY_VERSION: u8 = 0x01;

/// Record type discriminator for label block records.
const RECORD_TYPE_BLOCK: u8 = 0x01;

/// Terminator byte for TerminatedBytes encoding (lowest byte value)
const TERMINATOR_BYTE: u8 = 0x00;

/// Escape character for TerminatedBytes encoding
const ESCAPE_BYTE: u8 = 0x01;

/// Identifies the data instance and version that own a set of blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataContext {
    pub instance: String,
    pub version: VersionId,
}

impl DataContext {
    pub fn new(instance: impl Into<String>, version: VersionId) -> Self {
        Self {
            instance: instance.into(),
            version,
        }
    }

    /// The storage key of the block at `bcoord`.
    pub fn block_key(&self, bcoord: &BCoord) -> Bytes {
        let mut buf = self.key_prefix();
        buf.put_slice(&bcoord.zyx_key());
        buf.freeze()
    }

    /// Key range covering blocks from `beg` through `end` inclusive, in
    /// ZYX scan order, for use with an exclusive-end ranged scan.
    pub fn block_range(&self, beg: &BCoord, end: &BCoord) -> (Bytes, Bytes) {
        let mut lo = self.key_prefix();
        lo.put_slice(&beg.zyx_key());
        let mut hi = self.key_prefix();
        hi.put_slice(&end.zyx_key());
        hi.put_u8(0);
        (lo.freeze(), hi.freeze())
    }

    /// Recovers the block coordinate from a key produced by
    /// [`block_key`](Self::block_key) for this context.
    pub fn bcoord_from_key(&self, key: &[u8]) -> Result<BCoord> {
        let prefix = self.key_prefix();
        let coord = key
            .strip_prefix(prefix.as_ref())
            .ok_or_else(|| Error::Encoding("key does not match data context".to_string()))?;
        BCoord::from_zyx_key(coord)
            .ok_or_else(|| Error::Encoding("key holds malformed block coordinate".to_string()))
    }

    fn key_prefix(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(self.instance.len() + 23);
        buf.put_u8(KEY_VERSION);
        buf.put_u8(RECORD_TYPE_BLOCK);
        encode_terminated(self.instance.as_bytes(), &mut buf);
        buf.put_u64(self.version);
        buf
    }
}

/// Encodes raw bytes with escape sequences and a `0x00` terminator so
/// that shorter names sort before longer names sharing the prefix and
/// never collide with them.
fn encode_terminated(data: &[u8], buf: &mut BytesMut) {
    for &byte in data {
        match byte {
            TERMINATOR_BYTE => {
                buf.put_u8(ESCAPE_BYTE);
                buf.put_u8(0x01);
            }
            ESCAPE_BYTE => {
                buf.put_u8(ESCAPE_BYTE);
                buf.put_u8(0x02);
            }
            _ => buf.put_u8(byte),
        }
    }
    buf.put_u8(TERMINATOR_BYTE);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_round_trip_block_coordinate_through_key() {
        // given
        let ctx = DataContext::new("segmentation", 7);
        let bcoord = BCoord::new(-3, 12, 5);

        // when
        let key = ctx.block_key(&bcoord);
        let decoded = ctx.bcoord_from_key(&key).unwrap();

        // then
        assert_eq!(decoded, bcoord);
    }

    #[test]
    fn should_group_keys_by_instance_then_version_then_coord() {
        // given
        let a1 = DataContext::new("alpha", 1);
        let a2 = DataContext::new("alpha", 2);
        let b1 = DataContext::new("beta", 1);
        let c = BCoord::new(0, 0, 0);
        let c2 = BCoord::new(1, 0, 0);

        // when
        let mut keys = vec![
            b1.block_key(&c),
            a2.block_key(&c),
            a1.block_key(&c2),
            a1.block_key(&c),
        ];
        keys.sort();

        // then
        assert_eq!(keys[0], a1.block_key(&c));
        assert_eq!(keys[1], a1.block_key(&c2));
        assert_eq!(keys[2], a2.block_key(&c));
        assert_eq!(keys[3], b1.block_key(&c));
    }

    #[test]
    fn should_not_interleave_prefix_instance_names() {
        // given - one instance name is a prefix of the other
        let short = DataContext::new("seg", 9);
        let long = DataContext::new("segmentation", 1);
        let c = BCoord::new(5, 5, 5);

        // when
        let short_key = short.block_key(&c);
        let long_key = long.block_key(&c);

        // then - neither key extends the other's prefix
        assert!(short.bcoord_from_key(&long_key).is_err());
        assert!(long.bcoord_from_key(&short_key).is_err());
    }

    #[test]
    fn should_escape_special_bytes_in_instance_names() {
        // given - a name containing the terminator and escape bytes
        let tricky = DataContext::new(String::from_utf8_lossy(&[0x61, 0x00, 0x01]), 3);
        let plain = DataContext::new("a", 3);
        let c = BCoord::new(0, 0, 0);

        // when/then - keys stay distinct and decodable
        assert_ne!(tricky.block_key(&c), plain.block_key(&c));
        assert_eq!(tricky.bcoord_from_key(&tricky.block_key(&c)).unwrap(), c);
    }

    #[test]
    fn should_cover_inclusive_coordinate_span() {
        // given
        let ctx = DataContext::new("segmentation", 1);
        let (lo, hi) = ctx.block_range(&BCoord::new(0, 0, 0), &BCoord::new(2, 0, 0));

        // when/then - endpoints inside, the next coordinate out
        let inside = [BCoord::new(0, 0, 0), BCoord::new(1, 0, 0), BCoord::new(2, 0, 0)];
        for c in inside {
            let k = ctx.block_key(&c);
            assert!(k >= lo && k < hi, "{} should be in range", c);
        }
        let beyond = ctx.block_key(&BCoord::new(3, 0, 0));
        assert!(beyond >= hi);
    }

    #[test]
    fn should_reject_key_from_other_context() {
        // given
        let ctx = DataContext::new("segmentation", 1);
        let other = DataContext::new("segmentation", 2);

        // when
        let key = other.block_key(&BCoord::new(0, 0, 0));
        let result = ctx.bcoord_from_key(&key);

        // then
        assert!(result.is_err());
    }
}
