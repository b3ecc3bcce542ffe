//! Self-delimiting block codec for a single bit-vector plane.
//!
//! Stream layout (all integers little-endian):
//!
//! ```text
//! [u32] block count
//! then, per run of blocks:
//!   [u8 0] [u32 n]              n all-zero blocks
//!   [u8 1] [u32 n]              n all-one blocks
//!   [u8 2] [1024 x u64]         one dense block, raw words
//!   [u8 3] [u16 n] [n x u16]    one sparse block, in-block bit positions
//! ```
//!
//! The stream is self-delimiting via the block count, which is what lets the
//! vector codec concatenate plane blobs back to back with only an offset
//! table. Decoding can be limited to a closed bit range: blocks fully outside
//! the range are consumed but not materialized.

use crate::{Block, BitVec, BLOCK_BITS, BLOCK_SHIFT, BLOCK_WORDS};
use thiserror::Error;

const TAG_ZERO_RUN: u8 = 0;
const TAG_FULL_RUN: u8 = 1;
const TAG_DENSE: u8 = 2;
const TAG_SPARSE: u8 = 3;

/// A block with at most this many set bits is written in sparse form
/// (2 bytes per bit beats 8 KiB of raw words up to a quarter full).
const SPARSE_CUTOFF: u64 = 4096;

/// Errors from the plane block codec.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PlaneCodecError {
    #[error("bit-vector stream truncated while reading {context}")]
    Truncated { context: &'static str },
    #[error("unknown block tag {0:#04x}")]
    BadTag(u8),
}

pub(crate) struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub(crate) fn pos(&self) -> usize {
        self.pos
    }

    fn take(&mut self, n: usize, context: &'static str) -> Result<&'a [u8], PlaneCodecError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&e| e <= self.buf.len())
            .ok_or(PlaneCodecError::Truncated { context })?;
        let s = &self.buf[self.pos..end];
        self.pos = end;
        Ok(s)
    }

    fn read_u8(&mut self, context: &'static str) -> Result<u8, PlaneCodecError> {
        Ok(self.take(1, context)?[0])
    }

    fn read_u16(&mut self, context: &'static str) -> Result<u16, PlaneCodecError> {
        let b = self.take(2, context)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn read_u32(&mut self, context: &'static str) -> Result<u32, PlaneCodecError> {
        let b = self.take(4, context)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }
}

enum Kind {
    Zero,
    Full,
    Explicit,
}

fn classify(b: &Block) -> Kind {
    match b {
        Block::Zero => Kind::Zero,
        Block::Full => Kind::Full,
        Block::Bits(w) => {
            if w.iter().all(|&x| x == 0) {
                Kind::Zero
            } else if w.iter().all(|&x| x == u64::MAX) {
                Kind::Full
            } else {
                Kind::Explicit
            }
        }
    }
}

/// Serialize `bv` appending to `out`.
pub fn serialize_into(bv: &BitVec, out: &mut Vec<u8>) {
    let blocks = bv.blocks();
    out.extend_from_slice(&(blocks.len() as u32).to_le_bytes());
    let mut i = 0;
    while i < blocks.len() {
        match classify(&blocks[i]) {
            kind @ (Kind::Zero | Kind::Full) => {
                let tag = match kind {
                    Kind::Zero => TAG_ZERO_RUN,
                    _ => TAG_FULL_RUN,
                };
                let mut run = 1u32;
                while i + (run as usize) < blocks.len()
                    && matches!(
                        (classify(&blocks[i + run as usize]), tag),
                        (Kind::Zero, TAG_ZERO_RUN) | (Kind::Full, TAG_FULL_RUN)
                    )
                {
                    run += 1;
                }
                out.push(tag);
                out.extend_from_slice(&run.to_le_bytes());
                i += run as usize;
            }
            Kind::Explicit => {
                let Block::Bits(words) = &blocks[i] else {
                    unreachable!()
                };
                let count: u64 = words.iter().map(|w| w.count_ones() as u64).sum();
                if count <= SPARSE_CUTOFF {
                    out.push(TAG_SPARSE);
                    out.extend_from_slice(&(count as u16).to_le_bytes());
                    for (wi, &w) in words.iter().enumerate() {
                        let mut bits = w;
                        while bits != 0 {
                            let tz = bits.trailing_zeros() as usize;
                            bits &= bits - 1;
                            out.extend_from_slice(&((wi * 64 + tz) as u16).to_le_bytes());
                        }
                    }
                } else {
                    out.push(TAG_DENSE);
                    for &w in words.iter() {
                        out.extend_from_slice(&w.to_le_bytes());
                    }
                }
                i += 1;
            }
        }
    }
}

pub fn serialize(bv: &BitVec) -> Vec<u8> {
    let mut out = Vec::new();
    serialize_into(bv, &mut out);
    out
}

/// Decode a full plane stream starting at `buf[0]`. Returns the vector and
/// the number of bytes consumed.
pub fn deserialize(buf: &[u8]) -> Result<(BitVec, usize), PlaneCodecError> {
    decode(buf, None)
}

/// Decode only the closed bit range `[from, to]`; all other positions read
/// zero in the result. The full stream is still consumed (the byte count
/// returned is identical to a full decode).
pub fn deserialize_range(
    buf: &[u8],
    from: u64,
    to: u64,
) -> Result<(BitVec, usize), PlaneCodecError> {
    decode(buf, Some((from, to)))
}

fn decode(buf: &[u8], range: Option<(u64, u64)>) -> Result<(BitVec, usize), PlaneCodecError> {
    let mut r = Reader::new(buf);
    let nblocks = r.read_u32("block count")? as usize;
    let (first_block, last_block) = match range {
        Some((from, to)) => ((from >> BLOCK_SHIFT) as usize, (to >> BLOCK_SHIFT) as usize),
        None => (0, usize::MAX),
    };
    let mut bv = BitVec::new();
    let mut bi = 0usize;
    while bi < nblocks {
        let wanted = |b: usize| b >= first_block && b <= last_block;
        let tag = r.read_u8("block tag")?;
        match tag {
            TAG_ZERO_RUN | TAG_FULL_RUN => {
                let run = r.read_u32("run length")? as usize;
                for k in 0..run {
                    let block = if tag == TAG_FULL_RUN && wanted(bi + k) {
                        Block::Full
                    } else {
                        Block::Zero
                    };
                    bv.push_raw_block(block);
                }
                bi += run;
            }
            TAG_DENSE => {
                let bytes = r.take(BLOCK_WORDS * 8, "dense block")?;
                if wanted(bi) {
                    let mut words = Box::new([0u64; BLOCK_WORDS]);
                    for (wi, chunk) in bytes.chunks_exact(8).enumerate() {
                        words[wi] = u64::from_le_bytes(chunk.try_into().expect("8-byte chunk"));
                    }
                    bv.push_raw_block(Block::Bits(words));
                } else {
                    bv.push_raw_block(Block::Zero);
                }
                bi += 1;
            }
            TAG_SPARSE => {
                let count = r.read_u16("sparse count")? as usize;
                let bytes = r.take(count * 2, "sparse positions")?;
                if wanted(bi) {
                    let mut words = Box::new([0u64; BLOCK_WORDS]);
                    for chunk in bytes.chunks_exact(2) {
                        let p = u16::from_le_bytes([chunk[0], chunk[1]]) as usize;
                        words[p / 64] |= 1u64 << (p % 64);
                    }
                    bv.push_raw_block(Block::Bits(words));
                } else {
                    bv.push_raw_block(Block::Zero);
                }
                bi += 1;
            }
            other => return Err(PlaneCodecError::BadTag(other)),
        }
    }
    if let Some((from, to)) = range {
        if from > 0 {
            bv.clear_range(0, from - 1);
        }
        let end = nblocks as u64 * BLOCK_BITS;
        if to + 1 < end {
            bv.clear_range(to + 1, end - 1);
        }
    }
    bv.trim();
    Ok((bv, r.pos()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn from_positions(positions: &[u64]) -> BitVec {
        let mut bv = BitVec::new();
        bv.set_sorted(positions);
        bv
    }

    #[test]
    fn roundtrip_mixed_forms() {
        let mut bv = BitVec::new();
        bv.set_sorted(&[1, 70, 4000]); // sparse block 0
        bv.set_range(BLOCK_BITS, 2 * BLOCK_BITS - 1); // full block 1
        // dense block 3 (every other bit)
        for i in 0..(BLOCK_BITS / 2) {
            bv.set(3 * BLOCK_BITS + i * 2);
        }
        bv.optimize();

        let bytes = serialize(&bv);
        let (back, used) = deserialize(&bytes).unwrap();
        assert_eq!(used, bytes.len());
        assert_eq!(back, bv);
    }

    #[test]
    fn roundtrip_empty() {
        let bv = BitVec::new();
        let bytes = serialize(&bv);
        let (back, used) = deserialize(&bytes).unwrap();
        assert_eq!(used, bytes.len());
        assert_eq!(back, bv);
    }

    #[test]
    fn stream_is_self_delimiting() {
        let a = from_positions(&[5, 100]);
        let b = from_positions(&[BLOCK_BITS + 3]);
        let mut bytes = serialize(&a);
        let a_len = bytes.len();
        serialize_into(&b, &mut bytes);

        let (da, used) = deserialize(&bytes).unwrap();
        assert_eq!(used, a_len);
        assert_eq!(da, a);
        let (db, _) = deserialize(&bytes[used..]).unwrap();
        assert_eq!(db, b);
    }

    #[test]
    fn range_limited_decode() {
        let positions = [10u64, 500, BLOCK_BITS + 7, 2 * BLOCK_BITS + 1, 2 * BLOCK_BITS + 9000];
        let bv = from_positions(&positions);
        let bytes = serialize(&bv);

        let (ranged, used) = deserialize_range(&bytes, 500, 2 * BLOCK_BITS + 1).unwrap();
        assert_eq!(used, bytes.len());
        assert_eq!(ranged, from_positions(&[500, BLOCK_BITS + 7, 2 * BLOCK_BITS + 1]));
    }

    #[test]
    fn truncated_stream_is_an_error() {
        let bv = from_positions(&[1, 2, 3]);
        let bytes = serialize(&bv);
        let err = deserialize(&bytes[..bytes.len() - 1]).unwrap_err();
        assert!(matches!(err, PlaneCodecError::Truncated { .. }));
    }

    #[test]
    fn bad_tag_is_an_error() {
        let mut bytes = serialize(&from_positions(&[1]));
        bytes[4] = 0x7f; // first tag byte
        assert_eq!(deserialize(&bytes).unwrap_err(), PlaneCodecError::BadTag(0x7f));
    }

    proptest! {
        #[test]
        fn roundtrip_random(positions in proptest::collection::btree_set(0u64..(4 * BLOCK_BITS), 0..200)) {
            let positions: Vec<u64> = positions.into_iter().collect();
            let bv = from_positions(&positions);
            let bytes = serialize(&bv);
            let (back, used) = deserialize(&bytes).unwrap();
            prop_assert_eq!(used, bytes.len());
            prop_assert_eq!(back, bv);
        }
    }
}
