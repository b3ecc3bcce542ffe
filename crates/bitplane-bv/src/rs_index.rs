use crate::{select_in_block, BitVec, BLOCK_BITS, BLOCK_SHIFT};

/// Block-level rank prefix index.
///
/// `prefix[i]` is the number of set bits in blocks `0..=i`. The index is a
/// snapshot: it reflects the vector at build time and must be rebuilt after
/// any mutation (the rank-select vector layer tracks this with its own
/// `in_sync` flag).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RsIndex {
    prefix: Vec<u64>,
}

impl RsIndex {
    /// Total set-bit count at build time.
    pub fn total(&self) -> u64 {
        self.prefix.last().copied().unwrap_or(0)
    }
}

impl BitVec {
    pub fn build_rs_index(&self) -> RsIndex {
        let mut prefix = Vec::with_capacity(self.blocks().len());
        let mut acc = 0u64;
        for b in self.blocks() {
            acc += b.count();
            prefix.push(acc);
        }
        RsIndex { prefix }
    }

    /// Rank accelerated by a prefix index: set bits in `[0, pos]`.
    pub fn rank_indexed(&self, rs: &RsIndex, pos: u64) -> u64 {
        let bi = (pos >> BLOCK_SHIFT) as usize;
        if bi >= rs.prefix.len() {
            return rs.total();
        }
        let base = if bi > 0 { rs.prefix[bi - 1] } else { 0 };
        base + self.count_range(bi as u64 * BLOCK_BITS, pos)
    }

    /// Select accelerated by a prefix index: position of the `rank`-th set
    /// bit (1-based).
    pub fn select_indexed(&self, rs: &RsIndex, rank: u64) -> Option<u64> {
        if rank == 0 || rank > rs.total() {
            return None;
        }
        let bi = rs.prefix.partition_point(|&c| c < rank);
        let base = if bi > 0 { rs.prefix[bi - 1] } else { 0 };
        Some(select_in_block(&self.blocks()[bi], rank - base, bi as u64))
    }
}
