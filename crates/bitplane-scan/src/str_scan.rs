use std::cmp::Ordering;

use bitplane_bv::{BitVec, BLOCK_BITS};
use bitplane_vec::{PlaneAccess, StrVector};

use crate::{presence_of, Scanner};

/// Sampled comparison stride inside a block.
const SUB_BLOCK: u64 = BLOCK_BITS / 4;
/// Range width below which binary search switches to linear probing.
const LINEAR_CUTOFF1: u64 = 16;
/// Range width below which binary search is skipped entirely.
const LINEAR_CUTOFF2: u64 = 128;

/// Per-block string samples captured by [`Scanner::bind`], valid only
/// until the bound vector is mutated.
pub(crate) struct BoundCache {
    sorted: bool,
    /// String at each block's first index.
    block0: Vec<Vec<u8>>,
    /// String at each block's `3 * SUB_BLOCK` offset, when in range.
    block3: Vec<Option<Vec<u8>>>,
}

/// Allocation mask for one octet column: bit `b` set iff plane
/// `col*8 + b` holds any bits.
fn octet_mask(sv: &StrVector, col: usize) -> u8 {
    let mut mask = 0u8;
    for bit in 0..8 {
        if sv.plane(col * 8 + bit).is_some_and(BitVec::any) {
            mask |= 1 << bit;
        }
    }
    mask
}

impl Scanner {
    /// All indices whose stored string equals `query`. Returns whether any
    /// match exists.
    ///
    /// The AND-SUB plan is built per octet column from the last octet
    /// backward, which prunes fastest on sorted content, and a per-column
    /// plane allocation mask short-circuits queries whose octet provably
    /// occurs nowhere.
    pub fn find_eq_str(&self, sv: &StrVector, query: &[u8], out: &mut BitVec) -> bool {
        *out = BitVec::new();
        if sv.size() == 0 || query.len() > sv.max_len() {
            return false;
        }
        let Some(coded) = sv.translate(query) else {
            return false;
        };
        if coded.is_empty() {
            // Only the terminator column: match empty strings.
            let mut acc = presence_of(sv);
            for bit in 0..8 {
                if let Some(p) = sv.plane(bit) {
                    acc.sub_with(p);
                }
            }
            *out = acc;
            return out.any();
        }
        let masks: Vec<u8> = (0..=coded.len().min(sv.max_len() - 1))
            .map(|col| octet_mask(sv, col))
            .collect();
        for (col, &code) in coded.iter().enumerate() {
            if code & !masks[col] != 0 {
                return false;
            }
        }
        let mut acc: Option<BitVec> = None;
        for (col, &code) in coded.iter().enumerate().rev() {
            for bit in 0..8 {
                if (code >> bit) & 1 == 0 {
                    continue;
                }
                if let Some(p) = sv.plane(col * 8 + bit) {
                    match &mut acc {
                        None => acc = Some(p.clone()),
                        Some(a) => a.and_with(p),
                    }
                }
            }
            let Some(a) = &mut acc else { return false };
            if !a.any() {
                return false;
            }
            for bit in 0..8 {
                if (code >> bit) & 1 == 1 {
                    continue;
                }
                if let Some(p) = sv.plane(col * 8 + bit) {
                    a.sub_with(p);
                }
            }
        }
        let Some(mut acc) = acc else { return false };
        if query.len() < sv.max_len() {
            // Exclude longer strings: the terminator column must read 0.
            for bit in 0..8 {
                if let Some(p) = sv.plane(query.len() * 8 + bit) {
                    acc.sub_with(p);
                }
            }
        }
        *out = acc;
        out.any()
    }

    /// Capture per-block samples of `sv` for repeated binary searches.
    /// Mutating `sv` afterwards invalidates the binding.
    pub fn bind(&mut self, sv: &StrVector, sorted: bool) {
        let size = sv.size();
        let nblocks = size.div_ceil(BLOCK_BITS) as usize;
        let mut block0 = Vec::with_capacity(nblocks);
        let mut block3 = Vec::with_capacity(nblocks);
        for b in 0..nblocks as u64 {
            block0.push(sv.get_str(b * BLOCK_BITS));
            let probe = b * BLOCK_BITS + 3 * SUB_BLOCK;
            block3.push((probe < size).then(|| sv.get_str(probe)));
        }
        log::debug!("bound scanner: {size} strings, {nblocks} sample blocks");
        self.bound = Some(BoundCache {
            sorted,
            block0,
            block3,
        });
    }

    pub fn unbind(&mut self) {
        self.bound = None;
    }

    /// First index whose stored string is not less than `query`, assuming
    /// ascending sort order; `size()` when every string is smaller.
    pub fn lower_bound_str(&self, sv: &StrVector, query: &[u8]) -> u64 {
        let mut lo = 0u64;
        let mut hi = sv.size();
        if let Some(cache) = self.bound.as_ref().filter(|c| c.sorted) {
            // Narrow to at most two blocks off the sampled block starts.
            let idx = cache.block0.partition_point(|s| s.as_slice() <= query) as u64;
            if idx > 0 {
                lo = (idx - 1) * BLOCK_BITS;
                if let Some(Some(s3)) = cache.block3.get((idx - 1) as usize) {
                    if s3.as_slice() < query {
                        lo = (idx - 1) * BLOCK_BITS + 3 * SUB_BLOCK;
                    }
                }
            }
            hi = hi.min(idx * BLOCK_BITS).max(lo);
        }
        if hi - lo > LINEAR_CUTOFF2 {
            while hi - lo > LINEAR_CUTOFF1 {
                let mid = lo + (hi - lo) / 2;
                if sv.compare_str(mid, query) == Ordering::Less {
                    lo = mid + 1;
                } else {
                    hi = mid;
                }
            }
        }
        let mut i = lo;
        while i < hi && sv.compare_str(i, query) == Ordering::Less {
            i += 1;
        }
        i
    }

    /// Binary search for an exact match in a sorted vector.
    pub fn bfind_eq_str(&self, sv: &StrVector, query: &[u8]) -> Option<u64> {
        let i = self.lower_bound_str(sv, query);
        (i < sv.size() && sv.compare_str(i, query) == Ordering::Equal).then_some(i)
    }
}
