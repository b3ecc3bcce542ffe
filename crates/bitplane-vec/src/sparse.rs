use std::cmp::Ordering;
use std::marker::PhantomData;

use bitplane_bv::{BitVec, BlockRef, BLOCK_BITS, BLOCK_SHIFT};

use crate::matrix::BitMatrix;
use crate::{CodeValue, NullPolicy, Nulls, VectorError};

/// Per-plane accumulation window used by bulk import: sorted index runs are
/// flushed into a plane in one bulk insert, which is far cheaper on a
/// compressed bitmap than one-by-one sets.
pub(crate) const TRANSPOSE_WINDOW: usize = 256;

/// Caller's knowledge about a gather index list. The hint selects a lookup
/// strategy and never affects results.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortHint {
    Sorted,
    Unsorted,
    Unknown,
    /// The whole call is one sorted block-local group.
    SortedUniform,
}

/// Memory statistics reported by [`SparseVector::stat`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SvStat {
    /// Allocated value planes.
    pub planes: usize,
    pub bit_blocks: usize,
    pub full_blocks: usize,
    pub zero_blocks: usize,
    /// Heap bytes held by explicit bit blocks.
    pub heap_bytes: usize,
}

/// Dense bit-transposed vector of `V` values.
///
/// Logical size grows through `set`/`push_back`/`insert` and shrinks only
/// through `clear()` or `erase`. When constructed with [`Nulls::On`] an
/// extra NULL plane tracks which indices hold an assigned value; reading an
/// unassigned index still yields 0.
#[derive(Clone, Debug)]
pub struct SparseVector<V: CodeValue> {
    pub(crate) bmatr: BitMatrix,
    _value: PhantomData<V>,
}

impl<V: CodeValue> Default for SparseVector<V> {
    fn default() -> Self {
        Self::new(Nulls::Off)
    }
}

impl<V: CodeValue> SparseVector<V> {
    pub fn new(nulls: Nulls) -> Self {
        Self {
            bmatr: BitMatrix::new(V::BITS as usize, nulls),
            _value: PhantomData,
        }
    }

    pub fn size(&self) -> u64 {
        self.bmatr.size
    }

    pub fn is_empty(&self) -> bool {
        self.bmatr.size == 0
    }

    pub fn is_nullable(&self) -> bool {
        self.bmatr.is_nullable()
    }

    /// Reset to the empty state, keeping the NULL configuration.
    pub fn clear(&mut self) {
        let nulls = if self.is_nullable() { Nulls::On } else { Nulls::Off };
        self.bmatr = BitMatrix::new(V::BITS as usize, nulls);
    }

    /// Value at `idx`. No bounds check: indices at or past `size()` simply
    /// read 0 from the planes.
    #[inline]
    pub fn get(&self, idx: u64) -> V {
        V::from_u64(self.bmatr.get_bits(idx, V::BITS as usize))
    }

    /// Checked access.
    pub fn at(&self, idx: u64) -> Result<V, VectorError> {
        if idx >= self.bmatr.size {
            return Err(VectorError::IndexOutOfRange {
                index: idx,
                size: self.bmatr.size,
            });
        }
        Ok(self.get(idx))
    }

    pub fn set(&mut self, idx: u64, v: V) {
        if idx >= self.bmatr.size {
            self.bmatr.size = idx + 1;
        }
        let bits = v.to_u64();
        let needed = (64 - bits.leading_zeros()) as usize;
        self.bmatr.set_bits(idx, bits, needed.min(V::BITS as usize));
        if let Some(np) = &mut self.bmatr.null_plane {
            np.set(idx);
        }
    }

    /// Set the value at `idx` to 0. With `set_null`, additionally mark the
    /// index unassigned — distinct from merely storing a zero.
    pub fn clear_value(&mut self, idx: u64, set_null: bool) {
        self.set(idx, V::default());
        if set_null {
            if let Some(np) = &mut self.bmatr.null_plane {
                np.clear(idx);
            }
        }
    }

    pub fn is_null(&self, idx: u64) -> bool {
        match &self.bmatr.null_plane {
            Some(np) => !np.test(idx),
            None => false,
        }
    }

    pub fn push_back(&mut self, v: V) {
        self.set(self.bmatr.size, v);
    }

    /// Append `count` unassigned elements. Only meaningful on a NULL-able
    /// vector; the payload planes are untouched.
    pub fn push_back_null(&mut self, count: u64) {
        debug_assert!(self.is_nullable(), "push_back_null on a non-NULL vector");
        self.bmatr.size += count;
    }

    /// Insert `v` at `idx`, shifting every plane at and after `idx` up by
    /// one position. Cost tracks the compressed size of the shifted region.
    pub fn insert(&mut self, idx: u64, v: V) {
        if idx >= self.bmatr.size {
            self.set(idx, v);
            return;
        }
        self.bmatr.insert_gap(idx);
        self.bmatr.size += 1;
        self.set(idx, v);
    }

    /// Remove the element at `idx`, shifting every plane down by one.
    pub fn erase(&mut self, idx: u64) {
        if idx >= self.bmatr.size {
            return;
        }
        self.bmatr.erase_at(idx);
        self.bmatr.size -= 1;
    }

    /// Bulk bit-transposition load of `arr` at `offset`.
    ///
    /// Set bits of each element are scattered to per-plane accumulation
    /// windows and bulk-inserted whenever a window fills. A destination
    /// overlap is cleared first so imported zeros land correctly (a set bit
    /// cannot be un-set by omission). With `set_not_null` the imported
    /// range is marked assigned.
    pub fn import(&mut self, arr: &[V], offset: u64, set_not_null: bool) -> Result<(), VectorError> {
        if arr.is_empty() {
            return Err(VectorError::EmptyImport);
        }
        let end = offset + arr.len() as u64;
        if offset < self.bmatr.size {
            self.bmatr.clear_planes_range(offset, end - 1);
        }
        let mut windows: Vec<Vec<u64>> = vec![Vec::new(); V::BITS as usize];
        let mut max_slots = 0usize;
        for (k, v) in arr.iter().enumerate() {
            let idx = offset + k as u64;
            let mut bits = v.to_u64();
            while bits != 0 {
                let j = bits.trailing_zeros() as usize;
                bits &= bits - 1;
                let w = &mut windows[j];
                w.push(idx);
                if w.len() == TRANSPOSE_WINDOW {
                    self.bmatr.plane_mut(j).set_sorted(w);
                    w.clear();
                }
                if j + 1 > max_slots {
                    max_slots = j + 1;
                }
            }
        }
        for (j, w) in windows.iter().enumerate() {
            if !w.is_empty() {
                self.bmatr.plane_mut(j).set_sorted(w);
            }
        }
        self.bmatr.cover(max_slots);
        if end > self.bmatr.size {
            self.bmatr.size = end;
        }
        if set_not_null {
            if let Some(np) = &mut self.bmatr.null_plane {
                np.set_range(offset, end - 1);
            }
        }
        Ok(())
    }

    /// [`import`](Self::import) at the current end of the vector.
    pub fn import_back(&mut self, arr: &[V], set_not_null: bool) -> Result<(), VectorError> {
        self.import(arr, self.bmatr.size, set_not_null)
    }

    /// Bulk reverse transposition into `out`, starting at `idx_from`.
    pub fn decode(&self, out: &mut [V], idx_from: u64, zero_mem: bool) -> u64 {
        self.extract(out, idx_from, zero_mem)
    }

    /// Reverse transposition: visits only the set bits of each plane within
    /// the window, so cost tracks plane population rather than window size.
    /// Positions with no set bit in any plane keep their (zeroed) default.
    pub fn extract(&self, out: &mut [V], offset: u64, zero_mem: bool) -> u64 {
        if zero_mem {
            out.fill(V::default());
        }
        if offset >= self.bmatr.size || out.is_empty() {
            return 0;
        }
        let count = (out.len() as u64).min(self.bmatr.size - offset);
        let last = offset + count - 1;
        for j in 0..self.bmatr.effective {
            if let Some(p) = self.bmatr.plane(j) {
                for pos in p.ones_from(offset) {
                    if pos > last {
                        break;
                    }
                    let slot = (pos - offset) as usize;
                    out[slot] = V::from_u64(out[slot].to_u64() | (1u64 << j));
                }
            }
        }
        count
    }

    /// Random multi-index extraction. Indices falling in the same storage
    /// block share one block fetch per plane; `hint` picks the strategy and
    /// never changes the result.
    pub fn gather(&self, out: &mut [V], idx: &[u64], hint: SortHint) -> u64 {
        debug_assert!(out.len() >= idx.len());
        if idx.is_empty() {
            return 0;
        }
        if idx.len() == 1 {
            out[0] = self.get(idx[0]);
            return 1;
        }
        let grouped = match hint {
            SortHint::Sorted | SortHint::SortedUniform => true,
            SortHint::Unsorted => false,
            SortHint::Unknown => idx.windows(2).all(|w| w[0] <= w[1]),
        };
        if !grouped {
            for (o, &i) in out.iter_mut().zip(idx.iter()) {
                *o = self.get(i);
            }
            return idx.len() as u64;
        }
        let mut k = 0usize;
        while k < idx.len() {
            let bi = (idx[k] >> BLOCK_SHIFT) as usize;
            let mut k2 = k + 1;
            while k2 < idx.len() && (idx[k2] >> BLOCK_SHIFT) as usize == bi {
                k2 += 1;
            }
            out[k..k2].fill(V::default());
            for j in 0..self.bmatr.effective {
                let Some(p) = self.bmatr.plane(j) else { continue };
                let block = p.block_ref(bi);
                if matches!(block, BlockRef::Zero) {
                    continue;
                }
                for t in k..k2 {
                    if block.test(idx[t] & (BLOCK_BITS - 1)) {
                        out[t] = V::from_u64(out[t].to_u64() | (1u64 << j));
                    }
                }
            }
            k = k2;
        }
        idx.len() as u64
    }

    /// Zero every value over the closed interval `[left, right]` (swapped
    /// if reversed). With `set_null`, the interval is also marked
    /// unassigned.
    pub fn clear_range(&mut self, left: u64, right: u64, set_null: bool) {
        let (left, right) = if left <= right { (left, right) } else { (right, left) };
        self.bmatr.clear_planes_range(left, right);
        if set_null {
            if let Some(np) = &mut self.bmatr.null_plane {
                np.clear_range(left, right);
            }
        }
    }

    /// OR-combine `other` into `self`, growing to cover it. A non-NULL-able
    /// source joined into a NULL-able target marks the source range fully
    /// assigned, since an un-NULL-able vector is by definition fully
    /// populated.
    pub fn join(&mut self, other: &SparseVector<V>) {
        if other.bmatr.size == 0 {
            return;
        }
        for j in 0..other.bmatr.rows() {
            if let Some(op) = other.bmatr.plane(j) {
                self.bmatr.plane_mut(j).or_with(op);
            }
        }
        self.bmatr.cover(other.bmatr.effective);
        if let Some(np) = &mut self.bmatr.null_plane {
            match &other.bmatr.null_plane {
                Some(onp) => np.or_with(onp),
                None => np.set_range(0, other.bmatr.size - 1),
            }
        }
        if other.bmatr.size > self.bmatr.size {
            self.bmatr.size = other.bmatr.size;
        }
    }

    /// Like [`join`](Self::join) but consumes `other`, moving plane storage
    /// instead of copying where a slot is free on the receiving side.
    pub fn merge(&mut self, mut other: SparseVector<V>) {
        for j in 0..other.bmatr.rows() {
            if let Some(op) = other.bmatr.planes[j].take() {
                match &mut self.bmatr.planes[j] {
                    Some(p) => p.or_with(&op),
                    slot @ None => *slot = Some(op),
                }
            }
        }
        self.bmatr.cover(other.bmatr.effective);
        if other.bmatr.size == 0 {
            return;
        }
        if let Some(np) = &mut self.bmatr.null_plane {
            match other.bmatr.null_plane.take() {
                Some(onp) => np.or_with(&onp),
                None => np.set_range(0, other.bmatr.size - 1),
            }
        }
        if other.bmatr.size > self.bmatr.size {
            self.bmatr.size = other.bmatr.size;
        }
    }

    /// Replace contents with exactly `other`'s values over `[left, right]`,
    /// clear everything outside, and adopt `other`'s size. With
    /// `splice_null` the NULL status is copied as well; otherwise the range
    /// is marked fully assigned.
    pub fn copy_range(&mut self, other: &SparseVector<V>, left: u64, right: u64, splice_null: bool) {
        let (left, right) = if left <= right { (left, right) } else { (right, left) };
        for slot in self.bmatr.planes.iter_mut() {
            *slot = None;
        }
        for j in 0..other.bmatr.rows().min(self.bmatr.rows()) {
            if let Some(op) = other.bmatr.plane(j) {
                let kept: Vec<u64> = op.ones_from(left).take_while(|&p| p <= right).collect();
                if !kept.is_empty() {
                    let mut bv = BitVec::new();
                    bv.set_sorted(&kept);
                    self.bmatr.planes[j] = Some(bv);
                }
            }
        }
        self.bmatr.size = other.bmatr.size;
        self.bmatr.recompute_effective();
        if let Some(np) = &mut self.bmatr.null_plane {
            *np = BitVec::new();
            if other.bmatr.size == 0 {
                return;
            }
            let hi = right.min(other.bmatr.size - 1);
            match (&other.bmatr.null_plane, splice_null) {
                (Some(onp), true) => {
                    let kept: Vec<u64> = onp.ones_from(left).take_while(|&p| p <= hi).collect();
                    np.set_sorted(&kept);
                }
                _ => {
                    if left <= hi {
                        np.set_range(left, hi);
                    }
                }
            }
        }
    }

    /// Restrict the vector to the index set of `mask`: every plane (and the
    /// NULL plane, if present) is AND-ed against it.
    pub fn filter(&mut self, mask: &BitVec) {
        for slot in self.bmatr.planes.iter_mut().flatten() {
            slot.and_with(mask);
        }
        if let Some(np) = &mut self.bmatr.null_plane {
            np.and_with(mask);
        }
    }

    /// Plane-wise equality. `policy` controls whether NULL status
    /// participates.
    pub fn equal(&self, other: &SparseVector<V>, policy: NullPolicy) -> bool {
        if self.bmatr.size != other.bmatr.size {
            return false;
        }
        let rows = self.bmatr.rows().max(other.bmatr.rows());
        for j in 0..rows {
            match (self.bmatr.plane(j), other.bmatr.plane(j)) {
                (None, None) => {}
                (Some(a), Some(b)) => {
                    if a != b {
                        return false;
                    }
                }
                (Some(p), None) | (None, Some(p)) => {
                    if p.any() {
                        return false;
                    }
                }
            }
        }
        if policy == NullPolicy::UseNull {
            match (&self.bmatr.null_plane, &other.bmatr.null_plane) {
                (None, None) => {}
                (Some(a), Some(b)) => {
                    if a != b {
                        return false;
                    }
                }
                (Some(np), None) | (None, Some(np)) => {
                    // A missing NULL plane means fully assigned over the
                    // logical range.
                    let mut full = BitVec::new();
                    if self.bmatr.size > 0 {
                        full.set_range(0, self.bmatr.size - 1);
                    }
                    if *np != full {
                        return false;
                    }
                }
            }
        }
        true
    }

    /// Three-way comparison of the element at `idx` against `val`. Goes
    /// through `get`; a plane-level shortcut is a known optimization
    /// candidate, not a correctness concern.
    pub fn compare(&self, idx: u64, val: V) -> Ordering {
        self.get(idx).cmp(&val)
    }

    /// Re-compress plane storage and free planes that lost their last bit.
    pub fn optimize(&mut self) {
        self.bmatr.optimize();
    }

    pub fn stat(&self) -> SvStat {
        let mut s = SvStat::default();
        for j in 0..self.bmatr.rows() {
            if let Some(p) = self.bmatr.plane(j) {
                s.planes += 1;
                let bs = p.block_stats();
                s.bit_blocks += bs.bit_blocks;
                s.full_blocks += bs.full_blocks;
                s.zero_blocks += bs.zero_blocks;
                s.heap_bytes += bs.bit_block_bytes();
            }
        }
        if let Some(np) = &self.bmatr.null_plane {
            let bs = np.block_stats();
            s.bit_blocks += bs.bit_blocks;
            s.full_blocks += bs.full_blocks;
            s.zero_blocks += bs.zero_blocks;
            s.heap_bytes += bs.bit_block_bytes();
        }
        s
    }

    pub fn iter(&self) -> crate::SvIter<'_, V> {
        crate::SvIter::new(self)
    }

    pub fn back_inserter(&mut self) -> crate::BackInserter<'_, V> {
        crate::BackInserter::new(self)
    }

    // ---- internal surface for the rank-select layer ----

    /// Set value planes only; the NULL plane is left alone. Used by the
    /// rank-select wrapper, whose NULL plane lives in logical coordinates
    /// while the payload planes live in physical ones.
    pub(crate) fn set_no_null(&mut self, idx: u64, v: V) {
        if idx >= self.bmatr.size {
            self.bmatr.size = idx + 1;
        }
        let bits = v.to_u64();
        let needed = (64 - bits.leading_zeros()) as usize;
        self.bmatr.set_bits(idx, bits, needed.min(V::BITS as usize));
    }

    /// Insert into value planes only, shifting the suffix up.
    pub(crate) fn insert_no_null(&mut self, idx: u64, v: V) {
        let bits = v.to_u64();
        let needed = (64 - bits.leading_zeros()) as usize;
        for j in 0..self.bmatr.rows() {
            let bit = (bits >> j) & 1 == 1;
            match (&mut self.bmatr.planes[j], bit) {
                (Some(p), _) => p.insert(idx, bit),
                (slot @ None, true) => {
                    let mut p = BitVec::new();
                    p.insert(idx, true);
                    *slot = Some(p);
                }
                (None, false) => {}
            }
        }
        self.bmatr.cover(needed.min(V::BITS as usize));
        self.bmatr.size += 1;
    }

    /// Erase from value planes only, shifting the suffix down.
    pub(crate) fn erase_no_null(&mut self, idx: u64) {
        for slot in self.bmatr.planes.iter_mut().flatten() {
            slot.erase(idx);
        }
        self.bmatr.size -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn set_get_grows_size() {
        let mut sv = SparseVector::<u32>::new(Nulls::Off);
        sv.set(10, 0xDEAD);
        assert_eq!(sv.size(), 11);
        assert_eq!(sv.get(10), 0xDEAD);
        assert_eq!(sv.get(3), 0);
        assert_eq!(sv.get(100), 0, "past-the-end read yields zero");
        sv.set(10, 1);
        assert_eq!(sv.get(10), 1, "higher planes cleared on overwrite");
    }

    #[test]
    fn at_checks_bounds() {
        let mut sv = SparseVector::<u16>::new(Nulls::Off);
        sv.push_back(7);
        assert_eq!(sv.at(0), Ok(7));
        assert_eq!(
            sv.at(1),
            Err(VectorError::IndexOutOfRange { index: 1, size: 1 })
        );
    }

    #[test]
    fn null_plane_tracks_assignment() {
        let mut sv = SparseVector::<u32>::new(Nulls::On);
        sv.push_back(5);
        sv.push_back(0);
        sv.push_back(7);
        sv.push_back(0);
        sv.push_back(3);
        sv.clear_value(1, true);
        sv.clear_value(3, true);
        assert_eq!(sv.size(), 5);
        assert_eq!(sv.get(0), 5);
        assert_eq!(sv.get(1), 0);
        assert!(sv.is_null(1));
        assert!(sv.is_null(3));
        assert!(!sv.is_null(2));
        // Storing zero is not the same as being unassigned.
        sv.set(1, 0);
        assert!(!sv.is_null(1));
    }

    #[test]
    fn push_back_null_advances_size_only() {
        let mut sv = SparseVector::<u8>::new(Nulls::On);
        sv.push_back(9);
        sv.push_back_null(3);
        assert_eq!(sv.size(), 4);
        assert!(sv.is_null(2));
        assert_eq!(sv.get(2), 0);
        assert_eq!(sv.stat().planes, 2, "only planes for the value 9");
    }

    #[test]
    fn import_roundtrips_through_decode() {
        let data: Vec<u32> = (0..1000u32).map(|i| i.wrapping_mul(2654435761) % 5000).collect();
        let mut sv = SparseVector::<u32>::new(Nulls::Off);
        sv.import(&data, 0, true).unwrap();
        assert_eq!(sv.size(), 1000);

        let mut out = vec![0u32; 1000];
        let n = sv.decode(&mut out, 0, true);
        assert_eq!(n, 1000);
        assert_eq!(out, data);
    }

    #[test]
    fn import_overlap_clears_destination() {
        let mut sv = SparseVector::<u32>::new(Nulls::Off);
        sv.import(&[0xFFFF_FFFF; 8], 0, true).unwrap();
        sv.import(&[0u32, 1, 0, 2], 2, true).unwrap();
        let mut out = vec![0u32; 8];
        sv.decode(&mut out, 0, true);
        assert_eq!(out, [0xFFFF_FFFF, 0xFFFF_FFFF, 0, 1, 0, 2, 0xFFFF_FFFF, 0xFFFF_FFFF]);
    }

    #[test]
    fn import_empty_is_range_error() {
        let mut sv = SparseVector::<u32>::new(Nulls::Off);
        assert_eq!(sv.import(&[], 0, true), Err(VectorError::EmptyImport));
    }

    #[test]
    fn import_large_exercises_transpose_window() {
        let data: Vec<u8> = (0..2000).map(|i| (i % 251) as u8).collect();
        let mut sv = SparseVector::<u8>::new(Nulls::Off);
        sv.import_back(&data, false).unwrap();
        let mut out = vec![0u8; 2000];
        sv.extract(&mut out, 0, true);
        assert_eq!(out, data);
    }

    #[test]
    fn extract_window() {
        let data: Vec<u16> = (0..100).map(|i| i * 3).collect();
        let mut sv = SparseVector::<u16>::new(Nulls::Off);
        sv.import(&data, 0, false).unwrap();
        let mut out = vec![0u16; 10];
        let n = sv.extract(&mut out, 95, true);
        assert_eq!(n, 5, "clamped at the logical end");
        assert_eq!(&out[..5], &data[95..]);
        assert_eq!(&out[5..], &[0; 5]);
    }

    #[test]
    fn gather_matches_get_for_all_hints() {
        let data: Vec<u32> = (0..300u32).map(|i| i * 7 % 97).collect();
        let mut sv = SparseVector::<u32>::new(Nulls::Off);
        sv.import(&data, 0, false).unwrap();

        let sorted: Vec<u64> = vec![0, 1, 5, 5, 70, 200, 299];
        let unsorted: Vec<u64> = vec![299, 0, 70, 5, 200, 5, 1];
        for hint in [
            SortHint::Sorted,
            SortHint::Unsorted,
            SortHint::Unknown,
            SortHint::SortedUniform,
        ] {
            let idx = if hint == SortHint::Unsorted { &unsorted } else { &sorted };
            let mut out = vec![0u32; idx.len()];
            let n = sv.gather(&mut out, idx, hint);
            assert_eq!(n, idx.len() as u64);
            let expect: Vec<u32> = idx.iter().map(|&i| sv.get(i)).collect();
            assert_eq!(out, expect, "hint {hint:?}");
        }
        // The hint is advisory: an unsorted list under Unknown still works.
        let mut out = vec![0u32; unsorted.len()];
        sv.gather(&mut out, &unsorted, SortHint::Unknown);
        let expect: Vec<u32> = unsorted.iter().map(|&i| sv.get(i)).collect();
        assert_eq!(out, expect);
    }

    #[test]
    fn gather_single_element() {
        let mut sv = SparseVector::<u32>::new(Nulls::Off);
        sv.set(4, 42);
        let mut out = [0u32];
        assert_eq!(sv.gather(&mut out, &[4], SortHint::Unknown), 1);
        assert_eq!(out[0], 42);
    }

    #[test]
    fn insert_erase_roundtrip() {
        let data: Vec<u32> = vec![10, 20, 30, 40, 50];
        let mut sv = SparseVector::<u32>::new(Nulls::Off);
        sv.import(&data, 0, false).unwrap();
        let original = sv.clone();

        sv.insert(2, 99);
        assert_eq!(sv.size(), 6);
        let mut out = vec![0u32; 6];
        sv.decode(&mut out, 0, true);
        assert_eq!(out, [10, 20, 99, 30, 40, 50]);

        sv.erase(2);
        assert!(sv.equal(&original, NullPolicy::UseNull));
    }

    #[test]
    fn clear_range_swaps_and_zeroes() {
        let mut sv = SparseVector::<u32>::new(Nulls::On);
        sv.import(&[1, 2, 3, 4, 5], 0, true).unwrap();
        sv.clear_range(3, 1, false);
        let mut out = vec![0u32; 5];
        sv.decode(&mut out, 0, true);
        assert_eq!(out, [1, 0, 0, 0, 5]);
        assert!(!sv.is_null(2), "values zeroed but still assigned");
        sv.clear_range(2, 2, true);
        assert!(sv.is_null(2));
    }

    #[test]
    fn join_grows_and_marks_presence() {
        let mut a = SparseVector::<u32>::new(Nulls::On);
        a.push_back(1);
        let mut b = SparseVector::<u32>::new(Nulls::Off);
        b.import(&[0, 2, 3], 0, false).unwrap();
        a.join(&b);
        assert_eq!(a.size(), 3);
        assert_eq!(a.get(1), 2);
        assert!(!a.is_null(1), "non-nullable source counts as fully populated");
    }

    #[test]
    fn merge_consumes_other() {
        let mut a = SparseVector::<u32>::new(Nulls::Off);
        a.import(&[1, 0, 0], 0, false).unwrap();
        let mut b = SparseVector::<u32>::new(Nulls::Off);
        b.import(&[0, 2, 0, 8], 0, false).unwrap();
        a.merge(b);
        let mut out = vec![0u32; 4];
        a.decode(&mut out, 0, true);
        assert_eq!(out, [1, 2, 0, 8]);
    }

    #[test]
    fn copy_range_restricts() {
        let mut src = SparseVector::<u32>::new(Nulls::On);
        src.import(&[9, 8, 7, 6, 5], 0, true).unwrap();
        let mut dst = SparseVector::<u32>::new(Nulls::On);
        dst.push_back(1234);
        dst.copy_range(&src, 1, 3, true);
        assert_eq!(dst.size(), 5);
        let mut out = vec![0u32; 5];
        dst.decode(&mut out, 0, true);
        assert_eq!(out, [0, 8, 7, 6, 0]);
        assert!(dst.is_null(0) && dst.is_null(4));
        assert!(!dst.is_null(2));
    }

    #[test]
    fn filter_restricts_to_mask() {
        let mut sv = SparseVector::<u32>::new(Nulls::On);
        sv.import(&[1, 2, 3, 4], 0, true).unwrap();
        let mut mask = BitVec::new();
        mask.set(0);
        mask.set(2);
        sv.filter(&mask);
        let mut out = vec![0u32; 4];
        sv.decode(&mut out, 0, true);
        assert_eq!(out, [1, 0, 3, 0]);
        assert!(sv.is_null(1) && !sv.is_null(2));
    }

    #[test]
    fn equal_modes() {
        let mut a = SparseVector::<u32>::new(Nulls::On);
        a.import(&[1, 2, 3], 0, true).unwrap();
        let mut b = a.clone();
        assert!(a.equal(&b, NullPolicy::UseNull));
        b.clear_value(1, true);
        b.set(1, 2);
        assert!(a.equal(&b, NullPolicy::UseNull));
        b.clear_value(1, true);
        assert!(!a.equal(&b, NullPolicy::UseNull), "presence differs");
        assert!(a.equal(&b, NullPolicy::NoNull) == (b.get(1) == 2));
    }

    #[test]
    fn compare_is_three_way() {
        let mut sv = SparseVector::<u32>::new(Nulls::Off);
        sv.push_back(10);
        assert_eq!(sv.compare(0, 5), Ordering::Greater);
        assert_eq!(sv.compare(0, 10), Ordering::Equal);
        assert_eq!(sv.compare(0, 11), Ordering::Less);
    }

    #[test]
    fn optimize_frees_emptied_planes() {
        let mut sv = SparseVector::<u32>::new(Nulls::Off);
        sv.set(0, 0xFF);
        sv.set(0, 1);
        let before = sv.stat();
        assert_eq!(before.planes, 8, "slots allocated by the first store");
        sv.optimize();
        let after = sv.stat();
        assert_eq!(after.planes, 1);
        assert_eq!(sv.get(0), 1);
    }

    proptest! {
        #[test]
        fn transpose_inverse(data in proptest::collection::vec(any::<u32>(), 1..500)) {
            let mut sv = SparseVector::<u32>::new(Nulls::On);
            sv.import(&data, 0, true).unwrap();
            let mut out = vec![0u32; data.len()];
            let n = sv.decode(&mut out, 0, true);
            prop_assert_eq!(n as usize, data.len());
            prop_assert_eq!(out, data);
        }

        #[test]
        fn insert_then_erase_is_identity(
            data in proptest::collection::vec(0u32..10_000, 1..100),
            pos_frac in 0.0f64..1.0,
            value in any::<u32>(),
        ) {
            let mut sv = SparseVector::<u32>::new(Nulls::Off);
            sv.import(&data, 0, false).unwrap();
            let original = sv.clone();
            let pos = ((data.len() as f64 * pos_frac) as u64).min(data.len() as u64 - 1);
            sv.insert(pos, value);
            prop_assert_eq!(sv.get(pos), value);
            sv.erase(pos);
            prop_assert!(sv.equal(&original, NullPolicy::UseNull));
        }
    }
}
