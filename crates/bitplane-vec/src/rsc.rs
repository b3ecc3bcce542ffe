use bitplane_bv::{BitVec, RsIndex};

use crate::access::{PlaneAccess, PlaneStore};
use crate::{CodeValue, Nulls, SparseVector, VectorError};

/// Rank-select compressed sparse vector.
///
/// Only assigned positions are physically stored: the NULL plane keeps
/// logical presence, while the payload's value planes are addressed by the
/// popcount rank over that plane. A prebuilt rank-select index accelerates
/// the translation; mutations invalidate it and [`sync`](Self::sync)
/// rebuilds it.
#[derive(Clone, Debug)]
pub struct RscVector<V: CodeValue> {
    /// Value planes in physical coordinates; its NULL plane holds logical
    /// presence.
    payload: SparseVector<V>,
    /// `Some` iff in sync with the presence plane.
    rs: Option<RsIndex>,
    size: u64,
}

impl<V: CodeValue> Default for RscVector<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: CodeValue> RscVector<V> {
    pub fn new() -> Self {
        Self {
            payload: SparseVector::new(Nulls::On),
            rs: None,
            size: 0,
        }
    }

    /// Logical size: one past the highest index ever assigned.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn is_in_sync(&self) -> bool {
        self.rs.is_some()
    }

    /// Number of physically stored (assigned) elements.
    pub fn count(&self) -> u64 {
        self.presence().count()
    }

    #[inline]
    pub(crate) fn presence(&self) -> &BitVec {
        self.payload
            .bmatr
            .null_plane
            .as_ref()
            .unwrap_or_else(|| unreachable!("rank-select vector always carries a NULL plane"))
    }

    #[inline]
    fn presence_mut(&mut self) -> &mut BitVec {
        self.rs = None;
        self.payload
            .bmatr
            .null_plane
            .as_mut()
            .unwrap_or_else(|| unreachable!("rank-select vector always carries a NULL plane"))
    }

    pub(crate) fn payload(&self) -> &SparseVector<V> {
        &self.payload
    }

    /// Rebuild the rank-select index. `force` rebuilds even when already in
    /// sync; otherwise a synced vector is left alone.
    pub fn sync(&mut self, force: bool) {
        if self.rs.is_some() && !force {
            return;
        }
        self.rs = Some(self.presence().build_rs_index());
    }

    /// Assigned positions in `[0, idx]`.
    #[inline]
    fn rank_through(&self, idx: u64) -> u64 {
        match &self.rs {
            Some(rs) => self.presence().rank_indexed(rs, idx),
            None => self.presence().count_range(0, idx),
        }
    }

    /// Strictly increasing append. `idx` must exceed every previously
    /// assigned index.
    pub fn push_back(&mut self, idx: u64, v: V) -> Result<(), VectorError> {
        if self.size > 0 && idx < self.size {
            return Err(VectorError::IndexOutOfRange {
                index: idx,
                size: self.size,
            });
        }
        let phys = self.payload.size();
        self.payload.set_no_null(phys, v);
        self.presence_mut().set(idx);
        self.size = idx + 1;
        Ok(())
    }

    /// Assign `v` at `idx`, inserting into the payload if the position was
    /// absent. Extends the logical size when `idx` is a new highest.
    pub fn set(&mut self, idx: u64, v: V) {
        let rank = self.rank_through(idx);
        if self.presence().test(idx) {
            self.payload.set_no_null(rank - 1, v);
            self.rs = None;
        } else {
            self.payload.insert_no_null(rank, v);
            self.presence_mut().set(idx);
        }
        if idx >= self.size {
            self.size = idx + 1;
        }
    }

    /// Add `v` to the value at `idx` with wrapping arithmetic; an absent
    /// position counts as 0 and becomes assigned.
    pub fn inc_by(&mut self, idx: u64, v: V) {
        let rank = self.rank_through(idx);
        if self.presence().test(idx) {
            let cur = self.payload.get(rank - 1);
            self.payload.set_no_null(rank - 1, cur.wrapping_add(v));
            self.rs = None;
        } else {
            self.payload.insert_no_null(rank, v);
            self.presence_mut().set(idx);
            if idx >= self.size {
                self.size = idx + 1;
            }
        }
    }

    pub fn inc(&mut self, idx: u64) {
        self.inc_by(idx, V::from_u64(1));
    }

    /// Increment for a position the caller knows is assigned. Presence does
    /// not change, so the rank-select index stays valid.
    pub fn inc_not_null(&mut self, idx: u64, v: V) {
        debug_assert!(
            self.presence().test(idx),
            "inc_not_null requires an assigned index"
        );
        let rank = self.rank_through(idx);
        let cur = self.payload.get(rank - 1);
        self.payload.set_no_null(rank - 1, cur.wrapping_add(v));
    }

    /// Un-assign `idx`: the payload element is physically removed, not
    /// tombstoned. The logical size is unchanged.
    pub fn set_null(&mut self, idx: u64) {
        if !self.presence().test(idx) {
            return;
        }
        let rank = self.rank_through(idx);
        self.payload.erase_no_null(rank - 1);
        self.presence_mut().clear(idx);
    }

    pub fn is_null(&self, idx: u64) -> bool {
        !self.presence().test(idx)
    }

    /// 0 for an absent index, which is a value, not an error.
    pub fn get(&self, idx: u64) -> V {
        if !self.presence().test(idx) {
            return V::default();
        }
        self.payload.get(self.rank_through(idx) - 1)
    }

    /// Checked access distinguishing out-of-range from in-range-but-absent.
    pub fn at(&self, idx: u64) -> Result<V, VectorError> {
        if idx >= self.size {
            return Err(VectorError::IndexOutOfRange {
                index: idx,
                size: self.size,
            });
        }
        if !self.presence().test(idx) {
            return Err(VectorError::NotFound { index: idx });
        }
        Ok(self.payload.get(self.rank_through(idx) - 1))
    }

    /// Logical index of the `rank`-th assigned element (1-based).
    pub fn find_rank(&self, rank: u64) -> Option<u64> {
        match &self.rs {
            Some(rs) => self.presence().select_indexed(rs, rank),
            None => self.presence().select(rank),
        }
    }

    /// Decode a logical window into `out`. Requires sync; absent positions
    /// keep their zero default.
    pub fn decode(&self, out: &mut [V], idx_from: u64, zero_mem: bool) -> u64 {
        debug_assert!(self.is_in_sync(), "decode requires a synced vector");
        if zero_mem {
            out.fill(V::default());
        }
        if idx_from >= self.size || out.is_empty() {
            return 0;
        }
        let count = (out.len() as u64).min(self.size - idx_from);
        let last = idx_from + count - 1;
        let mut rank = if idx_from == 0 {
            0
        } else {
            self.rank_through(idx_from - 1)
        };
        for pos in self.presence().ones_from(idx_from) {
            if pos > last {
                break;
            }
            out[(pos - idx_from) as usize] = self.payload.get(rank);
            rank += 1;
        }
        count
    }

    /// Two-buffer decode: bulk-extract the exact physical sub-range in one
    /// call, then scatter to logical offsets through the presence
    /// enumerator.
    pub fn decode_buf(&self, out: &mut [V], idx_from: u64, zero_mem: bool) -> u64 {
        debug_assert!(self.is_in_sync(), "decode requires a synced vector");
        if zero_mem {
            out.fill(V::default());
        }
        if idx_from >= self.size || out.is_empty() {
            return 0;
        }
        let count = (out.len() as u64).min(self.size - idx_from);
        let last = idx_from + count - 1;
        let rank_before = if idx_from == 0 {
            0
        } else {
            self.rank_through(idx_from - 1)
        };
        let present = self.presence().count_range(idx_from, last);
        if present == 0 {
            return count;
        }
        let mut dense = vec![V::default(); present as usize];
        self.payload.extract(&mut dense, rank_before, false);
        for (k, pos) in self.presence().ones_from(idx_from).enumerate() {
            if pos > last {
                break;
            }
            out[(pos - idx_from) as usize] = dense[k];
        }
        count
    }

    /// Build from an uncompressed vector with the same NULL semantics,
    /// rank-compressing every value plane against the presence set. Forces
    /// a sync.
    pub fn load_from(&mut self, sv: &SparseVector<V>) {
        let mut presence = match &sv.bmatr.null_plane {
            Some(np) => np.clone(),
            None => {
                let mut full = BitVec::new();
                if sv.size() > 0 {
                    full.set_range(0, sv.size() - 1);
                }
                full
            }
        };
        presence.optimize();
        let phys_count = presence.count();
        self.payload = SparseVector::new(Nulls::On);
        for j in 0..sv.bmatr.rows() {
            if let Some(p) = sv.bmatr.plane(j) {
                let compressed = p.compress(&presence);
                if compressed.any() {
                    self.payload.bmatr.planes[j] = Some(compressed);
                }
            }
        }
        self.payload.bmatr.recompute_effective();
        self.payload.bmatr.size = phys_count;
        self.payload.bmatr.null_plane = Some(presence);
        self.size = sv.size();
        self.sync(true);
    }

    /// Inverse of [`load_from`](Self::load_from): expand every payload
    /// plane back to logical coordinates.
    pub fn load_to(&self, sv: &mut SparseVector<V>) {
        *sv = SparseVector::new(Nulls::On);
        let presence = self.presence();
        for j in 0..self.payload.bmatr.rows() {
            if let Some(p) = self.payload.bmatr.plane(j) {
                let expanded = p.decompress(presence);
                if expanded.any() {
                    sv.bmatr.planes[j] = Some(expanded);
                }
            }
        }
        sv.bmatr.recompute_effective();
        sv.bmatr.null_plane = Some(presence.clone());
        sv.bmatr.size = self.size;
    }

    /// Replace contents with `other` restricted to the closed logical range
    /// `[left, right]`; everything outside is cleared.
    pub fn copy_range(&mut self, other: &RscVector<V>, left: u64, right: u64) {
        let (left, right) = if left <= right { (left, right) } else { (right, left) };
        *self = RscVector::new();
        for pos in other.presence().ones_from(left) {
            if pos > right {
                break;
            }
            // Positions arrive in increasing order, so append never fails.
            let _ = self.push_back(pos, other.get(pos));
        }
        self.size = other.size;
    }

    /// OR-merge payload planes of two vectors with identical presence sets.
    /// The caller guarantees the presence precondition.
    pub fn merge_not_null(&mut self, other: &RscVector<V>) {
        debug_assert!(
            self.presence() == other.presence(),
            "merge_not_null requires identical presence sets"
        );
        for j in 0..other.payload.bmatr.rows() {
            if let Some(op) = other.payload.bmatr.plane(j) {
                self.payload.bmatr.plane_mut(j).or_with(op);
            }
        }
        self.payload.bmatr.cover(other.payload.bmatr.effective);
    }

    pub fn optimize(&mut self) {
        self.payload.optimize();
    }
}

impl<V: CodeValue> PlaneAccess for RscVector<V> {
    fn plane_count(&self) -> usize {
        self.payload.bmatr.rows() + 1
    }

    fn plane(&self, j: usize) -> Option<&BitVec> {
        if j < self.payload.bmatr.rows() {
            self.payload.bmatr.plane(j)
        } else {
            Some(self.presence())
        }
    }

    /// Physical payload size, which is what the wire header carries for the
    /// rank-select form.
    fn size(&self) -> u64 {
        self.payload.size()
    }

    fn is_nullable(&self) -> bool {
        true
    }

    fn rank_compressed(&self) -> bool {
        true
    }
}

impl<V: CodeValue> PlaneStore for RscVector<V> {
    fn install_plane(&mut self, j: usize, plane: BitVec) {
        if j < self.payload.bmatr.rows() {
            self.payload.bmatr.planes[j] = Some(plane);
        } else {
            self.payload.bmatr.null_plane = Some(plane);
        }
        self.rs = None;
    }

    fn free_plane(&mut self, j: usize) {
        if j < self.payload.bmatr.rows() {
            self.payload.bmatr.planes[j] = None;
        }
    }

    fn set_size(&mut self, size: u64) {
        self.payload.bmatr.size = size;
    }

    fn finalize(&mut self) {
        self.payload.bmatr.recompute_effective();
        self.size = self.presence().find_last().map_or(0, |p| p + 1);
        self.sync(true);
    }

    fn set_logical_extent(&mut self, size: u64) {
        self.size = size;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn push_back_get_at() {
        let mut rsc = RscVector::<u32>::new();
        rsc.push_back(2, 10).unwrap();
        rsc.push_back(5, 20).unwrap();
        rsc.push_back(9, 30).unwrap();
        assert_eq!(rsc.size(), 10);
        assert_eq!(rsc.count(), 3);
        assert_eq!(rsc.get(0), 0, "absent reads zero, not an error");
        assert_eq!(rsc.at(0), Err(VectorError::NotFound { index: 0 }));
        assert_eq!(rsc.get(5), 20);
        assert_eq!(rsc.at(5), Ok(20));
        assert_eq!(
            rsc.at(10),
            Err(VectorError::IndexOutOfRange { index: 10, size: 10 })
        );
        assert_eq!(rsc.find_rank(2), Some(5));
    }

    #[test]
    fn push_back_rejects_non_increasing() {
        let mut rsc = RscVector::<u32>::new();
        rsc.push_back(4, 1).unwrap();
        assert_eq!(
            rsc.push_back(4, 2),
            Err(VectorError::IndexOutOfRange { index: 4, size: 5 })
        );
        assert_eq!(
            rsc.push_back(1, 2),
            Err(VectorError::IndexOutOfRange { index: 1, size: 5 })
        );
    }

    #[test]
    fn set_inserts_into_payload() {
        let mut rsc = RscVector::<u32>::new();
        rsc.push_back(2, 10).unwrap();
        rsc.push_back(9, 30).unwrap();
        rsc.sync(false);
        assert!(rsc.is_in_sync());
        rsc.set(5, 20);
        assert!(!rsc.is_in_sync(), "mutating presence drops the index");
        assert_eq!(rsc.get(2), 10);
        assert_eq!(rsc.get(5), 20);
        assert_eq!(rsc.get(9), 30);
        rsc.set(5, 21);
        assert_eq!(rsc.get(5), 21, "in-place overwrite of a present index");
        rsc.set(20, 7);
        assert_eq!(rsc.size(), 21);
    }

    #[test]
    fn inc_and_inc_not_null() {
        let mut rsc = RscVector::<u8>::new();
        rsc.inc(3);
        rsc.inc(3);
        assert_eq!(rsc.get(3), 2);
        rsc.inc_by(7, 250);
        rsc.inc_by(7, 10);
        assert_eq!(rsc.get(7), 4, "wrapping add");
        rsc.sync(true);
        rsc.inc_not_null(3, 5);
        assert!(rsc.is_in_sync(), "in-place increment keeps the index");
        assert_eq!(rsc.get(3), 7);
    }

    #[test]
    fn set_null_is_a_physical_delete() {
        let mut rsc = RscVector::<u32>::new();
        rsc.push_back(1, 11).unwrap();
        rsc.push_back(3, 33).unwrap();
        rsc.push_back(5, 55).unwrap();
        rsc.set_null(3);
        assert_eq!(rsc.count(), 2);
        assert!(rsc.is_null(3));
        assert_eq!(rsc.get(3), 0);
        assert_eq!(rsc.get(5), 55, "later elements keep their values");
        assert_eq!(rsc.size(), 6, "logical size unchanged");
        rsc.set_null(3);
        assert_eq!(rsc.count(), 2, "idempotent on an absent index");
    }

    #[test]
    fn rank_matches_slow_count() {
        let mut rsc = RscVector::<u32>::new();
        for i in (0..4000u64).step_by(7) {
            rsc.push_back(i, (i % 251) as u32).unwrap();
        }
        rsc.sync(true);
        for idx in [0u64, 1, 6, 7, 1000, 3999] {
            assert_eq!(
                rsc.rank_through(idx),
                rsc.presence().count_range(0, idx),
                "idx {idx}"
            );
            assert_eq!(rsc.is_null(idx), !rsc.presence().test(idx));
        }
    }

    #[test]
    fn decode_variants_agree() {
        let mut rsc = RscVector::<u32>::new();
        rsc.push_back(2, 10).unwrap();
        rsc.push_back(5, 20).unwrap();
        rsc.push_back(9, 30).unwrap();
        rsc.sync(true);
        let mut a = vec![0u32; 10];
        let mut b = vec![0u32; 10];
        assert_eq!(rsc.decode(&mut a, 0, true), 10);
        assert_eq!(rsc.decode_buf(&mut b, 0, true), 10);
        assert_eq!(a, [0, 0, 10, 0, 0, 20, 0, 0, 0, 30]);
        assert_eq!(a, b);

        let mut w = vec![0u32; 4];
        assert_eq!(rsc.decode(&mut w, 4, true), 4);
        assert_eq!(w, [0, 20, 0, 0]);
        let mut w2 = vec![0u32; 4];
        rsc.decode_buf(&mut w2, 4, true);
        assert_eq!(w, w2);
    }

    #[test]
    fn load_roundtrip() {
        let mut sv = SparseVector::<u32>::new(Nulls::On);
        sv.import(&[5, 0, 7, 0, 3], 0, true).unwrap();
        sv.clear_value(1, true);
        sv.clear_value(3, true);

        let mut rsc = RscVector::<u32>::new();
        rsc.load_from(&sv);
        assert!(rsc.is_in_sync());
        assert_eq!(rsc.size(), 5);
        assert_eq!(rsc.count(), 3);
        assert_eq!(rsc.get(2), 7);
        assert!(rsc.is_null(1));

        let mut back = SparseVector::<u32>::new(Nulls::On);
        rsc.load_to(&mut back);
        assert!(back.equal(&sv, crate::NullPolicy::UseNull));
    }

    #[test]
    fn copy_range_restricts() {
        let mut rsc = RscVector::<u32>::new();
        rsc.push_back(1, 11).unwrap();
        rsc.push_back(4, 44).unwrap();
        rsc.push_back(8, 88).unwrap();
        let mut sub = RscVector::<u32>::new();
        sub.copy_range(&rsc, 2, 7);
        assert_eq!(sub.size(), rsc.size());
        assert_eq!(sub.count(), 1);
        assert_eq!(sub.get(4), 44);
        assert!(sub.is_null(1) && sub.is_null(8));
    }

    #[test]
    fn merge_not_null_ors_payload() {
        let mut a = RscVector::<u32>::new();
        a.push_back(2, 0b0001).unwrap();
        a.push_back(6, 0b0100).unwrap();
        let mut b = RscVector::<u32>::new();
        b.push_back(2, 0b0010).unwrap();
        b.push_back(6, 0b1000).unwrap();
        a.merge_not_null(&b);
        assert_eq!(a.get(2), 0b0011);
        assert_eq!(a.get(6), 0b1100);
    }

    proptest! {
        #[test]
        fn matches_a_reference_map(updates in proptest::collection::vec((0u64..500, any::<u32>()), 1..120)) {
            let mut rsc = RscVector::<u32>::new();
            let mut model = std::collections::BTreeMap::new();
            for &(idx, v) in &updates {
                rsc.set(idx, v);
                model.insert(idx, v);
            }
            rsc.sync(true);
            prop_assert_eq!(rsc.count(), model.len() as u64);
            for idx in 0..500u64 {
                match model.get(&idx) {
                    Some(&v) => {
                        prop_assert_eq!(rsc.get(idx), v);
                        prop_assert!(!rsc.is_null(idx));
                    }
                    None => {
                        prop_assert_eq!(rsc.get(idx), 0);
                        prop_assert!(rsc.is_null(idx));
                    }
                }
            }
        }
    }
}
