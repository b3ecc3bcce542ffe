use crate::Nulls;
use bitplane_bv::BitVec;

/// Bit-matrix base shared by the dense and string vectors: an array of
/// lazily allocated bit-plane slots, an optional NULL plane, the logical
/// element count, and the effective plane bound.
///
/// Invariant: for a stored index `i` with value `v`, plane `j` has bit `i`
/// set iff bit `j` of `v` is 1, for `j < effective`; allocated planes at or
/// above `effective` read 0 everywhere. `effective` may overestimate without
/// affecting correctness — it only bounds how many slots element reads scan.
#[derive(Clone, Debug)]
pub(crate) struct BitMatrix {
    pub(crate) planes: Vec<Option<BitVec>>,
    pub(crate) null_plane: Option<BitVec>,
    pub(crate) size: u64,
    pub(crate) effective: usize,
}

impl BitMatrix {
    pub(crate) fn new(rows: usize, nulls: Nulls) -> Self {
        Self {
            planes: vec![None; rows],
            null_plane: match nulls {
                Nulls::Off => None,
                Nulls::On => Some(BitVec::new()),
            },
            size: 0,
            effective: 0,
        }
    }

    pub(crate) fn rows(&self) -> usize {
        self.planes.len()
    }

    #[inline]
    pub(crate) fn plane(&self, j: usize) -> Option<&BitVec> {
        self.planes.get(j).and_then(Option::as_ref)
    }

    /// Plane slot `j`, allocated on first touch.
    #[inline]
    pub(crate) fn plane_mut(&mut self, j: usize) -> &mut BitVec {
        debug_assert!(j < self.planes.len());
        self.planes[j].get_or_insert_with(BitVec::new)
    }

    /// Raise the effective plane bound to cover `slots` planes.
    #[inline]
    pub(crate) fn cover(&mut self, slots: usize) {
        if slots > self.effective {
            self.effective = slots;
        }
    }

    /// Recompute `effective` from the allocated planes (decode paths).
    pub(crate) fn recompute_effective(&mut self) {
        self.effective = self
            .planes
            .iter()
            .rposition(|p| p.as_ref().is_some_and(BitVec::any))
            .map_or(0, |j| j + 1);
    }

    /// Write the low `slots` bits of `bits` at index `idx` across planes,
    /// clearing the remaining planes up to `effective`.
    pub(crate) fn set_bits(&mut self, idx: u64, bits: u64, slots: usize) {
        debug_assert!(slots <= self.planes.len());
        for j in slots..self.effective {
            if let Some(p) = &mut self.planes[j] {
                p.clear(idx);
            }
        }
        for j in 0..slots {
            if (bits >> j) & 1 == 1 {
                self.plane_mut(j).set(idx);
            } else if let Some(p) = &mut self.planes[j] {
                p.clear(idx);
            }
        }
        self.cover(slots);
    }

    /// Read up to `slots` plane bits at `idx` as an accumulator word,
    /// stepping the planes in groups of four so runs of unallocated slots
    /// cost one probe instead of four.
    pub(crate) fn get_bits(&self, idx: u64, slots: usize) -> u64 {
        let bound = slots.min(self.effective);
        let mut acc = 0u64;
        let mut j = 0;
        while j < bound {
            let hi = (j + 4).min(bound);
            if self.planes[j..hi].iter().any(Option::is_some) {
                for (k, slot) in self.planes[j..hi].iter().enumerate() {
                    if let Some(p) = slot {
                        if p.test(idx) {
                            acc |= 1u64 << (j + k);
                        }
                    }
                }
            }
            j = hi;
        }
        acc
    }

    /// Shift every plane (and the NULL plane) up by one at `idx`.
    pub(crate) fn insert_gap(&mut self, idx: u64) {
        for slot in self.planes.iter_mut().flatten() {
            slot.insert(idx, false);
        }
        if let Some(np) = &mut self.null_plane {
            np.insert(idx, false);
        }
    }

    /// Shift every plane (and the NULL plane) down by one at `idx`.
    pub(crate) fn erase_at(&mut self, idx: u64) {
        for slot in self.planes.iter_mut().flatten() {
            slot.erase(idx);
        }
        if let Some(np) = &mut self.null_plane {
            np.erase(idx);
        }
    }

    /// Zero every value plane over the closed range.
    pub(crate) fn clear_planes_range(&mut self, from: u64, to: u64) {
        for slot in self.planes.iter_mut().flatten() {
            slot.clear_range(from, to);
        }
    }

    pub(crate) fn is_nullable(&self) -> bool {
        self.null_plane.is_some()
    }

    /// Collapse uniform blocks and free planes that lost their last bit.
    pub(crate) fn optimize(&mut self) {
        for slot in self.planes.iter_mut() {
            if let Some(p) = slot {
                p.optimize();
                if !p.any() {
                    *slot = None;
                }
            }
        }
        if let Some(np) = &mut self.null_plane {
            np.optimize();
        }
        self.recompute_effective();
    }
}
