use bitplane_bv::BitVec;

use crate::{CodeValue, SparseVector};

/// Read-side capability over a vector's raw plane storage.
///
/// Scanning and serialization operate on whole bit-planes rather than on
/// elements, so they get a narrow plane-level surface instead of reaching
/// into container internals. Plane slots are numbered with value planes
/// first; on a NULL-able container the NULL plane occupies the highest
/// slot, `plane_count() - 1`.
pub trait PlaneAccess {
    /// Total plane slots, including the NULL slot when present.
    fn plane_count(&self) -> usize;

    /// Plane at slot `j`, or `None` if that slot holds no bits.
    fn plane(&self, j: usize) -> Option<&BitVec>;

    fn size(&self) -> u64;

    fn is_nullable(&self) -> bool;

    /// True when value planes live in physical (rank) coordinates and the
    /// NULL plane in logical ones, as in [`crate::RscVector`].
    fn rank_compressed(&self) -> bool {
        false
    }

    /// Slot index of the NULL plane, when the container carries one.
    fn null_slot(&self) -> Option<usize> {
        self.is_nullable().then(|| self.plane_count() - 1)
    }

    /// Bitmask of allocated value planes: bit `j` set iff value slot `j`
    /// holds bits. The NULL slot is excluded.
    fn plane_mask(&self) -> u64 {
        let value_slots = self.plane_count() - usize::from(self.is_nullable());
        let mut mask = 0u64;
        for j in 0..value_slots.min(64) {
            if self.plane(j).is_some_and(BitVec::any) {
                mask |= 1u64 << j;
            }
        }
        mask
    }
}

/// Write-side capability used by deserialization to install decoded planes
/// directly, bypassing the element interfaces.
pub trait PlaneStore: PlaneAccess {
    /// Install `plane` at slot `j`, replacing whatever was there.
    fn install_plane(&mut self, j: usize, plane: BitVec);

    /// Drop the plane at slot `j`.
    fn free_plane(&mut self, j: usize);

    fn set_size(&mut self, size: u64);

    /// Restore derived state after a batch of plane installs.
    fn finalize(&mut self);

    /// Override the logical element count after [`finalize`](Self::finalize).
    /// Containers whose size is derived from the NULL plane use this when a
    /// restricted decode must keep the source's full logical extent.
    fn set_logical_extent(&mut self, _size: u64) {}
}

impl<V: CodeValue> PlaneAccess for SparseVector<V> {
    fn plane_count(&self) -> usize {
        self.bmatr.rows() + usize::from(self.bmatr.is_nullable())
    }

    fn plane(&self, j: usize) -> Option<&BitVec> {
        if j < self.bmatr.rows() {
            self.bmatr.plane(j)
        } else {
            self.bmatr.null_plane.as_ref()
        }
    }

    fn size(&self) -> u64 {
        self.bmatr.size
    }

    fn is_nullable(&self) -> bool {
        self.bmatr.is_nullable()
    }
}

impl<V: CodeValue> PlaneStore for SparseVector<V> {
    fn install_plane(&mut self, j: usize, plane: BitVec) {
        if j < self.bmatr.rows() {
            self.bmatr.planes[j] = Some(plane);
        } else {
            debug_assert!(self.bmatr.is_nullable());
            self.bmatr.null_plane = Some(plane);
        }
    }

    fn free_plane(&mut self, j: usize) {
        if j < self.bmatr.rows() {
            self.bmatr.planes[j] = None;
        }
    }

    fn set_size(&mut self, size: u64) {
        self.bmatr.size = size;
    }

    fn finalize(&mut self) {
        self.bmatr.recompute_effective();
    }
}
