#![forbid(unsafe_code)]

//! Plane-algebra search over bit-transposed vectors.
//!
//! Equality search never decodes values: the query's 1-bits select an
//! AND-group of planes and its 0-bits a SUB-group, and the combined
//! AND-then-SUB aggregation yields exactly the matching index set. The
//! same algebra drives zero/nonzero scans, multi-octet string search, and
//! vector mismatch detection.
//!
//! [`Scanner`] is cheap to construct and stateless for the numeric paths;
//! [`Scanner::bind`] caches per-block string samples for repeated binary
//! searches over one sorted [`StrVector`], and any mutation of the bound
//! vector invalidates that cache.

mod mismatch;
mod str_scan;
mod transform;

pub use mismatch::{find_first_mismatch, find_mismatch};
pub use transform::SetTransform;

use bitplane_bv::BitVec;
use bitplane_vec::{CodeValue, PlaneAccess};

/// Plane-level search engine.
#[derive(Default)]
pub struct Scanner {
    pub(crate) bound: Option<str_scan::BoundCache>,
}

/// Presence set of a vector in its own plane coordinates: the NULL plane
/// when there is one, else the full `[0, size)` range.
pub(crate) fn presence_of(sv: &impl PlaneAccess) -> BitVec {
    if let Some(np) = sv.null_slot().and_then(|s| sv.plane(s)) {
        return np.clone();
    }
    let mut full = BitVec::new();
    if sv.size() > 0 {
        full.set_range(0, sv.size() - 1);
    }
    full
}

/// OR of every value plane: the "has any bit" set.
fn any_plane(sv: &impl PlaneAccess) -> BitVec {
    let value_slots = sv.plane_count() - usize::from(sv.is_nullable());
    let mut acc = BitVec::new();
    for j in 0..value_slots {
        if let Some(p) = sv.plane(j) {
            acc.or_with(p);
        }
    }
    acc
}

/// AND-SUB aggregation for a nonzero bit pattern, in the vector's own plane
/// coordinates. `None` when a required plane is empty, which proves the
/// match set empty without touching any bitmap.
fn eq_planes(sv: &impl PlaneAccess, bits: u64) -> Option<BitVec> {
    debug_assert!(bits != 0);
    let value_slots = (sv.plane_count() - usize::from(sv.is_nullable())).min(64);
    if bits & !sv.plane_mask() != 0 {
        return None;
    }
    let mut acc: Option<BitVec> = None;
    for j in 0..value_slots {
        if (bits >> j) & 1 == 1 {
            // Guaranteed allocated by the mask check above.
            if let Some(p) = sv.plane(j) {
                match &mut acc {
                    None => acc = Some(p.clone()),
                    Some(a) => a.and_with(p),
                }
            }
        }
    }
    let mut acc = acc?;
    for j in 0..value_slots {
        if (bits >> j) & 1 == 0 {
            if let Some(p) = sv.plane(j) {
                acc.sub_with(p);
            }
        }
    }
    Some(acc)
}

impl Scanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// All indices whose stored value equals `value`. For a rank-compressed
    /// source the plane-level match lands in physical coordinates and is
    /// translated back through the presence plane.
    pub fn find_eq<V: CodeValue>(&self, sv: &impl PlaneAccess, value: V, out: &mut BitVec) {
        let bits = value.to_u64();
        if bits == 0 {
            self.find_zero(sv, out);
            return;
        }
        let Some(mut acc) = eq_planes(sv, bits) else {
            *out = BitVec::new();
            return;
        };
        if sv.rank_compressed() {
            acc = acc.decompress(&presence_of(sv));
        }
        *out = acc;
    }

    /// First index whose stored value equals `value`.
    pub fn find_eq_first<V: CodeValue>(&self, sv: &impl PlaneAccess, value: V) -> Option<u64> {
        let bits = value.to_u64();
        if bits == 0 {
            let mut out = BitVec::new();
            self.find_zero(sv, &mut out);
            return out.find_first();
        }
        let acc = eq_planes(sv, bits)?;
        let first = acc.find_first()?;
        if sv.rank_compressed() {
            // Physical rank back to its logical index.
            presence_of(sv).select(first + 1)
        } else {
            Some(first)
        }
    }

    /// Indices holding a zero value, restricted to assigned positions.
    pub fn find_zero(&self, sv: &impl PlaneAccess, out: &mut BitVec) {
        let any = any_plane(sv);
        let mut zero = BitVec::new();
        if sv.size() > 0 {
            zero.set_range(0, sv.size() - 1);
        }
        zero.sub_with(&any);
        if sv.rank_compressed() {
            *out = zero.decompress(&presence_of(sv));
        } else {
            if sv.is_nullable() {
                zero.and_with(&presence_of(sv));
            }
            *out = zero;
        }
    }

    /// Indices holding any nonzero value.
    pub fn find_nonzero(&self, sv: &impl PlaneAccess, out: &mut BitVec) {
        let acc = any_plane(sv);
        if sv.rank_compressed() {
            *out = acc.decompress(&presence_of(sv));
        } else {
            *out = acc;
        }
    }

    /// Complement `bv` within the vector's valid index set, so positions
    /// past the logical end (or unassigned ones) are never reported.
    pub fn invert_result(&self, sv: &impl PlaneAccess, bv: &mut BitVec) {
        let mut valid = if sv.rank_compressed() || sv.is_nullable() {
            presence_of(sv)
        } else {
            let mut full = BitVec::new();
            if sv.size() > 0 {
                full.set_range(0, sv.size() - 1);
            }
            full
        };
        valid.sub_with(bv);
        *bv = valid;
    }
}
