use bitplane_bv::BitVec;
use bitplane_vec::{NullPolicy, PlaneAccess};

use crate::presence_of;

fn value_slots(sv: &impl PlaneAccess) -> usize {
    sv.plane_count() - usize::from(sv.is_nullable())
}

/// Smallest index where two vectors differ, or `None` when equal.
///
/// Differing NULL status takes priority over differing values under
/// [`NullPolicy::UseNull`]. The result is symmetric in its arguments. For
/// rank-compressed vectors a value-plane mismatch is found in physical
/// coordinates and translated through the presence plane of whichever side
/// actually carries the differing bit.
pub fn find_first_mismatch(
    a: &impl PlaneAccess,
    b: &impl PlaneAccess,
    policy: NullPolicy,
) -> Option<u64> {
    debug_assert_eq!(
        a.rank_compressed(),
        b.rank_compressed(),
        "mismatch search needs both vectors in the same coordinate space"
    );
    let pa = presence_of(a);
    let pb = presence_of(b);
    if policy == NullPolicy::UseNull {
        // Presence planes live in logical coordinates for every kind.
        if let Some(pos) = pa.find_first_mismatch(&pb) {
            return Some(pos);
        }
    }
    let slots = value_slots(a).max(value_slots(b));
    let mut best: Option<(u64, bool)> = None;
    for j in 0..slots {
        let hit = match (a.plane(j), b.plane(j)) {
            (None, None) => None,
            (Some(x), Some(y)) => x.find_first_mismatch(y).map(|p| (p, x.test(p))),
            (Some(x), None) => x.find_first().map(|p| (p, true)),
            (None, Some(y)) => y.find_first().map(|p| (p, false)),
        };
        if let Some((pos, on_a)) = hit {
            if best.map_or(true, |(b0, _)| pos < b0) {
                best = Some((pos, on_a));
            }
        }
    }
    if let Some((pos, on_a)) = best {
        if a.rank_compressed() {
            let presence = if on_a { &pa } else { &pb };
            return presence.select(pos + 1);
        }
        return Some(pos);
    }
    if !a.rank_compressed() && a.size() != b.size() {
        return Some(a.size().min(b.size()));
    }
    None
}

/// Full mismatch bitmap: XOR of every corresponding plane pair OR-ed
/// together, with the shorter vector treated as all-mismatching beyond its
/// own length, then NULL-corrected per `policy` (intersect with both
/// present sets, or OR in the presence symmetric difference).
pub fn find_mismatch(
    out: &mut BitVec,
    a: &impl PlaneAccess,
    b: &impl PlaneAccess,
    policy: NullPolicy,
) {
    debug_assert!(!a.rank_compressed() && !b.rank_compressed());
    let mut acc = BitVec::new();
    let slots = value_slots(a).max(value_slots(b));
    for j in 0..slots {
        match (a.plane(j), b.plane(j)) {
            (None, None) => {}
            (Some(x), Some(y)) => {
                let mut d = x.clone();
                d.xor_with(y);
                acc.or_with(&d);
            }
            (Some(x), None) | (None, Some(x)) => acc.or_with(x),
        }
    }
    let lo = a.size().min(b.size());
    let hi = a.size().max(b.size());
    if lo != hi {
        acc.set_range(lo, hi - 1);
    }
    let pa = presence_of(a);
    let pb = presence_of(b);
    match policy {
        NullPolicy::NoNull => {
            let mut both = pa;
            both.and_with(&pb);
            acc.and_with(&both);
        }
        NullPolicy::UseNull => {
            let mut diff = pa;
            diff.xor_with(&pb);
            acc.or_with(&diff);
        }
    }
    *out = acc;
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitplane_vec::{Nulls, RscVector, SparseVector};
    use pretty_assertions::assert_eq;

    fn sv(data: &[u32]) -> SparseVector<u32> {
        let mut v = SparseVector::new(Nulls::Off);
        v.import(data, 0, false).unwrap();
        v
    }

    #[test]
    fn equal_vectors_have_no_mismatch() {
        let a = sv(&[1, 2, 3]);
        let b = sv(&[1, 2, 3]);
        assert_eq!(find_first_mismatch(&a, &b, NullPolicy::UseNull), None);
        let mut bm = BitVec::new();
        find_mismatch(&mut bm, &a, &b, NullPolicy::UseNull);
        assert!(!bm.any());
    }

    #[test]
    fn first_mismatch_is_symmetric_and_minimal() {
        let a = sv(&[1, 2, 3, 9, 5]);
        let b = sv(&[1, 2, 4, 9, 6]);
        let ab = find_first_mismatch(&a, &b, NullPolicy::UseNull);
        let ba = find_first_mismatch(&b, &a, NullPolicy::UseNull);
        assert_eq!(ab, Some(2));
        assert_eq!(ab, ba);
        let mut bm = BitVec::new();
        find_mismatch(&mut bm, &a, &b, NullPolicy::UseNull);
        assert_eq!(bm.find_first(), ab);
        assert_eq!(bm.ones().collect::<Vec<_>>(), vec![2, 4]);
    }

    #[test]
    fn null_status_difference_takes_priority() {
        let mut a = SparseVector::<u32>::new(Nulls::On);
        a.import(&[7, 7, 7], 0, true).unwrap();
        let mut b = a.clone();
        b.clear_value(1, true);
        b.set(1, 7);
        // Same stored bits, same presence again.
        assert_eq!(find_first_mismatch(&a, &b, NullPolicy::UseNull), None);
        b.clear_value(1, true);
        assert_eq!(find_first_mismatch(&a, &b, NullPolicy::UseNull), Some(1));
        assert_eq!(find_first_mismatch(&a, &b, NullPolicy::NoNull), None);
    }

    #[test]
    fn size_difference_mismatches_past_the_shorter() {
        let a = sv(&[1, 2]);
        let b = sv(&[1, 2, 0, 0]);
        assert_eq!(find_first_mismatch(&a, &b, NullPolicy::UseNull), Some(2));
        let mut bm = BitVec::new();
        find_mismatch(&mut bm, &a, &b, NullPolicy::UseNull);
        assert_eq!(bm.ones().collect::<Vec<_>>(), vec![2, 3]);
    }

    #[test]
    fn rank_compressed_mismatch_is_logical() {
        let mut a = RscVector::<u32>::new();
        a.push_back(3, 10).unwrap();
        a.push_back(8, 20).unwrap();
        let mut b = a.clone();
        b.set(8, 21);
        assert_eq!(find_first_mismatch(&a, &b, NullPolicy::UseNull), Some(8));
        assert_eq!(find_first_mismatch(&b, &a, NullPolicy::UseNull), Some(8));
        let mut c = a.clone();
        c.set_null(3);
        assert_eq!(
            find_first_mismatch(&a, &c, NullPolicy::UseNull),
            Some(3),
            "presence difference wins"
        );
    }
}
