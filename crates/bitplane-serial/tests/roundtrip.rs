use bitplane_bv::BitVec;
use bitplane_serial::{ByteOrder, FormatError, SerialLayout, VectorDeserializer, VectorSerializer};
use bitplane_vec::{NullPolicy, Nulls, RscVector, SparseVector, StrVector};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

fn serialize(sv: &impl bitplane_vec::PlaneAccess) -> Vec<u8> {
    let mut layout = SerialLayout::new();
    VectorSerializer::new(ByteOrder::Little)
        .serialize(sv, &mut layout)
        .unwrap();
    layout.into_bytes()
}

#[test]
fn dense_roundtrip_both_null_modes() {
    let mut sv = SparseVector::<u32>::new(Nulls::On);
    sv.import(&[5, 0, 7, 0, 3], 0, true).unwrap();
    sv.clear_value(1, true);
    sv.clear_value(3, true);

    let wire = serialize(&sv);
    assert_eq!(&wire[..2], b"BM".as_slice());
    let mut back = SparseVector::<u32>::new(Nulls::On);
    VectorDeserializer::new().deserialize(&mut back, &wire).unwrap();
    assert!(back.equal(&sv, NullPolicy::UseNull));
    assert!(back.equal(&sv, NullPolicy::NoNull));
    assert_eq!(back.size(), 5);
    assert_eq!(back.get(0), 5);
    assert!(back.is_null(1));
}

#[test]
fn rank_select_roundtrip() {
    let mut rsc = RscVector::<u32>::new();
    rsc.push_back(2, 10).unwrap();
    rsc.push_back(5, 20).unwrap();
    rsc.push_back(9, 30).unwrap();

    let wire = serialize(&rsc);
    assert_eq!(&wire[..2], b"BC".as_slice());
    let mut back = RscVector::<u32>::new();
    VectorDeserializer::new().deserialize(&mut back, &wire).unwrap();
    assert!(back.is_in_sync(), "deserialization leaves the vector synced");
    assert_eq!(back.size(), 10);
    assert_eq!(back.count(), 3);
    assert_eq!(back.get(5), 20);
    assert!(back.is_null(0));
    assert_eq!(back.find_rank(2), Some(5));
}

#[test]
fn masked_deserialize_keeps_even_indices() {
    // 1000 sequential integers, decoded through an even-index mask.
    let data: Vec<u32> = (0..1000u32).collect();
    let mut sv = SparseVector::<u32>::new(Nulls::Off);
    sv.import(&data, 0, false).unwrap();
    let wire = serialize(&sv);

    let mut mask = BitVec::new();
    let evens: Vec<u64> = (0..1000u64).step_by(2).collect();
    mask.set_sorted(&evens);

    let mut back = SparseVector::<u32>::new(Nulls::Off);
    VectorDeserializer::new()
        .deserialize_masked(&mut back, &wire, &mask)
        .unwrap();
    assert_eq!(back.size(), 1000);
    for i in 0..1000u64 {
        if i % 2 == 0 {
            assert_eq!(back.get(i), i as u32, "even index {i}");
        } else {
            assert_eq!(back.get(i), 0, "odd index {i}");
        }
    }
}

#[test]
fn masked_deserialize_rank_select() {
    let mut rsc = RscVector::<u32>::new();
    for i in 0..50u64 {
        rsc.push_back(i * 3, (i + 1) as u32).unwrap();
    }
    let wire = serialize(&rsc);

    let mut mask = BitVec::new();
    mask.set_range(0, 60);
    let mut back = RscVector::<u32>::new();
    VectorDeserializer::new()
        .deserialize_masked(&mut back, &wire, &mask)
        .unwrap();
    assert_eq!(back.size(), rsc.size(), "mask restricts content, not extent");
    for i in 0..150u64 {
        let expect = if i <= 60 { rsc.get(i) } else { 0 };
        assert_eq!(back.get(i), expect, "index {i}");
        if i <= 60 {
            assert_eq!(back.is_null(i), rsc.is_null(i));
        } else {
            assert!(back.is_null(i));
        }
    }
}

#[test]
fn range_deserialize_dense_window() {
    let data: Vec<u32> = (0..500u32).map(|i| i * 3 + 1).collect();
    let mut sv = SparseVector::<u32>::new(Nulls::On);
    sv.import(&data, 0, true).unwrap();
    let wire = serialize(&sv);

    let mut back = SparseVector::<u32>::new(Nulls::On);
    VectorDeserializer::new()
        .deserialize_range(&mut back, &wire, 100, 199)
        .unwrap();
    assert_eq!(back.size(), 500);
    for i in 0..500u64 {
        if (100..=199).contains(&i) {
            assert_eq!(back.get(i), data[i as usize]);
            assert!(!back.is_null(i));
        } else {
            assert_eq!(back.get(i), 0);
            assert!(back.is_null(i));
        }
    }
}

#[test]
fn range_deserialize_rank_select_window() {
    let mut rsc = RscVector::<u32>::new();
    for i in (0..1000u64).step_by(7) {
        rsc.push_back(i, (i + 1) as u32).unwrap();
    }
    let wire = serialize(&rsc);

    let mut back = RscVector::<u32>::new();
    VectorDeserializer::new()
        .deserialize_range(&mut back, &wire, 300, 600)
        .unwrap();
    assert_eq!(back.size(), rsc.size(), "window restricts content, not extent");
    for i in 0..1000u64 {
        if (300..=600).contains(&i) {
            assert_eq!(back.get(i), rsc.get(i), "index {i}");
            assert_eq!(back.is_null(i), rsc.is_null(i));
        } else {
            assert_eq!(back.get(i), 0, "index {i}");
            assert!(back.is_null(i));
        }
    }
}

#[test]
fn xor_reference_is_decoder_transparent() {
    // Correlated planes: values alternate between two bit patterns so
    // adjacent planes carry nearly identical bitmaps.
    let data: Vec<u32> = (0..5000u32).map(|i| if i % 97 == 0 { 0b0111 } else { 0b0011 }).collect();
    let mut sv = SparseVector::<u32>::new(Nulls::Off);
    sv.import(&data, 0, false).unwrap();

    let mut plain = SerialLayout::new();
    VectorSerializer::new(ByteOrder::Little)
        .serialize(&sv, &mut plain)
        .unwrap();
    let mut xored = SerialLayout::new();
    VectorSerializer::new(ByteOrder::Little)
        .set_xor_ref(true)
        .serialize(&sv, &mut xored)
        .unwrap();
    assert!(
        xored.size_in_bytes() < plain.size_in_bytes(),
        "correlated planes should shrink under xor referencing"
    );

    let mut back = SparseVector::<u32>::new(Nulls::Off);
    VectorDeserializer::new()
        .deserialize(&mut back, xored.data())
        .unwrap();
    assert!(back.equal(&sv, NullPolicy::NoNull));
}

#[test]
fn str_vector_roundtrip_with_remap() {
    let mut sv = StrVector::new(Nulls::Off);
    for w in [b"apple".as_slice(), b"banana", b"cherry"] {
        sv.push_back_str(w).unwrap();
    }
    sv.remap_optimize();

    let mut layout = SerialLayout::new();
    VectorSerializer::new(ByteOrder::Little)
        .serialize_str(&sv, &mut layout)
        .unwrap();
    let mut back = StrVector::new(Nulls::Off);
    VectorDeserializer::new()
        .deserialize_str(&mut back, layout.data())
        .unwrap();
    assert!(back.is_remapped());
    assert_eq!(back.size(), 3);
    assert_eq!(back.get_str(0), b"apple");
    assert_eq!(back.get_str(1), b"banana");
    assert_eq!(back.get_str(2), b"cherry");
}

#[test]
fn str_vector_corrupt_remap_block() {
    let mut sv = StrVector::new(Nulls::Off);
    sv.push_back_str(b"ab").unwrap();
    sv.remap_optimize();
    let mut layout = SerialLayout::new();
    VectorSerializer::new(ByteOrder::Little)
        .serialize_str(&sv, &mut layout)
        .unwrap();
    let mut wire = layout.into_bytes();
    let last = wire.len() - 1;
    wire[last] = b'X'; // clobber the end marker
    let mut back = StrVector::new(Nulls::Off);
    assert!(matches!(
        VectorDeserializer::new().deserialize_str(&mut back, &wire),
        Err(FormatError::CorruptRemap(_))
    ));
}

fn read_u64_at(buf: &[u8], at: usize) -> u64 {
    u64::from_le_bytes(buf[at..at + 8].try_into().unwrap())
}

/// Rewrite a current-form stream into the one-byte-count legacy header
/// with 32-bit offsets. The serializer no longer emits this form, but the
/// decoder must keep reading it.
fn to_legacy_header(wire: &[u8]) -> Vec<u8> {
    let planes = read_u64_at(wire, 5) as usize;
    assert!(planes > 0 && planes < 256);
    let old_hdr = 25 + planes * 8;
    let shift = (old_hdr - (16 + planes * 4)) as u64;
    let mut out = Vec::with_capacity(wire.len());
    out.extend_from_slice(&wire[..3]);
    out.push(planes as u8);
    out.extend_from_slice(&wire[13..21]); // size
    for j in 0..planes {
        let off = read_u64_at(wire, 21 + j * 8);
        let off = if off == 0 { 0 } else { off - shift };
        out.extend_from_slice(&(off as u32).to_le_bytes());
    }
    out.extend_from_slice(&[0u8; 4]);
    out.extend_from_slice(&wire[old_hdr..]);
    out
}

/// Rewrite a current-form stream into the 32-bit-addressed version-1
/// large-matrix header.
fn to_v1_header(wire: &[u8]) -> Vec<u8> {
    let planes = read_u64_at(wire, 5) as usize;
    let old_hdr = 25 + planes * 8;
    let shift = (planes * 4) as u64;
    let mut out = Vec::with_capacity(wire.len());
    out.extend_from_slice(&wire[..4]);
    out.push(1); // 32-bit addressed
    out.extend_from_slice(&wire[5..21]); // plane count + size
    for j in 0..planes {
        let off = read_u64_at(wire, 21 + j * 8);
        let off = if off == 0 { 0 } else { off - shift };
        out.extend_from_slice(&(off as u32).to_le_bytes());
    }
    out.extend_from_slice(&[0u8; 4]);
    out.extend_from_slice(&wire[old_hdr..]);
    out
}

#[test]
fn legacy_and_v1_headers_decode() {
    let mut sv = SparseVector::<u32>::new(Nulls::On);
    sv.import(&[5, 0, 7, 0, 3], 0, true).unwrap();
    sv.clear_value(3, true);
    let wire = serialize(&sv);

    for (name, alt) in [
        ("legacy", to_legacy_header(&wire)),
        ("v1", to_v1_header(&wire)),
    ] {
        assert!(alt.len() < wire.len(), "{name} header is narrower");
        let mut back = SparseVector::<u32>::new(Nulls::On);
        VectorDeserializer::new().deserialize(&mut back, &alt).unwrap();
        assert!(back.equal(&sv, NullPolicy::UseNull), "{name} form");
        assert_eq!(back.size(), 5, "{name} form");
    }
}

#[test]
fn header_error_taxonomy() {
    let mut sv = SparseVector::<u32>::new(Nulls::Off);
    sv.push_back(1);
    let wire = serialize(&sv);
    let de = VectorDeserializer::new();

    let mut bad = wire.clone();
    bad[0] = b'X';
    let mut out = SparseVector::<u32>::new(Nulls::Off);
    assert!(matches!(de.deserialize(&mut out, &bad), Err(FormatError::BadMagic(_))));

    let mut big = wire.clone();
    big[2] = 0;
    assert!(matches!(
        de.deserialize(&mut out, &big),
        Err(FormatError::UnsupportedByteOrder(0))
    ));

    let mut vers = wire.clone();
    vers[4] = 9;
    assert!(matches!(
        de.deserialize(&mut out, &vers),
        Err(FormatError::UnsupportedVersion(9))
    ));

    // A 32-plane stream cannot land in a u8 target.
    let mut narrow = SparseVector::<u8>::new(Nulls::Off);
    assert!(matches!(
        de.deserialize(&mut narrow, &wire),
        Err(FormatError::InvalidBitDepth { declared: 32, capacity: 8 })
    ));

    // Kind mismatch: dense stream into a rank-select target.
    let mut rsc = RscVector::<u32>::new();
    assert!(matches!(
        de.deserialize(&mut rsc, &wire),
        Err(FormatError::BadMagic(_))
    ));

    assert!(matches!(
        de.deserialize(&mut out, &wire[..10]),
        Err(FormatError::Truncated { .. })
    ));
}

#[test]
fn deserialize_replaces_previous_content() {
    let mut a = SparseVector::<u32>::new(Nulls::Off);
    a.import(&[1, 2, 3], 0, false).unwrap();
    let wire = serialize(&a);
    let mut b = SparseVector::<u32>::new(Nulls::Off);
    b.import(&[0xFFFF; 50], 0, false).unwrap();
    VectorDeserializer::new().deserialize(&mut b, &wire).unwrap();
    assert!(b.equal(&a, NullPolicy::NoNull));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn dense_roundtrip_property(data in proptest::collection::vec(any::<u32>(), 1..300)) {
        let mut sv = SparseVector::<u32>::new(Nulls::On);
        sv.import(&data, 0, true).unwrap();
        let wire = serialize(&sv);
        let mut back = SparseVector::<u32>::new(Nulls::On);
        VectorDeserializer::new().deserialize(&mut back, &wire).unwrap();
        prop_assert!(back.equal(&sv, NullPolicy::UseNull));
    }

    #[test]
    fn range_subset_property(
        data in proptest::collection::vec(0u32..10_000, 2..300),
        lo_frac in 0.0f64..1.0,
        hi_frac in 0.0f64..1.0,
    ) {
        let mut sv = SparseVector::<u32>::new(Nulls::Off);
        sv.import(&data, 0, false).unwrap();
        let wire = serialize(&sv);
        let n = data.len() as u64;
        let a = ((n as f64) * lo_frac) as u64 % n;
        let b = ((n as f64) * hi_frac) as u64 % n;
        let (from, to) = if a <= b { (a, b) } else { (b, a) };

        let mut full = SparseVector::<u32>::new(Nulls::Off);
        VectorDeserializer::new().deserialize(&mut full, &wire).unwrap();
        let mut window = SparseVector::<u32>::new(Nulls::Off);
        VectorDeserializer::new().deserialize_range(&mut window, &wire, from, to).unwrap();
        for i in 0..n {
            if (from..=to).contains(&i) {
                prop_assert_eq!(window.get(i), full.get(i));
            } else {
                prop_assert_eq!(window.get(i), 0);
            }
        }
    }
}
