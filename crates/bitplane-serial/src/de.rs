use bitplane_bv::{serial as plane_codec, BitVec, PlaneCodecError};
use bitplane_vec::{PlaneStore, RemapTable, StrVector};

use crate::ser::{PLANE_PLAIN, PLANE_XOR, REMAP_ABSENT, REMAP_END, REMAP_PRESENT};
use crate::FormatError;

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn at(buf: &'a [u8], pos: usize) -> Self {
        Self { buf, pos }
    }

    fn take(&mut self, n: usize, context: &'static str) -> Result<&'a [u8], FormatError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&e| e <= self.buf.len())
            .ok_or(FormatError::Truncated { context })?;
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn read_u8(&mut self, context: &'static str) -> Result<u8, FormatError> {
        Ok(self.take(1, context)?[0])
    }

    fn read_u32(&mut self, context: &'static str) -> Result<u32, FormatError> {
        let b = self.take(4, context)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_u64(&mut self, context: &'static str) -> Result<u64, FormatError> {
        let b = self.take(8, context)?;
        Ok(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }
}

struct Header {
    rank_compressed: bool,
    planes: usize,
    size: u64,
    offsets: Vec<u64>,
    /// Byte length of the header including the offset directory and the
    /// reserved word.
    len: usize,
}

fn parse_header(buf: &[u8], capacity: usize) -> Result<Header, FormatError> {
    let mut r = Reader::new(buf);
    let m0 = r.read_u8("magic")?;
    let m1 = r.read_u8("magic")?;
    let rank_compressed = match (m0, m1) {
        (b'B', b'M') => false,
        (b'B', b'C') => true,
        _ => return Err(FormatError::BadMagic([m0, m1])),
    };
    let order = r.read_u8("byte order")?;
    if order != 1 {
        return Err(FormatError::UnsupportedByteOrder(order));
    }
    let legacy = r.read_u8("plane count")?;
    let (planes, wide) = if legacy != 0 {
        // Legacy form: count in one byte, 32-bit addressed offsets.
        (legacy as u64, false)
    } else {
        match r.read_u8("matrix version")? {
            1 => (r.read_u64("plane count")?, false),
            2 => (r.read_u64("plane count")?, true),
            v => return Err(FormatError::UnsupportedVersion(v)),
        }
    };
    if planes > capacity as u64 {
        return Err(FormatError::InvalidBitDepth {
            declared: planes,
            capacity,
        });
    }
    let size = r.read_u64("size")?;
    let mut offsets = Vec::with_capacity(planes as usize);
    for _ in 0..planes {
        offsets.push(if wide {
            r.read_u64("plane offset")?
        } else {
            r.read_u32("plane offset")? as u64
        });
    }
    r.take(4, "reserved")?;
    Ok(Header {
        rank_compressed,
        planes: planes as usize,
        size,
        offsets,
        len: r.pos,
    })
}

/// Decode one blob that must not be an XOR delta (used for the NULL plane
/// ahead of any range decision).
fn decode_plain_blob(buf: &[u8], off: u64) -> Result<BitVec, FormatError> {
    let mut r = Reader::at(buf, off as usize);
    match r.read_u8("plane flag")? {
        PLANE_PLAIN => {}
        f => return Err(PlaneCodecError::BadTag(f).into()),
    }
    let (bv, _) = plane_codec::deserialize(&buf[r.pos..])?;
    Ok(bv)
}

/// Decode every plane blob, highest slot first so XOR references, which
/// only point upward, are always resolved. Returns the planes and the end
/// offset of the blob region.
fn decode_planes(
    buf: &[u8],
    header: &Header,
    range: Option<(u64, u64)>,
    skip_top: bool,
) -> Result<(Vec<Option<BitVec>>, usize), FormatError> {
    let mut decoded: Vec<Option<BitVec>> = vec![None; header.planes];
    let mut end = header.len;
    for j in (0..header.planes).rev() {
        if skip_top && j + 1 == header.planes {
            continue;
        }
        let off = header.offsets[j];
        if off == 0 {
            continue;
        }
        let mut r = Reader::at(buf, off as usize);
        let reference = match r.read_u8("plane flag")? {
            PLANE_PLAIN => None,
            PLANE_XOR => Some(r.read_u32("reference plane")? as usize),
            f => return Err(PlaneCodecError::BadTag(f).into()),
        };
        let (mut bv, used) = match range {
            Some((f, t)) => plane_codec::deserialize_range(&buf[r.pos..], f, t)?,
            None => plane_codec::deserialize(&buf[r.pos..])?,
        };
        if let Some(ri) = reference {
            match decoded.get(ri).and_then(Option::as_ref) {
                Some(rp) if ri > j => bv.xor_with(rp),
                _ => {
                    return Err(FormatError::BadReference {
                        plane: j,
                        reference: ri,
                    })
                }
            }
        }
        end = end.max(r.pos + used);
        decoded[j] = Some(bv);
    }
    Ok((decoded, end))
}

fn shift_down(bv: &BitVec, by: u64) -> BitVec {
    let ones: Vec<u64> = bv.ones().map(|p| p - by).collect();
    let mut out = BitVec::new();
    out.set_sorted(&ones);
    out
}

/// Restrict `bv` to the closed range `[from, to]`.
fn keep_range(bv: &mut BitVec, from: u64, to: u64) {
    if from > 0 {
        bv.clear_range(0, from - 1);
    }
    if let Some(last) = bv.find_last() {
        if last > to {
            bv.clear_range(to + 1, last);
        }
    }
}

fn full_range(size: u64) -> BitVec {
    let mut bv = BitVec::new();
    if size > 0 {
        bv.set_range(0, size - 1);
    }
    bv
}

fn install<T: PlaneStore>(
    sv: &mut T,
    mut decoded: Vec<Option<BitVec>>,
    fallback_presence: Option<BitVec>,
) {
    let n = sv.plane_count();
    for j in 0..n {
        let slot = decoded.get_mut(j).and_then(Option::take);
        match slot {
            Some(p) => sv.install_plane(j, p),
            None if sv.null_slot() == Some(j) => {
                sv.install_plane(j, fallback_presence.clone().unwrap_or_default());
            }
            None => sv.free_plane(j),
        }
    }
}

/// Deserializer for the plane-directory format.
#[derive(Default)]
pub struct VectorDeserializer;

impl VectorDeserializer {
    pub fn new() -> Self {
        Self
    }

    fn header_for<T: PlaneStore>(&self, sv: &T, buf: &[u8]) -> Result<Header, FormatError> {
        let header = parse_header(buf, sv.plane_count())?;
        if header.rank_compressed != sv.rank_compressed() {
            return Err(FormatError::BadMagic([buf[0], buf[1]]));
        }
        Ok(header)
    }

    /// True when the stream carries the target's NULL plane at its top
    /// slot. A shorter stream came from a non-NULL-able source, which is
    /// by definition fully populated.
    fn stream_has_null<T: PlaneStore>(sv: &T, header: &Header) -> bool {
        sv.is_nullable() && header.planes == sv.plane_count()
    }

    /// Full reconstruction of a serialized vector.
    pub fn deserialize<T: PlaneStore>(&self, sv: &mut T, buf: &[u8]) -> Result<(), FormatError> {
        let header = self.header_for(sv, buf)?;
        let (decoded, _) = decode_planes(buf, &header, None, false)?;
        let fallback = if Self::stream_has_null(sv, &header) {
            None // top slot was decoded (or is genuinely empty)
        } else {
            Some(full_range(header.size))
        };
        install(sv, decoded, fallback);
        sv.set_size(header.size);
        sv.finalize();
        Ok(())
    }

    /// Reconstruct only the logical window `[from, to]`; everything
    /// outside decodes as absent/zero without being materialized.
    pub fn deserialize_range<T: PlaneStore>(
        &self,
        sv: &mut T,
        buf: &[u8],
        from: u64,
        to: u64,
    ) -> Result<(), FormatError> {
        let (from, to) = if from <= to { (from, to) } else { (to, from) };
        let header = self.header_for(sv, buf)?;
        let has_null = Self::stream_has_null(sv, &header);
        let presence = if has_null {
            let off = header.offsets[header.planes - 1];
            if off != 0 {
                Some(decode_plain_blob(buf, off)?)
            } else {
                Some(BitVec::new())
            }
        } else {
            None
        };
        if sv.rank_compressed() {
            let mut presence = presence.unwrap_or_default();
            // Logical extent of the whole stream, before the window cuts
            // the presence plane down.
            let extent = presence.find_last().map_or(0, |p| p + 1);
            // Re-resolve the logical window into the physical payload
            // range before touching any value plane.
            let pcnt = presence.count_range(from, to);
            let pfrom = if from == 0 {
                0
            } else {
                presence.count_range(0, from - 1)
            };
            let mut decoded = if pcnt == 0 {
                vec![None; header.planes]
            } else {
                let (mut d, _) =
                    decode_planes(buf, &header, Some((pfrom, pfrom + pcnt - 1)), true)?;
                if pfrom > 0 {
                    for slot in d.iter_mut() {
                        if let Some(p) = slot {
                            *p = shift_down(p, pfrom);
                        }
                    }
                }
                d
            };
            keep_range(&mut presence, from, to);
            decoded[header.planes - 1] = Some(presence);
            install(sv, decoded, None);
            sv.set_size(pcnt);
            sv.finalize();
            sv.set_logical_extent(extent);
        } else {
            let (mut decoded, _) = decode_planes(buf, &header, Some((from, to)), has_null)?;
            let fallback = if has_null {
                let mut p = presence.unwrap_or_default();
                keep_range(&mut p, from, to);
                decoded[header.planes - 1] = Some(p);
                None
            } else {
                let mut p = full_range(header.size);
                keep_range(&mut p, from, to);
                Some(p)
            };
            install(sv, decoded, fallback);
            sv.set_size(header.size);
            sv.finalize();
        }
        Ok(())
    }

    /// Reconstruct only the index set of `mask`. Each plane is ANDed
    /// against the mask right after decode; rank-select targets first
    /// compress the mask into physical coordinates.
    pub fn deserialize_masked<T: PlaneStore>(
        &self,
        sv: &mut T,
        buf: &[u8],
        mask: &BitVec,
    ) -> Result<(), FormatError> {
        let header = self.header_for(sv, buf)?;
        let (mut decoded, _) = decode_planes(buf, &header, None, false)?;
        if sv.rank_compressed() {
            let presence = decoded[header.planes - 1].take().unwrap_or_default();
            let extent = presence.find_last().map_or(0, |p| p + 1);
            let mask_phys = mask.compress(&presence);
            for slot in decoded.iter_mut() {
                if let Some(p) = slot {
                    *p = p.compress(&mask_phys);
                }
            }
            let mut presence = presence;
            presence.and_with(mask);
            decoded[header.planes - 1] = Some(presence);
            install(sv, decoded, None);
            sv.set_size(mask_phys.count());
            sv.finalize();
            sv.set_logical_extent(extent);
        } else {
            for slot in decoded.iter_mut().flatten() {
                slot.and_with(mask);
            }
            let fallback = if Self::stream_has_null(sv, &header) {
                None
            } else {
                let mut p = full_range(header.size);
                p.and_with(mask);
                Some(p)
            };
            install(sv, decoded, fallback);
            sv.set_size(header.size);
            sv.finalize();
        }
        Ok(())
    }

    /// Full reconstruction of a string vector including its remap
    /// sub-block.
    pub fn deserialize_str(&self, sv: &mut StrVector, buf: &[u8]) -> Result<(), FormatError> {
        let header = self.header_for(sv, buf)?;
        let (decoded, body_end) = decode_planes(buf, &header, None, false)?;
        let fallback = if Self::stream_has_null(sv, &header) {
            None
        } else {
            Some(full_range(header.size))
        };
        install(sv, decoded, fallback);
        sv.set_size(header.size);
        let mut r = Reader::at(buf, body_end);
        match r.read_u8("remap marker")? {
            REMAP_ABSENT => {}
            REMAP_PRESENT => {
                let len = r.read_u64("remap table size")? as usize;
                let bytes = r.take(len, "remap table")?;
                if r.read_u8("remap end marker")? != REMAP_END {
                    return Err(FormatError::CorruptRemap("missing end marker"));
                }
                let table = RemapTable::from_bytes(bytes)
                    .ok_or(FormatError::CorruptRemap("bad table size"))?;
                sv.install_remap_table(table);
            }
            _ => return Err(FormatError::CorruptRemap("bad marker byte")),
        }
        sv.finalize();
        Ok(())
    }
}
