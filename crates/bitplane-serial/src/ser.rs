use bitplane_bv::{serial as plane_codec, BitVec};
use bitplane_vec::{PlaneAccess, StrVector};

use crate::{ByteOrder, FormatError, SerialLayout};

/// Per-plane blob prefix: plain plane stream follows.
pub(crate) const PLANE_PLAIN: u8 = 0;
/// Per-plane blob prefix: a u32 reference plane index follows, and the
/// stream holds the XOR delta against that plane.
pub(crate) const PLANE_XOR: u8 = 1;

pub(crate) const REMAP_PRESENT: u8 = b'R';
pub(crate) const REMAP_ABSENT: u8 = b'N';
pub(crate) const REMAP_END: u8 = b'E';

/// Serializer for plane-structured vectors.
///
/// The byte order is an explicit construction parameter; only
/// [`ByteOrder::Little`] streams can be produced.
pub struct VectorSerializer {
    byte_order: ByteOrder,
    xor_ref: bool,
}

impl VectorSerializer {
    pub fn new(byte_order: ByteOrder) -> Self {
        Self {
            byte_order,
            xor_ref: false,
        }
    }

    /// Enable XOR-reference plane compression. Purely a placement
    /// heuristic: each blob records its own reference plane, so decoders
    /// never re-derive the choice.
    pub fn set_xor_ref(&mut self, on: bool) -> &mut Self {
        self.xor_ref = on;
        self
    }

    /// Serialize `sv` into `layout`, replacing its contents.
    pub fn serialize(
        &self,
        sv: &impl PlaneAccess,
        layout: &mut SerialLayout,
    ) -> Result<(), FormatError> {
        if self.byte_order != ByteOrder::Little {
            return Err(FormatError::UnsupportedByteOrder(self.byte_order.tag()));
        }
        let n = sv.plane_count();
        let buf = &mut layout.buf;
        buf.clear();
        layout.spans = vec![None; n];

        buf.push(b'B');
        buf.push(if sv.rank_compressed() { b'C' } else { b'M' });
        buf.push(self.byte_order.tag());
        buf.push(0); // large-matrix form
        buf.push(2); // 64-bit addressed
        buf.extend_from_slice(&(n as u64).to_le_bytes());
        buf.extend_from_slice(&sv.size().to_le_bytes());
        let offsets_at = buf.len();
        buf.resize(buf.len() + n * 8, 0);
        buf.extend_from_slice(&[0u8; 4]); // reserved

        // Blobs land in decode order, highest plane first; the offset
        // directory makes the order immaterial to readers.
        let value_slots = n - usize::from(sv.is_nullable());
        for j in (0..n).rev() {
            let Some(p) = sv.plane(j) else { continue };
            if !p.any() {
                continue;
            }
            let start = buf.len();
            match self.pick_reference(sv, j, value_slots, p) {
                Some((r, delta)) => {
                    log::debug!("plane {j}: xor delta against plane {r}");
                    buf.push(PLANE_XOR);
                    buf.extend_from_slice(&(r as u32).to_le_bytes());
                    plane_codec::serialize_into(&delta, buf);
                }
                None => {
                    buf.push(PLANE_PLAIN);
                    plane_codec::serialize_into(p, buf);
                }
            }
            let end = buf.len();
            buf[offsets_at + j * 8..offsets_at + j * 8 + 8]
                .copy_from_slice(&(start as u64).to_le_bytes());
            layout.spans[j] = Some(start..end);
        }
        Ok(())
    }

    /// Serialize a string vector: the plane stream followed by the remap
    /// sub-block.
    pub fn serialize_str(
        &self,
        sv: &StrVector,
        layout: &mut SerialLayout,
    ) -> Result<(), FormatError> {
        self.serialize(sv, layout)?;
        let buf = &mut layout.buf;
        match sv.remap_table() {
            Some(table) => {
                let bytes = table.to_bytes();
                buf.push(REMAP_PRESENT);
                buf.extend_from_slice(&(bytes.len() as u64).to_le_bytes());
                buf.extend_from_slice(&bytes);
                buf.push(REMAP_END);
            }
            None => buf.push(REMAP_ABSENT),
        }
        Ok(())
    }

    /// Best XOR reference for plane `j`, if any pays off. Only
    /// higher-index value planes are candidates, so a decoder walking
    /// last-to-first always has the reference at hand, and the NULL plane
    /// never mixes coordinate spaces with a payload plane.
    fn pick_reference(
        &self,
        sv: &impl PlaneAccess,
        j: usize,
        value_slots: usize,
        p: &BitVec,
    ) -> Option<(usize, BitVec)> {
        if !self.xor_ref || j + 1 >= value_slots {
            return None;
        }
        let own = p.count();
        let mut best: Option<(usize, BitVec, u64)> = None;
        for r in j + 1..value_slots {
            let Some(rp) = sv.plane(r) else { continue };
            if !rp.any() {
                continue;
            }
            let mut delta = p.clone();
            delta.xor_with(rp);
            let cost = delta.count();
            if best.as_ref().map_or(true, |(_, _, c)| cost < *c) {
                best = Some((r, delta, cost));
            }
        }
        // Worth it only when the delta is substantially sparser.
        best.filter(|(_, _, c)| c * 2 < own)
            .map(|(r, delta, _)| (r, delta))
    }
}
