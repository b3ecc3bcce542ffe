use bitplane_bv::{serial as plane_codec, BitVec};

use crate::ByteOrder;

/// Deserialization went through cleanly.
pub const COLL_OK: i32 = 0;
/// Header magic or byte order unreadable.
pub const COLL_ERR_HEADER: i32 = -1;
/// The address bit-vector failed to decode.
pub const COLL_ERR_ADDRESS: i32 = -2;
/// Buffer count disagrees with the address vector's cardinality.
pub const COLL_ERR_COUNT: i32 = -3;
/// Length list or buffer payload truncated.
pub const COLL_ERR_TRUNCATED: i32 = -4;

/// Sparse collection of byte buffers addressed by a bit-vector.
///
/// Wire form: `'B','C'`, byte-order tag, the serialized address vector,
/// a 64-bit buffer count, that many 64-bit length prefixes, then the raw
/// buffers concatenated in address order. Unlike the vector codec this
/// deserializer reports structural problems through a status code rather
/// than an error type; callers treat any negative result as corruption.
#[derive(Default)]
pub struct BufferCollection {
    addr: BitVec,
    buffers: Vec<Vec<u8>>,
}

impl BufferCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Install `buf` at slot `key`, replacing any existing buffer.
    pub fn set(&mut self, key: u64, buf: Vec<u8>) {
        let rank = self.addr.rank(key) as usize;
        if self.addr.test(key) {
            self.buffers[rank - 1] = buf;
        } else {
            self.buffers.insert(rank, buf);
            self.addr.set(key);
        }
    }

    pub fn get(&self, key: u64) -> Option<&[u8]> {
        if !self.addr.test(key) {
            return None;
        }
        let rank = self.addr.rank(key) as usize;
        Some(&self.buffers[rank - 1])
    }

    pub fn keys(&self) -> impl Iterator<Item = u64> + '_ {
        self.addr.ones()
    }

    pub fn serialize(&self, byte_order: ByteOrder) -> Vec<u8> {
        let mut out = vec![b'B', b'C', byte_order.tag()];
        plane_codec::serialize_into(&self.addr, &mut out);
        out.extend_from_slice(&(self.buffers.len() as u64).to_le_bytes());
        for b in &self.buffers {
            out.extend_from_slice(&(b.len() as u64).to_le_bytes());
        }
        for b in &self.buffers {
            out.extend_from_slice(b);
        }
        out
    }

    /// Replace contents from a serialized stream. Returns [`COLL_OK`] or a
    /// negative status code.
    pub fn deserialize(&mut self, buf: &[u8]) -> i32 {
        if buf.len() < 3 || buf[0] != b'B' || buf[1] != b'C' || buf[2] != 1 {
            return COLL_ERR_HEADER;
        }
        let mut pos = 3usize;
        let (addr, used) = match plane_codec::deserialize(&buf[pos..]) {
            Ok(ok) => ok,
            Err(_) => return COLL_ERR_ADDRESS,
        };
        pos += used;
        let Some(count) = read_u64(buf, &mut pos) else {
            return COLL_ERR_TRUNCATED;
        };
        if count != addr.count() {
            return COLL_ERR_COUNT;
        }
        let mut lengths = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let Some(len) = read_u64(buf, &mut pos) else {
                return COLL_ERR_TRUNCATED;
            };
            lengths.push(len as usize);
        }
        let mut buffers = Vec::with_capacity(count as usize);
        for len in lengths {
            // The length prefix is untrusted; an unchecked add would wrap.
            let Some(end) = pos.checked_add(len) else {
                return COLL_ERR_TRUNCATED;
            };
            if end > buf.len() {
                return COLL_ERR_TRUNCATED;
            }
            buffers.push(buf[pos..end].to_vec());
            pos = end;
        }
        self.addr = addr;
        self.buffers = buffers;
        COLL_OK
    }
}

fn read_u64(buf: &[u8], pos: &mut usize) -> Option<u64> {
    let end = pos.checked_add(8)?;
    if end > buf.len() {
        return None;
    }
    let v = u64::from_le_bytes(buf[*pos..end].try_into().ok()?);
    *pos = end;
    Some(v)
}
