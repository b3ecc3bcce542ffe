use std::ops::Range;

/// Owned serialization buffer plus per-plane spans for introspection.
///
/// The spans index into the single contiguous buffer; they are positions,
/// not independent allocations, and move with the layout.
#[derive(Default)]
pub struct SerialLayout {
    pub(crate) buf: Vec<u8>,
    pub(crate) spans: Vec<Option<Range<usize>>>,
}

impl SerialLayout {
    pub fn new() -> Self {
        Self::default()
    }

    /// The complete serialized stream.
    pub fn data(&self) -> &[u8] {
        &self.buf
    }

    pub fn size_in_bytes(&self) -> usize {
        self.buf.len()
    }

    /// Serialized blob of plane `j`, when that plane was populated.
    pub fn plane_blob(&self, j: usize) -> Option<&[u8]> {
        self.spans.get(j)?.as_ref().map(|r| &self.buf[r.clone()])
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}
