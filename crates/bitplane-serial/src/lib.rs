#![forbid(unsafe_code)]

//! Binary codec for bit-transposed vectors.
//!
//! The wire format is a plane directory: a fixed header (magic `BM` for a
//! dense bit-matrix or `BC` for a rank-select payload, a byte-order tag,
//! and a legacy or large-matrix plane count), a 64-bit offset per plane
//! into the buffer, and one self-delimiting plane blob per populated
//! plane. Planes decode last-to-first so the NULL plane, stored at the
//! highest slot, is available before any range or mask decision touches a
//! value plane.
//!
//! Serialization targets anything implementing
//! [`bitplane_vec::PlaneAccess`]; deserialization installs planes through
//! [`bitplane_vec::PlaneStore`].

mod collection;
mod de;
mod layout;
mod ser;

pub use collection::{
    BufferCollection, COLL_ERR_ADDRESS, COLL_ERR_COUNT, COLL_ERR_HEADER, COLL_ERR_TRUNCATED,
    COLL_OK,
};
pub use de::VectorDeserializer;
pub use layout::SerialLayout;
pub use ser::VectorSerializer;

use bitplane_bv::PlaneCodecError;
use thiserror::Error;

/// Wire integer byte order. Only little-endian streams are produced;
/// the tag exists so foreign big-endian streams fail loudly instead of
/// decoding garbage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ByteOrder {
    Big,
    Little,
}

impl ByteOrder {
    pub(crate) fn tag(self) -> u8 {
        match self {
            ByteOrder::Big => 0,
            ByteOrder::Little => 1,
        }
    }
}

/// Serialization-format errors. All of these abort the operation at the
/// point of detection; nothing is clamped or repaired.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("bad magic bytes {0:?}")]
    BadMagic([u8; 2]),

    #[error("unsupported byte order tag {0}")]
    UnsupportedByteOrder(u8),

    #[error("unsupported matrix serialization version {0}")]
    UnsupportedVersion(u8),

    #[error("stream declares {declared} planes, target holds {capacity}")]
    InvalidBitDepth { declared: u64, capacity: usize },

    #[error("truncated stream reading {context}")]
    Truncated { context: &'static str },

    #[error("plane {plane} references undecoded plane {reference}")]
    BadReference { plane: usize, reference: usize },

    #[error("corrupt remap sub-block: {0}")]
    CorruptRemap(&'static str),

    #[error(transparent)]
    Plane(#[from] PlaneCodecError),
}
