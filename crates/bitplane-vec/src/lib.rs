#![forbid(unsafe_code)]

//! Bit-transposed sparse vectors.
//!
//! A vector of W-bit unsigned values is stored as W compressed bitmaps
//! ("bit-planes"), plane `j` recording which logical indices have bit `j`
//! set, plus an optional NULL plane recording which indices hold an assigned
//! value at all. Because real data rarely uses its declared width and equal
//! values cluster, the per-plane bitmaps compress far below a dense array
//! while keeping random access cheap and bulk operations vectorizable.
//!
//! Types:
//! - [`SparseVector`]: the dense bit-transposed vector.
//! - [`RscVector`]: rank-select compressed variant; only assigned positions
//!   are physically stored and logical indices translate through a popcount
//!   rank over the NULL plane.
//! - [`StrVector`]: byte strings stored octet-transposed, used by the
//!   string search paths.
//!
//! The scanning and serialization crates reach plane storage through the
//! [`PlaneAccess`]/[`PlaneStore`] capability traits rather than through the
//! ordinary element API.

mod access;
mod error;
mod iter;
mod matrix;
mod rsc;
mod sparse;
mod str_vec;
mod value;

pub use access::{PlaneAccess, PlaneStore};
pub use error::VectorError;
pub use iter::{BackInserter, SvIter};
pub use rsc::RscVector;
pub use sparse::{SortHint, SparseVector, SvStat};
pub use str_vec::{RemapTable, StrVector};
pub use value::CodeValue;

/// Whether a vector carries a NULL plane.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Nulls {
    /// No NULL plane; every index in `[0, size)` is considered assigned.
    Off,
    /// A NULL plane marks which indices hold an assigned value.
    On,
}

/// How comparisons treat the NULL plane.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NullPolicy {
    /// Compare values only.
    NoNull,
    /// NULL status participates; differing presence is a difference.
    UseNull,
}
