use thiserror::Error;

/// Errors raised by the vector element interfaces.
///
/// Range and empty-import errors are raised synchronously at the call site
/// and never silently clamped. `NotFound` is specific to the rank-select
/// compressed vector: the index is in bounds but holds no assigned value,
/// which is a distinct condition from being out of range.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum VectorError {
    #[error("index {index} out of range (size {size})")]
    IndexOutOfRange { index: u64, size: u64 },

    #[error("index {index} holds no assigned value")]
    NotFound { index: u64 },

    #[error("bulk import of zero elements")]
    EmptyImport,
}
