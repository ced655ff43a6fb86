//! Error taxonomy shared by the store, the transforms, and the search.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// The file is not a valid FMJT store: bad magic, truncated header or
    /// body, or a mapping that could not be viewed as typed slices.
    #[error("invalid store file: {0}")]
    Format(String),

    /// Requested dimensions exceed the identifier width or the platform's
    /// addressable size.
    #[error("matrix of {rows} x {cols} exceeds representable size")]
    SizeOverflow { rows: u64, cols: u64 },

    /// Position-based access outside `[0, count)`.
    #[error("position {index} out of range for {count} entries")]
    OutOfRange { index: usize, count: usize },

    /// Identifier absent from the requested axis.
    #[error("identifier {0} not found")]
    NotFound(u32),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Identifier sequences disagree where they are required to align,
    /// or a query vector does not match the store's column count.
    #[error("mismatch: {0}")]
    Mismatch(String),

    /// A caller-supplied row filter failed while evaluating a candidate.
    #[error("row filter failed: {0}")]
    Predicate(#[source] Box<dyn std::error::Error + Send + Sync>),
}

pub type Result<T> = std::result::Result<T, Error>;
