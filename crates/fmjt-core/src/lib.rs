//! FMJT core – memory-mapped matrix store, transforms, and parallel
//! top-k similarity search.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │              SimilaritySearch (rayon partitions)            │
//! │     bounded dual-heap top-k · pagination · predicates      │
//! ├─────────────────────────────────────────────────────────────┤
//! │     Transforms: filter · concatenate · group-reduce        │
//! │             negate · normalize (in place)                  │
//! ├─────────────────────────────────────────────────────────────┤
//! │        MatrixStore (mmap zero-copy FMJT files)             │
//! │     u32 identifier axes · row-major f32 cells              │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! A store is created at a fixed size or opened from disk, optionally
//! reshaped by a transform into a derived store, and queried through
//! [`search`]. Identifier-to-position lookup is indexed lazily, once per
//! axis. All row and identifier accessors are zero-copy views into the
//! mapping; closing the handle consumes it, so a view can never outlive
//! the mapping it points into.

pub mod combine;
pub mod error;
pub mod filter;
pub mod format;
pub mod group;
pub mod math;
pub mod search;
pub mod store;
pub mod text;

pub use combine::{concatenate, Axis};
pub use error::{Error, Result};
pub use filter::filter;
pub use group::{group_reduce, Reducer};
pub use search::{search, Metric, PredicateError, RowRef, SearchOptions, SearchResult};
pub use store::MatrixStore;
