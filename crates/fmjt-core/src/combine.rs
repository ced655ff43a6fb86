//! Concatenation of stores along one axis.

use std::path::Path;

use crate::error::{Error, Result};
use crate::store::MatrixStore;

/// Axis along which stores are concatenated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Rows,
    Columns,
}

/// Concatenate `sources` into a new store at `dst_path` along `axis`.
///
/// The identifier sequence of the opposite axis must match exactly (same
/// length, values, and order) across all sources; otherwise
/// [`Error::Mismatch`]. Data is copied contiguously in source order. An
/// empty source list produces an empty store. On any failure the
/// partially written destination is deleted.
pub fn concatenate<P: AsRef<Path>>(
    dst_path: P,
    sources: &[&MatrixStore],
    axis: Axis,
) -> Result<MatrixStore> {
    let dst_path = dst_path.as_ref();
    let result = concatenate_inner(dst_path, sources, axis);
    if result.is_err() {
        let _ = std::fs::remove_file(dst_path);
    }
    result
}

fn concatenate_inner(
    dst_path: &Path,
    sources: &[&MatrixStore],
    axis: Axis,
) -> Result<MatrixStore> {
    let (mut rows, mut cols) = match sources.first() {
        Some(first) => (first.rows(), first.cols()),
        None => (0, 0),
    };

    if let Some((first, rest)) = sources.split_first() {
        for (n, source) in rest.iter().enumerate() {
            match axis {
                Axis::Rows => {
                    if source.col_ids() != first.col_ids() {
                        return Err(mismatch("column", n + 1));
                    }
                    rows += source.rows();
                }
                Axis::Columns => {
                    if source.row_ids() != first.row_ids() {
                        return Err(mismatch("row", n + 1));
                    }
                    cols += source.cols();
                }
            }
        }
    }

    let mut dst = MatrixStore::create(dst_path, rows as u64, cols as u64)?;

    match axis {
        Axis::Rows => {
            if let Some(first) = sources.first() {
                dst.col_ids_mut().copy_from_slice(first.col_ids());
            }
            let mut offset = 0;
            for source in sources {
                let count = source.rows();
                dst.row_ids_mut()[offset..offset + count].copy_from_slice(source.row_ids());
                for i in 0..count {
                    dst.row_mut(offset + i)?.copy_from_slice(source.row(i)?);
                }
                offset += count;
            }
        }
        Axis::Columns => {
            if let Some(first) = sources.first() {
                dst.row_ids_mut().copy_from_slice(first.row_ids());
            }
            let mut offset = 0;
            for source in sources {
                let width = source.cols();
                dst.col_ids_mut()[offset..offset + width].copy_from_slice(source.col_ids());
                for i in 0..rows {
                    dst.row_mut(i)?[offset..offset + width].copy_from_slice(source.row(i)?);
                }
                offset += width;
            }
        }
    }

    tracing::info!(
        "concatenated {} stores into {}x{} at {}",
        sources.len(),
        rows,
        cols,
        dst_path.display()
    );
    Ok(dst)
}

fn mismatch(axis: &str, index: usize) -> Error {
    Error::Mismatch(format!(
        "{axis} identifiers of source {index} do not match source 0"
    ))
}
