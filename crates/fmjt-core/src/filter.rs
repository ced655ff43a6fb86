//! Row/column filtering into a new store.

use std::collections::HashSet;
use std::path::Path;

use crate::error::Result;
use crate::store::MatrixStore;

/// Copy `src` into a new store at `dst_path`, dropping or keeping the
/// rows and columns named by id.
///
/// `rows_keep = true` keeps exactly the selected row ids; `false` removes
/// them (and likewise for columns). Ids absent from `src` are silently
/// ignored. Surviving rows and columns preserve their relative order. On
/// any failure the partially written destination is deleted.
pub fn filter<P: AsRef<Path>>(
    src: &MatrixStore,
    dst_path: P,
    row_ids: &[u32],
    rows_keep: bool,
    col_ids: &[u32],
    cols_keep: bool,
) -> Result<MatrixStore> {
    let dst_path = dst_path.as_ref();
    let result = filter_inner(src, dst_path, row_ids, rows_keep, col_ids, cols_keep);
    if result.is_err() {
        let _ = std::fs::remove_file(dst_path);
    }
    result
}

fn filter_inner(
    src: &MatrixStore,
    dst_path: &Path,
    row_ids: &[u32],
    rows_keep: bool,
    col_ids: &[u32],
    cols_keep: bool,
) -> Result<MatrixStore> {
    let rows_selected = resolve(row_ids, |id| src.row_position(id).ok());
    let cols_selected = resolve(col_ids, |id| src.col_position(id).ok());

    let kept_rows: Vec<usize> = (0..src.rows())
        .filter(|idx| keep(rows_selected.contains(idx), rows_keep))
        .collect();
    let kept_cols: Vec<usize> = (0..src.cols())
        .filter(|idx| keep(cols_selected.contains(idx), cols_keep))
        .collect();

    let mut dst = MatrixStore::create(dst_path, kept_rows.len() as u64, kept_cols.len() as u64)?;

    for (dst_idx, &src_idx) in kept_rows.iter().enumerate() {
        dst.row_ids_mut()[dst_idx] = src.row_ids()[src_idx];
    }
    for (dst_idx, &src_idx) in kept_cols.iter().enumerate() {
        dst.col_ids_mut()[dst_idx] = src.col_ids()[src_idx];
    }

    let full_width = kept_cols.len() == src.cols();
    for (dst_idx, &src_idx) in kept_rows.iter().enumerate() {
        let src_row = src.row(src_idx)?;
        let dst_row = dst.row_mut(dst_idx)?;
        if full_width {
            dst_row.copy_from_slice(src_row);
        } else {
            for (dst_col, &src_col) in kept_cols.iter().enumerate() {
                dst_row[dst_col] = src_row[src_col];
            }
        }
    }

    tracing::info!(
        "filtered {}x{} -> {}x{} into {}",
        src.rows(),
        src.cols(),
        kept_rows.len(),
        kept_cols.len(),
        dst_path.display()
    );
    Ok(dst)
}

fn keep(selected: bool, keep_selected: bool) -> bool {
    if keep_selected {
        selected
    } else {
        !selected
    }
}

fn resolve(ids: &[u32], position: impl Fn(u32) -> Option<usize>) -> HashSet<usize> {
    ids.iter().filter_map(|&id| position(id)).collect()
}
