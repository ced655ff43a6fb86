//! Group aggregation: collapse sets of rows into single reduced rows.

use std::path::Path;

use crate::error::Result;
use crate::store::MatrixStore;

/// Elementwise reducer applied across the member rows of a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reducer {
    Min,
    Max,
    Mean,
    Median,
}

impl Reducer {
    /// Reduce one column's member values to a single cell. `values` may be
    /// reordered. An empty slice reduces to zero.
    pub fn apply(self, values: &mut [f32]) -> f32 {
        if values.is_empty() {
            return 0.0;
        }
        match self {
            Reducer::Min => values.iter().copied().fold(values[0], f32::min),
            Reducer::Max => values.iter().copied().fold(values[0], f32::max),
            Reducer::Mean => {
                let sum: f64 = values.iter().map(|&v| f64::from(v)).sum();
                (sum / values.len() as f64) as f32
            }
            Reducer::Median => {
                values.sort_by(f32::total_cmp);
                let mid = values.len() / 2;
                if values.len() % 2 == 1 {
                    values[mid]
                } else {
                    (values[mid - 1] + values[mid]) / 2.0
                }
            }
        }
    }
}

impl std::str::FromStr for Reducer {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, String> {
        match s {
            "min" => Ok(Reducer::Min),
            "max" => Ok(Reducer::Max),
            "mean" => Ok(Reducer::Mean),
            "med" | "median" => Ok(Reducer::Median),
            other => Err(format!("unknown reducer {other:?}")),
        }
    }
}

/// Reduce each group of row ids in `src` to one output row at `dst_path`.
///
/// Group members that do not resolve in `src` are ignored; a group with no
/// resolvable members is dropped entirely. Each output row carries the
/// first identifier listed in its group. Column identifiers
/// are copied from the source. On any failure the partially written
/// destination is deleted.
pub fn group_reduce<P: AsRef<Path>>(
    src: &MatrixStore,
    dst_path: P,
    groups: &[Vec<u32>],
    reducer: Reducer,
) -> Result<MatrixStore> {
    let dst_path = dst_path.as_ref();
    let result = group_reduce_inner(src, dst_path, groups, reducer);
    if result.is_err() {
        let _ = std::fs::remove_file(dst_path);
    }
    result
}

fn group_reduce_inner(
    src: &MatrixStore,
    dst_path: &Path,
    groups: &[Vec<u32>],
    reducer: Reducer,
) -> Result<MatrixStore> {
    // (output id, resolved member positions); empty groups drop out here.
    let mut resolved: Vec<(u32, Vec<usize>)> = Vec::with_capacity(groups.len());
    for group in groups {
        let members: Vec<usize> = group
            .iter()
            .filter_map(|&id| src.row_position(id).ok())
            .collect();
        match group.first() {
            Some(&first) if !members.is_empty() => resolved.push((first, members)),
            _ => {}
        }
    }

    let mut dst = MatrixStore::create(dst_path, resolved.len() as u64, src.cols() as u64)?;
    dst.col_ids_mut().copy_from_slice(src.col_ids());

    let mut values = Vec::new();
    for (out_idx, (out_id, members)) in resolved.iter().enumerate() {
        dst.row_ids_mut()[out_idx] = *out_id;
        let member_rows: Vec<&[f32]> = members
            .iter()
            .map(|&pos| src.row(pos))
            .collect::<Result<_>>()?;
        let out_row = dst.row_mut(out_idx)?;
        if let [only] = member_rows.as_slice() {
            out_row.copy_from_slice(only);
            continue;
        }
        for (col, cell) in out_row.iter_mut().enumerate() {
            values.clear();
            values.extend(member_rows.iter().map(|row| row[col]));
            *cell = reducer.apply(&mut values);
        }
    }

    tracing::info!(
        "grouped {} rows into {} ({:?}) at {}",
        src.rows(),
        resolved.len(),
        reducer,
        dst_path.display()
    );
    Ok(dst)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn source(dir: &Path) -> MatrixStore {
        let mut store = MatrixStore::create(dir.join("src.fmjt"), 4, 2).unwrap();
        store.row_ids_mut().copy_from_slice(&[1, 2, 3, 4]);
        store.col_ids_mut().copy_from_slice(&[100, 200]);
        store
            .data_mut()
            .copy_from_slice(&[1.0, 10.0, 2.0, 20.0, 3.0, 30.0, 4.0, 40.0]);
        store
    }

    #[test]
    fn median_odd_and_even() {
        assert_eq!(Reducer::Median.apply(&mut [3.0, 1.0, 2.0]), 2.0);
        assert_eq!(Reducer::Median.apply(&mut [4.0, 1.0, 3.0, 2.0]), 2.5);
    }

    #[test]
    fn scalar_reducers() {
        assert_eq!(Reducer::Min.apply(&mut [3.0, 1.0, 2.0]), 1.0);
        assert_eq!(Reducer::Max.apply(&mut [3.0, 1.0, 2.0]), 3.0);
        assert_eq!(Reducer::Mean.apply(&mut [1.0, 2.0, 3.0, 4.0]), 2.5);
    }

    #[test]
    fn groups_reduce_elementwise() {
        let dir = tempdir().unwrap();
        let src = source(dir.path());

        let groups = vec![vec![1, 3], vec![2, 4]];
        let dst = group_reduce(&src, dir.path().join("dst.fmjt"), &groups, Reducer::Mean).unwrap();

        assert_eq!(dst.rows(), 2);
        assert_eq!(dst.col_ids(), &[100, 200]);
        assert_eq!(dst.row_ids(), &[1, 2]);
        assert_eq!(dst.row(0).unwrap(), &[2.0, 20.0]);
        assert_eq!(dst.row(1).unwrap(), &[3.0, 30.0]);
    }

    #[test]
    fn unresolvable_members_ignored_and_empty_groups_dropped() {
        let dir = tempdir().unwrap();
        let src = source(dir.path());

        let groups = vec![vec![99, 1], vec![77, 88]];
        let dst =
            group_reduce(&src, dir.path().join("dst.fmjt"), &groups, Reducer::Median).unwrap();

        // Second group had no resolvable members and is gone; the first
        // keeps its leading (unresolved) id as the output id.
        assert_eq!(dst.rows(), 1);
        assert_eq!(dst.row_ids(), &[99]);
        assert_eq!(dst.row(0).unwrap(), src.row(0).unwrap());
    }

    #[test]
    fn single_member_group_copies_row() {
        let dir = tempdir().unwrap();
        let src = source(dir.path());

        let groups = vec![vec![4]];
        let dst = group_reduce(&src, dir.path().join("dst.fmjt"), &groups, Reducer::Min).unwrap();
        assert_eq!(dst.row_ids(), &[4]);
        assert_eq!(dst.row(0).unwrap(), &[4.0, 40.0]);
    }

    #[test]
    fn reducer_parses_from_str() {
        assert_eq!("med".parse::<Reducer>().unwrap(), Reducer::Median);
        assert_eq!("mean".parse::<Reducer>().unwrap(), Reducer::Mean);
        assert!("avg".parse::<Reducer>().is_err());
    }
}
