//! Text-table import and export.
//!
//! Import format: a first line `<rows> <cols>`, then one
//! whitespace-separated line of cell values per row. Identifiers are
//! assigned positionally (`0..n-1`) on both axes. Fewer data lines than
//! declared leave the remaining rows zeroed; more are an error.

use std::io::{BufRead, Write};
use std::path::Path;

use crate::error::{Error, Result};
use crate::store::MatrixStore;

/// Parse a text table into a newly created store at `path`. The partial
/// output file is deleted on failure.
pub fn parse_table<P: AsRef<Path>>(reader: impl BufRead, path: P) -> Result<MatrixStore> {
    let path = path.as_ref();
    let result = parse_table_inner(reader, path);
    if result.is_err() {
        let _ = std::fs::remove_file(path);
    }
    result
}

fn parse_table_inner(reader: impl BufRead, path: &Path) -> Result<MatrixStore> {
    let mut lines = reader.lines();
    let header = lines
        .next()
        .ok_or_else(|| Error::Format("missing dimension line".into()))??;
    let mut fields = header.split_whitespace();
    let rows = parse_dim(fields.next())?;
    let cols = parse_dim(fields.next())?;
    if fields.next().is_some() {
        return Err(Error::Format("malformed dimension line".into()));
    }

    let mut store = MatrixStore::create(path, rows, cols)?;
    for (i, id) in store.row_ids_mut().iter_mut().enumerate() {
        *id = i as u32;
    }
    for (i, id) in store.col_ids_mut().iter_mut().enumerate() {
        *id = i as u32;
    }

    let mut row_idx = 0usize;
    for line in lines {
        let line = line?;
        if row_idx as u64 >= rows {
            return Err(Error::Format(format!("more than {rows} data rows")));
        }
        let row = store.row_mut(row_idx)?;
        let mut count = 0usize;
        for (cell, field) in row.iter_mut().zip(line.split_whitespace()) {
            *cell = field
                .parse::<f32>()
                .map_err(|e| Error::Format(format!("row {row_idx}: {e}")))?;
            count += 1;
        }
        if count != cols as usize || line.split_whitespace().count() != count {
            return Err(Error::Format(format!(
                "row {row_idx} has wrong number of values"
            )));
        }
        row_idx += 1;
    }

    Ok(store)
}

fn parse_dim(field: Option<&str>) -> Result<u64> {
    field
        .ok_or_else(|| Error::Format("malformed dimension line".into()))?
        .parse::<u64>()
        .map_err(|e| Error::Format(format!("bad dimension: {e}")))
}

/// Write a store as a tab-separated table: a header line of column ids,
/// then one `row_id\tvalues...` line per row.
pub fn dump_table(store: &MatrixStore, mut out: impl Write) -> Result<()> {
    for id in store.col_ids() {
        write!(out, "\t{id}")?;
    }
    writeln!(out)?;

    for idx in 0..store.rows() {
        write!(out, "{}", store.row_id_at(idx)?)?;
        for value in store.row(idx)? {
            write!(out, "\t{value:.6}")?;
        }
        writeln!(out)?;
    }
    Ok(())
}
