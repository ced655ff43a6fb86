//! Memory-mapped matrix storage.
//!
//! A [`MatrixStore`] owns a read-write mapping of an FMJT file and hands
//! out zero-copy typed views into it: identifier arrays as `&[u32]` and
//! row-major cell data as `&[f32]`. `bytemuck` performs the byte-to-typed
//! conversions with alignment and length checks; every region starts at a
//! 4-byte multiple of the page-aligned mapping base, which the validated
//! [`Layout`] guarantees, so the views are constructed without copying and
//! without `unsafe` pointer reinterpretation.
//!
//! Views borrow the handle, and [`MatrixStore::close`] consumes it, so
//! use-after-close is rejected at compile time. Writers take `&mut self`;
//! the format provides no cross-handle write synchronization, and callers
//! opening the same file through several handles must serialize writes
//! themselves.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Read;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use memmap2::{MmapMut, MmapOptions};

use crate::error::{Error, Result};
use crate::format::{Header, Layout, HEADER_SIZE};
use crate::math;

/// Lazily built map from identifier to position along one axis.
///
/// The first by-identifier lookup triggers an O(n) build; concurrent first
/// callers block until it completes and no partially built map is ever
/// observable. Mutating the identifier array resets the index.
#[derive(Debug, Default)]
pub struct IdentityIndex {
    positions: OnceLock<HashMap<u32, usize>>,
}

impl IdentityIndex {
    pub fn position(&self, ids: &[u32], id: u32) -> Option<usize> {
        let map = self.positions.get_or_init(|| {
            ids.iter()
                .enumerate()
                .map(|(idx, &id)| (id, idx))
                .collect()
        });
        map.get(&id).copied()
    }

    fn reset(&mut self) {
        self.positions = OnceLock::new();
    }
}

/// Handle to a memory-mapped FMJT matrix file.
pub struct MatrixStore {
    mmap: MmapMut,
    file: File,
    path: PathBuf,
    layout: Layout,
    row_index: IdentityIndex,
    col_index: IdentityIndex,
}

impl MatrixStore {
    /// Create a new store of fixed dimensions.
    ///
    /// The file is allocated at its final size immediately (sparse where
    /// the filesystem supports it) and mapped read-write. Identifier
    /// arrays and cell data start out zeroed; identifiers are not
    /// auto-populated. Fails with [`Error::SizeOverflow`] when either axis
    /// exceeds the 32-bit identifier width or the total size is not
    /// addressable. A failure after the file exists deletes it; no partial
    /// store is left behind.
    pub fn create<P: AsRef<Path>>(path: P, rows: u64, cols: u64) -> Result<Self> {
        let path = path.as_ref();
        let layout = Layout::new(rows, cols)?;
        let result = Self::create_inner(path, layout);
        if result.is_err() {
            let _ = std::fs::remove_file(path);
        }
        result
    }

    fn create_inner(path: &Path, layout: Layout) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(layout.total_size as u64)?;
        let mut mmap = unsafe { MmapOptions::new().len(layout.total_size).map_mut(&file)? };
        mmap[..HEADER_SIZE].copy_from_slice(&layout.header().to_bytes());
        Ok(Self {
            mmap,
            file,
            path: path.to_path_buf(),
            layout,
            row_index: IdentityIndex::default(),
            col_index: IdentityIndex::default(),
        })
    }

    /// Open an existing store read-write.
    ///
    /// The mapped region is computed from the header-declared counts; a
    /// file shorter than that is reported as [`Error::Format`].
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = OpenOptions::new().read(true).write(true).open(path.as_ref())?;
        let mut header_bytes = [0u8; HEADER_SIZE];
        file.read_exact(&mut header_bytes)
            .map_err(|_| Error::Format(format!("{}: truncated header", path.as_ref().display())))?;
        let header = Header::from_bytes(&header_bytes)?;
        let layout = Layout::new(u64::from(header.rows), u64::from(header.cols))?;
        if file.metadata()?.len() < layout.total_size as u64 {
            return Err(Error::Format(format!(
                "{}: file shorter than declared {} x {} matrix",
                path.as_ref().display(),
                layout.rows,
                layout.cols
            )));
        }
        let mmap = unsafe { MmapOptions::new().len(layout.total_size).map_mut(&file)? };
        Ok(Self {
            mmap,
            file,
            path: path.as_ref().to_path_buf(),
            layout,
            row_index: IdentityIndex::default(),
            col_index: IdentityIndex::default(),
        })
    }

    pub fn rows(&self) -> usize {
        self.layout.rows
    }

    pub fn cols(&self) -> usize {
        self.layout.cols
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ident_view(&self, range: Range<usize>) -> &[u32] {
        cast_idents(&self.mmap[range])
    }

    /// Row identifiers, one per row.
    pub fn row_ids(&self) -> &[u32] {
        self.ident_view(self.layout.row_ids_offset..self.layout.col_ids_offset)
    }

    /// Column identifiers, one per column.
    pub fn col_ids(&self) -> &[u32] {
        self.ident_view(self.layout.col_ids_offset..self.layout.data_offset)
    }

    /// Mutable row identifiers. Invalidates the lazy row index.
    pub fn row_ids_mut(&mut self) -> &mut [u32] {
        self.row_index.reset();
        let range = self.layout.row_ids_offset..self.layout.col_ids_offset;
        cast_idents_mut(&mut self.mmap[range])
    }

    /// Mutable column identifiers. Invalidates the lazy column index.
    pub fn col_ids_mut(&mut self) -> &mut [u32] {
        self.col_index.reset();
        let range = self.layout.col_ids_offset..self.layout.data_offset;
        cast_idents_mut(&mut self.mmap[range])
    }

    /// The full row-major cell block.
    pub fn data(&self) -> &[f32] {
        cast_cells(&self.mmap[self.layout.data_offset..])
    }

    pub fn data_mut(&mut self) -> &mut [f32] {
        let offset = self.layout.data_offset;
        cast_cells_mut(&mut self.mmap[offset..])
    }

    fn row_range(&self, index: usize) -> Result<Range<usize>> {
        if index >= self.layout.rows {
            return Err(Error::OutOfRange {
                index,
                count: self.layout.rows,
            });
        }
        let cell = std::mem::size_of::<f32>();
        let start = self.layout.data_offset + index * self.layout.cols * cell;
        Ok(start..start + self.layout.cols * cell)
    }

    /// Borrow one row by position.
    pub fn row(&self, index: usize) -> Result<&[f32]> {
        Ok(cast_cells(&self.mmap[self.row_range(index)?]))
    }

    pub fn row_mut(&mut self, index: usize) -> Result<&mut [f32]> {
        let range = self.row_range(index)?;
        Ok(cast_cells_mut(&mut self.mmap[range]))
    }

    pub fn row_id_at(&self, index: usize) -> Result<u32> {
        self.row_ids()
            .get(index)
            .copied()
            .ok_or(Error::OutOfRange {
                index,
                count: self.layout.rows,
            })
    }

    pub fn col_id_at(&self, index: usize) -> Result<u32> {
        self.col_ids()
            .get(index)
            .copied()
            .ok_or(Error::OutOfRange {
                index,
                count: self.layout.cols,
            })
    }

    /// Resolve a row identifier to its position, building the row index on
    /// first use.
    pub fn row_position(&self, id: u32) -> Result<usize> {
        self.row_index
            .position(self.row_ids(), id)
            .ok_or(Error::NotFound(id))
    }

    /// Resolve a column identifier to its position, building the column
    /// index on first use.
    pub fn col_position(&self, id: u32) -> Result<usize> {
        self.col_index
            .position(self.col_ids(), id)
            .ok_or(Error::NotFound(id))
    }

    /// Borrow the row carrying the given identifier.
    pub fn row_by_id(&self, id: u32) -> Result<&[f32]> {
        self.row(self.row_position(id)?)
    }

    /// Multiply every cell by -1, in place.
    pub fn negate(&mut self) {
        for value in self.data_mut() {
            *value = -*value;
        }
    }

    /// Divide every row by its Euclidean norm, in place. Rows whose norm
    /// is exactly zero are left unmodified.
    pub fn normalize_rows(&mut self) {
        let cols = self.cols();
        if cols == 0 {
            return;
        }
        for row in self.data_mut().chunks_mut(cols) {
            math::normalize(row);
        }
    }

    /// Flush the mapping and release the descriptor.
    ///
    /// Consumes the handle: the compiler rejects any later access, and a
    /// second close is impossible. Dropping the handle releases the same
    /// resources without surfacing flush errors.
    pub fn close(self) -> Result<()> {
        self.mmap.flush()?;
        self.file.sync_all()?;
        Ok(())
    }
}

impl std::fmt::Debug for MatrixStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatrixStore")
            .field("path", &self.path)
            .field("rows", &self.layout.rows)
            .field("cols", &self.layout.cols)
            .finish()
    }
}

// Region offsets are 4-byte multiples of the page-aligned mapping base;
// Layout establishes that before a store ever exists.

fn cast_idents(bytes: &[u8]) -> &[u32] {
    bytemuck::cast_slice(bytes)
}

fn cast_idents_mut(bytes: &mut [u8]) -> &mut [u32] {
    bytemuck::cast_slice_mut(bytes)
}

fn cast_cells(bytes: &[u8]) -> &[f32] {
    bytemuck::cast_slice(bytes)
}

fn cast_cells_mut(bytes: &mut [u8]) -> &mut [f32] {
    bytemuck::cast_slice_mut(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn create_then_open_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.fmjt");

        let store = MatrixStore::create(&path, 3, 4).unwrap();
        assert_eq!(store.rows(), 3);
        assert_eq!(store.cols(), 4);
        assert!(store.data().iter().all(|&v| v == 0.0));
        store.close().unwrap();

        let store = MatrixStore::open(&path).unwrap();
        assert_eq!(store.rows(), 3);
        assert_eq!(store.cols(), 4);
        assert!(store.row_ids().iter().all(|&id| id == 0));
        assert!(store.data().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn written_rows_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.fmjt");

        let mut store = MatrixStore::create(&path, 2, 3).unwrap();
        store.row_ids_mut().copy_from_slice(&[10, 20]);
        store.col_ids_mut().copy_from_slice(&[7, 8, 9]);
        store.row_mut(0).unwrap().copy_from_slice(&[1.0, 2.0, 3.0]);
        store.row_mut(1).unwrap().copy_from_slice(&[4.0, 5.0, 6.0]);
        store.close().unwrap();

        let store = MatrixStore::open(&path).unwrap();
        assert_eq!(store.row_ids(), &[10, 20]);
        assert_eq!(store.col_ids(), &[7, 8, 9]);
        assert_eq!(store.row(0).unwrap(), &[1.0, 2.0, 3.0]);
        assert_eq!(store.row(1).unwrap(), &[4.0, 5.0, 6.0]);
    }

    #[test]
    fn open_rejects_bad_magic() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.fmjt");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(b"NOPE\0\0\0\0\0\0\0\0")
            .unwrap();
        assert!(matches!(MatrixStore::open(&path), Err(Error::Format(_))));
    }

    #[test]
    fn open_rejects_truncated_body() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("short.fmjt");
        let store = MatrixStore::create(&path, 4, 4).unwrap();
        let total = store.layout.total_size as u64;
        store.close().unwrap();

        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(total - 1).unwrap();
        drop(file);

        assert!(matches!(MatrixStore::open(&path), Err(Error::Format(_))));
    }

    #[test]
    fn create_rejects_oversized_dimensions() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("huge.fmjt");
        let result = MatrixStore::create(&path, u64::from(u32::MAX) + 1, 1);
        assert!(matches!(result, Err(Error::SizeOverflow { .. })));
        assert!(!path.exists(), "no file may be left behind");
    }

    #[test]
    fn failed_create_deletes_the_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("huge.fmjt");
        // Dimensions pass the layout checks but the 17 EB data block can
        // never be allocated or mapped, so creation fails after the file
        // already exists.
        let result = MatrixStore::create(&path, u64::from(u32::MAX), 1_000_000_000);
        assert!(result.is_err());
        assert!(!path.exists(), "no file may be left behind");
    }

    #[test]
    fn row_access_out_of_range() {
        let dir = tempdir().unwrap();
        let store = MatrixStore::create(dir.path().join("t.fmjt"), 2, 2).unwrap();
        assert!(matches!(
            store.row(2),
            Err(Error::OutOfRange { index: 2, count: 2 })
        ));
    }

    #[test]
    fn row_by_id_resolves_and_rejects() {
        let dir = tempdir().unwrap();
        let mut store = MatrixStore::create(dir.path().join("t.fmjt"), 3, 2).unwrap();
        store.row_ids_mut().copy_from_slice(&[5, 6, 7]);
        store.row_mut(1).unwrap().copy_from_slice(&[1.5, 2.5]);

        assert_eq!(store.row_position(6).unwrap(), 1);
        assert_eq!(store.row_by_id(6).unwrap(), &[1.5, 2.5]);
        assert!(matches!(store.row_position(99), Err(Error::NotFound(99))));
    }

    #[test]
    fn id_index_rebuilds_after_mutation() {
        let dir = tempdir().unwrap();
        let mut store = MatrixStore::create(dir.path().join("t.fmjt"), 2, 1).unwrap();
        store.row_ids_mut().copy_from_slice(&[1, 2]);
        assert_eq!(store.row_position(2).unwrap(), 1);

        store.row_ids_mut().copy_from_slice(&[3, 4]);
        assert!(matches!(store.row_position(2), Err(Error::NotFound(2))));
        assert_eq!(store.row_position(4).unwrap(), 1);
    }

    #[test]
    fn concurrent_first_lookups_agree() {
        let dir = tempdir().unwrap();
        let mut store = MatrixStore::create(dir.path().join("t.fmjt"), 64, 1).unwrap();
        for (i, id) in store.row_ids_mut().iter_mut().enumerate() {
            *id = 1000 + i as u32;
        }

        std::thread::scope(|scope| {
            for t in 0..8 {
                let store = &store;
                scope.spawn(move || {
                    for i in 0..64 {
                        let id = 1000 + ((i + t * 7) % 64) as u32;
                        assert_eq!(store.row_position(id).unwrap(), (id - 1000) as usize);
                    }
                });
            }
        });
    }

    #[test]
    fn negate_flips_every_cell() {
        let dir = tempdir().unwrap();
        let mut store = MatrixStore::create(dir.path().join("t.fmjt"), 2, 2).unwrap();
        store.data_mut().copy_from_slice(&[1.0, -2.0, 0.0, 3.5]);
        store.negate();
        assert_eq!(store.data(), &[-1.0, 2.0, 0.0, -3.5]);
    }

    #[test]
    fn normalize_rows_unit_norm_and_zero_row() {
        let dir = tempdir().unwrap();
        let mut store = MatrixStore::create(dir.path().join("t.fmjt"), 2, 3).unwrap();
        store.row_mut(0).unwrap().copy_from_slice(&[3.0, 0.0, 4.0]);
        // row 1 stays all zero
        store.normalize_rows();

        let row = store.row(0).unwrap();
        let norm: f64 = row.iter().map(|&v| f64::from(v) * f64::from(v)).sum::<f64>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
        assert_eq!(store.row(1).unwrap(), &[0.0, 0.0, 0.0]);
    }
}
