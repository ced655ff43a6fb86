//! FMJT binary file format.
//!
//! # File structure
//!
//! ```text
//! Offset        Size            Type      Description
//! ─────────────────────────────────────────────────────────
//! 0x00          4               [u8; 4]   Magic: "FMJT"
//! 0x04          4               u32       R: number of rows
//! 0x08          4               u32       C: number of columns
//! 0x0C          R*4             [u32]     Row identifiers
//! 0x0C + R*4    C*4             [u32]     Column identifiers
//! next          R*C*4           [f32]     Row-major cell data
//! ```
//!
//! All multi-byte fields use native byte order; a store file is not
//! portable across endianness. The total file size is fixed at creation
//! and never changes.

use crate::error::{Error, Result};

/// Magic bytes identifying an FMJT matrix file.
pub const MAGIC: [u8; 4] = *b"FMJT";

/// Fixed header size in bytes: 4 (magic) + 4 (rows) + 4 (cols).
pub const HEADER_SIZE: usize = 12;

const CELL_SIZE: u64 = std::mem::size_of::<f32>() as u64;
const IDENT_SIZE: u64 = std::mem::size_of::<u32>() as u64;

/// Parsed fixed-size header of an FMJT file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub rows: u32,
    pub cols: u32,
}

impl Header {
    /// Parse a header from the first [`HEADER_SIZE`] bytes of a file.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(Error::Format(format!(
                "file too small for header: {} bytes",
                bytes.len()
            )));
        }
        if bytes[0..4] != MAGIC {
            return Err(Error::Format("bad magic bytes".into()));
        }
        let rows = u32::from_ne_bytes(bytes[4..8].try_into().map_err(invalid_header)?);
        let cols = u32::from_ne_bytes(bytes[8..12].try_into().map_err(invalid_header)?);
        Ok(Self { rows, cols })
    }

    /// Encode the header, magic included.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&MAGIC);
        buf[4..8].copy_from_slice(&self.rows.to_ne_bytes());
        buf[8..12].copy_from_slice(&self.cols.to_ne_bytes());
        buf
    }
}

fn invalid_header(_: std::array::TryFromSliceError) -> Error {
    Error::Format("truncated header".into())
}

/// Byte offsets of every region of a store file, with all size math
/// checked up front.
///
/// Constructing a `Layout` is the single place dimension limits are
/// enforced: each axis must fit the 32-bit identifier width and the total
/// file size must be addressable on the current platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub rows: usize,
    pub cols: usize,
    pub row_ids_offset: usize,
    pub col_ids_offset: usize,
    pub data_offset: usize,
    pub total_size: usize,
}

impl Layout {
    pub fn new(rows: u64, cols: u64) -> Result<Self> {
        if rows > u64::from(u32::MAX) || cols > u64::from(u32::MAX) {
            return Err(Error::SizeOverflow { rows, cols });
        }
        let total = (|| {
            let ids = rows.checked_add(cols)?.checked_mul(IDENT_SIZE)?;
            let cells = rows.checked_mul(cols)?.checked_mul(CELL_SIZE)?;
            (HEADER_SIZE as u64).checked_add(ids)?.checked_add(cells)
        })()
        .ok_or(Error::SizeOverflow { rows, cols })?;
        let total_size: usize = total
            .try_into()
            .map_err(|_| Error::SizeOverflow { rows, cols })?;

        let row_ids_offset = HEADER_SIZE;
        let col_ids_offset = row_ids_offset + rows as usize * IDENT_SIZE as usize;
        let data_offset = col_ids_offset + cols as usize * IDENT_SIZE as usize;
        Ok(Self {
            rows: rows as usize,
            cols: cols as usize,
            row_ids_offset,
            col_ids_offset,
            data_offset,
            total_size,
        })
    }

    pub fn header(&self) -> Header {
        Header {
            rows: self.rows as u32,
            cols: self.cols as u32,
        }
    }
}
