use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MatrixError {
    #[error("dense payload holds {actual} values, expected {rows}x{cols}")]
    ShapeMismatch {
        rows: usize,
        cols: usize,
        actual: usize,
    },
    #[error("invalid sparse structure: {reason}")]
    InvalidSparse { reason: String },
    #[error("index ({row}, {col}) out of bounds for {rows}x{cols} matrix")]
    OutOfBounds {
        row: usize,
        col: usize,
        rows: usize,
        cols: usize,
    },
    #[error("spill payload does not start with the matrix magic")]
    BadMagic,
    #[error("unknown storage format tag {0}")]
    UnknownFormat(u8),
    #[error("spill payload truncated: needed {needed} bytes at offset {offset}, {available} available")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },
    #[error("spill payload checksum mismatch")]
    ChecksumMismatch,
    #[error(transparent)]
    Io(#[from] io::Error),
}
