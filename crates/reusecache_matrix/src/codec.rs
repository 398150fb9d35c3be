//! Self-contained binary payload for spilled matrix blocks.
//!
//! Layout (little-endian): magic, format tag, rows, cols and stored value
//! count as `u64`, the storage payload, then a SHA-1 digest of everything
//! before it. Files never outlive the process, so there is no versioning.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use memmap2::Mmap;
use sha1::{Digest, Sha1};

use crate::block::{CsrData, MatrixBlock, MatrixData};
use crate::error::MatrixError;

const MAGIC: &[u8; 4] = b"RCMX";
const FORMAT_DENSE: u8 = 0;
const FORMAT_SPARSE: u8 = 1;
const HEADER_LEN: usize = MAGIC.len() + 1 + 3 * 8;
const DIGEST_LEN: usize = 20;

pub(crate) fn encoded_len(rows: usize, _cols: usize, stored: usize, sparse: bool) -> u64 {
    let payload = if sparse {
        (rows as u64 + 1) * 8 + stored as u64 * 16
    } else {
        stored as u64 * 8
    };
    (HEADER_LEN + DIGEST_LEN) as u64 + payload
}

pub fn encode(block: &MatrixBlock) -> Vec<u8> {
    let len = encoded_len(block.rows(), block.cols(), block.nnz_stored(), block.is_sparse());
    let mut buf = Vec::with_capacity(len as usize);
    buf.extend_from_slice(MAGIC);
    match block.data() {
        MatrixData::Dense(values) => {
            buf.push(FORMAT_DENSE);
            put_u64(&mut buf, block.rows());
            put_u64(&mut buf, block.cols());
            put_u64(&mut buf, values.len());
            for value in values {
                buf.extend_from_slice(&value.to_le_bytes());
            }
        }
        MatrixData::Sparse(csr) => {
            buf.push(FORMAT_SPARSE);
            put_u64(&mut buf, block.rows());
            put_u64(&mut buf, block.cols());
            put_u64(&mut buf, csr.values.len());
            for ptr in &csr.row_ptr {
                put_u64(&mut buf, *ptr);
            }
            for col in &csr.col_idx {
                put_u64(&mut buf, *col);
            }
            for value in &csr.values {
                buf.extend_from_slice(&value.to_le_bytes());
            }
        }
    }
    let digest = Sha1::digest(&buf);
    buf.extend_from_slice(&digest);
    buf
}

pub fn decode(bytes: &[u8]) -> Result<MatrixBlock, MatrixError> {
    if bytes.len() < HEADER_LEN + DIGEST_LEN {
        return Err(MatrixError::Truncated {
            offset: 0,
            needed: HEADER_LEN + DIGEST_LEN,
            available: bytes.len(),
        });
    }
    if &bytes[..MAGIC.len()] != MAGIC {
        return Err(MatrixError::BadMagic);
    }
    let (body, digest) = bytes.split_at(bytes.len() - DIGEST_LEN);
    if Sha1::digest(body).as_slice() != digest {
        return Err(MatrixError::ChecksumMismatch);
    }

    let mut reader = Reader {
        bytes: body,
        offset: MAGIC.len(),
    };
    let format = reader.u8()?;
    let rows = reader.usize()?;
    let cols = reader.usize()?;
    let stored = reader.usize()?;

    match format {
        FORMAT_DENSE => {
            let values = reader.f64s(stored)?;
            MatrixBlock::dense(rows, cols, values)
        }
        FORMAT_SPARSE => {
            let row_ptr = reader.usizes(rows + 1)?;
            let col_idx = reader.usizes(stored)?;
            let values = reader.f64s(stored)?;
            MatrixBlock::sparse(
                rows,
                cols,
                CsrData {
                    row_ptr,
                    col_idx,
                    values,
                },
            )
        }
        other => Err(MatrixError::UnknownFormat(other)),
    }
}

/// Writes the encoded block to `path`, returning the number of bytes written.
pub fn write_to_path(path: &Path, block: &MatrixBlock) -> Result<u64, MatrixError> {
    let encoded = encode(block);
    let mut writer = BufWriter::new(File::create(path)?);
    writer.write_all(&encoded)?;
    writer.flush()?;
    writer.get_ref().sync_all()?;
    Ok(encoded.len() as u64)
}

pub fn read_from_path(path: &Path) -> Result<MatrixBlock, MatrixError> {
    let file = File::open(path)?;
    let len = file.metadata()?.len() as usize;
    if len == 0 {
        return Err(MatrixError::Truncated {
            offset: 0,
            needed: HEADER_LEN + DIGEST_LEN,
            available: 0,
        });
    }
    // SAFETY: spill files are private to this process and never modified
    // after being written; the map is dropped before the file is deleted.
    let map = unsafe { Mmap::map(&file)? };
    decode(&map)
}

fn put_u64(buf: &mut Vec<u8>, value: usize) {
    buf.extend_from_slice(&(value as u64).to_le_bytes());
}

struct Reader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl Reader<'_> {
    fn take(&mut self, needed: usize) -> Result<&[u8], MatrixError> {
        let available = self.bytes.len().saturating_sub(self.offset);
        if needed > available {
            return Err(MatrixError::Truncated {
                offset: self.offset,
                needed,
                available,
            });
        }
        let slice = &self.bytes[self.offset..self.offset + needed];
        self.offset += needed;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, MatrixError> {
        Ok(self.take(1)?[0])
    }

    fn u64(&mut self) -> Result<u64, MatrixError> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(raw))
    }

    fn usize(&mut self) -> Result<usize, MatrixError> {
        let value = self.u64()?;
        usize::try_from(value).map_err(|_| MatrixError::InvalidSparse {
            reason: format!("dimension {value} does not fit in memory"),
        })
    }

    fn usizes(&mut self, count: usize) -> Result<Vec<usize>, MatrixError> {
        self.check_room(count)?;
        (0..count).map(|_| self.usize()).collect()
    }

    fn f64s(&mut self, count: usize) -> Result<Vec<f64>, MatrixError> {
        self.check_room(count)?;
        (0..count)
            .map(|_| self.u64().map(f64::from_bits))
            .collect()
    }

    // Refuse absurd counts before allocating for them.
    fn check_room(&self, count: usize) -> Result<(), MatrixError> {
        let available = self.bytes.len().saturating_sub(self.offset);
        match count.checked_mul(8) {
            Some(needed) if needed <= available => Ok(()),
            _ => Err(MatrixError::Truncated {
                offset: self.offset,
                needed: count.saturating_mul(8),
                available,
            }),
        }
    }
}
