use crate::error::MatrixError;

/// Fixed per-block overhead counted on top of the payload.
pub const BLOCK_HEADER_BYTES: u64 = 64;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Compressed sparse row storage.
#[derive(Debug, Clone, PartialEq)]
pub struct CsrData {
    pub row_ptr: Vec<usize>,
    pub col_idx: Vec<usize>,
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MatrixData {
    /// Row-major values.
    Dense(Vec<f64>),
    Sparse(CsrData),
}

/// A matrix-shaped cache value.
#[derive(Debug, Clone, PartialEq)]
pub struct MatrixBlock {
    rows: usize,
    cols: usize,
    data: MatrixData,
}

impl MatrixBlock {
    pub fn dense(rows: usize, cols: usize, values: Vec<f64>) -> Result<Self, MatrixError> {
        if values.len() != rows * cols {
            return Err(MatrixError::ShapeMismatch {
                rows,
                cols,
                actual: values.len(),
            });
        }
        Ok(Self {
            rows,
            cols,
            data: MatrixData::Dense(values),
        })
    }

    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: MatrixData::Dense(vec![0.0; rows * cols]),
        }
    }

    /// Builds a CSR block, checking that the structure describes a
    /// `rows x cols` matrix with sorted, in-range column indices.
    pub fn sparse(rows: usize, cols: usize, csr: CsrData) -> Result<Self, MatrixError> {
        if csr.row_ptr.len() != rows + 1 {
            return Err(MatrixError::InvalidSparse {
                reason: format!(
                    "row pointer array has {} entries, expected {}",
                    csr.row_ptr.len(),
                    rows + 1
                ),
            });
        }
        if csr.col_idx.len() != csr.values.len() {
            return Err(MatrixError::InvalidSparse {
                reason: "column index and value arrays differ in length".to_string(),
            });
        }
        if csr.row_ptr.first() != Some(&0) || csr.row_ptr.last() != Some(&csr.values.len()) {
            return Err(MatrixError::InvalidSparse {
                reason: "row pointers must span the value array".to_string(),
            });
        }
        for row in 0..rows {
            let (start, end) = (csr.row_ptr[row], csr.row_ptr[row + 1]);
            if start > end {
                return Err(MatrixError::InvalidSparse {
                    reason: format!("row pointers decrease at row {row}"),
                });
            }
            if end > csr.col_idx.len() {
                return Err(MatrixError::InvalidSparse {
                    reason: format!("row {row} ends past the value array"),
                });
            }
            let columns = &csr.col_idx[start..end];
            if columns.iter().any(|&c| c >= cols) || columns.windows(2).any(|w| w[0] >= w[1]) {
                return Err(MatrixError::InvalidSparse {
                    reason: format!("row {row} has unsorted or out-of-range columns"),
                });
            }
        }
        Ok(Self {
            rows,
            cols,
            data: MatrixData::Sparse(csr),
        })
    }

    /// Builds a CSR block from `(row, col, value)` triplets. Zero values are
    /// dropped; duplicate coordinates are summed.
    pub fn sparse_from_triplets(
        rows: usize,
        cols: usize,
        triplets: &[(usize, usize, f64)],
    ) -> Result<Self, MatrixError> {
        let mut sorted = triplets.to_vec();
        for &(row, col, _) in &sorted {
            if row >= rows || col >= cols {
                return Err(MatrixError::OutOfBounds {
                    row,
                    col,
                    rows,
                    cols,
                });
            }
        }
        sorted.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));

        let mut row_ptr = vec![0usize; rows + 1];
        let mut col_idx = Vec::with_capacity(sorted.len());
        let mut values: Vec<f64> = Vec::with_capacity(sorted.len());
        let mut last: Option<(usize, usize)> = None;
        for (row, col, value) in sorted {
            if last == Some((row, col)) {
                if let Some(slot) = values.last_mut() {
                    *slot += value;
                }
                continue;
            }
            last = Some((row, col));
            col_idx.push(col);
            values.push(value);
            row_ptr[row + 1] += 1;
        }
        for row in 0..rows {
            row_ptr[row + 1] += row_ptr[row];
        }

        let mut block = Self::sparse(
            rows,
            cols,
            CsrData {
                row_ptr,
                col_idx,
                values,
            },
        )?;
        block.drop_explicit_zeros();
        Ok(block)
    }

    fn drop_explicit_zeros(&mut self) {
        let MatrixData::Sparse(csr) = &mut self.data else {
            return;
        };
        if csr.values.iter().all(|v| *v != 0.0) {
            return;
        }
        let mut row_ptr = Vec::with_capacity(csr.row_ptr.len());
        let mut col_idx = Vec::with_capacity(csr.col_idx.len());
        let mut values = Vec::with_capacity(csr.values.len());
        row_ptr.push(0);
        for row in 0..self.rows {
            for i in csr.row_ptr[row]..csr.row_ptr[row + 1] {
                if csr.values[i] != 0.0 {
                    col_idx.push(csr.col_idx[i]);
                    values.push(csr.values[i]);
                }
            }
            row_ptr.push(values.len());
        }
        *csr = CsrData {
            row_ptr,
            col_idx,
            values,
        };
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn data(&self) -> &MatrixData {
        &self.data
    }

    pub fn is_sparse(&self) -> bool {
        matches!(self.data, MatrixData::Sparse(_))
    }

    pub fn nnz(&self) -> usize {
        match &self.data {
            MatrixData::Dense(values) => values.iter().filter(|v| **v != 0.0).count(),
            MatrixData::Sparse(csr) => csr.values.len(),
        }
    }

    pub fn get(&self, row: usize, col: usize) -> Result<f64, MatrixError> {
        if row >= self.rows || col >= self.cols {
            return Err(MatrixError::OutOfBounds {
                row,
                col,
                rows: self.rows,
                cols: self.cols,
            });
        }
        Ok(match &self.data {
            MatrixData::Dense(values) => values[row * self.cols + col],
            MatrixData::Sparse(csr) => {
                let (start, end) = (csr.row_ptr[row], csr.row_ptr[row + 1]);
                csr.col_idx[start..end]
                    .binary_search(&col)
                    .map(|i| csr.values[start + i])
                    .unwrap_or(0.0)
            }
        })
    }

    /// Bytes held in memory, including the fixed block overhead.
    pub fn in_memory_size(&self) -> u64 {
        let payload = match &self.data {
            MatrixData::Dense(values) => values.len() as u64 * 8,
            MatrixData::Sparse(csr) => {
                let ptr = csr.row_ptr.len() as u64 * size_of::<usize>() as u64;
                let idx = csr.col_idx.len() as u64 * size_of::<usize>() as u64;
                ptr + idx + csr.values.len() as u64 * 8
            }
        };
        BLOCK_HEADER_BYTES + payload
    }

    /// Size of the serialized spill payload for this block's storage format.
    pub fn estimate_disk_size(&self) -> u64 {
        crate::codec::encoded_len(self.rows, self.cols, self.nnz_stored(), self.is_sparse())
    }

    pub fn estimate_disk_size_mb(&self) -> f64 {
        self.estimate_disk_size() as f64 / BYTES_PER_MB
    }

    /// Number of values physically stored (all cells for dense blocks).
    pub(crate) fn nnz_stored(&self) -> usize {
        match &self.data {
            MatrixData::Dense(values) => values.len(),
            MatrixData::Sparse(csr) => csr.values.len(),
        }
    }

    /// Value equality on the bit patterns, so NaN payloads and signed zeros
    /// compare exactly.
    pub fn bit_eq(&self, other: &Self) -> bool {
        if self.rows != other.rows || self.cols != other.cols {
            return false;
        }
        let same_bits = |a: &[f64], b: &[f64]| {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.to_bits() == y.to_bits())
        };
        match (&self.data, &other.data) {
            (MatrixData::Dense(a), MatrixData::Dense(b)) => same_bits(a, b),
            (MatrixData::Sparse(a), MatrixData::Sparse(b)) => {
                a.row_ptr == b.row_ptr && a.col_idx == b.col_idx && same_bits(&a.values, &b.values)
            }
            _ => false,
        }
    }
}
