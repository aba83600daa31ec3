//! Feature matrix representation with validated dense and sparse variants
//!
//! The pipeline reads its input through [`FeatureMatrix`], a tagged variant over
//! a dense row/column matrix and a compressed sparse column (CSC) layout.
//! Construction goes through validating coercions that reject ragged, empty,
//! non-numeric or non-finite data with [`EmbeddingError::InvalidInput`].
//!
//! Sparse inputs keep a sorted-indices flag. The embedder establishes sorted
//! indices once at its boundary (see [`FeatureMatrix::with_sorted_indices`]) so
//! that every later lookup can binary search a column instead of scanning it.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

use std::borrow::Cow;

use log::debug;
use nalgebra::DMatrix;
use serde_json::Value;

use crate::error::{EmbeddingError, Result};

/// Numeric, rectangular feature matrix of shape `(n_samples, n_features)`
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureMatrix {
    /// Dense storage
    Dense(DMatrix<f64>),

    /// Compressed sparse column storage
    SparseCsc(CscMatrix),
}

/// Compressed sparse column matrix
///
/// Column `j` owns the entries `indptr[j]..indptr[j + 1]` of `indices` (row
/// positions) and `data` (values). Missing entries are zero.
#[derive(Debug, Clone, PartialEq)]
pub struct CscMatrix {
    nrows: usize,
    ncols: usize,
    indptr: Vec<usize>,
    indices: Vec<usize>,
    data: Vec<f64>,
    sorted_indices: bool,
}

impl CscMatrix {
    /// Build a CSC matrix from raw parts, validating the structure
    pub fn new(
        nrows: usize,
        ncols: usize,
        indptr: Vec<usize>,
        indices: Vec<usize>,
        data: Vec<f64>,
    ) -> Result<Self> {
        if indptr.len() != ncols + 1 {
            return Err(EmbeddingError::InvalidInput(format!(
                "indptr must have {} entries, got {}",
                ncols + 1,
                indptr.len()
            )));
        }
        if indptr[0] != 0 || indptr.windows(2).any(|w| w[0] > w[1]) {
            return Err(EmbeddingError::InvalidInput(
                "indptr must start at zero and be non-decreasing".to_string(),
            ));
        }
        let nnz = indptr[ncols];
        if indices.len() != nnz || data.len() != nnz {
            return Err(EmbeddingError::InvalidInput(format!(
                "expected {} stored entries, got {} indices and {} values",
                nnz,
                indices.len(),
                data.len()
            )));
        }
        if let Some(&row) = indices.iter().find(|&&row| row >= nrows) {
            return Err(EmbeddingError::InvalidInput(format!(
                "row index {} out of bounds for {} rows",
                row, nrows
            )));
        }
        if data.iter().any(|v| !v.is_finite()) {
            return Err(EmbeddingError::InvalidInput(
                "sparse matrix contains NaN or infinite values".to_string(),
            ));
        }

        let mut sorted_indices = true;
        for j in 0..ncols {
            let column = &indices[indptr[j]..indptr[j + 1]];
            if column.windows(2).any(|w| w[0] >= w[1]) {
                sorted_indices = false;
                let mut rows = column.to_vec();
                rows.sort_unstable();
                if rows.windows(2).any(|w| w[0] == w[1]) {
                    return Err(EmbeddingError::InvalidInput(format!(
                        "duplicate row index in column {}",
                        j
                    )));
                }
            }
        }

        Ok(Self {
            nrows,
            ncols,
            indptr,
            indices,
            data,
            sorted_indices,
        })
    }

    /// Compress a dense matrix, dropping exact zeros
    pub fn from_dense(dense: &DMatrix<f64>) -> Self {
        let mut indptr = Vec::with_capacity(dense.ncols() + 1);
        let mut indices = Vec::new();
        let mut data = Vec::new();
        indptr.push(0);
        for j in 0..dense.ncols() {
            for i in 0..dense.nrows() {
                let value = dense[(i, j)];
                if value != 0.0 {
                    indices.push(i);
                    data.push(value);
                }
            }
            indptr.push(indices.len());
        }

        Self {
            nrows: dense.nrows(),
            ncols: dense.ncols(),
            indptr,
            indices,
            data,
            sorted_indices: true,
        }
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    /// Number of explicitly stored entries
    pub fn nnz(&self) -> usize {
        self.data.len()
    }

    pub fn has_sorted_indices(&self) -> bool {
        self.sorted_indices
    }

    /// Sort the row indices of every column in place
    pub fn sort_indices(&mut self) {
        if self.sorted_indices {
            return;
        }
        for j in 0..self.ncols {
            let (start, end) = (self.indptr[j], self.indptr[j + 1]);
            let mut entries: Vec<(usize, f64)> = self.indices[start..end]
                .iter()
                .copied()
                .zip(self.data[start..end].iter().copied())
                .collect();
            entries.sort_unstable_by_key(|&(row, _)| row);
            for (offset, (row, value)) in entries.into_iter().enumerate() {
                self.indices[start + offset] = row;
                self.data[start + offset] = value;
            }
        }
        self.sorted_indices = true;
    }

    /// Value at `(row, col)`; binary search when indices are sorted
    pub fn get(&self, row: usize, col: usize) -> f64 {
        let (start, end) = (self.indptr[col], self.indptr[col + 1]);
        let rows = &self.indices[start..end];
        let position = if self.sorted_indices {
            rows.binary_search(&row).ok()
        } else {
            rows.iter().position(|&r| r == row)
        };
        position.map_or(0.0, |p| self.data[start + p])
    }

    /// Dense copy of column `col`, zeros included
    pub fn column(&self, col: usize) -> Vec<f64> {
        let mut values = vec![0.0; self.nrows];
        for k in self.indptr[col]..self.indptr[col + 1] {
            values[self.indices[k]] = self.data[k];
        }
        values
    }

    pub fn to_dense(&self) -> DMatrix<f64> {
        let mut dense = DMatrix::zeros(self.nrows, self.ncols);
        for j in 0..self.ncols {
            for k in self.indptr[j]..self.indptr[j + 1] {
                dense[(self.indices[k], j)] = self.data[k];
            }
        }
        dense
    }
}

impl FeatureMatrix {
    /// Validating coercion from row vectors
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self> {
        let ncols = rows.first().map(Vec::len).unwrap_or(0);
        if let Some((i, row)) = rows.iter().enumerate().find(|(_, row)| row.len() != ncols) {
            return Err(EmbeddingError::InvalidInput(format!(
                "ragged input: row {} has {} columns, expected {}",
                i,
                row.len(),
                ncols
            )));
        }
        let flat: Vec<f64> = rows.iter().flatten().copied().collect();
        Self::from_row_slice(rows.len(), ncols, &flat)
    }

    /// Validating coercion from a row-major buffer
    pub fn from_row_slice(nrows: usize, ncols: usize, data: &[f64]) -> Result<Self> {
        if data.len() != nrows * ncols {
            return Err(EmbeddingError::InvalidInput(format!(
                "buffer of {} values cannot be shaped as ({}, {})",
                data.len(),
                nrows,
                ncols
            )));
        }
        Self::from_dense(DMatrix::from_row_slice(nrows, ncols, data))
    }

    /// Validating coercion from an owned dense matrix
    pub fn from_dense(dense: DMatrix<f64>) -> Result<Self> {
        let matrix = FeatureMatrix::Dense(dense);
        matrix.validate()?;
        Ok(matrix)
    }

    /// Validating coercion from a CSC matrix
    pub fn from_csc(csc: CscMatrix) -> Result<Self> {
        let matrix = FeatureMatrix::SparseCsc(csc);
        matrix.validate()?;
        Ok(matrix)
    }

    /// Validating coercion from a JSON array of numeric arrays
    ///
    /// Strings, booleans, nulls, scalars and one-dimensional arrays are rejected.
    pub fn from_json(value: &Value) -> Result<Self> {
        let rows = value.as_array().ok_or_else(|| {
            EmbeddingError::InvalidInput("expected a two-dimensional array".to_string())
        })?;

        let mut parsed = Vec::with_capacity(rows.len());
        for (i, row) in rows.iter().enumerate() {
            let cells = row.as_array().ok_or_else(|| {
                EmbeddingError::InvalidInput(format!(
                    "row {} is not an array; expected a two-dimensional array",
                    i
                ))
            })?;
            let values = cells
                .iter()
                .enumerate()
                .map(|(j, cell)| {
                    cell.as_f64().ok_or_else(|| {
                        EmbeddingError::InvalidInput(format!(
                            "non-numeric value {} at ({}, {})",
                            cell, i, j
                        ))
                    })
                })
                .collect::<Result<Vec<f64>>>()?;
            parsed.push(values);
        }

        Self::from_rows(&parsed)
    }

    /// Check shape and value constraints shared by both variants
    pub fn validate(&self) -> Result<()> {
        let (nrows, ncols) = self.shape();
        if nrows == 0 || ncols == 0 {
            return Err(EmbeddingError::InvalidInput(format!(
                "found array with shape ({}, {}); at least one sample and one feature are required",
                nrows, ncols
            )));
        }
        let finite = match self {
            FeatureMatrix::Dense(dense) => dense.iter().all(|v| v.is_finite()),
            FeatureMatrix::SparseCsc(csc) => csc.data.iter().all(|v| v.is_finite()),
        };
        if !finite {
            return Err(EmbeddingError::InvalidInput(
                "input contains NaN or infinite values".to_string(),
            ));
        }
        Ok(())
    }

    /// Validated view with sorted sparse indices, sorting a copy only when needed
    pub fn with_sorted_indices(&self) -> Result<Cow<'_, FeatureMatrix>> {
        self.validate()?;
        match self {
            FeatureMatrix::SparseCsc(csc) if !csc.has_sorted_indices() => {
                debug!("Sorting sparse indices of ({}, {}) input", csc.nrows, csc.ncols);
                let mut sorted = csc.clone();
                sorted.sort_indices();
                Ok(Cow::Owned(FeatureMatrix::SparseCsc(sorted)))
            }
            _ => Ok(Cow::Borrowed(self)),
        }
    }

    pub fn nrows(&self) -> usize {
        match self {
            FeatureMatrix::Dense(dense) => dense.nrows(),
            FeatureMatrix::SparseCsc(csc) => csc.nrows,
        }
    }

    pub fn ncols(&self) -> usize {
        match self {
            FeatureMatrix::Dense(dense) => dense.ncols(),
            FeatureMatrix::SparseCsc(csc) => csc.ncols,
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.nrows(), self.ncols())
    }

    pub fn is_sparse(&self) -> bool {
        matches!(self, FeatureMatrix::SparseCsc(_))
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        match self {
            FeatureMatrix::Dense(dense) => dense[(row, col)],
            FeatureMatrix::SparseCsc(csc) => csc.get(row, col),
        }
    }

    /// Dense copy of column `col`
    pub fn column(&self, col: usize) -> Vec<f64> {
        match self {
            FeatureMatrix::Dense(dense) => dense.column(col).iter().copied().collect(),
            FeatureMatrix::SparseCsc(csc) => csc.column(col),
        }
    }

    /// Dense copy of row `row`
    pub fn row(&self, row: usize) -> Vec<f64> {
        (0..self.ncols()).map(|col| self.get(row, col)).collect()
    }

    pub fn to_dense(&self) -> Cow<'_, DMatrix<f64>> {
        match self {
            FeatureMatrix::Dense(dense) => Cow::Borrowed(dense),
            FeatureMatrix::SparseCsc(csc) => Cow::Owned(csc.to_dense()),
        }
    }
}

impl From<CscMatrix> for FeatureMatrix {
    fn from(csc: CscMatrix) -> Self {
        FeatureMatrix::SparseCsc(csc)
    }
}

/// Stack `top` above `bottom`, preserving row order within each block
pub fn vstack(top: &DMatrix<f64>, bottom: &DMatrix<f64>) -> Result<DMatrix<f64>> {
    if top.ncols() != bottom.ncols() {
        return Err(EmbeddingError::DimensionMismatch {
            expected: top.ncols(),
            actual: bottom.ncols(),
        });
    }
    let split = top.nrows();
    Ok(DMatrix::from_fn(split + bottom.nrows(), top.ncols(), |i, j| {
        if i < split {
            top[(i, j)]
        } else {
            bottom[(i - split, j)]
        }
    }))
}

/// Gather rows in the order given by `indices`
pub fn select_rows(matrix: &DMatrix<f64>, indices: &[usize]) -> DMatrix<f64> {
    DMatrix::from_fn(indices.len(), matrix.ncols(), |i, j| matrix[(indices[i], j)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn unsorted_csc() -> CscMatrix {
        // [[1, 0], [0, 2], [3, 4]] with column 0 stored as rows (2, 0)
        CscMatrix::new(3, 2, vec![0, 2, 4], vec![2, 0, 2, 1], vec![3.0, 1.0, 4.0, 2.0]).unwrap()
    }

    #[test]
    fn test_from_rows_shape() {
        let x = FeatureMatrix::from_rows(&[vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]]).unwrap();
        assert_eq!(x.shape(), (2, 3));
        assert_eq!(x.get(1, 2), 6.0);
        assert_eq!(x.row(0), vec![1.0, 2.0, 3.0]);
        assert_eq!(x.column(1), vec![2.0, 5.0]);
    }

    #[test]
    fn test_ragged_rows_rejected() {
        let err = FeatureMatrix::from_rows(&[vec![1.0, 2.0], vec![3.0]]).unwrap_err();
        assert!(matches!(err, EmbeddingError::InvalidInput(_)));
    }

    #[test]
    fn test_empty_and_non_finite_rejected() {
        assert!(matches!(
            FeatureMatrix::from_rows(&[]),
            Err(EmbeddingError::InvalidInput(_))
        ));
        assert!(matches!(
            FeatureMatrix::from_rows(&[vec![1.0, f64::NAN]]),
            Err(EmbeddingError::InvalidInput(_))
        ));
        assert!(matches!(
            FeatureMatrix::from_row_slice(2, 2, &[1.0, 2.0, 3.0]),
            Err(EmbeddingError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_json_coercion() {
        let x = FeatureMatrix::from_json(&json!([[1, 2.5], [3, -4]])).unwrap();
        assert_eq!(x.shape(), (2, 2));
        assert_eq!(x.get(0, 1), 2.5);

        for bad in [json!([["a", 1]]), json!([1.0, 2.0]), json!(7), json!([[null]])] {
            assert!(matches!(
                FeatureMatrix::from_json(&bad),
                Err(EmbeddingError::InvalidInput(_))
            ));
        }
    }

    #[test]
    fn test_csc_structure_validation() {
        assert!(CscMatrix::new(2, 1, vec![0, 1], vec![5], vec![1.0]).is_err());
        assert!(CscMatrix::new(2, 1, vec![0, 2], vec![1, 1], vec![1.0, 2.0]).is_err());
        assert!(CscMatrix::new(2, 2, vec![0, 1], vec![0], vec![1.0]).is_err());
        assert!(CscMatrix::new(2, 1, vec![0, 1], vec![0], vec![f64::INFINITY]).is_err());
    }

    #[test]
    fn test_csc_sorting_and_lookup() {
        let mut csc = unsorted_csc();
        assert!(!csc.has_sorted_indices());
        assert_eq!(csc.get(0, 0), 1.0);
        assert_eq!(csc.get(1, 0), 0.0);

        csc.sort_indices();
        assert!(csc.has_sorted_indices());
        assert_eq!(csc.get(0, 0), 1.0);
        assert_eq!(csc.get(2, 0), 3.0);
        assert_eq!(csc.get(2, 1), 4.0);
        assert_eq!(csc.column(0), vec![1.0, 0.0, 3.0]);
    }

    #[test]
    fn test_with_sorted_indices_sorts_once() {
        let x = FeatureMatrix::from(unsorted_csc());
        let prepared = x.with_sorted_indices().unwrap();
        assert!(matches!(prepared, Cow::Owned(_)));
        match prepared.as_ref() {
            FeatureMatrix::SparseCsc(csc) => assert!(csc.has_sorted_indices()),
            FeatureMatrix::Dense(_) => panic!("sparse input must stay sparse"),
        }

        let again = prepared.with_sorted_indices().unwrap();
        assert!(matches!(again, Cow::Borrowed(_)));
    }

    #[test]
    fn test_dense_sparse_agree() {
        let dense = DMatrix::from_row_slice(3, 2, &[1.0, 0.0, 0.0, 2.0, 3.0, 4.0]);
        let csc = CscMatrix::from_dense(&dense);
        assert_eq!(csc.nnz(), 4);
        assert_eq!(csc.to_dense(), dense);
        assert_eq!(unsorted_csc().to_dense(), dense);
    }

    #[test]
    fn test_vstack_and_select_rows() {
        let top = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 3.0, 4.0]);
        let bottom = DMatrix::from_row_slice(1, 2, &[5.0, 6.0]);
        let stacked = vstack(&top, &bottom).unwrap();
        assert_eq!(stacked.nrows(), 3);
        assert_eq!(stacked[(2, 1)], 6.0);

        let picked = select_rows(&stacked, &[2, 0]);
        assert_eq!(picked, DMatrix::from_row_slice(2, 2, &[5.0, 6.0, 1.0, 2.0]));

        let narrow = DMatrix::from_row_slice(1, 1, &[0.0]);
        assert!(matches!(
            vstack(&top, &narrow),
            Err(EmbeddingError::DimensionMismatch { expected: 2, actual: 1 })
        ));
    }
}
