//! Binary node-membership matrices produced by decision-path extraction
//!
//! Row `i` of a [`MembershipMatrix`] lists the global node indices visited by
//! sample `i`. Global indices are per-tree node ids shifted by the tree's
//! offset in [`DecisionPath::node_offsets`].
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

use nalgebra::DMatrix;

use crate::error::{EmbeddingError, Result};

/// Sparse binary matrix in compressed sparse row form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipMatrix {
    ncols: usize,
    indptr: Vec<usize>,
    indices: Vec<usize>,
}

impl MembershipMatrix {
    /// Build from per-row lists of visited columns
    pub fn from_rows(ncols: usize, rows: Vec<Vec<usize>>) -> Result<Self> {
        let mut indptr = Vec::with_capacity(rows.len() + 1);
        let mut indices = Vec::with_capacity(rows.iter().map(Vec::len).sum());
        indptr.push(0);
        for (i, mut row) in rows.into_iter().enumerate() {
            row.sort_unstable();
            row.dedup();
            if let Some(&col) = row.last().filter(|&&col| col >= ncols) {
                return Err(EmbeddingError::Classifier(format!(
                    "row {} visits node {} beyond {} nodes",
                    i, col, ncols
                )));
            }
            indices.extend(row);
            indptr.push(indices.len());
        }

        Ok(Self {
            ncols,
            indptr,
            indices,
        })
    }

    pub fn nrows(&self) -> usize {
        self.indptr.len() - 1
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.nrows(), self.ncols)
    }

    /// Number of set entries
    pub fn nnz(&self) -> usize {
        self.indices.len()
    }

    /// Sorted columns set in row `row`
    pub fn row(&self, row: usize) -> &[usize] {
        &self.indices[self.indptr[row]..self.indptr[row + 1]]
    }

    pub fn contains(&self, row: usize, col: usize) -> bool {
        self.row(row).binary_search(&col).is_ok()
    }

    /// Dense 0/1 copy
    pub fn to_dense(&self) -> DMatrix<u8> {
        let mut dense = DMatrix::zeros(self.nrows(), self.ncols);
        for i in 0..self.nrows() {
            for &j in self.row(i) {
                dense[(i, j)] = 1;
            }
        }
        dense
    }

    /// Rows gathered in the order given by `indices`
    pub fn select_rows(&self, indices: &[usize]) -> Self {
        let mut indptr = Vec::with_capacity(indices.len() + 1);
        let mut gathered = Vec::new();
        indptr.push(0);
        for &i in indices {
            gathered.extend_from_slice(self.row(i));
            indptr.push(gathered.len());
        }
        Self {
            ncols: self.ncols,
            indptr,
            indices: gathered,
        }
    }
}

/// Decision-path indicator plus the node ranges owned by each tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecisionPath {
    /// Sample-by-node membership over all trees
    pub indicator: MembershipMatrix,

    /// Tree `t` owns columns `node_offsets[t]..node_offsets[t + 1]`
    pub node_offsets: Vec<usize>,
}

impl DecisionPath {
    pub fn n_trees(&self) -> usize {
        self.node_offsets.len().saturating_sub(1)
    }

    /// Columns of tree `tree` visited by `row`, as tree-local node ids
    pub fn tree_nodes(&self, row: usize, tree: usize) -> Vec<usize> {
        let (start, end) = (self.node_offsets[tree], self.node_offsets[tree + 1]);
        self.indicator
            .row(row)
            .iter()
            .filter(|&&col| col >= start && col < end)
            .map(|&col| col - start)
            .collect()
    }
}
