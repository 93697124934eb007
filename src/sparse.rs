//! Compressed Sparse Row (CSR) matrix.
//!
//! Holds the symbolic MNA matrices G and C. Generic over the entry type so the
//! same storage serves symbolic (`Expr`) and numeric entries.

use std::ops::AddAssign;

use crate::expr::Expr;

/// Sparse matrix in Compressed Sparse Row format.
#[derive(Debug, Clone, PartialEq)]
pub struct CsrMatrix<T> {
    pub nrows: usize,
    pub ncols: usize,
    /// Non-zero values, stored row by row.
    pub values: Vec<T>,
    /// Column index for each non-zero value.
    pub col_indices: Vec<usize>,
    /// `row_pointers[i]` is the index into values/col_indices where row i starts.
    /// `row_pointers[nrows]` = total number of non-zeros.
    pub row_pointers: Vec<usize>,
}

impl<T: Clone + Default + AddAssign> CsrMatrix<T> {
    /// Create an empty matrix with no non-zero entries.
    pub fn new(nrows: usize, ncols: usize) -> Self {
        Self {
            nrows,
            ncols,
            values: Vec::new(),
            col_indices: Vec::new(),
            row_pointers: vec![0; nrows + 1],
        }
    }

    /// Number of stored entries.
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Build CSR matrix from (row, col, value) triplets.
    /// Duplicate entries at the same (row, col) are summed.
    pub fn from_triplets(nrows: usize, ncols: usize, triplets: &[(usize, usize, T)]) -> Self {
        if triplets.is_empty() {
            return Self::new(nrows, ncols);
        }

        // Stable sort keeps stamp order within one position.
        let mut indices: Vec<usize> = (0..triplets.len()).collect();
        indices.sort_by_key(|&i| (triplets[i].0, triplets[i].1));

        let mut values = Vec::with_capacity(triplets.len());
        let mut col_indices = Vec::with_capacity(triplets.len());
        let mut row_pointers = vec![0usize; nrows + 1];

        let first = indices[0];
        let mut cur_row = triplets[first].0;
        let mut cur_col = triplets[first].1;
        let mut cur_val = triplets[first].2.clone();

        for &idx in &indices[1..] {
            let (row, col, ref val) = triplets[idx];
            if row == cur_row && col == cur_col {
                cur_val += val.clone();
            } else {
                values.push(std::mem::take(&mut cur_val));
                col_indices.push(cur_col);
                row_pointers[cur_row + 1] += 1;
                cur_row = row;
                cur_col = col;
                cur_val = val.clone();
            }
        }
        values.push(cur_val);
        col_indices.push(cur_col);
        row_pointers[cur_row + 1] += 1;

        for i in 1..=nrows {
            row_pointers[i] += row_pointers[i - 1];
        }

        Self {
            nrows,
            ncols,
            values,
            col_indices,
            row_pointers,
        }
    }

    /// Entry at (row, col), if stored.
    pub fn get(&self, row: usize, col: usize) -> Option<&T> {
        (self.row_pointers[row]..self.row_pointers[row + 1])
            .find(|&idx| self.col_indices[idx] == col)
            .map(|idx| &self.values[idx])
    }

    /// Iterate stored entries as (row, col, value).
    pub fn entries(&self) -> impl Iterator<Item = (usize, usize, &T)> {
        (0..self.nrows).flat_map(move |row| {
            (self.row_pointers[row]..self.row_pointers[row + 1])
                .map(move |idx| (row, self.col_indices[idx], &self.values[idx]))
        })
    }

    /// Convert to dense matrix (row-major).
    pub fn to_dense(&self) -> Vec<Vec<T>> {
        let mut dense = vec![vec![T::default(); self.ncols]; self.nrows];
        for (row, col, value) in self.entries() {
            dense[row][col] = value.clone();
        }
        dense
    }
}

/// Combine G and C into the symbolic system matrix A = G + s·C.
pub fn form_system_matrix(g: &CsrMatrix<Expr>, c: &CsrMatrix<Expr>) -> CsrMatrix<Expr> {
    assert_eq!(g.nrows, c.nrows);
    assert_eq!(g.ncols, c.ncols);

    let triplets: Vec<(usize, usize, Expr)> = g
        .entries()
        .map(|(row, col, v)| (row, col, v.clone()))
        .chain(
            c.entries()
                .map(|(row, col, v)| (row, col, Expr::s() * v.clone())),
        )
        .filter(|(_, _, v)| !v.is_zero())
        .collect();

    CsrMatrix::from_triplets(g.nrows, g.ncols, &triplets)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_matrix() {
        let m: CsrMatrix<f64> = CsrMatrix::new(3, 3);
        assert_eq!(m.nnz(), 0);
        assert_eq!(m.row_pointers, vec![0, 0, 0, 0]);
    }

    #[test]
    fn test_from_triplets_duplicates_summed() {
        let triplets = vec![(0, 0, 1.0), (0, 0, 2.0), (1, 1, 3.0)];
        let m = CsrMatrix::from_triplets(2, 2, &triplets);
        assert_eq!(m.nnz(), 2);
        assert_eq!(m.to_dense(), vec![vec![3.0, 0.0], vec![0.0, 3.0]]);
        assert_eq!(m.get(1, 1), Some(&3.0));
        assert_eq!(m.get(0, 1), None);
    }

    #[test]
    fn test_symbolic_triplets() {
        let g = Expr::sym("R1").recip();
        let triplets = vec![(0, 0, g.clone()), (1, 1, g.clone()), (0, 0, Expr::one())];
        let m = CsrMatrix::from_triplets(2, 2, &triplets);
        assert_eq!(m.get(0, 0), Some(&(Expr::one() + g.clone())));
        assert_eq!(m.get(1, 1), Some(&g));
    }

    #[test]
    fn test_form_system_matrix() {
        // G = [[1/R, 0], [0, 1]], C = [[C1, 0], [0, 0]]
        let g = CsrMatrix::from_triplets(
            2,
            2,
            &[(0, 0, Expr::sym("R1").recip()), (1, 1, Expr::one())],
        );
        let c = CsrMatrix::from_triplets(2, 2, &[(0, 0, Expr::sym("C1"))]);
        let a = form_system_matrix(&g, &c);
        let dense = a.to_dense();
        assert_eq!(dense[0][0], Expr::sym("R1").recip() + Expr::s() * Expr::sym("C1"));
        assert_eq!(dense[1][1], Expr::one());
        assert!(dense[0][1].is_zero());
    }
}
