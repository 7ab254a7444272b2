//! Compressed sparse row matrix
//!
//! Rows are assembled independently (one task per row range) and then packed into
//! the usual `row_ptr` / `col_idx` / `values` triple. Duplicate column entries in a
//! row are summed during packing, so stencil code can emit contributions freely.

use super::LinearOperator;
use rayon::prelude::*;

/// CSR sparse matrix
#[derive(Debug, Clone, PartialEq)]
pub struct CsrMatrix {
    n_rows: usize,
    n_cols: usize,
    row_ptr: Vec<usize>,
    col_idx: Vec<usize>,
    values: Vec<f64>,
}

impl CsrMatrix {
    /// Pack per-row `(column, value)` lists into CSR form
    ///
    /// Entries within a row may come in any order and may repeat; repeats are summed.
    ///
    /// # Panics
    ///
    /// Panics if a column index is `>= n_cols`
    #[must_use]
    pub fn from_rows(n_cols: usize, mut rows: Vec<Vec<(usize, f64)>>) -> Self {
        rows.par_iter_mut().for_each(|row| {
            row.sort_by_key(|&(col, _)| col);
            row.dedup_by(|next, kept| {
                if next.0 == kept.0 {
                    kept.1 += next.1;
                    true
                } else {
                    false
                }
            });
        });

        let n_rows = rows.len();
        let nnz: usize = rows.iter().map(Vec::len).sum();
        let mut row_ptr = Vec::with_capacity(n_rows + 1);
        let mut col_idx = Vec::with_capacity(nnz);
        let mut values = Vec::with_capacity(nnz);
        row_ptr.push(0);
        for row in rows {
            for (col, value) in row {
                assert!(col < n_cols, "column {col} out of range {n_cols}");
                col_idx.push(col);
                values.push(value);
            }
            row_ptr.push(col_idx.len());
        }

        Self {
            n_rows,
            n_cols,
            row_ptr,
            col_idx,
            values,
        }
    }

    /// Number of rows
    #[inline]
    #[must_use]
    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    /// Number of columns
    #[inline]
    #[must_use]
    pub fn n_cols(&self) -> usize {
        self.n_cols
    }

    /// Number of stored entries
    #[inline]
    #[must_use]
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Column indices and values of one row
    #[must_use]
    pub fn row(&self, row: usize) -> (&[usize], &[f64]) {
        let range = self.row_ptr[row]..self.row_ptr[row + 1];
        (&self.col_idx[range.clone()], &self.values[range])
    }

    /// Stored value at `(row, col)`, zero if absent
    #[must_use]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        let (cols, vals) = self.row(row);
        cols.binary_search(&col).map_or(0.0, |pos| vals[pos])
    }

    /// Whether the matrix equals its transpose within `tol` (relative to the largest entry)
    #[must_use]
    pub fn is_symmetric(&self, tol: f64) -> bool {
        if self.n_rows != self.n_cols {
            return false;
        }
        let scale = self
            .values
            .iter()
            .fold(0.0_f64, |m, v| m.max(v.abs()))
            .max(f64::MIN_POSITIVE);
        (0..self.n_rows).into_par_iter().all(|row| {
            let (cols, vals) = self.row(row);
            cols.iter()
                .zip(vals)
                .all(|(&col, &v)| (v - self.get(col, row)).abs() <= tol * scale)
        })
    }
}

impl LinearOperator for CsrMatrix {
    fn dim(&self) -> usize {
        self.n_rows
    }

    fn apply(&self, x: &[f64], y: &mut [f64]) {
        debug_assert_eq!(x.len(), self.n_cols);
        debug_assert_eq!(y.len(), self.n_rows);
        y.par_iter_mut().enumerate().for_each(|(row, yi)| {
            let (cols, vals) = self.row(row);
            *yi = cols.iter().zip(vals).map(|(&c, &v)| v * x[c]).sum();
        });
    }

    fn diagonal(&self) -> Vec<f64> {
        (0..self.n_rows)
            .into_par_iter()
            .map(|row| self.get(row, row))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tridiagonal(n: usize) -> CsrMatrix {
        let rows = (0..n)
            .map(|i| {
                let mut row = vec![(i, 2.0)];
                if i > 0 {
                    row.push((i - 1, -1.0));
                }
                if i + 1 < n {
                    row.push((i + 1, -1.0));
                }
                row
            })
            .collect();
        CsrMatrix::from_rows(n, rows)
    }

    #[test]
    fn test_duplicates_are_summed() {
        let m = CsrMatrix::from_rows(2, vec![vec![(1, 1.0), (0, 2.0), (1, 3.0)], vec![]]);
        assert_eq!(m.nnz(), 2);
        assert_eq!(m.get(0, 0), 2.0);
        assert_eq!(m.get(0, 1), 4.0);
        assert_eq!(m.get(1, 1), 0.0);
    }

    #[test]
    fn test_matvec() {
        let m = tridiagonal(4);
        let x = [1.0, 2.0, 3.0, 4.0];
        let mut y = [0.0; 4];
        m.apply(&x, &mut y);
        assert_eq!(y, [0.0, 0.0, 0.0, 5.0]);
        assert_eq!(m.diagonal(), vec![2.0; 4]);
    }

    #[test]
    fn test_symmetry_check() {
        assert!(tridiagonal(5).is_symmetric(1e-14));
        let skew = CsrMatrix::from_rows(2, vec![vec![(0, 1.0), (1, 0.5)], vec![(1, 1.0)]]);
        assert!(!skew.is_symmetric(1e-14));
    }
}
