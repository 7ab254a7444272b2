//! Diagonal (Jacobi) preconditioner

use super::LinearOperator;
use rayon::prelude::*;

/// Diagonal entries below this magnitude are treated as missing
const DIAGONAL_FLOOR: f64 = 1e-300;

/// `z = D⁻¹ r` with `D = |diag(A)|`
///
/// The absolute value keeps the preconditioner positive definite, which MINRES and
/// CG require. Rows without a usable diagonal are passed through unchanged.
#[derive(Debug, Clone)]
pub struct Jacobi {
    inv_diag: Vec<f64>,
}

impl Jacobi {
    /// Build from the operator's diagonal
    #[must_use]
    pub fn new(op: &dyn LinearOperator) -> Self {
        let inv_diag = op
            .diagonal()
            .into_par_iter()
            .map(|d| {
                if d.abs() > DIAGONAL_FLOOR {
                    1.0 / d.abs()
                } else {
                    1.0
                }
            })
            .collect();
        Self { inv_diag }
    }

    /// Apply the preconditioner
    pub fn apply(&self, r: &[f64], z: &mut [f64]) {
        z.par_iter_mut()
            .zip(r.par_iter().zip(self.inv_diag.par_iter()))
            .for_each(|(zi, (&ri, &di))| *zi = ri * di);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::CsrMatrix;

    #[test]
    fn test_scales_by_inverse_diagonal() {
        let m = CsrMatrix::from_rows(3, vec![vec![(0, 4.0)], vec![(1, -2.0)], vec![(0, 1.0)]]);
        let jacobi = Jacobi::new(&m);
        let mut z = [0.0; 3];
        jacobi.apply(&[4.0, 4.0, 4.0], &mut z);
        assert_eq!(z, [1.0, 2.0, 4.0]);
    }
}
