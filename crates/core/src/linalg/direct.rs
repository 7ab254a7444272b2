//! Dense LU path for small systems
//!
//! The operator is densified column by column (one product per unit vector), which
//! works for both assembled and matrix-free operators. Intended for small grids and
//! for cross-checking the iterative backends.

use super::LinearOperator;
use crate::error::{ConductivityError, ConductivityResult};
use nalgebra::{DMatrix, DVector};
use tracing::debug;

/// Largest system the dense path accepts
pub const DIRECT_MAX_UNKNOWNS: usize = 4096;

/// Solve `A x = b` by partial-pivot LU, overwriting `x`
pub(crate) fn solve(op: &dyn LinearOperator, b: &[f64], x: &mut [f64]) -> ConductivityResult<()> {
    let n = op.dim();
    if n > DIRECT_MAX_UNKNOWNS {
        return Err(ConductivityError::config(format!(
            "direct solver limited to {DIRECT_MAX_UNKNOWNS} unknowns, system has {n}; \
             choose an iterative solver"
        )));
    }
    debug!("Densifying {}x{} operator for LU", n, n);

    let mut dense = DMatrix::<f64>::zeros(n, n);
    let mut unit = vec![0.0; n];
    let mut column = vec![0.0; n];
    for j in 0..n {
        unit[j] = 1.0;
        op.apply(&unit, &mut column);
        unit[j] = 0.0;
        dense.column_mut(j).copy_from_slice(&column);
    }

    let rhs = DVector::from_column_slice(b);
    let solution = dense
        .lu()
        .solve(&rhs)
        .ok_or_else(|| ConductivityError::degenerate("LU factorization found a singular matrix"))?;
    if solution.iter().any(|v| !v.is_finite()) {
        return Err(ConductivityError::degenerate(
            "LU solution contains non-finite values",
        ));
    }
    x.copy_from_slice(solution.as_slice());
    Ok(())
}
