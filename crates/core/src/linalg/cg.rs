//! Jacobi-preconditioned conjugate gradient
//!
//! For symmetric positive definite operators. The recurrence carries the true
//! residual `r = b - A x`, so the stopping test is on `||r|| / ||b||` directly.

use super::preconditioner::Jacobi;
use super::vector_ops::{axpy, dot, norm2, sub, xpby};
use super::{LinearOperator, SolveParams};
use crate::config::SolverType;
use crate::error::{ConductivityError, ConductivityResult};

/// Solve `A x = b` starting from the contents of `x`; returns the iteration count
pub(crate) fn solve(
    op: &dyn LinearOperator,
    b: &[f64],
    x: &mut [f64],
    b_norm: f64,
    params: &SolveParams,
) -> ConductivityResult<usize> {
    let n = op.dim();
    let precond = Jacobi::new(op);

    let mut r = vec![0.0; n];
    let mut ax = vec![0.0; n];
    op.apply(x, &mut ax);
    sub(b, &ax, &mut r);
    if norm2(&r) / b_norm <= params.tolerance {
        return Ok(0);
    }

    let mut z = vec![0.0; n];
    precond.apply(&r, &mut z);
    let mut p = z.clone();
    let mut rz = dot(&r, &z);
    let mut q = vec![0.0; n];
    let mut residual = f64::INFINITY;

    for iteration in 1..=params.max_iterations {
        op.apply(&p, &mut q);
        let pq = dot(&p, &q);
        if !(pq.is_finite() && pq > 0.0) {
            return Err(ConductivityError::degenerate(format!(
                "conjugate gradient breakdown at iteration {iteration} (p·Ap = {pq:.3e}); \
                 operator is not positive definite"
            )));
        }
        let alpha = rz / pq;
        axpy(alpha, &p, x);
        axpy(-alpha, &q, &mut r);

        residual = norm2(&r) / b_norm;
        if residual <= params.tolerance {
            return Ok(iteration);
        }

        precond.apply(&r, &mut z);
        let rz_next = dot(&r, &z);
        let beta = rz_next / rz;
        rz = rz_next;
        xpby(&z, beta, &mut p);
    }

    Err(ConductivityError::Convergence {
        solver: SolverType::Cg,
        iterations: params.max_iterations,
        residual,
    })
}
