//! Preconditioned MINRES (Paige & Saunders)
//!
//! Minimal-residual Lanczos method for symmetric operators, definite or not. The
//! Jacobi preconditioner must be positive definite, which [`Jacobi`] guarantees.
//! The recurrence estimate `phibar / beta1` measures the residual in the
//! preconditioner norm; once it drops below the tolerance the true relative residual
//! `||b - A x|| / ||b||` is checked as well, and iteration continues while that one
//! is still above it.

use super::preconditioner::Jacobi;
use super::vector_ops::{axpy, dot, sub};
use super::{relative_residual, LinearOperator, SolveParams};
use crate::config::SolverType;
use crate::error::{ConductivityError, ConductivityResult};
use rayon::prelude::*;

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

    let mut r1 = vec![0.0; n];
    let mut y = vec![0.0; n];
    op.apply(x, &mut y);
    sub(b, &y, &mut r1);
    precond.apply(&r1, &mut y);
    let beta1_sq = dot(&r1, &y);
    if beta1_sq < 0.0 {
        return Err(ConductivityError::degenerate(
            "MINRES preconditioner is not positive definite",
        ));
    }
    let beta1 = beta1_sq.sqrt();
    if beta1 == 0.0 {
        return Ok(0);
    }

    let mut r2 = r1.clone();
    let mut v = vec![0.0; n];
    let mut w = vec![0.0; n];
    let mut w1 = vec![0.0; n];
    let mut w2 = vec![0.0; n];

    let mut old_beta = 0.0;
    let mut beta = beta1;
    let mut dbar = 0.0;
    let mut epsilon = 0.0;
    let mut phibar = beta1;
    let mut cs = -1.0;
    let mut sn = 0.0;

    for iteration in 1..=params.max_iterations {
        let s = 1.0 / beta;
        v.par_iter_mut()
            .zip(y.par_iter())
            .for_each(|(vi, &yi)| *vi = s * yi);
        op.apply(&v, &mut y);
        if iteration >= 2 {
            axpy(-beta / old_beta, &r1, &mut y);
        }
        let alpha = dot(&v, &y);
        axpy(-alpha / beta, &r2, &mut y);
        std::mem::swap(&mut r1, &mut r2);
        r2.copy_from_slice(&y);
        precond.apply(&r2, &mut y);
        old_beta = beta;
        let beta_sq = dot(&r2, &y);
        if beta_sq < 0.0 || !beta_sq.is_finite() {
            return Err(ConductivityError::degenerate(format!(
                "MINRES Lanczos breakdown at iteration {iteration}"
            )));
        }
        beta = beta_sq.sqrt();

        // apply the previous rotation, then build the next one
        let old_epsilon = epsilon;
        let delta = cs * dbar + sn * alpha;
        let gbar = sn * dbar - cs * alpha;
        epsilon = sn * beta;
        dbar = -cs * beta;
        let gamma = gbar.hypot(beta).max(f64::EPSILON);
        cs = gbar / gamma;
        sn = beta / gamma;
        let phi = cs * phibar;
        phibar *= sn;

        // w = (v - old_epsilon * w1 - delta * w2) / gamma with the usual shift
        std::mem::swap(&mut w1, &mut w2);
        std::mem::swap(&mut w2, &mut w);
        let inv_gamma = 1.0 / gamma;
        w.par_iter_mut()
            .zip(v.par_iter().zip(w1.par_iter().zip(w2.par_iter())))
            .for_each(|(wi, (&vi, (&w1i, &w2i)))| {
                *wi = (vi - old_epsilon * w1i - delta * w2i) * inv_gamma;
            });
        axpy(phi, &w, x);

        let residual = phibar / beta1;
        if !residual.is_finite() {
            return Err(ConductivityError::degenerate(format!(
                "MINRES diverged at iteration {iteration}"
            )));
        }
        if residual <= params.tolerance
            && relative_residual(op, b, x, b_norm) <= params.tolerance
        {
            return Ok(iteration);
        }
        if beta == 0.0 {
            // Krylov space exhausted, the iterate is exact
            return Ok(iteration);
        }
    }

    Err(ConductivityError::Convergence {
        solver: SolverType::Minres,
        iterations: params.max_iterations,
        residual: phibar / beta1,
    })
}
