//! Right-preconditioned BiCGSTAB
//!
//! van der Vorst's stabilized bi-conjugate gradient for general (non-symmetric)
//! operators, with Jacobi applied on the right so `r` stays the true residual.

use super::preconditioner::Jacobi;
use super::vector_ops::{axpy, dot, norm2, sub};
use super::{LinearOperator, SolveParams};
use crate::config::SolverType;
use crate::error::{ConductivityError, ConductivityResult};
use rayon::prelude::*;

/// Magnitude under which a recurrence scalar counts as a breakdown
const BREAKDOWN: f64 = 1e-300;

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
    let mut scratch = vec![0.0; n];
    op.apply(x, &mut scratch);
    sub(b, &scratch, &mut r);
    let mut residual = norm2(&r) / b_norm;
    if residual <= params.tolerance {
        return Ok(0);
    }

    let r_hat = r.clone();
    let mut p = vec![0.0; n];
    let mut v = vec![0.0; n];
    let mut p_hat = vec![0.0; n];
    let mut s = vec![0.0; n];
    let mut s_hat = vec![0.0; n];
    let mut t = vec![0.0; n];
    let mut rho = 1.0;
    let mut alpha = 1.0;
    let mut omega = 1.0;

    for iteration in 1..=params.max_iterations {
        let rho_next = dot(&r_hat, &r);
        if rho_next.abs() < BREAKDOWN {
            return Err(breakdown(iteration, "rho", residual));
        }

        if iteration == 1 {
            p.copy_from_slice(&r);
        } else {
            let beta = (rho_next / rho) * (alpha / omega);
            p.par_iter_mut()
                .zip(r.par_iter().zip(v.par_iter()))
                .for_each(|(pi, (&ri, &vi))| *pi = ri + beta * (*pi - omega * vi));
        }
        rho = rho_next;

        precond.apply(&p, &mut p_hat);
        op.apply(&p_hat, &mut v);
        let denom = dot(&r_hat, &v);
        if denom.abs() < BREAKDOWN {
            return Err(breakdown(iteration, "r̂·v", residual));
        }
        alpha = rho / denom;

        s.copy_from_slice(&r);
        axpy(-alpha, &v, &mut s);
        let s_residual = norm2(&s) / b_norm;
        if s_residual <= params.tolerance {
            axpy(alpha, &p_hat, x);
            return Ok(iteration);
        }

        precond.apply(&s, &mut s_hat);
        op.apply(&s_hat, &mut t);
        let tt = dot(&t, &t);
        if tt < BREAKDOWN {
            return Err(breakdown(iteration, "t·t", s_residual));
        }
        omega = dot(&t, &s) / tt;

        axpy(alpha, &p_hat, x);
        axpy(omega, &s_hat, x);
        r.copy_from_slice(&s);
        axpy(-omega, &t, &mut r);

        residual = norm2(&r) / b_norm;
        if !residual.is_finite() {
            return Err(ConductivityError::degenerate(format!(
                "BiCGSTAB diverged at iteration {iteration}"
            )));
        }
        if residual <= params.tolerance {
            return Ok(iteration);
        }
        if omega.abs() < BREAKDOWN {
            return Err(breakdown(iteration, "omega", residual));
        }
    }

    Err(ConductivityError::Convergence {
        solver: SolverType::Bicgstab,
        iterations: params.max_iterations,
        residual,
    })
}

fn breakdown(iteration: usize, quantity: &str, residual: f64) -> ConductivityError {
    ConductivityError::degenerate(format!(
        "BiCGSTAB breakdown at iteration {iteration} ({quantity} vanished, relative residual {residual:.3e})"
    ))
}
