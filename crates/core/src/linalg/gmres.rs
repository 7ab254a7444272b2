//! Restarted GMRES(m) with right Jacobi preconditioning
//!
//! Arnoldi with modified Gram-Schmidt builds the Krylov basis; Givens rotations keep
//! the Hessenberg least-squares problem triangular so the residual norm is known at
//! every inner step. Right preconditioning makes that norm the true residual norm.
//!
//! ```text
//! for each restart cycle:
//!   r = b - A·x, beta = ||r||, V[0] = r / beta
//!   for j = 0 .. m-1:
//!     w = A·M⁻¹·V[j]
//!     orthogonalise w against V[0..=j]  → H[0..=j+1, j]
//!     rotate H[:, j] and g, |g[j+1]| is the residual
//!   solve H y = g, x += M⁻¹ · V·y
//! ```

use super::preconditioner::Jacobi;
use super::vector_ops::{axpy, dot, norm2, scale_into, sub};
use super::{LinearOperator, SolveParams};
use crate::config::SolverType;
use crate::error::{ConductivityError, ConductivityResult};

/// Norm below which the Arnoldi vector is considered lost (lucky breakdown)
const HAPPY_BREAKDOWN: f64 = 1e-300;

#[derive(Clone, Copy)]
struct Givens {
    c: f64,
    s: f64,
}

impl Givens {
    /// Rotation mapping `(a, b)` onto `(r, 0)`
    fn new(a: f64, b: f64) -> Self {
        let r = a.hypot(b);
        if r < HAPPY_BREAKDOWN {
            Self { c: 1.0, s: 0.0 }
        } else {
            Self { c: a / r, s: b / r }
        }
    }

    #[inline]
    fn apply(self, a: &mut f64, b: &mut f64) {
        let ta = *a;
        let tb = *b;
        *a = self.c * ta + self.s * tb;
        *b = -self.s * ta + self.c * tb;
    }
}

/// Solve `A x = b` starting from the contents of `x`; returns the total inner iterations
pub(crate) fn solve(
    op: &dyn LinearOperator,
    b: &[f64],
    x: &mut [f64],
    b_norm: f64,
    params: &SolveParams,
) -> ConductivityResult<usize> {
    let n = op.dim();
    let m = params.restart.min(n).max(1);
    let precond = Jacobi::new(op);

    let mut r = vec![0.0; n];
    let mut w = vec![0.0; n];
    let mut z = vec![0.0; n];
    let mut total = 0;

    loop {
        op.apply(x, &mut w);
        sub(b, &w, &mut r);
        let beta = norm2(&r);
        let mut residual = beta / b_norm;
        if residual <= params.tolerance {
            return Ok(total);
        }
        if total >= params.max_iterations {
            return Err(ConductivityError::Convergence {
                solver: SolverType::Gmres,
                iterations: total,
                residual,
            });
        }

        let mut basis: Vec<Vec<f64>> = Vec::with_capacity(m + 1);
        let mut v0 = vec![0.0; n];
        scale_into(1.0 / beta, &r, &mut v0);
        basis.push(v0);

        // column-major (m+1) x m Hessenberg
        let mut h = vec![0.0; (m + 1) * m];
        let mut rotations: Vec<Givens> = Vec::with_capacity(m);
        let mut g = vec![0.0; m + 1];
        g[0] = beta;
        let mut k = 0;

        for j in 0..m {
            total += 1;
            k = j + 1;

            precond.apply(&basis[j], &mut z);
            op.apply(&z, &mut w);
            let col = &mut h[j * (m + 1)..(j + 1) * (m + 1)];
            for (i, v) in basis.iter().enumerate() {
                let hij = dot(&w, v);
                col[i] = hij;
                axpy(-hij, v, &mut w);
            }
            let h_next = norm2(&w);
            col[j + 1] = h_next;

            for (i, rot) in rotations.iter().enumerate() {
                let (upper, lower) = col.split_at_mut(i + 1);
                rot.apply(&mut upper[i], &mut lower[0]);
            }
            let rot = Givens::new(col[j], col[j + 1]);
            {
                let (upper, lower) = col.split_at_mut(j + 1);
                rot.apply(&mut upper[j], &mut lower[0]);
            }
            {
                let (upper, lower) = g.split_at_mut(j + 1);
                rot.apply(&mut upper[j], &mut lower[0]);
            }
            rotations.push(rot);

            residual = g[j + 1].abs() / b_norm;
            if !residual.is_finite() {
                return Err(ConductivityError::degenerate(format!(
                    "GMRES diverged at iteration {total}"
                )));
            }
            if residual <= params.tolerance
                || total >= params.max_iterations
                || h_next < HAPPY_BREAKDOWN
            {
                break;
            }
            let mut v_next = vec![0.0; n];
            scale_into(1.0 / h_next, &w, &mut v_next);
            basis.push(v_next);
        }

        // back substitution on the k x k upper triangle
        let mut y = vec![0.0; k];
        for i in (0..k).rev() {
            let mut acc = g[i];
            for l in i + 1..k {
                acc -= h[l * (m + 1) + i] * y[l];
            }
            let diag = h[i * (m + 1) + i];
            if diag.abs() < HAPPY_BREAKDOWN {
                return Err(ConductivityError::degenerate(
                    "GMRES Hessenberg matrix is singular; operator has a null space",
                ));
            }
            y[i] = acc / diag;
        }

        w.fill(0.0);
        for (yi, v) in y.iter().zip(&basis) {
            axpy(*yi, v, &mut w);
        }
        precond.apply(&w, &mut z);
        axpy(1.0, &z, x);

        if residual <= params.tolerance {
            return Ok(total);
        }
        if total >= params.max_iterations {
            return Err(ConductivityError::Convergence {
                solver: SolverType::Gmres,
                iterations: total,
                residual,
            });
        }
    }
}
