//! Linear system backend
//!
//! Both discretizations hand this module a [`LinearOperator`] (a CSR matrix or a
//! matrix-free stencil) and a right-hand side. The caller picks the backend; nothing
//! here switches method on its own.
//!
//! | Backend    | Operator                      | Stopping estimate            |
//! |------------|-------------------------------|------------------------------|
//! | BiCGSTAB   | general                       | true residual                |
//! | CG         | symmetric positive definite   | true residual                |
//! | GMRES(m)   | general                       | true residual (Givens)       |
//! | MINRES     | symmetric                     | preconditioned, then true    |
//! | Direct     | any nonsingular, ≤ 4096 rows  | exact                        |
//!
//! Every iterative backend uses Jacobi preconditioning. The residual reported in
//! [`SolveStats`] is always recomputed as `||b - A x|| / ||b||`.

mod bicgstab;
mod cg;
mod csr;
mod direct;
mod gmres;
mod minres;
mod preconditioner;
pub mod vector_ops;

pub use csr::CsrMatrix;
pub use direct::DIRECT_MAX_UNKNOWNS;
pub use preconditioner::Jacobi;

use crate::config::SolverType;
use crate::error::ConductivityResult;
use serde::{Deserialize, Serialize};
use tracing::debug;
use vector_ops::{norm2, sub};

/// Square linear operator `y = A x`
///
/// Implementations must be safe to share across threads; scratch state belongs to the
/// caller of [`LinearOperator::apply`], never to the operator.
pub trait LinearOperator: Sync {
    /// Number of rows (and columns)
    fn dim(&self) -> usize;

    /// Overwrite `y` with `A x`
    fn apply(&self, x: &[f64], y: &mut [f64]);

    /// Diagonal of `A`
    fn diagonal(&self) -> Vec<f64>;
}

/// Backend selection and stopping criteria
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SolveParams {
    /// Backend
    pub solver: SolverType,
    /// Relative residual tolerance
    pub tolerance: f64,
    /// Iteration limit
    pub max_iterations: usize,
    /// GMRES restart length
    pub restart: usize,
}

impl SolveParams {
    /// Parameters with the default GMRES restart
    #[must_use]
    pub fn new(solver: SolverType, tolerance: f64, max_iterations: usize) -> Self {
        Self {
            solver,
            tolerance,
            max_iterations,
            restart: 30,
        }
    }
}

/// Outcome of a successful solve
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SolveStats {
    /// Backend used
    pub solver: SolverType,
    /// Iterations performed (0 for the direct path)
    pub iterations: usize,
    /// Final relative residual `||b - A x|| / ||b||`
    pub residual: f64,
}

/// Solve `A x = b`, using the contents of `x` as the initial guess
///
/// On error `x` holds an unspecified partial iterate and must not be used.
pub fn solve(
    op: &dyn LinearOperator,
    b: &[f64],
    x: &mut [f64],
    params: &SolveParams,
) -> ConductivityResult<SolveStats> {
    debug_assert_eq!(b.len(), op.dim());
    debug_assert_eq!(x.len(), op.dim());

    let b_norm = norm2(b);
    if b_norm == 0.0 {
        x.fill(0.0);
        return Ok(SolveStats {
            solver: params.solver,
            iterations: 0,
            residual: 0.0,
        });
    }

    let iterations = match params.solver {
        SolverType::Bicgstab => bicgstab::solve(op, b, x, b_norm, params)?,
        SolverType::Cg => cg::solve(op, b, x, b_norm, params)?,
        SolverType::Gmres => gmres::solve(op, b, x, b_norm, params)?,
        SolverType::Minres => minres::solve(op, b, x, b_norm, params)?,
        SolverType::Direct => {
            direct::solve(op, b, x)?;
            0
        }
    };

    let residual = relative_residual(op, b, x, b_norm);
    debug!(
        "{} finished: {} iterations, relative residual {:.3e}",
        params.solver, iterations, residual
    );
    Ok(SolveStats {
        solver: params.solver,
        iterations,
        residual,
    })
}

/// `||b - A x|| / b_norm`
#[must_use]
pub fn relative_residual(op: &dyn LinearOperator, b: &[f64], x: &[f64], b_norm: f64) -> f64 {
    let mut ax = vec![0.0; op.dim()];
    op.apply(x, &mut ax);
    let mut r = vec![0.0; ax.len()];
    sub(b, &ax, &mut r);
    norm2(&r) / b_norm
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConductivityError;

    /// 2D 5-point Laplacian with Dirichlet walls, SPD
    fn laplacian_2d(n: usize) -> CsrMatrix {
        let idx = |i: usize, j: usize| i + n * j;
        let mut rows = Vec::with_capacity(n * n);
        for j in 0..n {
            for i in 0..n {
                let mut row = vec![(idx(i, j), 4.0)];
                if i > 0 {
                    row.push((idx(i - 1, j), -1.0));
                }
                if i + 1 < n {
                    row.push((idx(i + 1, j), -1.0));
                }
                if j > 0 {
                    row.push((idx(i, j - 1), -1.0));
                }
                if j + 1 < n {
                    row.push((idx(i, j + 1), -1.0));
                }
                rows.push(row);
            }
        }
        CsrMatrix::from_rows(n * n, rows)
    }

    /// Convection-diffusion matrix, non-symmetric but diagonally dominant
    fn convection_diffusion(n: usize) -> CsrMatrix {
        let rows = (0..n)
            .map(|i| {
                let mut row = vec![(i, 3.0)];
                if i > 0 {
                    row.push((i - 1, -1.6));
                }
                if i + 1 < n {
                    row.push((i + 1, -0.4));
                }
                row
            })
            .collect();
        CsrMatrix::from_rows(n, rows)
    }

    fn rhs(n: usize) -> Vec<f64> {
        (0..n).map(|i| 1.0 + (i % 5) as f64).collect()
    }

    fn check(op: &CsrMatrix, solver: SolverType, tolerance: f64) -> SolveStats {
        let b = rhs(op.dim());
        let mut x = vec![0.0; op.dim()];
        let stats = solve(op, &b, &mut x, &SolveParams::new(solver, tolerance, 5000)).unwrap();
        let b_norm = norm2(&b);
        assert_eq!(stats.solver, solver);
        assert!(
            (relative_residual(op, &b, &x, b_norm) - stats.residual).abs() < 1e-15,
            "reported residual must be the true residual"
        );
        stats
    }

    #[test]
    fn test_symmetric_backends_converge() {
        let op = laplacian_2d(12);
        for solver in [
            SolverType::Cg,
            SolverType::Minres,
            SolverType::Bicgstab,
            SolverType::Gmres,
            SolverType::Direct,
        ] {
            let stats = check(&op, solver, 1e-10);
            assert!(stats.residual < 1e-8, "{solver}: {}", stats.residual);
        }
    }

    #[test]
    fn test_general_backends_converge() {
        let op = convection_diffusion(200);
        for solver in [SolverType::Bicgstab, SolverType::Gmres, SolverType::Direct] {
            let stats = check(&op, solver, 1e-10);
            assert!(stats.residual < 1e-9, "{solver}: {}", stats.residual);
        }
    }

    #[test]
    fn test_gmres_restarts() {
        let op = laplacian_2d(16);
        let b = rhs(op.dim());
        let mut x = vec![0.0; op.dim()];
        let params = SolveParams {
            restart: 5,
            ..SolveParams::new(SolverType::Gmres, 1e-8, 5000)
        };
        let stats = solve(&op, &b, &mut x, &params).unwrap();
        assert!(stats.iterations > 5);
        assert!(stats.residual < 1e-7);
    }

    #[test]
    fn test_iteration_limit_reports_convergence_error() {
        let op = laplacian_2d(20);
        let b = rhs(op.dim());
        for solver in [
            SolverType::Cg,
            SolverType::Minres,
            SolverType::Bicgstab,
            SolverType::Gmres,
        ] {
            let mut x = vec![0.0; op.dim()];
            let err = solve(&op, &b, &mut x, &SolveParams::new(solver, 1e-12, 3)).unwrap_err();
            match err {
                ConductivityError::Convergence {
                    solver: s,
                    iterations,
                    residual,
                } => {
                    assert_eq!(s, solver);
                    assert_eq!(iterations, 3);
                    assert!(residual > 1e-12);
                }
                other => panic!("{solver}: unexpected error {other}"),
            }
        }
    }

    #[test]
    fn test_tighter_tolerance_never_increases_residual() {
        let op = laplacian_2d(14);
        for solver in [SolverType::Cg, SolverType::Bicgstab, SolverType::Minres] {
            let loose = check(&op, solver, 1e-4);
            let tight = check(&op, solver, 1e-9);
            assert!(
                tight.residual <= loose.residual,
                "{solver}: {} > {}",
                tight.residual,
                loose.residual
            );
            assert!(tight.iterations >= loose.iterations);
        }
    }

    #[test]
    fn test_minres_success_meets_tolerance_in_true_residual() {
        // strongly varying diagonal makes the Jacobi norm differ from the plain norm
        let n = 300;
        let rows = (0..n)
            .map(|i| {
                let d = 2.0 + 1e3 * ((i % 7) as f64);
                let mut row = vec![(i, d)];
                if i > 0 {
                    row.push((i - 1, -1.0));
                }
                if i + 1 < n {
                    row.push((i + 1, -1.0));
                }
                row
            })
            .collect();
        let op = CsrMatrix::from_rows(n, rows);
        for tolerance in [1e-2, 1e-4, 1e-6] {
            let stats = check(&op, SolverType::Minres, tolerance);
            assert!(
                stats.residual <= tolerance,
                "residual {} above tolerance {tolerance}",
                stats.residual
            );
        }
    }

    #[test]
    fn test_zero_rhs_gives_zero_solution() {
        let op = laplacian_2d(4);
        let mut x = vec![1.0; 16];
        let stats = solve(
            &op,
            &[0.0; 16],
            &mut x,
            &SolveParams::new(SolverType::Bicgstab, 1e-6, 10),
        )
        .unwrap();
        assert_eq!(stats.iterations, 0);
        assert!(x.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_direct_detects_singular_matrix() {
        // pure Neumann 1D Laplacian has the constant null space
        let n = 6;
        let rows = (0..n)
            .map(|i| {
                let mut row = Vec::new();
                if i > 0 {
                    row.push((i - 1, -1.0));
                    row.push((i, 1.0));
                }
                if i + 1 < n {
                    row.push((i + 1, -1.0));
                    row.push((i, 1.0));
                }
                row
            })
            .collect();
        let op = CsrMatrix::from_rows(n, rows);
        let mut x = vec![0.0; n];
        let err = solve(
            &op,
            &rhs(n),
            &mut x,
            &SolveParams::new(SolverType::Direct, 1e-8, 1),
        )
        .unwrap_err();
        assert!(matches!(err, ConductivityError::NumericalDegeneracy(_)));
    }
}
