//! Q1 finite-element solver on a periodic voxel mesh
//!
//! Every voxel is a trilinear hexahedral element; nodes sit at voxel corners and wrap
//! periodically, so there is exactly one node per voxel (node `(x, y, z)` is the lower
//! corner of voxel `(x, y, z)`). The temperature is split into a macroscopic ramp and a
//! periodic fluctuation,
//!
//! ```text
//! T = g·x + t,   g = e_a / L_a
//! ∫ ∇v · K (g + ∇t) dV = 0   for every periodic v
//! ```
//!
//! which gives the symmetric system `A t = -f(g)`. The constant null space of the
//! periodic operator is removed by pinning node 0 (its row and column become the
//! identity), keeping `A` symmetric so MINRES or CG apply.
//!
//! Element matrices come from analytic reference-cube integrals; see [`ElementKernel`].
//! The assembled mode gathers them into a 27-point CSR matrix, the matrix-free mode
//! evaluates them on the fly and is limited to isotropic conductivity.

use super::{AxisSolution, ConductivitySolver};
use crate::config::{ConductivityConfig, FeAssembly, Method, SideBc};
use crate::error::{ConductivityError, ConductivityResult};
use crate::grid::{coordinates, linear_index, ScalarField, Shape, VectorField, VoxelGrid};
use crate::linalg::{self, CsrMatrix, LinearOperator, SolveParams};
use crate::materials::ConductivityField;
use nalgebra::{Matrix3, Vector3};
use rayon::prelude::*;
use tracing::{debug, info};

/// Node whose fluctuation is fixed to zero
const PINNED: usize = 0;

/// Finite-element solver (periodic boundaries only)
#[derive(Debug, Clone, Copy, Default)]
pub struct FeSolver;

impl ConductivitySolver for FeSolver {
    fn method(&self) -> Method {
        Method::FiniteElement
    }

    fn solve(
        &self,
        grid: &VoxelGrid,
        field: &ConductivityField,
        config: &ConductivityConfig,
    ) -> ConductivityResult<AxisSolution> {
        solve(grid, field, config)
    }
}

/// Corner offset of local node `i`: bit 0 is x, bit 1 is y, bit 2 is z
#[inline]
fn offset(i: usize) -> [usize; 3] {
    [i & 1, (i >> 1) & 1, (i >> 2) & 1]
}

/// Slope sign of the 1D linear shape function at corner offset `o`
#[inline]
fn slope(o: usize) -> f64 {
    if o == 1 {
        1.0
    } else {
        -1.0
    }
}

/// Reference-cube integrals of the eight trilinear shape functions
///
/// On the unit cube `N_i = Π_d φ_{o_d}(ξ_d)` with `φ_0 = 1 - ξ`, `φ_1 = ξ`. Each
/// integral factorizes per dimension into one of
///
/// ```text
/// ∫ φ'_a φ'_b = s_a s_b     ∫ φ'_a φ_b = s_a / 2     ∫ φ_a φ_b = 1/3 (a = b), 1/6 (a ≠ b)
/// ```
///
/// For an element of edge `h` and tensor `K`, `Ke = h Σ_pq K_pq M_pq` and the load of a
/// macroscopic gradient `g` is `h² Σ_p (K g)_p G_p`.
#[derive(Debug, Clone)]
pub(crate) struct ElementKernel {
    /// `∫ ∂_p N_i ∂_q N_j`, indexed `[p][q][i][j]`
    mref: [[[[f64; 8]; 8]; 3]; 3],
    /// `∫ ∂_p N_i`, indexed `[p][i]`; also `∂_p N_i` at the centroid
    gref: [[f64; 8]; 3],
}

impl ElementKernel {
    pub(crate) fn new() -> Self {
        let mut mref = [[[[0.0; 8]; 8]; 3]; 3];
        let mut gref = [[0.0; 8]; 3];
        for i in 0..8 {
            let oi = offset(i);
            for p in 0..3 {
                gref[p][i] = 0.25 * slope(oi[p]);
            }
            for j in 0..8 {
                let oj = offset(j);
                for p in 0..3 {
                    for q in 0..3 {
                        let mut value = 1.0;
                        for d in 0..3 {
                            value *= match (d == p, d == q) {
                                (true, true) => slope(oi[d]) * slope(oj[d]),
                                (true, false) => 0.5 * slope(oi[d]),
                                (false, true) => 0.5 * slope(oj[d]),
                                (false, false) if oi[d] == oj[d] => 1.0 / 3.0,
                                (false, false) => 1.0 / 6.0,
                            };
                        }
                        mref[p][q][i][j] = value;
                    }
                }
            }
        }
        Self { mref, gref }
    }

    /// Element stiffness matrix
    pub(crate) fn stiffness(&self, k: &Matrix3<f64>, h: f64) -> [[f64; 8]; 8] {
        let mut ke = [[0.0; 8]; 8];
        for p in 0..3 {
            for q in 0..3 {
                let kpq = h * k[(p, q)];
                if kpq == 0.0 {
                    continue;
                }
                let m = &self.mref[p][q];
                for i in 0..8 {
                    for j in 0..8 {
                        ke[i][j] += kpq * m[i][j];
                    }
                }
            }
        }
        ke
    }

    /// Isotropic element matrix for unit conductivity and unit edge
    pub(crate) fn laplacian(&self) -> [[f64; 8]; 8] {
        self.stiffness(&Matrix3::identity(), 1.0)
    }

    /// Right-hand side contribution `-h² Σ_p (K g)_p G_p[i]` of local node `i`
    #[inline]
    pub(crate) fn load(&self, i: usize, kg: &Vector3<f64>, h: f64) -> f64 {
        -h * h * (0..3).map(|p| kg[p] * self.gref[p][i]).sum::<f64>()
    }

    /// Element-mean gradient of a field with the given corner values
    pub(crate) fn gradient(&self, values: &[f64; 8], h: f64) -> Vector3<f64> {
        Vector3::from_fn(|p, _| {
            values
                .iter()
                .zip(&self.gref[p])
                .map(|(v, g)| v * g)
                .sum::<f64>()
                / h
        })
    }
}

/// Periodic node/element connectivity on a voxel grid
#[derive(Debug, Clone, Copy)]
struct PeriodicMesh {
    shape: Shape,
}

impl PeriodicMesh {
    /// Global node at local corner `i` of element `e`
    #[inline]
    fn node(&self, e: [usize; 3], i: usize) -> usize {
        let o = offset(i);
        let [nx, ny, nz] = self.shape;
        linear_index(
            self.shape,
            (e[0] + o[0]) % nx,
            (e[1] + o[1]) % ny,
            (e[2] + o[2]) % nz,
        )
    }

    /// Element that holds `node` as its local corner `i`
    #[inline]
    fn element(&self, node: [usize; 3], i: usize) -> [usize; 3] {
        let o = offset(i);
        let [nx, ny, nz] = self.shape;
        [
            (node[0] + nx - o[0]) % nx,
            (node[1] + ny - o[1]) % ny,
            (node[2] + nz - o[2]) % nz,
        ]
    }

    fn corner_values(&self, e: [usize; 3], t: &[f64]) -> [f64; 8] {
        std::array::from_fn(|i| t[self.node(e, i)])
    }
}

/// Matrix-free isotropic operator with the pinned node as identity
struct MatrixFreeOperator {
    mesh: PeriodicMesh,
    laplacian: [[f64; 8]; 8],
    /// `h · k` per element
    scale: Vec<f64>,
}

impl MatrixFreeOperator {
    fn new(mesh: PeriodicMesh, kernel: &ElementKernel, field: &ConductivityField, h: f64) -> Self {
        let scale = field.tensors().par_iter().map(|k| h * k[(0, 0)]).collect();
        Self {
            mesh,
            laplacian: kernel.laplacian(),
            scale,
        }
    }

    /// `Σ` over the eight elements around `node` of `scale · S[i][j] · x_j`
    fn gather(&self, node: usize, x: impl Fn(usize) -> f64) -> f64 {
        let c = coordinates(self.mesh.shape, node);
        let mut acc = 0.0;
        for i in 0..8 {
            let e = self.mesh.element(c, i);
            let s = self.scale[linear_index(self.mesh.shape, e[0], e[1], e[2])];
            if s == 0.0 {
                continue;
            }
            for j in 0..8 {
                let col = self.mesh.node(e, j);
                if col != PINNED {
                    acc += s * self.laplacian[i][j] * x(col);
                }
            }
        }
        acc
    }
}

impl LinearOperator for MatrixFreeOperator {
    fn dim(&self) -> usize {
        self.scale.len()
    }

    fn apply(&self, x: &[f64], y: &mut [f64]) {
        y.par_iter_mut().enumerate().for_each(|(node, yi)| {
            *yi = if node == PINNED {
                x[node]
            } else {
                self.gather(node, |col| x[col])
            };
        });
    }

    fn diagonal(&self) -> Vec<f64> {
        (0..self.dim())
            .into_par_iter()
            .map(|node| {
                if node == PINNED {
                    1.0
                } else {
                    self.gather(node, |col| if col == node { 1.0 } else { 0.0 })
                }
            })
            .collect()
    }
}

/// Gather the global stiffness matrix row by row
fn assemble(mesh: PeriodicMesh, kernel: &ElementKernel, tensors: &[Matrix3<f64>], h: f64) -> CsrMatrix {
    let n = tensors.len();
    let rows = (0..n)
        .into_par_iter()
        .map(|node| {
            if node == PINNED {
                return vec![(PINNED, 1.0)];
            }
            let c = coordinates(mesh.shape, node);
            let mut row = Vec::with_capacity(64);
            for i in 0..8 {
                let e = mesh.element(c, i);
                let ke = kernel.stiffness(&tensors[linear_index(mesh.shape, e[0], e[1], e[2])], h);
                for j in 0..8 {
                    let col = mesh.node(e, j);
                    if col != PINNED {
                        row.push((col, ke[i][j]));
                    }
                }
            }
            row
        })
        .collect();
    CsrMatrix::from_rows(n, rows)
}

/// Right-hand side `-f(g)` gathered per node
fn load_vector(
    mesh: PeriodicMesh,
    kernel: &ElementKernel,
    tensors: &[Matrix3<f64>],
    g: &Vector3<f64>,
    h: f64,
) -> Vec<f64> {
    (0..tensors.len())
        .into_par_iter()
        .map(|node| {
            if node == PINNED {
                return 0.0;
            }
            let c = coordinates(mesh.shape, node);
            (0..8)
                .map(|i| {
                    let e = mesh.element(c, i);
                    let kg = tensors[linear_index(mesh.shape, e[0], e[1], e[2])] * g;
                    kernel.load(i, &kg, h)
                })
                .sum()
        })
        .collect()
}

fn check_diagonal(diagonal: &[f64], shape: Shape) -> ConductivityResult<()> {
    match diagonal.iter().position(|d| d.abs() < f64::MIN_POSITIVE) {
        Some(node) => {
            let [x, y, z] = coordinates(shape, node);
            Err(ConductivityError::degenerate(format!(
                "node ({x}, {y}, {z}) touches only non-conducting elements"
            )))
        }
        None => Ok(()),
    }
}

/// Assemble and solve the periodic finite-element problem for one axis
pub(crate) fn solve(
    grid: &VoxelGrid,
    field: &ConductivityField,
    config: &ConductivityConfig,
) -> ConductivityResult<AxisSolution> {
    config.validate()?;
    let shape = grid.shape();
    if field.shape() != shape {
        return Err(ConductivityError::config(format!(
            "conductivity field shape {:?} does not match grid shape {:?}",
            field.shape(),
            shape
        )));
    }
    let axis = config.direction.ok_or_else(|| {
        ConductivityError::config("finite-element method needs a simulation direction")
    })?;
    if config.side_bc != SideBc::Periodic {
        return Err(ConductivityError::config(format!(
            "finite-element method supports periodic boundaries only, got {}",
            config.side_bc
        )));
    }
    if config.prescribed_bc.is_some() {
        return Err(ConductivityError::config(
            "prescribed voxel temperatures are not supported by the finite-element method",
        ));
    }
    if config.fe_assembly == FeAssembly::MatrixFree && field.is_anisotropic() {
        return Err(ConductivityError::config(
            "matrix-free finite elements need isotropic conductivity; use the assembled mode",
        ));
    }

    let a = axis.index();
    let h = grid.voxel_length();
    let length = shape[a] as f64 * h;
    let mut g = Vector3::zeros();
    g[a] = 1.0 / length;

    let backend = config.effective_solver();
    let mesh = PeriodicMesh { shape };
    let kernel = ElementKernel::new();
    let tensors = field.tensors();
    info!(
        "FE solve: direction {}, {}x{}x{} elements, {} assembly, backend {}",
        axis, shape[0], shape[1], shape[2], config.fe_assembly, backend
    );

    let rhs = load_vector(mesh, &kernel, tensors, &g, h);
    let params = SolveParams {
        solver: backend,
        tolerance: config.tolerance,
        max_iterations: config.max_iterations,
        restart: config.gmres_restart,
    };
    let mut fluctuation = vec![0.0; grid.len()];
    let stats = match config.fe_assembly {
        FeAssembly::Assembled => {
            let matrix = assemble(mesh, &kernel, tensors, h);
            debug!("FE operator: {} unknowns, {} non-zeros", matrix.n_rows(), matrix.nnz());
            check_diagonal(&matrix.diagonal(), shape)?;
            linalg::solve(&matrix, &rhs, &mut fluctuation, &params)?
        }
        FeAssembly::MatrixFree => {
            let op = MatrixFreeOperator::new(mesh, &kernel, field, h);
            check_diagonal(&op.diagonal(), shape)?;
            linalg::solve(&op, &rhs, &mut fluctuation, &params)?
        }
    };

    let flux_data: Vec<Vector3<f64>> = (0..grid.len())
        .into_par_iter()
        .map(|idx| {
            let e = coordinates(shape, idx);
            let grad_t = kernel.gradient(&mesh.corner_values(e, &fluctuation), h);
            -(tensors[idx] * (g + grad_t))
        })
        .collect();
    let flux = VectorField::from_vec(shape, flux_data)
        .ok_or_else(|| ConductivityError::config("flux size mismatch"))?;

    let n_a = shape[a] as f64;
    let temperature_data: Vec<f64> = fluctuation
        .par_iter()
        .enumerate()
        .map(|(node, t)| coordinates(shape, node)[a] as f64 / n_a + t)
        .collect();
    let temperature = ScalarField::from_vec(shape, temperature_data)
        .ok_or_else(|| ConductivityError::config("temperature size mismatch"))?;

    let k = -flux.mean() * length;
    info!(
        "FE {} done: {} iterations, residual {:.3e}, k_eff = [{:.6e}, {:.6e}, {:.6e}]",
        axis, stats.iterations, stats.residual, k.x, k.y, k.z
    );

    Ok(AxisSolution {
        direction: Some(axis),
        effective_conductivity: Some(k),
        temperature,
        flux,
        stats,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boundary::PrescribedBc;
    use crate::config::{Axis, SolverType};
    use crate::grid::PhaseId;
    use crate::materials::ConductivityMap;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn config(axis: Axis, assembly: FeAssembly) -> ConductivityConfig {
        ConductivityConfig {
            method: Method::FiniteElement,
            fe_assembly: assembly,
            tolerance: 1e-10,
            ..ConductivityConfig::along(axis)
        }
    }

    fn two_phase(shape: Shape, ids: Vec<PhaseId>, k: [f64; 2]) -> (VoxelGrid, ConductivityField) {
        let grid = VoxelGrid::from_ids(shape, ids, 0.5).unwrap();
        let mut map = ConductivityMap::new();
        map.add_material(0..=0, k[0]).unwrap();
        map.add_material(1..=1, k[1]).unwrap();
        let field = map.resolve_grid(&grid).unwrap();
        (grid, field)
    }

    #[test]
    fn test_reference_integrals() {
        let kernel = ElementKernel::new();
        for p in 0..3 {
            for q in 0..3 {
                for i in 0..8 {
                    // constants are in the null space of every block
                    let row: f64 = kernel.mref[p][q][i].iter().sum();
                    assert!(row.abs() < 1e-15);
                    for j in 0..8 {
                        assert_relative_eq!(kernel.mref[p][q][i][j], kernel.mref[q][p][j][i]);
                    }
                }
            }
            assert!(kernel.gref[p].iter().sum::<f64>().abs() < 1e-15);
        }
        let lap = kernel.laplacian();
        assert_relative_eq!(lap[0][0], 1.0 / 3.0, epsilon = 1e-15);
        assert_relative_eq!(lap[0][7], -1.0 / 12.0, epsilon = 1e-15);
    }

    #[test]
    fn test_stiffness_reproduces_linear_flux() {
        // Ke applied to the nodal values of x·e_p gives the consistent load of K e_p
        let kernel = ElementKernel::new();
        let k = Matrix3::new(2.0, 0.5, 0.1, 0.5, 1.5, 0.0, 0.1, 0.0, 1.0);
        let h = 0.3;
        let ke = kernel.stiffness(&k, h);
        for p in 0..3 {
            let values: [f64; 8] = std::array::from_fn(|i| offset(i)[p] as f64 * h);
            let mut e_p = Vector3::zeros();
            e_p[p] = 1.0;
            let kg = k * e_p;
            for i in 0..8 {
                let applied: f64 = (0..8).map(|j| ke[i][j] * values[j]).sum();
                assert_relative_eq!(applied, -kernel.load(i, &kg, h), epsilon = 1e-12);
            }
            assert_relative_eq!(kernel.gradient(&values, h), e_p, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_uniform_tensor_is_exact() {
        let tensor = Matrix3::new(4.0, 1.0, 0.5, 1.0, 3.0, -0.7, 0.5, -0.7, 2.0);
        let grid = VoxelGrid::new([3, 4, 5], 0.1).unwrap();
        let field = ConductivityField::uniform(grid.shape(), tensor);
        for axis in Axis::ALL {
            let solution = solve(&grid, &field, &config(axis, FeAssembly::Assembled)).unwrap();
            assert_relative_eq!(
                solution.effective_conductivity.unwrap(),
                tensor.column(axis.index()).into_owned(),
                epsilon = 1e-10
            );
        }
    }

    #[test]
    fn test_layered_means() {
        let shape = [6, 4, 3];
        let ids = (0..72).map(|i| (coordinates(shape, i)[0] % 2) as PhaseId).collect();
        let (grid, field) = two_phase(shape, ids, [1.0, 4.0]);
        let across = solve(&grid, &field, &config(Axis::X, FeAssembly::Assembled)).unwrap();
        let along = solve(&grid, &field, &config(Axis::Y, FeAssembly::MatrixFree)).unwrap();
        assert_relative_eq!(across.scalar().unwrap(), 1.6, epsilon = 1e-7);
        assert_relative_eq!(along.scalar().unwrap(), 2.5, epsilon = 1e-7);
    }

    #[test]
    fn test_matrix_free_matches_assembled() {
        let shape = [5, 5, 4];
        let mut rng = StdRng::seed_from_u64(11);
        let ids = (0..100).map(|_| PhaseId::from(rng.random_bool(0.35))).collect();
        let (grid, field) = two_phase(shape, ids, [0.3, 5.0]);
        for axis in Axis::ALL {
            let assembled = solve(&grid, &field, &config(axis, FeAssembly::Assembled)).unwrap();
            let free = solve(&grid, &field, &config(axis, FeAssembly::MatrixFree)).unwrap();
            assert_relative_eq!(
                assembled.effective_conductivity.unwrap(),
                free.effective_conductivity.unwrap(),
                epsilon = 1e-7
            );
            let k = assembled.scalar().unwrap();
            assert!(k > 0.3 && k < 5.0);
        }
    }

    #[test]
    fn test_cg_and_direct_agree_with_minres() {
        let shape = [4, 3, 3];
        let mut rng = StdRng::seed_from_u64(3);
        let ids = (0..36).map(|_| PhaseId::from(rng.random_bool(0.5))).collect();
        let (grid, field) = two_phase(shape, ids, [1.0, 10.0]);
        let reference = solve(&grid, &field, &config(Axis::Z, FeAssembly::Assembled)).unwrap();
        for backend in [SolverType::Cg, SolverType::Direct] {
            let cfg = ConductivityConfig {
                solver_type: Some(backend),
                ..config(Axis::Z, FeAssembly::Assembled)
            };
            let other = solve(&grid, &field, &cfg).unwrap();
            assert_relative_eq!(
                other.effective_conductivity.unwrap(),
                reference.effective_conductivity.unwrap(),
                epsilon = 1e-7
            );
        }
    }

    #[test]
    fn test_rejected_configurations() {
        let grid = VoxelGrid::new([3, 3, 3], 1.0).unwrap();
        let iso = ConductivityField::uniform(grid.shape(), Matrix3::identity());
        let aniso = ConductivityField::uniform(
            grid.shape(),
            Matrix3::from_diagonal(&Vector3::new(2.0, 1.0, 1.0)),
        );
        let base = config(Axis::X, FeAssembly::Assembled);
        let cases = [
            ConductivityConfig {
                direction: None,
                ..base.clone()
            },
            ConductivityConfig {
                side_bc: SideBc::Symmetric,
                ..base.clone()
            },
            ConductivityConfig {
                prescribed_bc: Some(PrescribedBc::new([3, 3, 3])),
                ..base.clone()
            },
        ];
        for cfg in &cases {
            assert!(matches!(
                solve(&grid, &iso, cfg),
                Err(ConductivityError::Configuration(_))
            ));
        }
        let free = config(Axis::X, FeAssembly::MatrixFree);
        assert!(matches!(
            solve(&grid, &aniso, &free),
            Err(ConductivityError::Configuration(_))
        ));
        assert!(solve(&grid, &iso, &free).is_ok());
    }

    #[test]
    fn test_non_conducting_region_is_degenerate() {
        let grid = VoxelGrid::new([3, 3, 3], 1.0).unwrap();
        let field = ConductivityField::uniform(grid.shape(), Matrix3::zeros());
        assert!(matches!(
            solve(&grid, &field, &config(Axis::X, FeAssembly::MatrixFree)),
            Err(ConductivityError::NumericalDegeneracy(_))
        ));
    }
}
