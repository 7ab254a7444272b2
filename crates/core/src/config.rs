//! Simulation configuration surface
//!
//! Mirrors the option set a caller hands the core: simulation direction, side boundary
//! condition, tolerance, iteration limit, linear backend and discretization method.
//! Every enum also parses from the short flag spellings (`"x"`, `"p"`, `"bicgstab"`,
//! `"fv"`, ...) so orchestration layers can forward user strings unchanged.

use crate::boundary::PrescribedBc;
use crate::error::{ConductivityError, ConductivityResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Default relative tolerance of the iterative backends
pub const DEFAULT_TOLERANCE: f64 = 1e-4;

/// Default iteration limit of the iterative backends
pub const DEFAULT_MAX_ITERATIONS: usize = 10_000;

/// Coordinate axis of the voxel grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Axis {
    /// First grid index
    X,
    /// Second grid index
    Y,
    /// Third grid index
    Z,
}

impl Axis {
    /// All three axes in index order
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    /// Component index (0, 1, 2)
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }

    /// Axis for a component index
    ///
    /// # Panics
    ///
    /// Panics if `index > 2`
    #[must_use]
    pub fn from_index(index: usize) -> Self {
        match index {
            0 => Axis::X,
            1 => Axis::Y,
            2 => Axis::Z,
            _ => panic!("axis index {index} out of range"),
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Axis::X => "x",
            Axis::Y => "y",
            Axis::Z => "z",
        };
        f.write_str(name)
    }
}

impl FromStr for Axis {
    type Err = ConductivityError;

    fn from_str(s: &str) -> ConductivityResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "x" => Ok(Axis::X),
            "y" => Ok(Axis::Y),
            "z" => Ok(Axis::Z),
            other => Err(ConductivityError::config(format!(
                "unknown direction '{other}', expected x, y or z"
            ))),
        }
    }
}

/// Parse a direction flag where an empty string or `"none"` means no simulation axis
pub fn parse_direction(s: &str) -> ConductivityResult<Option<Axis>> {
    let trimmed = s.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("none") {
        return Ok(None);
    }
    trimmed.parse().map(Some)
}

/// Boundary condition on the faces normal to the non-simulation axes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SideBc {
    /// Opposite faces are coupled (domain wraps around)
    #[default]
    Periodic,
    /// Mirror condition, zero normal flux
    Symmetric,
    /// Faces held at the linear profile of the imposed gradient
    Dirichlet,
}

impl fmt::Display for SideBc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SideBc::Periodic => "periodic",
            SideBc::Symmetric => "symmetric",
            SideBc::Dirichlet => "dirichlet",
        };
        f.write_str(name)
    }
}

impl FromStr for SideBc {
    type Err = ConductivityError;

    fn from_str(s: &str) -> ConductivityResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "p" | "periodic" => Ok(SideBc::Periodic),
            "s" | "symmetric" => Ok(SideBc::Symmetric),
            "d" | "dirichlet" => Ok(SideBc::Dirichlet),
            other => Err(ConductivityError::config(format!(
                "unknown side boundary condition '{other}', expected p, s or d"
            ))),
        }
    }
}

/// Linear system backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolverType {
    /// Stabilized bi-conjugate gradient, general matrices
    Bicgstab,
    /// Conjugate gradient, symmetric positive definite matrices
    Cg,
    /// Restarted GMRES, general matrices
    Gmres,
    /// Minimal residual, symmetric (possibly indefinite) matrices
    Minres,
    /// Dense LU factorization, small systems only
    Direct,
}

impl SolverType {
    /// Whether the backend requires a symmetric operator
    #[must_use]
    pub fn requires_symmetry(self) -> bool {
        matches!(self, SolverType::Cg | SolverType::Minres)
    }
}

impl fmt::Display for SolverType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SolverType::Bicgstab => "bicgstab",
            SolverType::Cg => "cg",
            SolverType::Gmres => "gmres",
            SolverType::Minres => "minres",
            SolverType::Direct => "direct",
        };
        f.write_str(name)
    }
}

impl FromStr for SolverType {
    type Err = ConductivityError;

    fn from_str(s: &str) -> ConductivityResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bicgstab" => Ok(SolverType::Bicgstab),
            "cg" => Ok(SolverType::Cg),
            "gmres" => Ok(SolverType::Gmres),
            "minres" => Ok(SolverType::Minres),
            "direct" => Ok(SolverType::Direct),
            other => Err(ConductivityError::config(format!(
                "unknown solver type '{other}'"
            ))),
        }
    }
}

/// Discretization scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Method {
    /// MPFA finite volume, one unknown per voxel
    #[default]
    FiniteVolume,
    /// Q1-Q1 finite element, one unknown per voxel corner
    FiniteElement,
}

impl Method {
    /// Backend used when the caller does not pick one
    #[must_use]
    pub fn default_solver(self) -> SolverType {
        match self {
            Method::FiniteVolume => SolverType::Bicgstab,
            Method::FiniteElement => SolverType::Minres,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Method::FiniteVolume => "finite_volume",
            Method::FiniteElement => "finite_element",
        };
        f.write_str(name)
    }
}

impl FromStr for Method {
    type Err = ConductivityError;

    fn from_str(s: &str) -> ConductivityResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fv" | "finite_volume" => Ok(Method::FiniteVolume),
            "fe" | "finite_element" => Ok(Method::FiniteElement),
            other => Err(ConductivityError::config(format!(
                "unknown method '{other}', expected fv or fe"
            ))),
        }
    }
}

/// Operator storage for the finite-element path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FeAssembly {
    /// Global sparse stiffness matrix
    #[default]
    Assembled,
    /// Element kernels evaluated on every product, isotropic phases only
    MatrixFree,
}

impl fmt::Display for FeAssembly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FeAssembly::Assembled => "assembled",
            FeAssembly::MatrixFree => "matrix_free",
        };
        f.write_str(name)
    }
}

impl FromStr for FeAssembly {
    type Err = ConductivityError;

    fn from_str(s: &str) -> ConductivityResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "assembled" | "matrix" => Ok(FeAssembly::Assembled),
            "matrix_free" | "matrix-free" | "mf" => Ok(FeAssembly::MatrixFree),
            other => Err(ConductivityError::config(format!(
                "unknown assembly '{other}', expected assembled or matrix_free"
            ))),
        }
    }
}

/// Options for one conductivity solve
///
/// `prescribed_bc` is only honoured by the finite-volume method and takes
/// precedence over `side_bc` on the voxels it names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConductivityConfig {
    /// Simulation axis, `None` when the prescribed map alone drives the problem
    pub direction: Option<Axis>,

    /// Side condition for the finite-volume method
    pub side_bc: SideBc,

    /// Per-voxel fixed temperatures (finite volume only)
    #[serde(skip)]
    pub prescribed_bc: Option<PrescribedBc>,

    /// Relative residual tolerance
    pub tolerance: f64,

    /// Iteration limit of the iterative backends
    pub max_iterations: usize,

    /// Linear backend, `None` selects the method's default
    pub solver_type: Option<SolverType>,

    /// Discretization scheme
    pub method: Method,

    /// Operator storage for the finite-element method
    pub fe_assembly: FeAssembly,

    /// Krylov subspace size before GMRES restarts
    pub gmres_restart: usize,
}

impl Default for ConductivityConfig {
    fn default() -> Self {
        Self {
            direction: Some(Axis::X),
            side_bc: SideBc::Periodic,
            prescribed_bc: None,
            tolerance: DEFAULT_TOLERANCE,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            solver_type: None,
            method: Method::FiniteVolume,
            fe_assembly: FeAssembly::Assembled,
            gmres_restart: 30,
        }
    }
}

impl ConductivityConfig {
    /// Configuration for a simulation along `axis` with defaults elsewhere
    #[must_use]
    pub fn along(axis: Axis) -> Self {
        Self {
            direction: Some(axis),
            ..Default::default()
        }
    }

    /// Copy of this configuration with a different simulation axis
    #[must_use]
    pub fn with_direction(&self, direction: Option<Axis>) -> Self {
        Self {
            direction,
            ..self.clone()
        }
    }

    /// Backend actually used by a solve
    #[must_use]
    pub fn effective_solver(&self) -> SolverType {
        self.solver_type
            .unwrap_or_else(|| self.method.default_solver())
    }

    /// Check the method-independent numeric options
    pub fn validate(&self) -> ConductivityResult<()> {
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(ConductivityError::config(format!(
                "tolerance must be finite and positive, got {}",
                self.tolerance
            )));
        }
        if self.max_iterations == 0 {
            return Err(ConductivityError::config(
                "max_iterations must be positive",
            ));
        }
        if self.gmres_restart == 0 {
            return Err(ConductivityError::config("gmres_restart must be positive"));
        }
        Ok(())
    }
}
