//! Effective Thermal Conductivity Core Library
//!
//! Computes the macroscopic conductivity of voxelized microstructures such as fiber
//! composites, foams and granular beds. Each voxel carries a phase id; a
//! [`ConductivityMap`] turns ids into isotropic, transversely isotropic or full
//! tensors, and a steady-state heat conduction solve yields temperature, flux and the
//! effective conductivity.
//!
//! ## Pipeline
//!
//! ```text
//! VoxelGrid ──► StructureTensor (optional fiber orientation)
//!     │
//!     ▼
//! ConductivityMap::resolve_grid ──► ConductivityField
//!     │
//!     ▼
//! MpfaSolver | FeSolver ──► linalg::solve (BiCGSTAB, CG, GMRES, MINRES, direct)
//!     │
//!     ▼
//! AxisSolution ──► EffectiveConductivityAssembler (3×3 tensor)
//! ```

pub mod boundary;
pub mod config;
pub mod effective;
pub mod error;
pub mod grid;
pub mod linalg;
pub mod materials;
pub mod orientation;
pub mod solver;

// Re-export domain types
pub use boundary::{PrescribedBc, Side};
pub use config::{
    parse_direction, Axis, ConductivityConfig, FeAssembly, Method, SideBc, SolverType,
};
pub use error::{ConductivityError, ConductivityResult};
pub use grid::{Field3, OrientationField, PhaseId, ScalarField, Shape, VectorField, VoxelGrid};
pub use materials::{ConductivityField, ConductivityMap, ConductivitySpec};
pub use orientation::{OrientationParams, StructureTensor};

// Re-export solvers
pub use effective::{AxisSchedule, EffectiveConductivity, EffectiveConductivityAssembler};
pub use linalg::{CsrMatrix, LinearOperator, SolveParams, SolveStats};
pub use solver::{
    compute_thermal_conductivity, compute_with_field, create_solver, AxisSolution,
    ConductivitySolver, FeSolver, MpfaSolver,
};
