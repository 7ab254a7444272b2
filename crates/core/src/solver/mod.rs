//! Steady-state heat conduction solvers
//!
//! Two interchangeable discretizations of `-∇·(K ∇T) = 0` on the voxel grid:
//!
//! - [`MpfaSolver`]: cell-centered finite volumes with a multi-point flux stencil;
//!   periodic, symmetric or dirichlet side walls and per-voxel prescribed values.
//! - [`FeSolver`]: trilinear finite elements on a fully periodic mesh, assembled or
//!   matrix-free.
//!
//! # Example
//!
//! ```rust,ignore
//! use voxtherm_core::{compute_thermal_conductivity, ConductivityConfig, ConductivityMap, VoxelGrid};
//!
//! let grid = VoxelGrid::new([10, 10, 10], 1e-6)?;
//! let mut map = ConductivityMap::new();
//! map.add_material(0..=0, 0.0257)?;
//! let solution = compute_thermal_conductivity(&grid, &map, &ConductivityConfig::default())?;
//! println!("k_eff = {:?}", solution.scalar());
//! ```

mod fe;
mod mpfa;
mod r#trait;

pub use fe::FeSolver;
pub use mpfa::MpfaSolver;
pub use r#trait::ConductivitySolver;

use crate::config::{Axis, ConductivityConfig, Method};
use crate::error::ConductivityResult;
use crate::grid::{ScalarField, VectorField, VoxelGrid};
use crate::linalg::SolveStats;
use crate::materials::{ConductivityField, ConductivityMap};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Result of one solve
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisSolution {
    /// Simulation axis, `None` for a run driven only by prescribed values
    pub direction: Option<Axis>,
    /// Effective conductivity measured along x, y and z for a unit drop along
    /// `direction`; `None` without a direction
    pub effective_conductivity: Option<Vector3<f64>>,
    /// Temperature per voxel (cell centers for finite volumes, lower corners for
    /// finite elements)
    pub temperature: ScalarField,
    /// Heat flux density per voxel
    pub flux: VectorField,
    /// Linear backend statistics
    pub stats: SolveStats,
}

impl AxisSolution {
    /// Effective conductivity along the simulation axis
    #[must_use]
    pub fn scalar(&self) -> Option<f64> {
        let axis = self.direction?;
        self.effective_conductivity.map(|k| k[axis.index()])
    }
}

/// Solver implementing `method`
#[must_use]
pub fn create_solver(method: Method) -> Box<dyn ConductivitySolver> {
    match method {
        Method::FiniteVolume => Box::new(MpfaSolver),
        Method::FiniteElement => Box::new(FeSolver),
    }
}

/// Resolve `map` on `grid` and run one solve as configured
pub fn compute_thermal_conductivity(
    grid: &VoxelGrid,
    map: &ConductivityMap,
    config: &ConductivityConfig,
) -> ConductivityResult<AxisSolution> {
    let field = map.resolve_grid(grid)?;
    compute_with_field(grid, &field, config)
}

/// Run one solve on an already resolved conductivity field
pub fn compute_with_field(
    grid: &VoxelGrid,
    field: &ConductivityField,
    config: &ConductivityConfig,
) -> ConductivityResult<AxisSolution> {
    create_solver(config.method).solve(grid, field, config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConductivityError;

    #[test]
    fn test_create_solver_matches_method() {
        for method in [Method::FiniteVolume, Method::FiniteElement] {
            assert_eq!(create_solver(method).method(), method);
        }
    }

    #[test]
    fn test_dispatch_by_method() {
        let grid = VoxelGrid::new([3, 3, 3], 1.0).unwrap();
        let mut map = ConductivityMap::new();
        map.add_material(0..=0, 2.0).unwrap();
        for method in [Method::FiniteVolume, Method::FiniteElement] {
            let config = ConductivityConfig {
                method,
                ..ConductivityConfig::along(Axis::Y)
            };
            let solution = compute_thermal_conductivity(&grid, &map, &config).unwrap();
            assert!((solution.scalar().unwrap() - 2.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_unmapped_phase_is_reported() {
        let grid = VoxelGrid::from_ids([2, 1, 1], vec![0, 7], 1.0).unwrap();
        let mut map = ConductivityMap::new();
        map.add_material(0..=0, 1.0).unwrap();
        assert!(matches!(
            compute_thermal_conductivity(&grid, &map, &ConductivityConfig::default()),
            Err(ConductivityError::Configuration(_))
        ));
    }
}
