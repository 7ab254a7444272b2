//! Conductivity solver trait definition
//!
//! Both discretizations implement [`ConductivitySolver`], so the effective-tensor
//! assembler and the top-level entry point never branch on the method themselves.

use super::AxisSolution;
use crate::config::{ConductivityConfig, Method};
use crate::error::ConductivityResult;
use crate::grid::VoxelGrid;
use crate::materials::ConductivityField;

/// Method-agnostic interface for one steady-state conductivity solve
///
/// Implementations hold no per-solve state; every work vector lives inside a single
/// call to [`ConductivitySolver::solve`], so one solver value can serve concurrent
/// axis solves.
pub trait ConductivitySolver: Send + Sync {
    /// Discretization implemented by this solver
    fn method(&self) -> Method;

    /// Solve for the temperature and flux fields of one configuration
    ///
    /// # Arguments
    ///
    /// * `grid` - Voxel domain (shape and voxel length)
    /// * `field` - Per-voxel conductivity tensors resolved for `grid`
    /// * `config` - Direction, boundary conditions and linear backend options
    fn solve(
        &self,
        grid: &VoxelGrid,
        field: &ConductivityField,
        config: &ConductivityConfig,
    ) -> ConductivityResult<AxisSolution>;
}
