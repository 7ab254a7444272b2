//! Voxel domain and dense field containers

mod field;
mod voxel_grid;

pub use field::{coordinates, linear_index, Field3, ScalarField, Shape, VectorField};
pub use voxel_grid::{OrientationField, PhaseId, VoxelGrid};
