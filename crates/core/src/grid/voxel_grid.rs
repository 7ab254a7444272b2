//! Segmented voxel domain
//!
//! A [`VoxelGrid`] holds one phase id per voxel, the physical voxel edge length and,
//! once estimated or supplied, a per-voxel orientation field. The shape is fixed at
//! construction; solvers only ever borrow the grid immutably.

use super::field::{Field3, Shape};
use crate::error::{ConductivityError, ConductivityResult};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Segmentation id of a voxel (grayscale value of the segmented image)
pub type PhaseId = u16;

/// Allowed deviation from unit length for supplied orientation vectors
const UNIT_NORM_TOLERANCE: f64 = 1e-6;

/// Per-voxel local orientation, `None` where no fiber-like structure was detected
pub type OrientationField = Field3<Option<Vector3<f64>>>;

/// Voxelized material sample
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoxelGrid {
    phases: Field3<PhaseId>,
    voxel_length: f64,
    orientation: Option<OrientationField>,
}

impl VoxelGrid {
    /// Create a grid filled with phase `0`
    ///
    /// # Arguments
    ///
    /// * `shape` - Voxel counts `(nx, ny, nz)`, all positive
    /// * `voxel_length` - Physical voxel edge length, finite and positive
    pub fn new(shape: Shape, voxel_length: f64) -> ConductivityResult<Self> {
        Self::from_phases(Field3::with_value(shape, 0), voxel_length)
    }

    /// Create a grid from flat phase ids in x-fastest order
    pub fn from_ids(shape: Shape, ids: Vec<PhaseId>, voxel_length: f64) -> ConductivityResult<Self> {
        let expected = shape[0] * shape[1] * shape[2];
        let found = ids.len();
        let phases = Field3::from_vec(shape, ids).ok_or_else(|| {
            ConductivityError::config(format!(
                "phase id array has {found} entries, shape {shape:?} needs {expected}"
            ))
        })?;
        Self::from_phases(phases, voxel_length)
    }

    /// Create a grid from an existing phase field
    pub fn from_phases(phases: Field3<PhaseId>, voxel_length: f64) -> ConductivityResult<Self> {
        let shape = phases.shape();
        if shape.iter().any(|&n| n == 0) {
            return Err(ConductivityError::config(format!(
                "grid shape must be positive in every direction, got {shape:?}"
            )));
        }
        if !(voxel_length.is_finite() && voxel_length > 0.0) {
            return Err(ConductivityError::config(format!(
                "voxel length must be finite and positive, got {voxel_length}"
            )));
        }
        Ok(Self {
            phases,
            voxel_length,
            orientation: None,
        })
    }

    /// Grid shape `(nx, ny, nz)`
    #[inline]
    #[must_use]
    pub fn shape(&self) -> Shape {
        self.phases.shape()
    }

    /// Number of voxels
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.phases.len()
    }

    /// Always false, a grid has at least one voxel
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    /// Physical voxel edge length
    #[inline]
    #[must_use]
    pub fn voxel_length(&self) -> f64 {
        self.voxel_length
    }

    /// Physical extent of the domain along each axis
    #[must_use]
    pub fn extent(&self) -> Vector3<f64> {
        let [nx, ny, nz] = self.shape();
        Vector3::new(nx as f64, ny as f64, nz as f64) * self.voxel_length
    }

    /// Phase id at `(x, y, z)`
    #[must_use]
    pub fn phase(&self, x: usize, y: usize, z: usize) -> PhaseId {
        *self.phases.get(x, y, z)
    }

    /// Set the phase id at `(x, y, z)`
    pub fn set_phase(&mut self, x: usize, y: usize, z: usize, id: PhaseId) {
        self.phases.set(x, y, z, id);
    }

    /// Phase ids as a field
    #[must_use]
    pub fn phases(&self) -> &Field3<PhaseId> {
        &self.phases
    }

    /// Flat phase ids in x-fastest order
    #[must_use]
    pub fn ids(&self) -> &[PhaseId] {
        self.phases.as_slice()
    }

    /// Orientation field, if one has been attached
    #[must_use]
    pub fn orientation(&self) -> Option<&OrientationField> {
        self.orientation.as_ref()
    }

    /// Orientation of a single voxel by linear index
    #[inline]
    #[must_use]
    pub fn orientation_at(&self, index: usize) -> Option<&Vector3<f64>> {
        self.orientation
            .as_ref()
            .and_then(|field| field.as_slice()[index].as_ref())
    }

    /// Attach an orientation field
    ///
    /// Fails if the field shape differs from the grid or a defined vector is not of
    /// unit length.
    pub fn set_orientation(&mut self, field: OrientationField) -> ConductivityResult<()> {
        if field.shape() != self.shape() {
            return Err(ConductivityError::config(format!(
                "orientation shape {:?} does not match grid shape {:?}",
                field.shape(),
                self.shape()
            )));
        }
        if let Some(bad) = field
            .as_slice()
            .iter()
            .flatten()
            .find(|v| (v.norm() - 1.0).abs() > UNIT_NORM_TOLERANCE || !v.norm().is_finite())
        {
            return Err(ConductivityError::config(format!(
                "orientation vectors must have unit norm, found norm {}",
                bad.norm()
            )));
        }
        self.orientation = Some(field);
        Ok(())
    }

    /// Drop the orientation field
    pub fn clear_orientation(&mut self) {
        self.orientation = None;
    }

    /// Smallest and largest phase id present
    #[must_use]
    pub fn phase_bounds(&self) -> (PhaseId, PhaseId) {
        let ids = self.ids();
        let min = ids.iter().copied().min().unwrap_or(0);
        let max = ids.iter().copied().max().unwrap_or(0);
        (min, max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_creation() {
        let grid = VoxelGrid::new([4, 3, 2], 1.3e-6).unwrap();
        assert_eq!(grid.len(), 24);
        assert_eq!(grid.phase_bounds(), (0, 0));
        assert!((grid.extent().x - 5.2e-6).abs() < 1e-18);
    }

    #[test]
    fn test_rejects_bad_shape_and_length() {
        assert!(VoxelGrid::new([0, 3, 2], 1.0).is_err());
        assert!(VoxelGrid::new([1, 1, 1], 0.0).is_err());
        assert!(VoxelGrid::new([1, 1, 1], f64::NAN).is_err());
        assert!(VoxelGrid::from_ids([2, 2, 2], vec![0; 7], 1.0).is_err());
    }

    #[test]
    fn test_orientation_must_be_unit() {
        let mut grid = VoxelGrid::new([2, 1, 1], 1.0).unwrap();
        let mut field = OrientationField::with_value([2, 1, 1], None);
        field.set(0, 0, 0, Some(Vector3::new(0.0, 2.0, 0.0)));
        assert!(grid.set_orientation(field.clone()).is_err());

        field.set(0, 0, 0, Some(Vector3::new(0.0, 1.0, 0.0)));
        grid.set_orientation(field).unwrap();
        assert_eq!(grid.orientation_at(0), Some(&Vector3::new(0.0, 1.0, 0.0)));
        assert_eq!(grid.orientation_at(1), None);
    }

    #[test]
    fn test_orientation_shape_mismatch() {
        let mut grid = VoxelGrid::new([2, 2, 2], 1.0).unwrap();
        let field = OrientationField::with_value([2, 2, 1], None);
        assert!(matches!(
            grid.set_orientation(field),
            Err(ConductivityError::Configuration(_))
        ));
    }
}
