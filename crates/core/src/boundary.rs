//! Prescribed voxel temperatures
//!
//! A [`PrescribedBc`] fixes the temperature of individual voxels. The finite-volume
//! solver turns each prescribed voxel into an identity row of the linear system, so
//! the override wins over whatever side condition would otherwise apply there.

use crate::config::Axis;
use crate::error::{ConductivityError, ConductivityResult};
use crate::grid::{linear_index, Shape};
use rustc_hash::FxHashMap;

/// Lower or upper face of the domain along an axis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// Face at index 0
    Lower,
    /// Face at index `n - 1`
    Upper,
}

/// Sparse map from voxel coordinates to fixed temperatures
#[derive(Debug, Clone, PartialEq)]
pub struct PrescribedBc {
    shape: Shape,
    values: FxHashMap<[usize; 3], f64>,
}

impl PrescribedBc {
    /// Empty map for a grid of the given shape
    #[must_use]
    pub fn new(shape: Shape) -> Self {
        Self {
            shape,
            values: FxHashMap::default(),
        }
    }

    /// Shape of the grid this map was built for
    #[must_use]
    pub fn shape(&self) -> Shape {
        self.shape
    }

    /// Fix the temperature of voxel `(x, y, z)`
    pub fn set(&mut self, x: usize, y: usize, z: usize, value: f64) -> ConductivityResult<()> {
        if x >= self.shape[0] || y >= self.shape[1] || z >= self.shape[2] {
            return Err(ConductivityError::config(format!(
                "prescribed voxel ({x}, {y}, {z}) outside grid {:?}",
                self.shape
            )));
        }
        if !value.is_finite() {
            return Err(ConductivityError::config(format!(
                "prescribed temperature must be finite, got {value}"
            )));
        }
        self.values.insert([x, y, z], value);
        Ok(())
    }

    /// Fix every voxel on one face of the domain
    pub fn set_face(&mut self, axis: Axis, side: Side, value: f64) -> ConductivityResult<()> {
        let a = axis.index();
        let (b, c) = match axis {
            Axis::X => (1, 2),
            Axis::Y => (0, 2),
            Axis::Z => (0, 1),
        };
        let Some(last) = self.shape[a].checked_sub(1) else {
            return Err(ConductivityError::config(format!(
                "grid {:?} has no {axis} face",
                self.shape
            )));
        };
        let layer = match side {
            Side::Lower => 0,
            Side::Upper => last,
        };
        for j in 0..self.shape[c] {
            for i in 0..self.shape[b] {
                let mut coords = [0; 3];
                coords[a] = layer;
                coords[b] = i;
                coords[c] = j;
                self.set(coords[0], coords[1], coords[2], value)?;
            }
        }
        Ok(())
    }

    /// Remove the override of voxel `(x, y, z)`
    pub fn remove(&mut self, x: usize, y: usize, z: usize) -> Option<f64> {
        self.values.remove(&[x, y, z])
    }

    /// Fixed temperature of voxel `(x, y, z)`, if any
    #[must_use]
    pub fn get(&self, x: usize, y: usize, z: usize) -> Option<f64> {
        self.values.get(&[x, y, z]).copied()
    }

    /// Number of fixed voxels
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no voxel is fixed
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Dense lookup table indexed by linear voxel index
    #[must_use]
    pub fn to_dense(&self) -> Vec<Option<f64>> {
        let mut dense = vec![None; self.shape[0] * self.shape[1] * self.shape[2]];
        for (&[x, y, z], &value) in &self.values {
            dense[linear_index(self.shape, x, y, z)] = Some(value);
        }
        dense
    }
}
