//! Structure-tensor fiber orientation
//!
//! For a grayscale volume `I` the structure tensor is
//!
//! ```text
//! J_rho = G_rho * (∇I_sigma ⊗ ∇I_sigma),   I_sigma = G_sigma * I
//! ```
//!
//! Along a fiber the intensity barely changes, so the fiber axis is the eigenvector of
//! `J_rho` with the smallest eigenvalue. Both scales are given in voxels.
//!
//! Only voxels whose phase id lies in the cutoff range receive an orientation; the
//! rest stay `None`. Degenerate neighborhoods (no gradient, or all eigenvalues equal)
//! are assigned `+x`. Every vector is sign-normalized so that its largest-magnitude
//! component is positive, with the lowest axis index winning ties.

mod gaussian;

use crate::error::{ConductivityError, ConductivityResult};
use crate::grid::{Field3, OrientationField, PhaseId, ScalarField, VoxelGrid};
use gaussian::{gradient, GaussianKernel};
use nalgebra::{Matrix3, SymmetricEigen, Vector3};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use tracing::{debug, info, warn};

/// Relative eigenvalue spread below which a tensor counts as isotropic
const DEGENERATE_SPREAD: f64 = 1e-10;

/// Smoothing scales and phase selection for the estimator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrientationParams {
    /// Gaussian scale for the intensity before differentiation (voxels)
    pub sigma: f64,
    /// Gaussian scale for the gradient outer products (voxels)
    pub rho: f64,
    /// Phase ids that receive an orientation
    pub cutoff: RangeInclusive<PhaseId>,
}

impl Default for OrientationParams {
    fn default() -> Self {
        Self {
            sigma: 1.0,
            rho: 2.0,
            cutoff: 0..=PhaseId::MAX,
        }
    }
}

/// Structure-tensor orientation estimator
#[derive(Debug, Clone)]
pub struct StructureTensor {
    params: OrientationParams,
    gradient_kernel: GaussianKernel,
    tensor_kernel: GaussianKernel,
}

impl StructureTensor {
    /// Create an estimator
    ///
    /// # Arguments
    ///
    /// * `sigma` - Gradient smoothing scale in voxels, finite and positive
    /// * `rho` - Tensor smoothing scale in voxels, finite and positive
    /// * `cutoff` - Non-empty range of phase ids that receive an orientation
    pub fn new(sigma: f64, rho: f64, cutoff: RangeInclusive<PhaseId>) -> ConductivityResult<Self> {
        Self::from_params(OrientationParams { sigma, rho, cutoff })
    }

    /// Create an estimator from a parameter set
    pub fn from_params(params: OrientationParams) -> ConductivityResult<Self> {
        for (name, value) in [("sigma", params.sigma), ("rho", params.rho)] {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConductivityError::config(format!(
                    "{name} must be finite and positive, got {value}"
                )));
            }
        }
        if params.cutoff.is_empty() {
            return Err(ConductivityError::config(format!(
                "orientation cutoff range {}..={} is empty",
                params.cutoff.start(),
                params.cutoff.end()
            )));
        }
        Ok(Self {
            gradient_kernel: GaussianKernel::new(params.sigma),
            tensor_kernel: GaussianKernel::new(params.rho),
            params,
        })
    }

    /// Parameters this estimator was built with
    #[must_use]
    pub fn params(&self) -> &OrientationParams {
        &self.params
    }

    /// Estimate orientations from an explicit intensity volume
    ///
    /// `intensity` must have the grid's shape; the grid supplies the phase ids tested
    /// against the cutoff.
    pub fn estimate(
        &self,
        grid: &VoxelGrid,
        intensity: &ScalarField,
    ) -> ConductivityResult<OrientationField> {
        let shape = grid.shape();
        if intensity.shape() != shape {
            return Err(ConductivityError::config(format!(
                "intensity shape {:?} does not match grid shape {:?}",
                intensity.shape(),
                shape
            )));
        }
        debug!(
            "Structure tensor: sigma={} (radius {}), rho={} (radius {})",
            self.params.sigma,
            self.gradient_kernel.radius(),
            self.params.rho,
            self.tensor_kernel.radius()
        );

        let smoothed = self.gradient_kernel.smooth(intensity.as_slice(), shape);
        let [gx, gy, gz] = gradient(&smoothed, shape);

        // upper triangle: xx, yy, zz, xy, xz, yz
        let pairs = [
            (&gx, &gx),
            (&gy, &gy),
            (&gz, &gz),
            (&gx, &gy),
            (&gx, &gz),
            (&gy, &gz),
        ];
        let products: [Vec<f64>; 6] = pairs.map(|(a, b)| {
            let raw: Vec<f64> = a.par_iter().zip(b.par_iter()).map(|(p, q)| p * q).collect();
            self.tensor_kernel.smooth(&raw, shape)
        });

        let cutoff = &self.params.cutoff;
        let ids = grid.ids();
        let data: Vec<Option<Vector3<f64>>> = (0..grid.len())
            .into_par_iter()
            .map(|i| {
                if !cutoff.contains(&ids[i]) {
                    return None;
                }
                let [xx, yy, zz, xy, xz, yz] = [0, 1, 2, 3, 4, 5].map(|c| products[c][i]);
                Some(fiber_direction(&Matrix3::new(
                    xx, xy, xz, //
                    xy, yy, yz, //
                    xz, yz, zz,
                )))
            })
            .collect();

        let defined = data.iter().filter(|v| v.is_some()).count();
        if defined == 0 {
            warn!(
                "No voxel has a phase id in {}..={}; orientation field is empty",
                cutoff.start(),
                cutoff.end()
            );
        }
        info!("Estimated orientation for {} of {} voxels", defined, grid.len());

        Field3::from_vec(shape, data)
            .ok_or_else(|| ConductivityError::config("orientation field size mismatch"))
    }

    /// Estimate orientations using the phase ids themselves as grayscale
    pub fn estimate_from_ids(&self, grid: &VoxelGrid) -> ConductivityResult<OrientationField> {
        let values = grid.ids().iter().map(|&id| f64::from(id)).collect();
        let intensity = ScalarField::from_vec(grid.shape(), values)
            .ok_or_else(|| ConductivityError::config("phase field size mismatch"))?;
        self.estimate(grid, &intensity)
    }

    /// Estimate from phase ids and attach the result to `grid`
    ///
    /// Returns the number of voxels that received an orientation.
    pub fn orient(&self, grid: &mut VoxelGrid) -> ConductivityResult<usize> {
        let field = self.estimate_from_ids(grid)?;
        let defined = field.as_slice().iter().flatten().count();
        grid.set_orientation(field)?;
        Ok(defined)
    }
}

/// Unit eigenvector of the smallest eigenvalue, sign-normalized
fn fiber_direction(tensor: &Matrix3<f64>) -> Vector3<f64> {
    let trace = tensor.trace();
    if !(trace.is_finite() && trace > f64::MIN_POSITIVE) {
        return Vector3::x();
    }
    let eigen = SymmetricEigen::new(*tensor);
    let values = eigen.eigenvalues;
    let (mut min_i, mut min_v, mut max_v) = (0, values[0], values[0]);
    for i in 1..3 {
        if values[i] < min_v {
            min_i = i;
            min_v = values[i];
        }
        max_v = max_v.max(values[i]);
    }
    let scale = values.amax();
    if max_v - min_v <= DEGENERATE_SPREAD * scale {
        return Vector3::x();
    }
    let v = eigen.eigenvectors.column(min_i).into_owned();
    let norm = v.norm();
    if !(norm.is_finite() && norm > 0.0) {
        return Vector3::x();
    }
    canonical_sign(v / norm)
}

/// Flip `v` so its largest-magnitude component is positive (lowest index on ties)
fn canonical_sign(v: Vector3<f64>) -> Vector3<f64> {
    let mut lead = 0;
    for i in 1..3 {
        if v[i].abs() > v[lead].abs() {
            lead = i;
        }
    }
    if v[lead] < 0.0 {
        -v
    } else {
        v
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Square fibers of side 2 on a 4-voxel pitch, running along `axis`
    fn fiber_grid(shape: [usize; 3], axis: usize) -> VoxelGrid {
        let mut grid = VoxelGrid::new(shape, 1.0).unwrap();
        let (a, b) = match axis {
            0 => (1, 2),
            1 => (0, 2),
            _ => (0, 1),
        };
        for z in 0..shape[2] {
            for y in 0..shape[1] {
                for x in 0..shape[0] {
                    let c = [x, y, z];
                    if c[a] % 4 < 2 && c[b] % 4 < 2 {
                        grid.set_phase(x, y, z, 1);
                    }
                }
            }
        }
        grid
    }

    #[test]
    fn test_rejects_invalid_parameters() {
        assert!(StructureTensor::new(0.0, 1.0, 0..=1).is_err());
        assert!(StructureTensor::new(1.0, -2.0, 0..=1).is_err());
        assert!(StructureTensor::new(f64::NAN, 1.0, 0..=1).is_err());
        #[allow(clippy::reversed_empty_ranges)]
        let empty = 3..=1;
        assert!(matches!(
            StructureTensor::new(1.0, 1.0, empty),
            Err(ConductivityError::Configuration(_))
        ));
        assert!(StructureTensor::from_params(OrientationParams::default()).is_ok());
    }

    #[test]
    fn test_fibers_along_z() {
        let grid = fiber_grid([8, 8, 5], 2);
        let estimator = StructureTensor::new(1.0, 2.0, 0..=1).unwrap();
        let field = estimator.estimate_from_ids(&grid).unwrap();
        for v in field.as_slice() {
            let v = v.unwrap();
            assert_relative_eq!(v.norm(), 1.0, epsilon = 1e-12);
            assert!(v.z > 0.999, "expected +z, got {v:?}");
        }
    }

    #[test]
    fn test_fibers_along_y() {
        let grid = fiber_grid([8, 6, 8], 1);
        let estimator = StructureTensor::new(0.7, 1.5, 0..=1).unwrap();
        let field = estimator.estimate_from_ids(&grid).unwrap();
        for v in field.as_slice().iter().flatten() {
            assert!(v.y > 0.999, "expected +y, got {v:?}");
        }
    }

    #[test]
    fn test_cutoff_leaves_other_voxels_undefined() {
        let mut grid = fiber_grid([8, 8, 4], 2);
        let estimator = StructureTensor::new(1.0, 2.0, 1..=1).unwrap();
        let defined = estimator.orient(&mut grid).unwrap();
        let field = grid.orientation().unwrap();
        assert_eq!(defined, 8 * 8 * 4 / 4);
        for (id, v) in grid.ids().iter().zip(field.as_slice()) {
            assert_eq!(*id == 1, v.is_some());
        }
    }

    #[test]
    fn test_uniform_volume_is_degenerate() {
        let grid = VoxelGrid::new([4, 4, 4], 1.0).unwrap();
        let field = StructureTensor::new(1.0, 1.0, 0..=0)
            .unwrap()
            .estimate_from_ids(&grid)
            .unwrap();
        assert!(field.as_slice().iter().all(|v| *v == Some(Vector3::x())));
    }

    #[test]
    fn test_intensity_shape_must_match() {
        let grid = VoxelGrid::new([4, 4, 4], 1.0).unwrap();
        let intensity = ScalarField::with_value([4, 4, 3], 0.0);
        let estimator = StructureTensor::new(1.0, 1.0, 0..=0).unwrap();
        assert!(estimator.estimate(&grid, &intensity).is_err());
    }

    #[test]
    fn test_sign_convention() {
        let v = canonical_sign(Vector3::new(-0.6, 0.6, 0.1));
        assert_eq!(v, Vector3::new(0.6, -0.6, -0.1));
        let v = canonical_sign(Vector3::new(0.1, -0.9, 0.2));
        assert_eq!(v, Vector3::new(-0.1, 0.9, -0.2));
        let v = canonical_sign(Vector3::new(0.0, 0.0, 1.0));
        assert_eq!(v, Vector3::z());
    }

    #[test]
    fn test_isotropic_tensor_falls_back_to_x() {
        assert_eq!(fiber_direction(&(Matrix3::identity() * 3.0)), Vector3::x());
        assert_eq!(fiber_direction(&Matrix3::zeros()), Vector3::x());
        let planar = Matrix3::from_diagonal(&Vector3::new(2.0, 0.0, 2.0));
        assert_relative_eq!(fiber_direction(&planar), Vector3::y(), epsilon = 1e-12);
    }
}
