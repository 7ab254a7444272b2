//! Phase-range to conductivity mapping
//!
//! A [`ConductivityMap`] is an ordered interval map from inclusive phase-id ranges to a
//! [`ConductivitySpec`]. Resolving a voxel produces its local symmetric 3×3 tensor:
//!
//! ```text
//! Isotropic(k)                 → k·I
//! Anisotropic(k_along, k_across) → k_across·I + (k_along − k_across)·d·dᵀ
//! Tensor(kxx, kyy, kzz, kxy, kxz, kyz) → the given tensor, same in every voxel
//! ```
//!
//! where `d` is the voxel's unit orientation. The anisotropic form is the rotation of
//! `diag(k_along, k_across, k_across)` into the frame whose first axis is `d`, written
//! so that `k_along == k_across` reproduces `k·I` exactly.

use crate::error::{ConductivityError, ConductivityResult};
use crate::grid::{Field3, PhaseId, VoxelGrid};
use nalgebra::{Matrix3, SymmetricEigen, Vector3};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::RangeInclusive;
use tracing::debug;

/// Conductivity of one material phase
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ConductivitySpec {
    /// Same conductivity in every direction
    Isotropic {
        /// Scalar conductivity (W/(m·K))
        k: f64,
    },
    /// Transversely isotropic, rotated into the local fiber orientation
    Anisotropic {
        /// Conductivity along the fiber axis
        k_along: f64,
        /// Conductivity across the fiber axis
        k_across: f64,
    },
    /// Constant full tensor `[kxx, kyy, kzz, kxy, kxz, kyz]` in the grid frame
    Tensor {
        /// Independent components of the symmetric tensor
        components: [f64; 6],
    },
}

impl ConductivitySpec {
    /// Whether resolving this spec needs the voxel orientation
    #[must_use]
    pub fn needs_orientation(&self) -> bool {
        matches!(self, ConductivitySpec::Anisotropic { .. })
    }

    /// Whether the resolved tensor can differ from a multiple of the identity
    #[must_use]
    pub fn is_anisotropic(&self) -> bool {
        !matches!(self, ConductivitySpec::Isotropic { .. })
    }

    /// Local tensor for a voxel with the given orientation
    pub fn tensor(&self, orientation: Option<&Vector3<f64>>) -> ConductivityResult<Matrix3<f64>> {
        match *self {
            ConductivitySpec::Isotropic { k } => Ok(Matrix3::identity() * k),
            ConductivitySpec::Anisotropic { k_along, k_across } => {
                let d = orientation.ok_or_else(|| {
                    ConductivityError::config(
                        "anisotropic conductivity resolved for a voxel with undefined orientation",
                    )
                })?;
                Ok(Matrix3::identity() * k_across + (d * d.transpose()) * (k_along - k_across))
            }
            ConductivitySpec::Tensor { components } => Ok(tensor_from_components(components)),
        }
    }

    fn validate(&self) -> ConductivityResult<()> {
        let check = |name: &str, value: f64| {
            if value.is_finite() && value >= 0.0 {
                Ok(())
            } else {
                Err(ConductivityError::config(format!(
                    "{name} must be finite and non-negative, got {value}"
                )))
            }
        };
        match *self {
            ConductivitySpec::Isotropic { k } => check("conductivity", k),
            ConductivitySpec::Anisotropic { k_along, k_across } => {
                check("conductivity along the fiber", k_along)?;
                check("conductivity across the fiber", k_across)
            }
            ConductivitySpec::Tensor { components } => {
                if components.iter().any(|c| !c.is_finite()) {
                    return Err(ConductivityError::config(
                        "conductivity tensor components must be finite",
                    ));
                }
                let eigen = SymmetricEigen::new(tensor_from_components(components));
                let scale = eigen.eigenvalues.amax().max(f64::MIN_POSITIVE);
                if eigen.eigenvalues.min() < -1e-12 * scale {
                    return Err(ConductivityError::config(format!(
                        "conductivity tensor must be positive semi-definite, eigenvalues {:?}",
                        eigen.eigenvalues.as_slice()
                    )));
                }
                Ok(())
            }
        }
    }
}

impl fmt::Display for ConductivitySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConductivitySpec::Isotropic { k } => write!(f, "isotropic k={k}"),
            ConductivitySpec::Anisotropic { k_along, k_across } => {
                write!(f, "oriented k_along={k_along} k_across={k_across}")
            }
            ConductivitySpec::Tensor { components: c } => write!(
                f,
                "tensor kxx={} kyy={} kzz={} kxy={} kxz={} kyz={}",
                c[0], c[1], c[2], c[3], c[4], c[5]
            ),
        }
    }
}

fn tensor_from_components(c: [f64; 6]) -> Matrix3<f64> {
    let [kxx, kyy, kzz, kxy, kxz, kyz] = c;
    Matrix3::new(kxx, kxy, kxz, kxy, kyy, kyz, kxz, kyz, kzz)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
struct MapEntry {
    last: PhaseId,
    spec: ConductivitySpec,
}

/// Ordered, non-overlapping phase ranges with their conductivity
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConductivityMap {
    // keyed by the first id of each range
    entries: BTreeMap<PhaseId, MapEntry>,
}

impl ConductivityMap {
    /// Empty map
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an isotropic phase
    ///
    /// # Arguments
    ///
    /// * `range` - Inclusive phase-id range, must not overlap existing entries
    /// * `k` - Conductivity, finite and non-negative
    pub fn add_material(&mut self, range: RangeInclusive<PhaseId>, k: f64) -> ConductivityResult<()> {
        self.insert(range, ConductivitySpec::Isotropic { k })
    }

    /// Register a phase whose conductivity follows the local orientation
    ///
    /// # Arguments
    ///
    /// * `range` - Inclusive phase-id range, must not overlap existing entries
    /// * `k_along` - Conductivity along the orientation vector
    /// * `k_across` - Conductivity in the plane normal to it
    pub fn add_material_to_orient(
        &mut self,
        range: RangeInclusive<PhaseId>,
        k_along: f64,
        k_across: f64,
    ) -> ConductivityResult<()> {
        self.insert(range, ConductivitySpec::Anisotropic { k_along, k_across })
    }

    /// Register a phase with a constant full tensor `[kxx, kyy, kzz, kxy, kxz, kyz]`
    pub fn add_material_tensor(
        &mut self,
        range: RangeInclusive<PhaseId>,
        components: [f64; 6],
    ) -> ConductivityResult<()> {
        self.insert(range, ConductivitySpec::Tensor { components })
    }

    /// Register an arbitrary spec
    pub fn insert(
        &mut self,
        range: RangeInclusive<PhaseId>,
        spec: ConductivitySpec,
    ) -> ConductivityResult<()> {
        let (first, last) = range.into_inner();
        if first > last {
            return Err(ConductivityError::config(format!(
                "empty phase range {first}..={last}"
            )));
        }
        spec.validate()?;
        if let Some((&start, entry)) = self.entries.range(..=last).next_back() {
            if entry.last >= first {
                return Err(ConductivityError::config(format!(
                    "phase range {first}..={last} overlaps existing range {start}..={}",
                    entry.last
                )));
            }
        }
        self.entries.insert(first, MapEntry { last, spec });
        Ok(())
    }

    /// Spec covering `id`, if any
    #[must_use]
    pub fn get(&self, id: PhaseId) -> Option<&ConductivitySpec> {
        self.entries
            .range(..=id)
            .next_back()
            .filter(|(_, entry)| entry.last >= id)
            .map(|(_, entry)| &entry.spec)
    }

    /// Local tensor for a voxel with phase `id` and the given orientation
    ///
    /// Fails if no range covers `id`, or if the covering spec is oriented and
    /// `orientation` is `None`.
    pub fn resolve(
        &self,
        id: PhaseId,
        orientation: Option<&Vector3<f64>>,
    ) -> ConductivityResult<Matrix3<f64>> {
        let spec = self.get(id).ok_or_else(|| {
            ConductivityError::config(format!("phase id {id} is not covered by the conductivity map"))
        })?;
        spec.tensor(orientation).map_err(|err| match err {
            ConductivityError::Configuration(msg) => {
                ConductivityError::Configuration(format!("{msg} (phase id {id})"))
            }
            other => other,
        })
    }

    /// Entries as `(range, spec)` ordered by range start
    pub fn entries(&self) -> impl Iterator<Item = (RangeInclusive<PhaseId>, &ConductivitySpec)> {
        self.entries
            .iter()
            .map(|(&first, entry)| (first..=entry.last, &entry.spec))
    }

    /// Number of registered ranges
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no range has been registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether any registered phase can yield a non-isotropic tensor
    #[must_use]
    pub fn has_anisotropy(&self) -> bool {
        self.entries.values().any(|entry| entry.spec.is_anisotropic())
    }

    /// Resolve every voxel of `grid` into its local tensor
    ///
    /// Runs in parallel over voxels; each task writes only its own tensor.
    pub fn resolve_grid(&self, grid: &VoxelGrid) -> ConductivityResult<ConductivityField> {
        let ids = grid.ids();
        let tensors: Vec<Matrix3<f64>> = (0..ids.len())
            .into_par_iter()
            .map(|idx| self.resolve(ids[idx], grid.orientation_at(idx)))
            .collect::<ConductivityResult<_>>()?;

        let anisotropic = ids
            .iter()
            .any(|&id| self.get(id).is_some_and(ConductivitySpec::is_anisotropic));
        debug!(
            "Resolved {} voxel tensors ({} map entries, anisotropic: {})",
            tensors.len(),
            self.len(),
            anisotropic
        );

        let tensors = Field3::from_vec(grid.shape(), tensors).ok_or_else(|| {
            ConductivityError::config("resolved tensor count does not match the grid")
        })?;
        Ok(ConductivityField {
            tensors,
            anisotropic,
        })
    }
}

impl fmt::Display for ConductivityMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (range, spec) in self.entries() {
            writeln!(f, "{:>5} - {:<5} {spec}", range.start(), range.end())?;
        }
        Ok(())
    }
}

/// Per-voxel conductivity tensors resolved from a map and a grid
///
/// Read-only input shared by every axis solve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConductivityField {
    tensors: Field3<Matrix3<f64>>,
    anisotropic: bool,
}

impl ConductivityField {
    /// Uniform field, mostly useful for tests and analytic checks
    #[must_use]
    pub fn uniform(shape: [usize; 3], tensor: Matrix3<f64>) -> Self {
        let anisotropic = !is_isotropic(&tensor);
        Self {
            tensors: Field3::with_value(shape, tensor),
            anisotropic,
        }
    }

    /// Grid shape
    #[must_use]
    pub fn shape(&self) -> [usize; 3] {
        self.tensors.shape()
    }

    /// Tensor of a voxel by linear index
    #[inline]
    #[must_use]
    pub fn tensor(&self, index: usize) -> &Matrix3<f64> {
        &self.tensors.as_slice()[index]
    }

    /// All tensors in x-fastest order
    #[must_use]
    pub fn tensors(&self) -> &[Matrix3<f64>] {
        self.tensors.as_slice()
    }

    /// Whether any voxel carries an orientation-dependent or full tensor
    #[must_use]
    pub fn is_anisotropic(&self) -> bool {
        self.anisotropic
    }
}

fn is_isotropic(tensor: &Matrix3<f64>) -> bool {
    let k = tensor[(0, 0)];
    tensor[(1, 1)] == k
        && tensor[(2, 2)] == k
        && tensor[(0, 1)] == 0.0
        && tensor[(0, 2)] == 0.0
        && tensor[(1, 2)] == 0.0
        && tensor[(1, 0)] == 0.0
        && tensor[(2, 0)] == 0.0
        && tensor[(2, 1)] == 0.0
}
