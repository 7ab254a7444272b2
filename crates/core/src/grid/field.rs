//! Dense 3D field container
//!
//! Stores one value per voxel as a flat `Vec<T>` with x varying fastest
//! (`index = x + nx * (y + ny * z)`). Temperature and flux results, intensity
//! inputs and resolved conductivity tensors all use this layout.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Grid shape `(nx, ny, nz)`
pub type Shape = [usize; 3];

/// Flat 3D field in x-fastest order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field3<T> {
    data: Vec<T>,
    shape: Shape,
}

/// Scalar per voxel (temperature, intensity)
pub type ScalarField = Field3<f64>;

/// Vector per voxel (heat flux)
pub type VectorField = Field3<Vector3<f64>>;

/// Linear index of `(x, y, z)` in a grid of the given shape
#[inline]
#[must_use]
pub fn linear_index(shape: Shape, x: usize, y: usize, z: usize) -> usize {
    x + shape[0] * (y + shape[1] * z)
}

/// Grid coordinates of a linear index
#[inline]
#[must_use]
pub fn coordinates(shape: Shape, index: usize) -> [usize; 3] {
    let x = index % shape[0];
    let yz = index / shape[0];
    [x, yz % shape[1], yz / shape[1]]
}

impl<T: Clone> Field3<T> {
    /// Create a field filled with `value`
    #[must_use]
    pub fn with_value(shape: Shape, value: T) -> Self {
        Self {
            data: vec![value; shape[0] * shape[1] * shape[2]],
            shape,
        }
    }
}

impl<T: Clone + Default> Field3<T> {
    /// Create a field filled with `T::default()`
    #[must_use]
    pub fn new(shape: Shape) -> Self {
        Self::with_value(shape, T::default())
    }
}

impl<T> Field3<T> {
    /// Wrap existing data; returns `None` when the length does not match the shape
    #[must_use]
    pub fn from_vec(shape: Shape, data: Vec<T>) -> Option<Self> {
        (data.len() == shape[0] * shape[1] * shape[2]).then_some(Self { data, shape })
    }

    /// Grid shape
    #[inline]
    #[must_use]
    pub fn shape(&self) -> Shape {
        self.shape
    }

    /// Number of voxels
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the field holds no voxels
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Linear index of `(x, y, z)`
    #[inline]
    #[must_use]
    pub fn index(&self, x: usize, y: usize, z: usize) -> usize {
        linear_index(self.shape, x, y, z)
    }

    /// Value at `(x, y, z)`
    ///
    /// # Panics
    ///
    /// Panics if coordinates are out of bounds
    #[must_use]
    pub fn get(&self, x: usize, y: usize, z: usize) -> &T {
        assert!(
            x < self.shape[0] && y < self.shape[1] && z < self.shape[2],
            "Coordinates out of bounds"
        );
        &self.data[self.index(x, y, z)]
    }

    /// Set value at `(x, y, z)`
    ///
    /// # Panics
    ///
    /// Panics if coordinates are out of bounds
    pub fn set(&mut self, x: usize, y: usize, z: usize, value: T) {
        assert!(
            x < self.shape[0] && y < self.shape[1] && z < self.shape[2],
            "Coordinates out of bounds"
        );
        let idx = self.index(x, y, z);
        self.data[idx] = value;
    }

    /// Flat view of the data
    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    /// Mutable flat view of the data
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// Consume the field and return its data
    #[must_use]
    pub fn into_vec(self) -> Vec<T> {
        self.data
    }
}

impl ScalarField {
    /// Arithmetic mean over all voxels
    #[must_use]
    pub fn mean(&self) -> f64 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().sum::<f64>() / self.data.len() as f64
    }
}

impl VectorField {
    /// Component-wise mean over all voxels
    #[must_use]
    pub fn mean(&self) -> Vector3<f64> {
        if self.data.is_empty() {
            return Vector3::zeros();
        }
        let sum = self
            .data
            .iter()
            .fold(Vector3::zeros(), |acc: Vector3<f64>, v| acc + v);
        sum / self.data.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_is_x_fastest() {
        let shape = [3, 4, 5];
        assert_eq!(linear_index(shape, 1, 0, 0), 1);
        assert_eq!(linear_index(shape, 0, 1, 0), 3);
        assert_eq!(linear_index(shape, 0, 0, 1), 12);
        for idx in 0..60 {
            let [x, y, z] = coordinates(shape, idx);
            assert_eq!(linear_index(shape, x, y, z), idx);
        }
    }

    #[test]
    fn test_from_vec_checks_length() {
        assert!(ScalarField::from_vec([2, 2, 2], vec![0.0; 8]).is_some());
        assert!(ScalarField::from_vec([2, 2, 2], vec![0.0; 7]).is_none());
    }

    #[test]
    fn test_vector_mean() {
        let mut field = VectorField::with_value([2, 1, 1], Vector3::zeros());
        field.set(0, 0, 0, Vector3::new(1.0, 2.0, 3.0));
        field.set(1, 0, 0, Vector3::new(3.0, 2.0, 1.0));
        assert_eq!(field.mean(), Vector3::new(2.0, 2.0, 2.0));
    }
}
