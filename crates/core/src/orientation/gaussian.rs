//! Separable Gaussian smoothing and central-difference gradients on dense 3D fields
//!
//! Fields are flat `f64` slices in x-fastest order. Every pass writes a fresh output
//! buffer, parallelized over z-layers; boundary samples are mirrored
//! (`… c b a | a b c … x y z | z y x …`).

use crate::grid::Shape;
use rayon::prelude::*;

/// Truncated, normalized 1D Gaussian
#[derive(Debug, Clone)]
pub(crate) struct GaussianKernel {
    weights: Vec<f64>,
    radius: usize,
}

impl GaussianKernel {
    /// Kernel of standard deviation `sigma` (voxels), truncated at `ceil(4 sigma)`
    pub(crate) fn new(sigma: f64) -> Self {
        let radius = (4.0 * sigma).ceil().max(1.0) as usize;
        let inv_two_var = 1.0 / (2.0 * sigma * sigma);
        let mut weights: Vec<f64> = (0..=2 * radius)
            .map(|i| {
                let d = i as f64 - radius as f64;
                (-d * d * inv_two_var).exp()
            })
            .collect();
        let total: f64 = weights.iter().sum();
        for w in &mut weights {
            *w /= total;
        }
        Self { weights, radius }
    }

    pub(crate) fn radius(&self) -> usize {
        self.radius
    }

    /// Smooth along all three axes
    pub(crate) fn smooth(&self, field: &[f64], shape: Shape) -> Vec<f64> {
        let mut a = vec![0.0; field.len()];
        let mut b = vec![0.0; field.len()];
        self.smooth_axis(field, shape, 0, &mut a);
        self.smooth_axis(&a, shape, 1, &mut b);
        self.smooth_axis(&b, shape, 2, &mut a);
        a
    }

    /// One 1D convolution pass along `axis`
    pub(crate) fn smooth_axis(&self, input: &[f64], shape: Shape, axis: usize, out: &mut [f64]) {
        let [nx, ny, _] = shape;
        let n_axis = shape[axis];
        let stride = [1, nx, nx * ny][axis];
        let r = self.radius as isize;

        out.par_chunks_mut(nx * ny)
            .enumerate()
            .for_each(|(iz, layer)| {
                for iy in 0..ny {
                    for ix in 0..nx {
                        let pos = [ix, iy, iz][axis] as isize;
                        let base = ix + nx * (iy + ny * iz) - pos as usize * stride;
                        let mut acc = 0.0;
                        for (k, w) in self.weights.iter().enumerate() {
                            let j = reflect(pos + k as isize - r, n_axis);
                            acc += w * input[base + j * stride];
                        }
                        layer[ix + nx * iy] = acc;
                    }
                }
            });
    }
}

/// Mirror an out-of-range index back into `0..n` (scipy "reflect" convention)
pub(crate) fn reflect(mut i: isize, n: usize) -> usize {
    let n = n as isize;
    loop {
        if i < 0 {
            i = -i - 1;
        } else if i >= n {
            i = 2 * n - i - 1;
        } else {
            return i as usize;
        }
    }
}

/// Derivatives along x, y and z in units of the voxel spacing
///
/// Central differences inside, one-sided at the first and last sample, zero along
/// axes of length one.
pub(crate) fn gradient(field: &[f64], shape: Shape) -> [Vec<f64>; 3] {
    [0, 1, 2].map(|axis| {
        let [nx, ny, _] = shape;
        let n_axis = shape[axis];
        let stride = [1, nx, nx * ny][axis];
        let mut out = vec![0.0; field.len()];
        if n_axis < 2 {
            return out;
        }
        out.par_chunks_mut(nx * ny)
            .enumerate()
            .for_each(|(iz, layer)| {
                for iy in 0..ny {
                    for ix in 0..nx {
                        let idx = ix + nx * (iy + ny * iz);
                        let pos = [ix, iy, iz][axis];
                        layer[ix + nx * iy] = if pos == 0 {
                            field[idx + stride] - field[idx]
                        } else if pos == n_axis - 1 {
                            field[idx] - field[idx - stride]
                        } else {
                            0.5 * (field[idx + stride] - field[idx - stride])
                        };
                    }
                }
            });
        out
    })
}
