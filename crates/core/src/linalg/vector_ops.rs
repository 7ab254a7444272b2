//! Parallel vector kernels
//!
//! Reductions are split into fixed-size chunks whose partial sums are combined in
//! chunk order, so every dot product is bit-identical across runs and thread counts.

use rayon::prelude::*;

/// Elements per reduction chunk
const CHUNK: usize = 8192;

/// Dot product `a · b`
#[must_use]
pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    a.par_chunks(CHUNK)
        .zip(b.par_chunks(CHUNK))
        .map(|(ca, cb)| ca.iter().zip(cb).map(|(x, y)| x * y).sum::<f64>())
        .collect::<Vec<f64>>()
        .iter()
        .sum()
}

/// Euclidean norm
#[must_use]
pub fn norm2(a: &[f64]) -> f64 {
    dot(a, a).sqrt()
}

/// `y += alpha * x`
pub fn axpy(alpha: f64, x: &[f64], y: &mut [f64]) {
    debug_assert_eq!(x.len(), y.len());
    y.par_iter_mut()
        .zip(x.par_iter())
        .for_each(|(yi, &xi)| *yi += alpha * xi);
}

/// `y = x + beta * y`
pub fn xpby(x: &[f64], beta: f64, y: &mut [f64]) {
    debug_assert_eq!(x.len(), y.len());
    y.par_iter_mut()
        .zip(x.par_iter())
        .for_each(|(yi, &xi)| *yi = xi + beta * *yi);
}

/// `out = a - b`
pub fn sub(a: &[f64], b: &[f64], out: &mut [f64]) {
    debug_assert_eq!(a.len(), b.len());
    out.par_iter_mut()
        .zip(a.par_iter().zip(b.par_iter()))
        .for_each(|(o, (&ai, &bi))| *o = ai - bi);
}

/// `y = alpha * x`
pub fn scale_into(alpha: f64, x: &[f64], y: &mut [f64]) {
    debug_assert_eq!(x.len(), y.len());
    y.par_iter_mut()
        .zip(x.par_iter())
        .for_each(|(yi, &xi)| *yi = alpha * xi);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dot_and_norm() {
        let a: Vec<f64> = (0..20_000).map(|i| f64::from(i % 7)).collect();
        let b = vec![2.0; 20_000];
        let expected: f64 = a.iter().map(|x| 2.0 * x).sum();
        assert!((dot(&a, &b) - expected).abs() < 1e-9);
        assert!((norm2(&[3.0, 4.0]) - 5.0).abs() < 1e-15);
    }

    #[test]
    fn test_dot_is_reproducible() {
        let a: Vec<f64> = (0..50_000).map(|i| (f64::from(i) * 0.37).sin()).collect();
        let first = dot(&a, &a);
        for _ in 0..5 {
            assert_eq!(dot(&a, &a).to_bits(), first.to_bits());
        }
    }

    #[test]
    fn test_updates() {
        let x = [1.0, 2.0, 3.0];
        let mut y = [1.0, 1.0, 1.0];
        axpy(2.0, &x, &mut y);
        assert_eq!(y, [3.0, 5.0, 7.0]);
        xpby(&x, 0.5, &mut y);
        assert_eq!(y, [2.5, 4.5, 6.5]);
        let mut out = [0.0; 3];
        sub(&y, &x, &mut out);
        assert_eq!(out, [1.5, 2.5, 3.5]);
        scale_into(2.0, &x, &mut out);
        assert_eq!(out, [2.0, 4.0, 6.0]);
    }
}
