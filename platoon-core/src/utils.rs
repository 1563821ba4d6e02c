//! Module containing miscellaneous numeric utility functions.

use itertools::izip;

use crate::imports::*;

/// Frobenius norm of the element-wise difference of two equally shaped
/// arrays, without allocating the intermediate.
pub fn frob_diff(a: &Array2<f64>, b: &Array2<f64>) -> f64 {
    debug_assert_eq!(a.dim(), b.dim());
    izip!(a.iter(), b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}

/// Clip all elements of `arr` into `[lo, hi]` in place.
pub fn clip_inplace(arr: &mut Array2<f64>, lo: f64, hi: f64) {
    arr.mapv_inplace(|x| x.clamp(lo, hi));
}

/// Evenly spaced sample times `0, dt, 2*dt, ...` of length `n`
pub fn time_vector(n: usize, dt: f64) -> Array1<f64> {
    Array1::from_iter((0..n).map(|i| i as f64 * dt))
}
