//! Covariance kernel for the Gaussian-process surrogate.

use ndarray::{Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};

/// Squared-exponential kernel with isotropic length scale.
///
/// Inputs live in the normalized unit cube, so a single length scale per
/// model is a reasonable parameterization; hyperparameters are selected by
/// marginal likelihood at fit time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SquaredExponential {
    pub length_scale: f64,
    pub signal_variance: f64,
    pub noise_variance: f64,
}

impl SquaredExponential {
    pub fn new(length_scale: f64, signal_variance: f64, noise_variance: f64) -> Self {
        Self {
            length_scale,
            signal_variance,
            noise_variance,
        }
    }

    /// Covariance between two points (noise-free).
    pub fn value(&self, a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> f64 {
        let mut d2 = 0.0;
        for (x, y) in a.iter().zip(b.iter()) {
            let diff = x - y;
            d2 += diff * diff;
        }
        self.signal_variance * (-0.5 * d2 / (self.length_scale * self.length_scale)).exp()
    }

    /// Training covariance matrix with noise on the diagonal.
    pub fn gram(&self, x: &Array2<f64>) -> Array2<f64> {
        let n = x.nrows();
        let mut k = Array2::zeros((n, n));
        for i in 0..n {
            for j in 0..=i {
                let v = self.value(x.row(i), x.row(j));
                k[[i, j]] = v;
                k[[j, i]] = v;
            }
            k[[i, i]] += self.noise_variance;
        }
        k
    }

    /// Covariance vector between the training rows and one query point.
    pub fn cross(&self, x: &Array2<f64>, query: ArrayView1<'_, f64>) -> Array1<f64> {
        Array1::from_iter((0..x.nrows()).map(|i| self.value(x.row(i), query)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn kernel_is_symmetric_and_peaks_at_zero_distance() {
        let k = SquaredExponential::new(0.3, 1.0, 0.0);
        let a = array![0.1, 0.2];
        let b = array![0.4, 0.9];
        assert!((k.value(a.view(), b.view()) - k.value(b.view(), a.view())).abs() < 1e-15);
        assert!(k.value(a.view(), a.view()) > k.value(a.view(), b.view()));
        assert!((k.value(a.view(), a.view()) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn gram_has_noise_on_diagonal() {
        let k = SquaredExponential::new(0.5, 1.0, 0.01);
        let x = array![[0.0, 0.0], [1.0, 1.0]];
        let gram = k.gram(&x);
        assert!((gram[[0, 0]] - 1.01).abs() < 1e-12);
        assert!((gram[[0, 1]] - gram[[1, 0]]).abs() < 1e-15);
        assert!(gram[[0, 1]] < 1.0);
    }
}
