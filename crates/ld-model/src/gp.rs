//! Gaussian-process regression on normalized inputs and standardized scores.

use ld_types::{LdError, LdResult};
use ndarray::{Array1, Array2, ArrayView1};
use tracing::debug;

use crate::kernel::SquaredExponential;

/// Bounded jitter retries before a fit is declared degenerate.
const MAX_JITTER_RETRIES: usize = 6;

/// Candidate hyperparameter grids for marginal-likelihood selection.
/// Scores are standardized, so the signal variance is pinned at 1.
const LENGTH_SCALES: [f64; 6] = [0.05, 0.1, 0.2, 0.4, 0.8, 1.6];
const NOISE_VARIANCES: [f64; 3] = [1e-6, 1e-4, 1e-2];

/// Posterior mean and standard deviation at one query point, in score space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Posterior {
    pub mean: f64,
    pub sigma: f64,
}

/// A fitted Gaussian process for one objective.
#[derive(Debug, Clone)]
pub struct GpModel {
    kernel: SquaredExponential,
    x: Array2<f64>,
    y: Array1<f64>,
    chol: Array2<f64>,
    alpha: Array1<f64>,
    log_marginal_likelihood: f64,
}

impl GpModel {
    /// Fit with fixed hyperparameters. Retries the factorization with
    /// growing diagonal jitter; surfaces `DegenerateFit` once the retry
    /// budget is spent.
    pub fn fit(
        objective: &str,
        x: Array2<f64>,
        y: Array1<f64>,
        kernel: SquaredExponential,
    ) -> LdResult<Self> {
        let n = x.nrows();
        let gram = kernel.gram(&x);

        let mut jitter = 0.0;
        for attempt in 0..=MAX_JITTER_RETRIES {
            let mut k = gram.clone();
            if jitter > 0.0 {
                for i in 0..n {
                    k[[i, i]] += jitter;
                }
            }
            if let Some(chol) = cholesky(&k) {
                let alpha = chol_solve(&chol, &y);
                let log_det: f64 = (0..n).map(|i| chol[[i, i]].ln()).sum();
                let lml = -0.5 * y.dot(&alpha)
                    - log_det
                    - 0.5 * n as f64 * (2.0 * std::f64::consts::PI).ln();
                if attempt > 0 {
                    debug!(
                        objective,
                        attempt, jitter, "GP factorization needed jitter"
                    );
                }
                return Ok(Self {
                    kernel,
                    x,
                    y,
                    chol,
                    alpha,
                    log_marginal_likelihood: lml,
                });
            }
            jitter = if jitter == 0.0 { 1e-10 } else { jitter * 10.0 };
        }

        Err(LdError::DegenerateFit {
            objective: objective.to_string(),
            attempts: MAX_JITTER_RETRIES + 1,
            message: "covariance matrix is not positive definite".to_string(),
        })
    }

    /// Fit with hyperparameters chosen by log marginal likelihood over the
    /// candidate grid. Candidates whose factorization degenerates are
    /// skipped; if every candidate degenerates the last error surfaces.
    pub fn fit_auto(objective: &str, x: Array2<f64>, y: Array1<f64>) -> LdResult<Self> {
        let mut best: Option<GpModel> = None;
        let mut last_err = None;
        for &ls in &LENGTH_SCALES {
            for &noise in &NOISE_VARIANCES {
                let kernel = SquaredExponential::new(ls, 1.0, noise);
                match Self::fit(objective, x.clone(), y.clone(), kernel) {
                    Ok(model) => {
                        let better = best
                            .as_ref()
                            .map(|b| {
                                model.log_marginal_likelihood > b.log_marginal_likelihood
                            })
                            .unwrap_or(true);
                        if better {
                            best = Some(model);
                        }
                    }
                    Err(e) => last_err = Some(e),
                }
            }
        }
        match best {
            Some(model) => {
                debug!(
                    objective,
                    length_scale = model.kernel.length_scale,
                    noise = model.kernel.noise_variance,
                    lml = model.log_marginal_likelihood,
                    "selected GP hyperparameters"
                );
                Ok(model)
            }
            None => Err(last_err.unwrap_or(LdError::DegenerateFit {
                objective: objective.to_string(),
                attempts: 0,
                message: "no hyperparameter candidate converged".to_string(),
            })),
        }
    }

    pub fn len(&self) -> usize {
        self.x.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.x.nrows() == 0
    }

    pub fn kernel(&self) -> SquaredExponential {
        self.kernel
    }

    pub fn log_marginal_likelihood(&self) -> f64 {
        self.log_marginal_likelihood
    }

    /// Posterior at one normalized query point.
    pub fn predict(&self, query: ArrayView1<'_, f64>) -> Posterior {
        let k_star = self.kernel.cross(&self.x, query);
        let mean = k_star.dot(&self.alpha);
        let v = solve_lower(&self.chol, &k_star);
        let var = self.kernel.signal_variance - v.dot(&v);
        Posterior {
            mean,
            sigma: var.max(1e-12).sqrt(),
        }
    }

    /// Refactorize with one extra (fantasized) observation, keeping the
    /// fitted hyperparameters. Used for greedy batch selection.
    pub fn condition_on(
        &self,
        objective: &str,
        query: ArrayView1<'_, f64>,
        value: f64,
    ) -> LdResult<Self> {
        let n = self.x.nrows();
        let d = self.x.ncols();
        let mut x = Array2::zeros((n + 1, d));
        for i in 0..n {
            x.row_mut(i).assign(&self.x.row(i));
        }
        x.row_mut(n).assign(&query);
        let mut y = Array1::zeros(n + 1);
        for i in 0..n {
            y[i] = self.y[i];
        }
        y[n] = value;
        Self::fit(objective, x, y, self.kernel)
    }
}

/// Lower-triangular Cholesky factor, `None` when a pivot is not positive.
fn cholesky(a: &Array2<f64>) -> Option<Array2<f64>> {
    let n = a.nrows();
    let mut l: Array2<f64> = Array2::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            let mut sum = a[[i, j]];
            for k in 0..j {
                sum -= l[[i, k]] * l[[j, k]];
            }
            if i == j {
                if sum <= 0.0 || !sum.is_finite() {
                    return None;
                }
                l[[i, i]] = sum.sqrt();
            } else {
                l[[i, j]] = sum / l[[j, j]];
            }
        }
    }
    Some(l)
}

/// Forward substitution: solve L z = b.
fn solve_lower(l: &Array2<f64>, b: &Array1<f64>) -> Array1<f64> {
    let n = b.len();
    let mut z = Array1::zeros(n);
    for i in 0..n {
        let mut sum = b[i];
        for k in 0..i {
            sum -= l[[i, k]] * z[k];
        }
        z[i] = sum / l[[i, i]];
    }
    z
}

/// Solve (L Lᵀ) x = b by forward then backward substitution.
fn chol_solve(l: &Array2<f64>, b: &Array1<f64>) -> Array1<f64> {
    let n = b.len();
    let z = solve_lower(l, b);
    let mut x = Array1::zeros(n);
    for i in (0..n).rev() {
        let mut sum = z[i];
        for k in (i + 1)..n {
            sum -= l[[k, i]] * x[k];
        }
        x[i] = sum / l[[i, i]];
    }
    x
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn fit_line() -> GpModel {
        // Noisy-free samples of y = x on [0, 1].
        let x = array![[0.0], [0.25], [0.5], [0.75], [1.0]];
        let y = array![0.0, 0.25, 0.5, 0.75, 1.0];
        GpModel::fit_auto("f", x, y).unwrap()
    }

    #[test]
    fn cholesky_recovers_known_factor() {
        let a = array![[4.0, 2.0], [2.0, 3.0]];
        let l = cholesky(&a).unwrap();
        assert!((l[[0, 0]] - 2.0).abs() < 1e-12);
        assert!((l[[1, 0]] - 1.0).abs() < 1e-12);
        assert!((l[[1, 1]] - 2.0_f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn cholesky_rejects_indefinite() {
        let a = array![[1.0, 2.0], [2.0, 1.0]];
        assert!(cholesky(&a).is_none());
    }

    #[test]
    fn chol_solve_matches_direct_solution() {
        let a = array![[4.0, 2.0], [2.0, 3.0]];
        let b = array![1.0, 2.0];
        let l = cholesky(&a).unwrap();
        let x = chol_solve(&l, &b);
        // A x should equal b
        assert!((4.0 * x[0] + 2.0 * x[1] - 1.0).abs() < 1e-10);
        assert!((2.0 * x[0] + 3.0 * x[1] - 2.0).abs() < 1e-10);
    }

    #[test]
    fn posterior_interpolates_training_points() {
        let model = fit_line();
        let p = model.predict(array![0.5].view());
        assert!((p.mean - 0.5).abs() < 0.05);
        // Uncertainty shrinks at observed points relative to gaps.
        let far = model.predict(array![0.125].view());
        assert!(p.sigma <= far.sigma + 1e-9);
    }

    #[test]
    fn posterior_uncertainty_grows_off_data() {
        let model = fit_line();
        let near = model.predict(array![0.5].view());
        // Outside the sampled range in the unit cube sense.
        let off = model.predict(array![5.0].view());
        assert!(off.sigma > near.sigma);
    }

    #[test]
    fn conditioning_adds_a_point() {
        let model = fit_line();
        let before = model.predict(array![0.6].view());
        let fantasized = model
            .condition_on("f", array![0.6].view(), before.mean)
            .unwrap();
        assert_eq!(fantasized.len(), model.len() + 1);
        // Fantasizing the mean should collapse local uncertainty.
        let after = fantasized.predict(array![0.6].view());
        assert!(after.sigma < before.sigma);
    }

    #[test]
    fn duplicate_rows_fit_with_jitter_rather_than_failing() {
        let x = array![[0.3], [0.3], [0.3], [0.7]];
        let y = array![1.0, 1.0, 1.0, 2.0];
        // Exactly duplicated rows make the noise-free Gram singular; the
        // jitter ladder must still produce a usable model.
        let model = GpModel::fit("f", x, y, SquaredExponential::new(0.4, 1.0, 0.0));
        assert!(model.is_ok());
    }
}
