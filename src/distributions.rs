/*!
Target densities the chain driver can sample from.

The driver only talks to a target through [`TargetDensity`]: a support test and an
evaluation call that returns the log-target (or `-2 ln` of it, see [`DensityScale`])
together with the log-likelihood part. Evaluations may be expensive and may be backed by
cooperating processes, which is why `evaluate` takes `&mut self` and accepts `None` as a
pure synchronization call.

# Examples

```rust
use dram_mcmc::distributions::{BoxSupport, Gaussian, TargetDensity};
use nalgebra::{DMatrix, DVector};

let gauss = Gaussian::new(DVector::from_vec(vec![0.0, 1.0]), DMatrix::identity(2, 2)).unwrap();
let mut half_plane = BoxSupport::new(gauss, vec![0.0, f64::NEG_INFINITY], vec![f64::INFINITY; 2]).unwrap();

assert!(half_plane.contains(&[0.5, -3.0]));
assert!(!half_plane.contains(&[-0.5, -3.0]));
let value = half_plane.evaluate(Some(&[0.0, 1.0])).unwrap();
assert_eq!(value.value, 0.0);
```
*/

use std::convert::Infallible;

use nalgebra::{Cholesky, DMatrix, DVector, Dyn};

use crate::error::{DramError, Result};

/// Value returned by one density evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DensityValue {
    /// `ln π(x)` or `-2 ln π(x)`, depending on the configured [`DensityScale`].
    pub value: f64,
    /// Log-likelihood part of the target, reported alongside for diagnostics.
    pub log_likelihood: f64,
}

impl DensityValue {
    pub const SYNC: DensityValue = DensityValue {
        value: 0.0,
        log_likelihood: 0.0,
    };
}

/// How the evaluator reports its main value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DensityScale {
    /// `value = ln π(x)`.
    #[default]
    LogTarget,
    /// `value = -2 ln π(x)`, the usual convention for misfit functionals.
    MinusTwoLogTarget,
}

impl DensityScale {
    pub fn to_log_target(self, value: f64) -> f64 {
        match self {
            DensityScale::LogTarget => value,
            DensityScale::MinusTwoLogTarget => -0.5 * value,
        }
    }
}

/// The (unnormalized) density a chain is built to sample from.
pub trait TargetDensity {
    type Err: std::error::Error + Send + Sync + 'static;

    /// Dimension of the sampling space.
    fn dim(&self) -> usize;

    /// Whether `point` lies in the domain of the density.
    fn contains(&self, _point: &[f64]) -> bool {
        true
    }

    /// Evaluates the density at `point`.
    ///
    /// `None` is a synchronization call used by cooperating processes that do not own the
    /// evaluation. It must not change any chain related state. Must not fail for points
    /// inside the support.
    fn evaluate(&mut self, point: Option<&[f64]>) -> std::result::Result<DensityValue, Self::Err>;
}

impl<T: TargetDensity + ?Sized> TargetDensity for &mut T {
    type Err = T::Err;

    fn dim(&self) -> usize {
        (**self).dim()
    }

    fn contains(&self, point: &[f64]) -> bool {
        (**self).contains(point)
    }

    fn evaluate(&mut self, point: Option<&[f64]>) -> std::result::Result<DensityValue, Self::Err> {
        (**self).evaluate(point)
    }
}

/**
A multivariate Gaussian target given by its mean and covariance.

The returned value is the unnormalized log-density `-0.5 (x-μ)ᵀ Σ⁻¹ (x-μ)`, reported as
both log-target and log-likelihood.
*/
#[derive(Debug, Clone)]
pub struct Gaussian {
    pub mean: DVector<f64>,
    pub cov: DMatrix<f64>,
    chol: Cholesky<f64, Dyn>,
}

impl Gaussian {
    pub fn new(mean: DVector<f64>, cov: DMatrix<f64>) -> Result<Self> {
        if cov.nrows() != mean.len() || cov.ncols() != mean.len() {
            return Err(DramError::DimensionMismatch {
                expected: mean.len(),
                found: cov.nrows(),
            });
        }
        let chol = Cholesky::new(cov.clone()).ok_or(DramError::NotPositiveDefinite)?;
        Ok(Self { mean, cov, chol })
    }

    /// Standard normal in `dim` dimensions.
    pub fn standard(dim: usize) -> Self {
        let cov = DMatrix::identity(dim, dim);
        let chol = Cholesky::new_unchecked(cov.clone());
        Self {
            mean: DVector::zeros(dim),
            cov,
            chol,
        }
    }

    pub fn unnorm_log_prob(&self, theta: &[f64]) -> f64 {
        let diff = DVector::from_column_slice(theta) - &self.mean;
        -0.5 * diff.dot(&self.chol.solve(&diff))
    }
}

impl TargetDensity for Gaussian {
    type Err = Infallible;

    fn dim(&self) -> usize {
        self.mean.len()
    }

    fn evaluate(&mut self, point: Option<&[f64]>) -> std::result::Result<DensityValue, Infallible> {
        Ok(match point {
            Some(theta) => {
                let lp = self.unnorm_log_prob(theta);
                DensityValue {
                    value: lp,
                    log_likelihood: lp,
                }
            }
            None => DensityValue::SYNC,
        })
    }
}

/// Restricts another target to an axis aligned box `lower <= x <= upper`.
///
/// Infinite bounds leave a coordinate unconstrained.
#[derive(Debug, Clone)]
pub struct BoxSupport<D> {
    pub inner: D,
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

impl<D: TargetDensity> BoxSupport<D> {
    pub fn new(inner: D, lower: Vec<f64>, upper: Vec<f64>) -> Result<Self> {
        for bounds in [&lower, &upper] {
            if bounds.len() != inner.dim() {
                return Err(DramError::DimensionMismatch {
                    expected: inner.dim(),
                    found: bounds.len(),
                });
            }
        }
        Ok(Self {
            inner,
            lower,
            upper,
        })
    }
}

impl<D: TargetDensity> TargetDensity for BoxSupport<D> {
    type Err = D::Err;

    fn dim(&self) -> usize {
        self.inner.dim()
    }

    fn contains(&self, point: &[f64]) -> bool {
        point
            .iter()
            .zip(self.lower.iter().zip(&self.upper))
            .all(|(x, (lo, hi))| lo <= x && x <= hi)
            && self.inner.contains(point)
    }

    fn evaluate(&mut self, point: Option<&[f64]>) -> std::result::Result<DensityValue, D::Err> {
        self.inner.evaluate(point)
    }
}

/// Wraps a closure returning the log-target. The whole space is the support.
pub struct FnDensity<F> {
    dim: usize,
    log_target: F,
}

impl<F: FnMut(&[f64]) -> f64> FnDensity<F> {
    pub fn new(dim: usize, log_target: F) -> Self {
        Self { dim, log_target }
    }
}

impl<F: FnMut(&[f64]) -> f64> TargetDensity for FnDensity<F> {
    type Err = Infallible;

    fn dim(&self) -> usize {
        self.dim
    }

    fn evaluate(&mut self, point: Option<&[f64]>) -> std::result::Result<DensityValue, Infallible> {
        Ok(match point {
            Some(theta) => {
                let lp = (self.log_target)(theta);
                DensityValue {
                    value: lp,
                    log_likelihood: lp,
                }
            }
            None => DensityValue::SYNC,
        })
    }
}

/// Prior times likelihood.
///
/// Values of both parts are added, which is correct for either [`DensityScale`] as long as
/// both parts use the same one. The reported log-likelihood is the likelihood's.
#[derive(Debug, Clone)]
pub struct Posterior<P, L> {
    pub prior: P,
    pub likelihood: L,
}

/// Failure in one of the two parts of a [`Posterior`].
#[derive(thiserror::Error, Debug)]
pub enum PosteriorError<P: std::error::Error, L: std::error::Error> {
    #[error("prior evaluation failed: {0}")]
    Prior(#[source] P),
    #[error("likelihood evaluation failed: {0}")]
    Likelihood(#[source] L),
}

impl<P: TargetDensity, L: TargetDensity> Posterior<P, L> {
    pub fn new(prior: P, likelihood: L) -> Result<Self> {
        if prior.dim() != likelihood.dim() {
            return Err(DramError::DimensionMismatch {
                expected: prior.dim(),
                found: likelihood.dim(),
            });
        }
        Ok(Self { prior, likelihood })
    }
}

impl<P: TargetDensity, L: TargetDensity> TargetDensity for Posterior<P, L> {
    type Err = PosteriorError<P::Err, L::Err>;

    fn dim(&self) -> usize {
        self.prior.dim()
    }

    fn contains(&self, point: &[f64]) -> bool {
        self.prior.contains(point) && self.likelihood.contains(point)
    }

    fn evaluate(&mut self, point: Option<&[f64]>) -> std::result::Result<DensityValue, Self::Err> {
        let prior = self.prior.evaluate(point).map_err(PosteriorError::Prior)?;
        let likelihood = self
            .likelihood
            .evaluate(point)
            .map_err(PosteriorError::Likelihood)?;
        Ok(DensityValue {
            value: prior.value + likelihood.value,
            log_likelihood: likelihood.log_likelihood,
        })
    }
}

/**
Gaussian likelihood of observations whose covariance is block diagonal.

`model` maps a parameter vector to predicted observations. The misfit
`-0.5 Σ_b r_bᵀ C_b⁻¹ r_b` is accumulated block by block, with `r = observations - model(θ)`
split according to the block sizes.
*/
pub struct GaussianLikelihoodBlockDiagonal<F> {
    dim: usize,
    observations: DVector<f64>,
    blocks: Vec<Cholesky<f64, Dyn>>,
    model: F,
}

impl<F: FnMut(&[f64]) -> DVector<f64>> GaussianLikelihoodBlockDiagonal<F> {
    pub fn new(
        dim: usize,
        observations: DVector<f64>,
        blocks: Vec<DMatrix<f64>>,
        model: F,
    ) -> Result<Self> {
        let total: usize = blocks.iter().map(|b| b.nrows()).sum();
        if total != observations.len() {
            return Err(DramError::DimensionMismatch {
                expected: observations.len(),
                found: total,
            });
        }
        let blocks = blocks
            .into_iter()
            .map(|b| {
                if !b.is_square() {
                    return Err(DramError::DimensionMismatch {
                        expected: b.nrows(),
                        found: b.ncols(),
                    });
                }
                Cholesky::new(b).ok_or(DramError::NotPositiveDefinite)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            dim,
            observations,
            blocks,
            model,
        })
    }

    fn log_likelihood(&mut self, theta: &[f64]) -> f64 {
        let prediction = (self.model)(theta);
        let residual = &self.observations - prediction;
        let mut offset = 0;
        let mut misfit = 0.0;
        for block in &self.blocks {
            let n = block.l_dirty().nrows();
            let r = residual.rows(offset, n).into_owned();
            misfit += r.dot(&block.solve(&r));
            offset += n;
        }
        -0.5 * misfit
    }
}

impl<F: FnMut(&[f64]) -> DVector<f64>> TargetDensity for GaussianLikelihoodBlockDiagonal<F> {
    type Err = Infallible;

    fn dim(&self) -> usize {
        self.dim
    }

    fn evaluate(&mut self, point: Option<&[f64]>) -> std::result::Result<DensityValue, Infallible> {
        Ok(match point {
            Some(theta) => {
                let ll = self.log_likelihood(theta);
                DensityValue {
                    value: ll,
                    log_likelihood: ll,
                }
            }
            None => DensityValue::SYNC,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use nalgebra::dmatrix;

    #[test]
    fn gaussian_unnorm_log_prob_matches_closed_form() {
        let g = Gaussian::new(
            DVector::from_vec(vec![0.0, 1.0]),
            dmatrix![4.0, 2.0; 2.0, 3.0],
        )
        .unwrap();
        // inv([[4,2],[2,3]]) = [[3,-2],[-2,4]] / 8
        let x = [1.0, 2.0];
        let expected = -0.5 * (3.0 * 1.0 - 2.0 * 2.0 * 1.0 * 1.0 + 4.0 * 1.0) / 8.0;
        assert_abs_diff_eq!(g.unnorm_log_prob(&x), expected, epsilon = 1e-12);
    }

    #[test]
    fn gaussian_rejects_indefinite_covariance() {
        let res = Gaussian::new(DVector::zeros(2), dmatrix![1.0, 2.0; 2.0, 1.0]);
        assert!(matches!(res, Err(DramError::NotPositiveDefinite)));
    }

    #[test]
    fn sync_call_returns_placeholder() {
        let mut g = Gaussian::standard(3);
        assert_eq!(g.evaluate(None).unwrap(), DensityValue::SYNC);
    }

    #[test]
    fn minus_two_log_scale() {
        assert_eq!(DensityScale::MinusTwoLogTarget.to_log_target(4.0), -2.0);
        assert_eq!(DensityScale::LogTarget.to_log_target(4.0), 4.0);
    }

    #[test]
    fn box_support_bounds() {
        let b = BoxSupport::new(Gaussian::standard(1), vec![0.0], vec![f64::INFINITY]).unwrap();
        assert!(b.contains(&[0.0]));
        assert!(b.contains(&[10.0]));
        assert!(!b.contains(&[-1e-9]));
        assert!(BoxSupport::new(Gaussian::standard(2), vec![0.0], vec![1.0, 1.0]).is_err());
    }

    #[test]
    fn posterior_adds_parts() {
        let prior = FnDensity::new(1, |x: &[f64]| -x[0].abs());
        let likelihood = Gaussian::standard(1);
        let mut post = Posterior::new(prior, likelihood).unwrap();
        let v = post.evaluate(Some(&[2.0])).unwrap();
        assert_abs_diff_eq!(v.value, -2.0 - 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(v.log_likelihood, -2.0, epsilon = 1e-12);
    }

    #[test]
    fn block_diagonal_equals_full_covariance() {
        let blocks = vec![dmatrix![2.0, 0.5; 0.5, 1.0], dmatrix![3.0]];
        let observations = DVector::from_vec(vec![1.0, -1.0, 0.5]);
        let model = |theta: &[f64]| DVector::from_vec(vec![theta[0], theta[1], theta[0] + theta[1]]);
        let mut lik =
            GaussianLikelihoodBlockDiagonal::new(2, observations.clone(), blocks, model).unwrap();

        let full = dmatrix![2.0, 0.5, 0.0; 0.5, 1.0, 0.0; 0.0, 0.0, 3.0];
        let theta = [0.3, -0.2];
        let r = &observations - model(&theta);
        let expected = -0.5 * r.dot(&(full.try_inverse().unwrap() * &r));

        let v = lik.evaluate(Some(&theta)).unwrap();
        assert_abs_diff_eq!(v.value, expected, epsilon = 1e-12);
    }

    #[test]
    fn block_diagonal_size_mismatch() {
        let res = GaussianLikelihoodBlockDiagonal::new(
            1,
            DVector::from_vec(vec![1.0, 2.0]),
            vec![dmatrix![1.0]],
            |_: &[f64]| DVector::zeros(2),
        );
        assert!(matches!(res, Err(DramError::DimensionMismatch { .. })));
    }
}
