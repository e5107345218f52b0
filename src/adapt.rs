/*!
Online covariance adaptation (the "AM" in DRAM).

The adapter keeps a running mean and covariance of the committed chain and, at the end of
every adaptation window, hands a positive definite multiple of it to the transition kernel.
Windows never overlap: the first covers positions `0..=n0`, each later one the `m` positions
committed since the previous window closed.
*/

use log::{debug, warn};
use nalgebra::{Cholesky, DMatrix, DVector};
use ndarray::ArrayView2;

use crate::error::{DramError, Result};
use crate::kernel::TransitionKernel;

/// What happened at one adaptation check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdaptOutcome {
    /// The position does not close a window.
    NotDue,
    /// The kernel received a new covariance.
    Updated,
    /// The statistics were updated but the kernel does not adapt.
    Declined,
    /// No positive definite covariance could be formed, the kernel keeps the previous one.
    Skipped,
}

#[derive(Debug, Clone)]
pub struct CovarianceAdapter {
    initial_non_adapt_interval: usize,
    adapt_interval: usize,
    eta: f64,
    epsilon: f64,
    last_mean: Option<DVector<f64>>,
    last_adapted_cov: Option<DMatrix<f64>>,
    last_chain_size: usize,
    num_adaptations: usize,
    num_skipped: usize,
}

impl CovarianceAdapter {
    /// `initial_non_adapt_interval` is `n0` and `adapt_interval` is `m`. `eta` scales the
    /// covariance handed to the kernel and `epsilon` is the diagonal jitter used when the
    /// estimate is not positive definite.
    pub fn new(initial_non_adapt_interval: usize, adapt_interval: usize, eta: f64, epsilon: f64) -> Self {
        Self {
            initial_non_adapt_interval,
            adapt_interval,
            eta,
            epsilon,
            last_mean: None,
            last_adapted_cov: None,
            last_chain_size: 0,
            num_adaptations: 0,
            num_skipped: 0,
        }
    }

    pub fn last_mean(&self) -> Option<&DVector<f64>> {
        self.last_mean.as_ref()
    }

    pub fn last_adapted_cov(&self) -> Option<&DMatrix<f64>> {
        self.last_adapted_cov.as_ref()
    }

    /// Number of chain positions folded into the running estimate.
    pub fn last_chain_size(&self) -> usize {
        self.last_chain_size
    }

    /// Number of windows that reached the kernel.
    pub fn num_adaptations(&self) -> usize {
        self.num_adaptations
    }

    pub fn num_skipped(&self) -> usize {
        self.num_skipped
    }

    /// Inclusive window of positions closed at `position_id`, if any.
    pub fn window(&self, position_id: usize) -> Option<(usize, usize)> {
        let n0 = self.initial_non_adapt_interval;
        if position_id == n0 {
            return Some((0, n0));
        }
        let m = self.adapt_interval;
        if position_id > n0 && m > 0 && (position_id - n0) % m == 0 {
            return Some((position_id + 1 - m, position_id));
        }
        None
    }

    /// Folds the window closed at `position_id` into the running statistics.
    ///
    /// `chain` holds one committed position per row. Returns `false` if no window closes at
    /// `position_id`.
    pub fn fold_window(&mut self, chain: ArrayView2<f64>, position_id: usize) -> Result<bool> {
        let Some((first, last)) = self.window(position_id) else {
            return Ok(false);
        };
        if last >= chain.nrows() {
            return Err(DramError::DimensionMismatch {
                expected: last + 1,
                found: chain.nrows(),
            });
        }
        let row = |i: usize| DVector::from_iterator(chain.ncols(), chain.row(i).iter().copied());

        match (self.last_mean.take(), self.last_adapted_cov.take()) {
            (Some(mut mean), Some(mut cov)) => {
                for current_id in first..=last {
                    // current_id >= n0 + 1 >= 1 for every later window
                    let id = current_id as f64;
                    let ratio1 = 1.0 - 1.0 / id;
                    let ratio2 = 1.0 / (1.0 + id);
                    let diff = row(current_id) - &mean;
                    cov = cov * ratio1 + (&diff * diff.transpose()) * ratio2;
                    mean += diff * ratio2;
                }
                self.last_mean = Some(mean);
                self.last_adapted_cov = Some(cov);
            }
            _ => {
                let points: Vec<DVector<f64>> = (first..=last).map(row).collect();
                let (mean, cov) = sample_mean_cov(&points)?;
                self.last_mean = Some(mean);
                self.last_adapted_cov = Some(cov);
            }
        }
        self.last_chain_size += last - first + 1;
        Ok(true)
    }

    /// The running covariance made positive definite and scaled by `eta`.
    ///
    /// Tries the estimate as is, then once more with `epsilon` added to the diagonal.
    /// `None` if both fail or nothing has been folded in yet.
    pub fn proposal_covariance(&self) -> Option<DMatrix<f64>> {
        let cov = self.last_adapted_cov.as_ref()?;
        let attempted = if Cholesky::new(cov.clone()).is_some() {
            cov.clone()
        } else {
            let jittered = cov + DMatrix::identity(cov.nrows(), cov.ncols()) * self.epsilon;
            Cholesky::new(jittered.clone())?;
            jittered
        };
        Some(attempted * self.eta)
    }

    /// Runs the adaptation check for a freshly committed `position_id`.
    pub fn adapt<K: TransitionKernel>(
        &mut self,
        chain: ArrayView2<f64>,
        position_id: usize,
        kernel: &mut K,
    ) -> Result<AdaptOutcome> {
        if !self.fold_window(chain, position_id)? {
            return Ok(AdaptOutcome::NotDue);
        }
        let Some(cov) = self.proposal_covariance() else {
            self.num_skipped += 1;
            warn!(
                "position {position_id}: adapted covariance is not positive definite even with \
                 epsilon = {:e}, keeping the previous proposal",
                self.epsilon
            );
            return Ok(AdaptOutcome::Skipped);
        };
        if kernel.update_covariance(&cov) {
            self.num_adaptations += 1;
            debug!(
                "position {position_id}: proposal covariance adapted over {} positions",
                self.last_chain_size
            );
            Ok(AdaptOutcome::Updated)
        } else {
            Ok(AdaptOutcome::Declined)
        }
    }
}

/// Mean and unbiased (`n - 1`) sample covariance of `points`.
///
/// Fails with [`DramError::AdaptationWindowTooSmall`] for fewer than two points.
pub fn sample_mean_cov(points: &[DVector<f64>]) -> Result<(DVector<f64>, DMatrix<f64>)> {
    if points.len() < 2 {
        return Err(DramError::AdaptationWindowTooSmall(points.len()));
    }
    let dim = points[0].len();
    let n = points.len() as f64;
    let mean = points
        .iter()
        .fold(DVector::zeros(dim), |acc, p| acc + p)
        / n;
    let cov = points.iter().fold(DMatrix::zeros(dim, dim), |acc, p| {
        let d = p - &mean;
        acc + &d * d.transpose()
    }) / (n - 1.0);
    Ok((mean, cov))
}
