/*!
Transition kernels: how candidates are proposed during one chain position.

A kernel owns one proposal distribution per stage. Stage 0 is the ordinary Metropolis
proposal, stages `1..` are the increasingly conservative proposals tried by delayed
rejection. Proposals are built around *anchors*: anchor 0 is the current chain position and
anchor `k + 1` is the candidate drawn at stage `k`. The driver clears the anchors at every
new position and sets them in order.

Stage histories are ordered lists of anchor ids. `propose(history)` draws from the proposal
centered at `anchor[history[0]]` at level `history.len() - 1`, and
`log_proposal_density(path)` is the density of that same draw landing on
`anchor[path.last()]`, with `history = path[..len - 1]`. Reversing a path therefore gives the
reverse transition the delayed rejection ratio needs.

# Examples

```rust
use dram_mcmc::kernel::{ScaledCovKernel, TransitionKernel};
use nalgebra::{DMatrix, DVector};
use rand::rngs::SmallRng;
use rand::SeedableRng;

let mut tk = ScaledCovKernel::new(DMatrix::identity(2, 2), &[5.0]).unwrap();
let mut rng = SmallRng::seed_from_u64(42);

tk.clear_anchors();
assert!(tk.set_anchor(&DVector::from_vec(vec![0.0, 0.0]), 0));
let candidate = tk.propose(&[0], &mut rng).unwrap();
assert_eq!(candidate.len(), 2);
```
*/

use std::f64::consts::PI;

use nalgebra::{Cholesky, DMatrix, DVector, Dyn};
use rand::Rng;
use rand_distr::StandardNormal;

use crate::error::{DramError, Result};

pub trait TransitionKernel {
    /// Dimension of the sampling space.
    fn dim(&self) -> usize;

    /// Number of proposal stages (1 + extra delayed rejection stages).
    fn stage_count(&self) -> usize;

    /// Whether `q(x -> y) == q(y -> x)` for every single stage move.
    fn is_symmetric(&self) -> bool;

    /// Forgets all anchors. Called at the start of each chain position.
    fn clear_anchors(&mut self);

    /// Records `position` as anchor `stage_id`.
    ///
    /// Returns `false` if the position cannot be an anchor: wrong dimension, non-finite
    /// coordinates, an id beyond the kernel's stages or a lower anchor still unset.
    fn set_anchor(&mut self, position: &DVector<f64>, stage_id: usize) -> bool;

    fn anchor(&self, stage_id: usize) -> Option<&DVector<f64>>;

    /// Draws a candidate for the stage history used so far in the current cascade.
    fn propose<R: Rng + ?Sized>(&self, stage_history: &[usize], rng: &mut R)
        -> Result<DVector<f64>>;

    /// Log-density of moving from `anchor[path[0]]` to `anchor[path.last()]`.
    fn log_proposal_density(&self, path: &[usize]) -> Result<f64>;

    /// Replaces the base covariance of every stage.
    ///
    /// Returns `false` and keeps the current state when the kernel does not adapt or the
    /// matrix cannot be factorized.
    fn update_covariance(&mut self, cov: &DMatrix<f64>) -> bool;
}

/// Anchor slots shared by the kernel variants.
#[derive(Debug, Clone)]
struct Anchors {
    dim: usize,
    slots: Vec<Option<DVector<f64>>>,
}

impl Anchors {
    fn new(dim: usize, stage_count: usize) -> Self {
        Self {
            dim,
            slots: vec![None; stage_count + 1],
        }
    }

    fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
    }

    fn set(&mut self, position: &DVector<f64>, stage_id: usize) -> bool {
        if stage_id >= self.slots.len()
            || position.len() != self.dim
            || position.iter().any(|x| !x.is_finite())
            || self.slots[..stage_id].iter().any(Option::is_none)
        {
            return false;
        }
        self.slots[stage_id] = Some(position.clone());
        true
    }

    fn get(&self, stage_id: usize) -> Option<&DVector<f64>> {
        self.slots.get(stage_id).and_then(Option::as_ref)
    }

    fn require(&self, stage_id: usize) -> Result<&DVector<f64>> {
        self.get(stage_id)
            .ok_or(DramError::MissingAnchor { stage_id })
    }

    /// Center and level of the draw described by `history`.
    fn draw_from(&self, history: &[usize], stage_count: usize) -> Result<(&DVector<f64>, usize)> {
        let first = *history
            .first()
            .ok_or_else(|| DramError::MalformedCascade("empty stage history".into()))?;
        let level = history.len() - 1;
        if level >= stage_count {
            return Err(DramError::StageOutOfRange { level, stage_count });
        }
        for &id in &history[1..] {
            self.require(id)?;
        }
        Ok((self.require(first)?, level))
    }

    /// Endpoints and level of the move described by `path`.
    fn move_along(
        &self,
        path: &[usize],
        stage_count: usize,
    ) -> Result<(&DVector<f64>, &DVector<f64>, usize)> {
        if path.len() < 2 {
            return Err(DramError::MalformedCascade(format!(
                "a proposal path needs at least 2 stage ids, got {}",
                path.len()
            )));
        }
        let (from, level) = self.draw_from(&path[..path.len() - 1], stage_count)?;
        let to = self.require(path[path.len() - 1])?;
        Ok((from, to, level))
    }
}

fn check_scales(scales: &[f64]) -> Result<()> {
    if let Some(bad) = scales.iter().find(|s| !(s.is_finite() && **s > 0.0)) {
        return Err(DramError::invalid_option(
            "dr_scales_for_extra_stages",
            format!("scales must be finite and positive, got {bad}"),
        ));
    }
    Ok(())
}

/**
Gaussian random walk with a full covariance, shrunk per stage.

Stage `k` proposes from `N(anchor, C / s_k²)` with `s_0 = 1` and `s_k` the k-th scale for
extra stages. `C` is replaced by [`TransitionKernel::update_covariance`] when the chain
adapts.
*/
#[derive(Debug, Clone)]
pub struct ScaledCovKernel {
    scales: Vec<f64>,
    cov: DMatrix<f64>,
    chol: Cholesky<f64, Dyn>,
    ln_det_cov: f64,
    anchors: Anchors,
}

impl ScaledCovKernel {
    /// `extra_stage_scales` holds one shrinkage factor per delayed rejection stage.
    pub fn new(cov: DMatrix<f64>, extra_stage_scales: &[f64]) -> Result<Self> {
        if !cov.is_square() {
            return Err(DramError::DimensionMismatch {
                expected: cov.nrows(),
                found: cov.ncols(),
            });
        }
        check_scales(extra_stage_scales)?;
        let chol = Cholesky::new(cov.clone()).ok_or(DramError::NotPositiveDefinite)?;
        let ln_det_cov = ln_det(&chol);
        let mut scales = Vec::with_capacity(extra_stage_scales.len() + 1);
        scales.push(1.0);
        scales.extend_from_slice(extra_stage_scales);
        let anchors = Anchors::new(cov.nrows(), scales.len());
        Ok(Self {
            scales,
            cov,
            chol,
            ln_det_cov,
            anchors,
        })
    }

    /// Base covariance currently in use (stage 0).
    pub fn covariance(&self) -> &DMatrix<f64> {
        &self.cov
    }

    pub fn scales(&self) -> &[f64] {
        &self.scales
    }
}

fn ln_det(chol: &Cholesky<f64, Dyn>) -> f64 {
    2.0 * chol.l_dirty().diagonal().iter().map(|d| d.ln()).sum::<f64>()
}

impl TransitionKernel for ScaledCovKernel {
    fn dim(&self) -> usize {
        self.cov.nrows()
    }

    fn stage_count(&self) -> usize {
        self.scales.len()
    }

    fn is_symmetric(&self) -> bool {
        true
    }

    fn clear_anchors(&mut self) {
        self.anchors.clear();
    }

    fn set_anchor(&mut self, position: &DVector<f64>, stage_id: usize) -> bool {
        self.anchors.set(position, stage_id)
    }

    fn anchor(&self, stage_id: usize) -> Option<&DVector<f64>> {
        self.anchors.get(stage_id)
    }

    fn propose<R: Rng + ?Sized>(
        &self,
        stage_history: &[usize],
        rng: &mut R,
    ) -> Result<DVector<f64>> {
        let (center, level) = self.anchors.draw_from(stage_history, self.stage_count())?;
        let z = DVector::from_iterator(self.dim(), (0..self.dim()).map(|_| rng.sample(StandardNormal)));
        let step = self.chol.l() * z / self.scales[level];
        Ok(center + step)
    }

    fn log_proposal_density(&self, path: &[usize]) -> Result<f64> {
        let (from, to, level) = self.anchors.move_along(path, self.stage_count())?;
        let s = self.scales[level];
        let d = self.dim() as f64;
        let diff = to - from;
        let quad = s * s * diff.dot(&self.chol.solve(&diff));
        let ln_det = self.ln_det_cov - 2.0 * d * s.ln();
        Ok(-0.5 * (quad + ln_det + d * (2.0 * PI).ln()))
    }

    fn update_covariance(&mut self, cov: &DMatrix<f64>) -> bool {
        if cov.nrows() != self.dim() || cov.ncols() != self.dim() {
            return false;
        }
        match Cholesky::new(cov.clone()) {
            Some(chol) => {
                self.ln_det_cov = ln_det(&chol);
                self.chol = chol;
                self.cov = cov.clone();
                true
            }
            None => false,
        }
    }
}

/**
Isotropic Gaussian random walk with a fixed standard deviation.

Stage `k` adds independent `N(0, (std / s_k)²)` noise to each coordinate. The step size is
never adapted: [`TransitionKernel::update_covariance`] leaves it untouched.
*/
#[derive(Debug, Clone)]
pub struct IsotropicKernel {
    pub std: f64,
    scales: Vec<f64>,
    anchors: Anchors,
}

impl IsotropicKernel {
    pub fn new(dim: usize, std: f64, extra_stage_scales: &[f64]) -> Result<Self> {
        if !(std.is_finite() && std > 0.0) {
            return Err(DramError::invalid_option(
                "std",
                format!("standard deviation must be finite and positive, got {std}"),
            ));
        }
        check_scales(extra_stage_scales)?;
        let mut scales = vec![1.0];
        scales.extend_from_slice(extra_stage_scales);
        let anchors = Anchors::new(dim, scales.len());
        Ok(Self {
            std,
            scales,
            anchors,
        })
    }
}

impl TransitionKernel for IsotropicKernel {
    fn dim(&self) -> usize {
        self.anchors.dim
    }

    fn stage_count(&self) -> usize {
        self.scales.len()
    }

    fn is_symmetric(&self) -> bool {
        true
    }

    fn clear_anchors(&mut self) {
        self.anchors.clear();
    }

    fn set_anchor(&mut self, position: &DVector<f64>, stage_id: usize) -> bool {
        self.anchors.set(position, stage_id)
    }

    fn anchor(&self, stage_id: usize) -> Option<&DVector<f64>> {
        self.anchors.get(stage_id)
    }

    fn propose<R: Rng + ?Sized>(
        &self,
        stage_history: &[usize],
        rng: &mut R,
    ) -> Result<DVector<f64>> {
        let (center, level) = self.anchors.draw_from(stage_history, self.stage_count())?;
        let std = self.std / self.scales[level];
        Ok(center.map(|x| x + std * rng.sample::<f64, _>(StandardNormal)))
    }

    fn log_proposal_density(&self, path: &[usize]) -> Result<f64> {
        let (from, to, level) = self.anchors.move_along(path, self.stage_count())?;
        let var = (self.std / self.scales[level]).powi(2);
        let d = self.dim() as f64;
        let sq: f64 = (to - from).iter().map(|x| x * x).sum();
        Ok(-sq / (2.0 * var) - 0.5 * d * (2.0 * PI * var).ln())
    }

    fn update_covariance(&mut self, _cov: &DMatrix<f64>) -> bool {
        false
    }
}
