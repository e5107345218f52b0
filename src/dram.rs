/*!
# Delayed Rejection Adaptive Metropolis

This module generates Markov chains with the DRAM algorithm: a random walk Metropolis
sampler that, when a candidate is rejected, tries further candidates drawn from shrunk
proposals (delayed rejection), and that periodically re-estimates its proposal covariance
from the chain generated so far (adaptive Metropolis).

## Overview

- **Target (`D`)**: any [`TargetDensity`]. It may be expensive and is evaluated at most once
  per candidate.
- **Kernel (`K`)**: any [`TransitionKernel`]. It needs one stage per proposal tried at a
  position, so `1 + dr_max_num_extra_stages` stages.
- **One position at a time**: [`DramChain`] implements [`MarkovChain`]; each `step` writes
  exactly one chain position and `finish` hands back a [`ChainOutput`].
- **Several chains**: [`DramSampler`] owns independent chains and runs them in parallel
  through [`crate::core::ChainRunner`]. Chain `i` is seeded with `seed + i`.

## Example Usage

```rust
use dram_mcmc::config::DramOptions;
use dram_mcmc::distributions::Gaussian;
use dram_mcmc::dram::DramChain;
use dram_mcmc::kernel::ScaledCovKernel;
use nalgebra::DMatrix;

let options = DramOptions {
    raw_chain_size: 1_000,
    dr_max_num_extra_stages: 2,
    am_initial_non_adapt_interval: 100,
    am_adapt_interval: 100,
    ..Default::default()
}
.set_seed(42);
let kernel = ScaledCovKernel::new(DMatrix::identity(2, 2), &options.extra_stage_scales()).unwrap();
let mut chain = DramChain::new(Gaussian::standard(2), kernel, options, &[1.0, -1.0]).unwrap();

let output = chain.generate().unwrap();
assert_eq!(output.positions.shape(), &[1_000, 2]);
assert_eq!(output.summary.num_adaptations, 9);
```
*/

use std::time::Instant;

use log::{debug, info};
use nalgebra::DVector;
use ndarray::{Array2, ArrayView1};
use rand::prelude::*;

use crate::acceptance::{accept, alpha, alpha_dr};
use crate::adapt::CovarianceAdapter;
use crate::config::{DramOptions, ProcessRole};
use crate::core::{run_chain, HasChains, MarkovChain};
use crate::dev_tools::Timer;
use crate::distributions::TargetDensity;
use crate::error::{DramError, Result};
use crate::kernel::TransitionKernel;
use crate::position::PositionRecord;
use crate::stats::{ChainSummary, RunTimes};

/// Everything one chain generation produces.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainOutput {
    /// One row per position, row 0 is the initial position.
    pub positions: Array2<f64>,
    pub log_likelihoods: Vec<f64>,
    pub log_targets: Vec<f64>,
    /// Raw first stage acceptance quotient of each position, if `generate_extra` is set.
    pub alpha_quotients: Option<Vec<f64>>,
    /// Positions at which a new point entered the chain. Always starts with 0.
    pub unique_position_ids: Vec<usize>,
    pub summary: ChainSummary,
}

/// Where the generation of one chain currently is. Used for diagnostics only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunContext {
    pub position_id: usize,
    pub stage_id: usize,
}

/**
A single DRAM chain.

Owns its target, kernel, adapter and chain storage for the whole generation pass. The
initial position is checked and evaluated on construction.
*/
pub struct DramChain<D, K> {
    pub target: D,
    pub kernel: K,
    pub options: DramOptions,
    pub seed: u64,
    pub rng: SmallRng,
    adapter: Option<CovarianceAdapter>,
    ctx: RunContext,
    next_position: usize,
    initial: DVector<f64>,
    current: PositionRecord,
    positions: Array2<f64>,
    log_likelihoods: Vec<f64>,
    log_targets: Vec<f64>,
    alpha_quotients: Vec<f64>,
    unique_position_ids: Vec<usize>,
    num_rejections: usize,
    num_out_of_support: usize,
    run_times: RunTimes,
    started: Instant,
    synced: bool,
}

impl<D, K> DramChain<D, K>
where
    D: TargetDensity,
    K: TransitionKernel,
{
    /**
    Prepares a chain starting at `initial_state`.

    Fails if the options are invalid, if dimensions of target, kernel and initial state
    disagree, if the kernel has fewer than `1 + dr_max_num_extra_stages` stages, or if the
    initial state is outside the support or has a non-finite density.
    */
    pub fn new(mut target: D, kernel: K, options: DramOptions, initial_state: &[f64]) -> Result<Self> {
        options.validate()?;
        let dim = target.dim();
        for found in [initial_state.len(), kernel.dim()] {
            if found != dim {
                return Err(DramError::DimensionMismatch { expected: dim, found });
            }
        }
        if kernel.stage_count() < options.dr_max_num_extra_stages + 1 {
            return Err(DramError::invalid_option(
                "dr_max_num_extra_stages",
                format!(
                    "{} extra stages need a kernel with {} stages, it has {}",
                    options.dr_max_num_extra_stages,
                    options.dr_max_num_extra_stages + 1,
                    kernel.stage_count()
                ),
            ));
        }
        if !target.contains(initial_state) {
            return Err(DramError::InitialPositionOutOfSupport);
        }

        let started = Instant::now();
        let mut run_times = RunTimes::default();
        let timer = Timer::start(options.measure_run_times);
        let value = target
            .evaluate(Some(initial_state))
            .map_err(|e| DramError::Density(Box::new(e)))?;
        timer.stop(&mut run_times.target_density);
        let log_target = options.density_scale.to_log_target(value.value);
        if !log_target.is_finite() {
            return Err(DramError::InitialDensityNotFinite(log_target));
        }

        let n = options.raw_chain_size;
        let initial = DVector::from_column_slice(initial_state);
        let current = PositionRecord::in_support(initial.clone(), value.log_likelihood, log_target);
        let mut positions = Array2::zeros((n, dim));
        positions.row_mut(0).assign(&ArrayView1::from(initial_state));
        let mut log_likelihoods = vec![0.0; n];
        let mut log_targets = vec![0.0; n];
        log_likelihoods[0] = current.log_likelihood();
        log_targets[0] = current.log_target();
        let mut alpha_quotients = Vec::new();
        if options.generate_extra {
            alpha_quotients = vec![0.0; n];
            alpha_quotients[0] = 1.0;
        }

        let adapter = options.adaptation_enabled().then(|| {
            CovarianceAdapter::new(
                options.am_initial_non_adapt_interval,
                options.am_adapt_interval,
                options.am_eta,
                options.am_epsilon,
            )
        });

        if !options.totally_mute {
            info!("starting the generation of a Markov chain with {n} positions");
            debug!("initial position: {initial_state:?}, log target {log_target}");
        }

        Ok(Self {
            target,
            kernel,
            seed: options.seed,
            rng: SmallRng::seed_from_u64(options.seed),
            options,
            adapter,
            ctx: RunContext::default(),
            next_position: 1,
            initial,
            current,
            positions,
            log_likelihoods,
            log_targets,
            alpha_quotients,
            unique_position_ids: vec![0],
            num_rejections: 0,
            num_out_of_support: 0,
            run_times,
            started,
            synced: false,
        })
    }

    /**
    Sets a new seed and reseeds the chain's random stream.

    # Examples

    ```rust
    use dram_mcmc::config::DramOptions;
    use dram_mcmc::distributions::Gaussian;
    use dram_mcmc::dram::DramChain;
    use dram_mcmc::kernel::IsotropicKernel;

    let kernel = IsotropicKernel::new(1, 1.0, &[]).unwrap();
    let chain = DramChain::new(Gaussian::standard(1), kernel, DramOptions::default(), &[0.0])
        .unwrap()
        .set_seed(7);
    assert_eq!(chain.seed, 7);
    ```
    */
    pub fn set_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self.rng = SmallRng::seed_from_u64(seed);
        self
    }

    /// Generates all remaining positions and returns the chain.
    pub fn generate(&mut self) -> Result<ChainOutput> {
        run_chain(self)
    }

    pub fn context(&self) -> RunContext {
        self.ctx
    }

    pub fn adapter(&self) -> Option<&CovarianceAdapter> {
        self.adapter.as_ref()
    }

    fn chain_size(&self) -> usize {
        self.positions.nrows()
    }

    /// Blocks in the collective density call once, as a non-owning participant.
    fn sync(&mut self) -> Result<()> {
        self.target
            .evaluate(None)
            .map_err(|e| DramError::Density(Box::new(e)))?;
        self.synced = true;
        Ok(())
    }

    /// Draws a candidate for `history`, redrawing outside the support unless such points
    /// are allowed into the chain.
    fn draw_candidate(&mut self, history: &[usize]) -> Result<(DVector<f64>, bool)> {
        loop {
            let timer = Timer::start(self.options.measure_run_times);
            let candidate = self.kernel.propose(history, &mut self.rng)?;
            timer.stop(&mut self.run_times.candidate);

            let in_support = self.target.contains(candidate.as_slice());
            if in_support || self.options.put_out_of_bounds_in_chain {
                return Ok((candidate, in_support));
            }
        }
    }

    fn evaluate(&mut self, candidate: DVector<f64>) -> Result<PositionRecord> {
        let timer = Timer::start(self.options.measure_run_times);
        let value = self
            .target
            .evaluate(Some(candidate.as_slice()))
            .map_err(|e| DramError::Density(Box::new(e)))?;
        timer.stop(&mut self.run_times.target_density);
        let log_target = self.options.density_scale.to_log_target(value.value);
        Ok(PositionRecord::in_support(candidate, value.log_likelihood, log_target))
    }

    /// Runs the proposal and delayed rejection cascade for one position.
    ///
    /// Returns the accepted record, or `None` if the current position is kept.
    fn transition(&mut self, position_id: usize) -> Result<Option<PositionRecord>> {
        self.kernel.clear_anchors();
        if !self.kernel.set_anchor(self.current.coordinates(), 0) {
            return Err(DramError::InvalidAnchor { position_id });
        }

        let (candidate, in_support) = self.draw_candidate(&[0])?;
        let mut valid_anchor = self.kernel.set_anchor(&candidate, 1);
        let first = if !in_support {
            self.num_out_of_support += 1;
            PositionRecord::out_of_support(candidate)
        } else if valid_anchor {
            self.evaluate(candidate)?
        } else {
            debug!(
                "position {}: kernel refused the candidate as an anchor",
                self.ctx.position_id
            );
            return Ok(None);
        };

        let mut accepted = false;
        let mut quotient = 0.0;
        if !first.out_of_target_support() {
            let timer = Timer::start(self.options.measure_run_times);
            let outcome = alpha(&self.kernel, &self.current, &first, 0, 1)?;
            timer.stop(&mut self.run_times.mh_alpha);
            quotient = outcome.quotient;
            accepted = accept(outcome.alpha, &mut self.rng);
            debug!(
                "position {}: alpha = {:.4}, accept = {accepted}",
                self.ctx.position_id, outcome.alpha
            );
        }
        if self.options.generate_extra {
            self.alpha_quotients[position_id] = quotient;
        }

        if accepted {
            return Ok(Some(first));
        }
        if self.options.dr_max_num_extra_stages == 0 {
            return Ok(None);
        }

        let dr_timer = Timer::start(self.options.measure_run_times);
        let mut records = vec![self.current.clone(), first];
        let mut stage_ids = vec![0, 1];
        let mut stage_id = 0;
        while valid_anchor && !accepted && stage_id < self.options.dr_max_num_extra_stages {
            stage_id += 1;
            self.ctx.stage_id = stage_id;

            let (candidate, in_support) = self.draw_candidate(&stage_ids)?;
            valid_anchor = self.kernel.set_anchor(&candidate, stage_id + 1);
            if !valid_anchor {
                debug!(
                    "position {}, stage {}: kernel refused the candidate as an anchor, \
                     ending the cascade",
                    self.ctx.position_id, self.ctx.stage_id
                );
                break;
            }
            let record = if in_support {
                self.evaluate(candidate)?
            } else {
                PositionRecord::out_of_support(candidate)
            };
            records.push(record);
            stage_ids.push(stage_id + 1);

            if in_support {
                let timer = Timer::start(self.options.measure_run_times);
                let history: Vec<&PositionRecord> = records.iter().collect();
                let dr_alpha = alpha_dr(&self.kernel, &history, &stage_ids)?;
                timer.stop(&mut self.run_times.dr_alpha);
                accepted = accept(dr_alpha, &mut self.rng);
                debug!(
                    "position {}, stage {}: alpha = {dr_alpha:.4}, accept = {accepted}",
                    self.ctx.position_id, self.ctx.stage_id
                );
            }
        }
        dr_timer.stop(&mut self.run_times.dr_total);

        Ok(if accepted { records.pop() } else { None })
    }

    fn summary(&self) -> ChainSummary {
        let run_times = self.options.measure_run_times.then(|| RunTimes {
            chain_total: self.started.elapsed(),
            ..self.run_times
        });
        ChainSummary {
            chain_size: self.chain_size(),
            num_rejections: self.num_rejections,
            num_out_of_support: self.num_out_of_support,
            num_adaptations: self.adapter.as_ref().map_or(0, |a| a.num_adaptations()),
            num_skipped_adaptations: self.adapter.as_ref().map_or(0, |a| a.num_skipped()),
            run_times,
        }
    }
}

impl<D, K> MarkovChain for DramChain<D, K>
where
    D: TargetDensity,
    K: TransitionKernel,
{
    type Output = ChainOutput;

    /**
    Generates the next chain position.

    A candidate is drawn around the current position and accepted with the Metropolis
    probability. If it is rejected and delayed rejection is enabled, further candidates
    are drawn from the shrunk stage proposals until one is accepted or the stages run out.
    After the position is committed, the proposal covariance is adapted if the position
    closes an adaptation window.
    */
    fn step(&mut self) -> Result<&[f64]> {
        let position_id = self.next_position;
        if position_id >= self.chain_size() {
            return Err(DramError::ChainExhausted {
                chain_size: self.chain_size(),
            });
        }
        self.ctx = RunContext {
            position_id,
            stage_id: 0,
        };

        if self.options.process_role == ProcessRole::Subordinate {
            if !self.synced {
                self.sync()?;
            }
            let placeholder = &self.initial * position_id as f64;
            self.positions
                .row_mut(position_id)
                .assign(&ArrayView1::from(placeholder.as_slice()));
            self.num_rejections += 1;
            self.next_position += 1;
            return Ok(self.current.coordinates().as_slice());
        }

        match self.transition(position_id)? {
            Some(record) => {
                self.current = record;
                self.unique_position_ids.push(position_id);
            }
            None => self.num_rejections += 1,
        }
        self.positions
            .row_mut(position_id)
            .assign(&ArrayView1::from(self.current.coordinates().as_slice()));
        self.log_likelihoods[position_id] = self.current.log_likelihood();
        self.log_targets[position_id] = self.current.log_target();

        if let Some(adapter) = self.adapter.as_mut() {
            let timer = Timer::start(self.options.measure_run_times);
            adapter.adapt(self.positions.view(), position_id, &mut self.kernel)?;
            timer.stop(&mut self.run_times.am_total);
        }

        let period = self.options.display_period;
        if period > 0 && (position_id + 1) % period == 0 && !self.options.totally_mute {
            info!("finished generating {} positions", position_id + 1);
        }

        self.next_position += 1;
        Ok(self.current.coordinates().as_slice())
    }

    fn current_state(&self) -> &[f64] {
        self.current.coordinates().as_slice()
    }

    fn remaining(&self) -> usize {
        self.chain_size() - self.next_position.min(self.chain_size())
    }

    fn finish(&mut self) -> Result<ChainOutput> {
        let remaining = self.remaining();
        if remaining > 0 {
            return Err(DramError::Incomplete { remaining });
        }
        match self.options.process_role {
            ProcessRole::Subordinate if !self.synced => self.sync()?,
            // releases the subordinates waiting in the collective call
            ProcessRole::Coordinator => self.sync()?,
            _ => {}
        }

        let summary = self.summary();
        if !self.options.totally_mute {
            info!(
                "finished the generation of a Markov chain with {} positions: {} rejections \
                 ({:.2}%), {} out of target support ({:.2}%)",
                summary.chain_size,
                summary.num_rejections,
                summary.rejection_percent(),
                summary.num_out_of_support,
                summary.out_of_support_percent(),
            );
            if let Some(times) = &summary.run_times {
                info!("run times: {times}");
            }
        }

        let alpha_quotients = self
            .options
            .generate_extra
            .then(|| std::mem::take(&mut self.alpha_quotients));
        Ok(ChainOutput {
            positions: std::mem::take(&mut self.positions),
            log_likelihoods: std::mem::take(&mut self.log_likelihoods),
            log_targets: std::mem::take(&mut self.log_targets),
            alpha_quotients,
            unique_position_ids: std::mem::take(&mut self.unique_position_ids),
            summary,
        })
    }
}

/**
Several independent DRAM chains over the same target.

Every chain gets its own copy of the target and kernel. By default chain `i` is seeded with
`options.seed + i`.

# Examples

```rust
use dram_mcmc::config::DramOptions;
use dram_mcmc::core::ChainRunner;
use dram_mcmc::distributions::Gaussian;
use dram_mcmc::dram::DramSampler;
use dram_mcmc::kernel::IsotropicKernel;

let options = DramOptions {
    raw_chain_size: 500,
    ..Default::default()
};
let kernel = IsotropicKernel::new(2, 1.0, &[]).unwrap();
let mut sampler = DramSampler::new(Gaussian::standard(2), kernel, options, &[0.0, 0.0], 4)
    .unwrap()
    .set_seed(42);
assert_eq!(sampler.chains[3].seed, 45);

let outputs = sampler.run().unwrap();
assert_eq!(outputs.len(), 4);
assert_eq!(outputs[0].positions.nrows(), 500);
```
*/
pub struct DramSampler<D, K> {
    pub chains: Vec<DramChain<D, K>>,
    pub seed: u64,
}

impl<D, K> DramSampler<D, K>
where
    D: TargetDensity + Clone,
    K: TransitionKernel + Clone,
{
    pub fn new(
        target: D,
        kernel: K,
        options: DramOptions,
        initial_state: &[f64],
        n_chains: usize,
    ) -> Result<Self> {
        let seed = options.seed;
        let chains = (0..n_chains)
            .map(|_| DramChain::new(target.clone(), kernel.clone(), options.clone(), initial_state))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { chains, seed }.set_seed(seed))
    }

    /// Reseeds chain `i` with `seed + i`, wrapping at `u64::MAX`.
    pub fn set_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self.chains = self
            .chains
            .into_iter()
            .enumerate()
            .map(|(i, chain)| chain.set_seed(seed.wrapping_add(i as u64)))
            .collect();
        self
    }
}

impl<D, K> HasChains for DramSampler<D, K>
where
    D: TargetDensity + Send,
    K: TransitionKernel + Send,
{
    type Chain = DramChain<D, K>;

    fn chains_mut(&mut self) -> &mut Vec<Self::Chain> {
        &mut self.chains
    }
}
