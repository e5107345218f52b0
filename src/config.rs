//! Options controlling one chain generation.

use crate::distributions::DensityScale;
use crate::error::{DramError, Result};

/// Role of this process when density evaluation is shared with other processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcessRole {
    /// The only participant. No synchronization calls are made.
    #[default]
    Single,
    /// Owns the chain and releases the subordinates once generation is done.
    Coordinator,
    /// Does not own the chain. Keeps the collective density call in lock-step with the
    /// coordinator and writes placeholder positions.
    Subordinate,
}

/// Settings of the DRAM chain generator.
///
/// `Default` gives a plain random walk Metropolis sampler of 100 positions: no delayed
/// rejection and no adaptation.
#[derive(Debug, Clone, PartialEq)]
pub struct DramOptions {
    /// Number of positions in the chain, the initial position included.
    pub raw_chain_size: usize,
    /// Delayed rejection stages tried after the first proposal is rejected.
    pub dr_max_num_extra_stages: usize,
    /// Shrinkage of the proposal covariance at each extra stage. The last value is
    /// repeated if there are fewer scales than stages.
    pub dr_scales_for_extra_stages: Vec<f64>,
    /// Keep out-of-support candidates (with `log_target = -inf`) instead of redrawing.
    pub put_out_of_bounds_in_chain: bool,
    /// Positions before the first covariance adaptation. 0 disables adaptation.
    pub am_initial_non_adapt_interval: usize,
    /// Positions between later adaptations. 0 disables adaptation.
    pub am_adapt_interval: usize,
    /// Factor applied to the adapted covariance before it reaches the kernel.
    pub am_eta: f64,
    /// Diagonal jitter added when the adapted covariance is not positive definite.
    pub am_epsilon: f64,
    /// The kernel is driven by a local Hessian. Disables covariance adaptation.
    pub tk_use_local_hessian: bool,
    pub seed: u64,
    pub density_scale: DensityScale,
    pub process_role: ProcessRole,
    /// Record the raw first stage acceptance quotient of every position.
    pub generate_extra: bool,
    /// Measure the time spent in each phase of generation.
    pub measure_run_times: bool,
    /// Log a progress line every this many positions. 0 turns it off.
    pub display_period: usize,
    /// Suppress informational log lines.
    pub totally_mute: bool,
}

impl Default for DramOptions {
    fn default() -> Self {
        Self {
            raw_chain_size: 100,
            dr_max_num_extra_stages: 0,
            dr_scales_for_extra_stages: vec![5.0],
            put_out_of_bounds_in_chain: true,
            am_initial_non_adapt_interval: 0,
            am_adapt_interval: 0,
            am_eta: 1.0,
            am_epsilon: 1e-5,
            tk_use_local_hessian: false,
            seed: 0,
            density_scale: DensityScale::default(),
            process_role: ProcessRole::default(),
            generate_extra: false,
            measure_run_times: false,
            display_period: 500,
            totally_mute: false,
        }
    }
}

impl DramOptions {
    /// Sets the seed of the chain's random stream.
    pub fn set_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.raw_chain_size == 0 {
            return Err(DramError::invalid_option(
                "raw_chain_size",
                "a chain holds at least its initial position",
            ));
        }
        if self.dr_max_num_extra_stages > 0 && self.dr_scales_for_extra_stages.is_empty() {
            return Err(DramError::invalid_option(
                "dr_scales_for_extra_stages",
                "at least one scale is needed when delayed rejection is enabled",
            ));
        }
        if let Some(s) = self
            .dr_scales_for_extra_stages
            .iter()
            .find(|s| !(s.is_finite() && **s > 0.0))
        {
            return Err(DramError::invalid_option(
                "dr_scales_for_extra_stages",
                format!("scales must be finite and positive, got {s}"),
            ));
        }
        if !(self.am_eta.is_finite() && self.am_eta > 0.0) {
            return Err(DramError::invalid_option(
                "am_eta",
                format!("must be finite and positive, got {}", self.am_eta),
            ));
        }
        if !(self.am_epsilon.is_finite() && self.am_epsilon >= 0.0) {
            return Err(DramError::invalid_option(
                "am_epsilon",
                format!("must be finite and non-negative, got {}", self.am_epsilon),
            ));
        }
        Ok(())
    }

    /// Whether the chain adapts its proposal covariance.
    pub fn adaptation_enabled(&self) -> bool {
        !self.tk_use_local_hessian
            && self.am_initial_non_adapt_interval > 0
            && self.am_adapt_interval > 0
    }

    /// One scale per extra delayed rejection stage, padding with the last given scale.
    pub fn extra_stage_scales(&self) -> Vec<f64> {
        let last = self.dr_scales_for_extra_stages.last().copied().unwrap_or(1.0);
        (0..self.dr_max_num_extra_stages)
            .map(|i| {
                self.dr_scales_for_extra_stages
                    .get(i)
                    .copied()
                    .unwrap_or(last)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_plain_metropolis() {
        let opts = DramOptions::default();
        assert!(opts.validate().is_ok());
        assert!(!opts.adaptation_enabled());
        assert!(opts.extra_stage_scales().is_empty());
        assert_eq!(opts.process_role, ProcessRole::Single);
    }

    #[test]
    fn scales_are_padded_with_the_last_value() {
        let opts = DramOptions {
            dr_max_num_extra_stages: 4,
            dr_scales_for_extra_stages: vec![2.0, 3.0],
            ..Default::default()
        };
        assert_eq!(opts.extra_stage_scales(), vec![2.0, 3.0, 3.0, 3.0]);
    }

    #[test]
    fn adaptation_needs_both_intervals() {
        let mut opts = DramOptions {
            am_initial_non_adapt_interval: 10,
            ..Default::default()
        };
        assert!(!opts.adaptation_enabled());
        opts.am_adapt_interval = 5;
        assert!(opts.adaptation_enabled());
        opts.tk_use_local_hessian = true;
        assert!(!opts.adaptation_enabled());
    }

    #[test]
    fn invalid_options() {
        let bad = [
            DramOptions {
                raw_chain_size: 0,
                ..Default::default()
            },
            DramOptions {
                dr_max_num_extra_stages: 1,
                dr_scales_for_extra_stages: vec![],
                ..Default::default()
            },
            DramOptions {
                dr_scales_for_extra_stages: vec![f64::NAN],
                ..Default::default()
            },
            DramOptions {
                am_eta: 0.0,
                ..Default::default()
            },
            DramOptions {
                am_epsilon: -1.0,
                ..Default::default()
            },
        ];
        for opts in bad {
            assert!(matches!(
                opts.validate(),
                Err(DramError::InvalidOption { .. })
            ));
        }
    }

    #[test]
    fn set_seed_is_chainable() {
        let opts = DramOptions::default().set_seed(42);
        assert_eq!(opts.seed, 42);
    }
}
