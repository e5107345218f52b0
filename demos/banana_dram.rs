//! A DRAM demo on the twisted Gaussian ("banana") target, with a bounded support and a
//! target written in the -2 log convention.

use dram_mcmc::config::DramOptions;
use dram_mcmc::distributions::{DensityScale, DensityValue, TargetDensity};
use dram_mcmc::dram::DramChain;
use dram_mcmc::kernel::ScaledCovKernel;

use nalgebra::DMatrix;
use ndarray::{s, Axis};
use std::convert::Infallible;
use std::error::Error;

/// A standard 2D Gaussian with correlation `rho`, bent along the parabola `y = b x^2`.
///
/// `evaluate` returns the misfit `-2 log π(x, y)`, so chains must use
/// [`DensityScale::MinusTwoLogTarget`]. Points outside `[-bound, bound]^2` are excluded.
#[derive(Clone, Copy)]
pub struct Banana {
    pub rho: f64,
    pub b: f64,
    pub bound: f64,
}

impl Banana {
    fn misfit(&self, x: f64, y: f64) -> f64 {
        let u = x;
        let v = y - self.b * x * x;
        (u * u - 2.0 * self.rho * u * v + v * v) / (1.0 - self.rho * self.rho)
    }
}

impl TargetDensity for Banana {
    type Err = Infallible;

    fn dim(&self) -> usize {
        2
    }

    fn contains(&self, point: &[f64]) -> bool {
        point.iter().all(|p| p.abs() <= self.bound)
    }

    fn evaluate(&mut self, point: Option<&[f64]>) -> Result<DensityValue, Infallible> {
        Ok(match point {
            Some(p) => {
                let value = self.misfit(p[0], p[1]);
                DensityValue {
                    value,
                    log_likelihood: -0.5 * value,
                }
            }
            None => DensityValue::SYNC,
        })
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    const CHAIN_SIZE: usize = 100_000;
    const BURNIN: usize = 10_000;

    let target = Banana {
        rho: 0.9,
        b: 0.5,
        bound: 20.0,
    };
    let options = DramOptions {
        raw_chain_size: CHAIN_SIZE,
        dr_max_num_extra_stages: 1,
        dr_scales_for_extra_stages: vec![3.0],
        am_initial_non_adapt_interval: 1_000,
        am_adapt_interval: 100,
        am_eta: 2.4 * 2.4 / 2.0,
        density_scale: DensityScale::MinusTwoLogTarget,
        display_period: 20_000,
        ..Default::default()
    }
    .set_seed(2024);

    let kernel = ScaledCovKernel::new(
        DMatrix::identity(2, 2) * 0.5,
        &options.extra_stage_scales(),
    )?;
    let mut chain = DramChain::new(target, kernel, options, &[0.0, 0.0])?;
    let out = chain.generate()?;

    let summary = &out.summary;
    println!("Generated {} positions", summary.chain_size);
    println!(
        "Rejections: {:.1}%, outside the support: {:.2}%",
        summary.rejection_percent(),
        summary.out_of_support_percent()
    );
    println!(
        "Adaptations: {} ({} skipped)",
        summary.num_adaptations, summary.num_skipped_adaptations
    );

    let kept = out.positions.slice(s![BURNIN.., ..]);
    let mean = kept.mean_axis(Axis(0)).ok_or("empty chain")?;
    // E[x] = 0 and E[y] = b E[x^2] = b
    println!(
        "Mean after burn-in: ({:.2}, {:.2}), expected (0.00, {:.2})",
        mean[0], mean[1], target.b
    );
    Ok(())
}
