//! Tests checking that DRAM chains reproduce the moments of Gaussian targets.
//!
//! Sample means and covariances of the pooled chains are compared with the target's.

use dram_mcmc::config::DramOptions;
use dram_mcmc::core::ChainRunner;
use dram_mcmc::distributions::{
    BoxSupport, Gaussian, GaussianLikelihoodBlockDiagonal, Posterior, TargetDensity,
};
use dram_mcmc::dram::{ChainOutput, DramChain, DramSampler};
use dram_mcmc::kernel::{IsotropicKernel, ScaledCovKernel};
use nalgebra::{dmatrix, DMatrix, DVector};
use ndarray::{s, Array1, Array2, Axis};

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray_stats::CorrelationExt;

    /// Stacks the post burn-in rows of every chain.
    fn pool(outputs: &[ChainOutput], burnin: usize) -> Array2<f64> {
        let views: Vec<_> = outputs
            .iter()
            .map(|o| o.positions.slice(s![burnin.., ..]))
            .collect();
        ndarray::concatenate(Axis(0), &views).expect("chains have the same dimension")
    }

    fn to_array2(m: &DMatrix<f64>) -> Array2<f64> {
        Array2::from_shape_fn((m.nrows(), m.ncols()), |(i, j)| m[(i, j)])
    }

    fn run_gaussian_2d_test(n_chains: usize, extra_stages: usize, adapt: bool) {
        const CHAIN_SIZE: usize = 50_000;
        const BURNIN: usize = 2_000;
        const SEED: u64 = 42;

        let target = Gaussian::new(
            DVector::from_vec(vec![0.0, 1.0]),
            dmatrix![4.0, 2.0; 2.0, 3.0],
        )
        .unwrap();
        let (n0, m) = if adapt { (500, 500) } else { (0, 0) };
        let options = DramOptions {
            raw_chain_size: CHAIN_SIZE,
            dr_max_num_extra_stages: extra_stages,
            am_initial_non_adapt_interval: n0,
            am_adapt_interval: m,
            am_eta: 2.4 * 2.4 / 2.0,
            totally_mute: true,
            ..Default::default()
        };
        let kernel =
            ScaledCovKernel::new(DMatrix::identity(2, 2), &options.extra_stage_scales()).unwrap();
        let mut sampler =
            DramSampler::new(target.clone(), kernel, options, &[5.0, -4.0], n_chains)
                .unwrap()
                .set_seed(SEED);

        let outputs = sampler.run().unwrap();
        assert_eq!(outputs.len(), n_chains);

        let samples = pool(&outputs, BURNIN);
        assert_eq!(samples.nrows(), n_chains * (CHAIN_SIZE - BURNIN));

        let mean = samples.mean_axis(Axis(0)).unwrap();
        let cov = samples.t().cov(1.0).unwrap();
        let target_mean = Array1::from_iter(target.mean.iter().copied());
        assert_abs_diff_eq!(mean, target_mean, epsilon = 0.3);
        assert_abs_diff_eq!(cov, to_array2(&target.cov), epsilon = 0.5);

        for out in &outputs {
            assert!(out.log_targets.iter().all(|lt| lt.is_finite()));
            if adapt {
                assert_eq!(out.summary.num_adaptations, 1 + (CHAIN_SIZE - 1 - n0) / m);
            }
        }
    }

    #[test]
    fn test_metropolis_1_chain() {
        run_gaussian_2d_test(1, 0, false);
    }

    #[test]
    fn test_dr_4_chains() {
        run_gaussian_2d_test(4, 2, false);
    }

    #[test]
    fn test_am_4_chains() {
        run_gaussian_2d_test(4, 0, true);
    }

    #[test]
    fn test_dram_4_chains() {
        run_gaussian_2d_test(4, 3, true);
    }

    fn half_normal_chain(chain_size: usize, put_out_of_bounds_in_chain: bool) -> ChainOutput {
        let target =
            BoxSupport::new(Gaussian::standard(1), vec![0.0], vec![f64::INFINITY]).unwrap();
        let options = DramOptions {
            raw_chain_size: chain_size,
            dr_max_num_extra_stages: 3,
            dr_scales_for_extra_stages: vec![3.0, 5.0, 8.0],
            put_out_of_bounds_in_chain,
            totally_mute: true,
            ..Default::default()
        }
        .set_seed(17);
        let kernel = IsotropicKernel::new(1, 2.0, &options.extra_stage_scales()).unwrap();
        DramChain::new(target, kernel, options, &[1.0])
            .unwrap()
            .generate()
            .unwrap()
    }

    /// Redrawing outside the support keeps every position inside it.
    #[test]
    fn test_half_normal_redraw_stays_in_support() {
        let out = half_normal_chain(20_000, false);
        assert!(out.positions.iter().all(|x| *x >= 0.0));
        assert!(out.log_targets.iter().all(|lt| lt.is_finite()));
        assert_eq!(out.summary.num_out_of_support, 0);
    }

    /// Half-normal: a standard normal restricted to x >= 0. Out-of-support candidates
    /// are rejections, and the delayed rejection stages still run after them.
    #[test]
    fn test_half_normal_moments() {
        let out = half_normal_chain(200_000, true);
        let xs = out.positions.column(0);
        assert!(xs.iter().all(|x| *x >= 0.0));
        assert!(out.summary.num_out_of_support > 0);
        // E[X] = sqrt(2/pi), Var[X] = 1 - 2/pi
        let expected_mean = (2.0 / std::f64::consts::PI).sqrt();
        assert_abs_diff_eq!(xs.mean().unwrap(), expected_mean, epsilon = 0.015);
        assert_abs_diff_eq!(xs.var(1.0), 1.0 - 2.0 / std::f64::consts::PI, epsilon = 0.015);
    }

    /// Linear model with two independent observation groups. With a flat prior the
    /// posterior of the slope and intercept is Gaussian with a known mean.
    #[test]
    fn test_block_diagonal_linear_model() {
        let xs = [-2.0, -1.0, 0.0, 1.0, 2.0, 3.0];
        let observations = DVector::from_vec(vec![-2.9, -1.1, 1.05, 2.9, 5.1, 6.95]);
        let blocks = vec![
            DMatrix::identity(3, 3) * 0.04,
            dmatrix![0.04, 0.01, 0.0; 0.01, 0.04, 0.01; 0.0, 0.01, 0.04],
        ];
        let model = move |theta: &[f64]| {
            DVector::from_iterator(xs.len(), xs.iter().map(|x| theta[0] * x + theta[1]))
        };
        let likelihood =
            GaussianLikelihoodBlockDiagonal::new(2, observations.clone(), blocks.clone(), model)
                .unwrap();
        let prior = BoxSupport::new(
            Gaussian::new(DVector::zeros(2), DMatrix::identity(2, 2) * 1e6).unwrap(),
            vec![-100.0; 2],
            vec![100.0; 2],
        )
        .unwrap();
        let mut posterior = Posterior::new(prior, likelihood).unwrap();
        assert_eq!(posterior.dim(), 2);

        // generalized least squares with the full block covariance
        let mut cov = DMatrix::<f64>::zeros(6, 6);
        cov.view_mut((0, 0), (3, 3)).copy_from(&blocks[0]);
        cov.view_mut((3, 3), (3, 3)).copy_from(&blocks[1]);
        let design = DMatrix::from_fn(6, 2, |i, j| if j == 0 { xs[i] } else { 1.0 });
        let w = cov.try_inverse().unwrap();
        let precision = design.transpose() * &w * &design;
        let gls = precision.clone().try_inverse().unwrap() * design.transpose() * &w * &observations;

        let options = DramOptions {
            raw_chain_size: 30_000,
            dr_max_num_extra_stages: 1,
            am_initial_non_adapt_interval: 1_000,
            am_adapt_interval: 1_000,
            am_eta: 2.4 * 2.4 / 2.0,
            totally_mute: true,
            ..Default::default()
        }
        .set_seed(8);
        let kernel = ScaledCovKernel::new(
            DMatrix::identity(2, 2) * 0.01,
            &options.extra_stage_scales(),
        )
        .unwrap();
        let out = DramChain::new(&mut posterior, kernel, options, &[2.0, 1.0])
            .unwrap()
            .generate()
            .unwrap();

        let mean = out
            .positions
            .slice(s![5_000.., ..])
            .mean_axis(Axis(0))
            .unwrap();
        assert_abs_diff_eq!(mean[0], gls[0], epsilon = 0.02);
        assert_abs_diff_eq!(mean[1], gls[1], epsilon = 0.05);
    }
}
