use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use dram_mcmc::config::DramOptions;
use dram_mcmc::distributions::Gaussian;
use dram_mcmc::dram::DramChain;
use dram_mcmc::kernel::ScaledCovKernel;
use nalgebra::DMatrix;

fn make_chain(
    dim: usize,
    chain_size: usize,
    extra_stages: usize,
    adapt: bool,
) -> DramChain<Gaussian, ScaledCovKernel> {
    let (n0, m) = if adapt { (500, 100) } else { (0, 0) };
    let options = DramOptions {
        raw_chain_size: chain_size,
        dr_max_num_extra_stages: extra_stages,
        am_initial_non_adapt_interval: n0,
        am_adapt_interval: m,
        totally_mute: true,
        ..Default::default()
    }
    .set_seed(42);
    let kernel = ScaledCovKernel::new(DMatrix::identity(dim, dim), &options.extra_stage_scales())
        .expect("identity is positive definite");
    DramChain::new(Gaussian::standard(dim), kernel, options, &vec![0.5; dim])
        .expect("valid chain setup")
}

fn criterion_benchmark(c: &mut Criterion) {
    for (name, extra_stages, adapt) in [
        ("metropolis", 0, false),
        ("dr 2 stages", 2, false),
        ("am", 0, true),
        ("dram", 2, true),
    ] {
        for dim in [2, 20] {
            c.bench_function(&format!("{name} dim {dim} 5000 positions"), |b| {
                b.iter_batched(
                    || make_chain(dim, 5_000, extra_stages, adapt),
                    |mut chain| black_box(chain.generate().expect("chain completes")),
                    BatchSize::SmallInput,
                )
            });
        }
    }
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
