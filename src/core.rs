//! Chain stepping and parallel execution of independent chains.

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use rayon::prelude::*;

use crate::error::Result;
use crate::stats::AcceptanceTracker;

/// Steps of the rolling acceptance rate shown next to progress bars.
const ACCEPT_WINDOW: usize = 100;

pub trait MarkovChain {
    /// What a finished chain hands back.
    type Output;

    /// Generates the next chain position and returns it.
    fn step(&mut self) -> Result<&[f64]>;

    /// The current position without stepping.
    fn current_state(&self) -> &[f64];

    /// Number of positions still to generate.
    fn remaining(&self) -> usize;

    /// Collects the generated chain once every position is written.
    fn finish(&mut self) -> Result<Self::Output>;
}

pub fn run_chain<M: MarkovChain>(chain: &mut M) -> Result<M::Output> {
    while chain.remaining() > 0 {
        chain.step()?;
    }
    chain.finish()
}

pub fn run_chain_with_progress<M: MarkovChain>(chain: &mut M, pb: &ProgressBar) -> Result<M::Output> {
    pb.set_length(chain.remaining() as u64);
    let mut tracker = AcceptanceTracker::new(ACCEPT_WINDOW, chain.current_state());

    while chain.remaining() > 0 {
        let state = chain.step()?;
        tracker.step(state);
        pb.inc(1);
        pb.set_message(format!("p(accept)≈{:.2}", tracker.p_accept()));
    }
    chain.finish()
}

/// Anything that owns several independent Markov chains.
pub trait HasChains {
    type Chain: MarkovChain + Send;

    fn chains_mut(&mut self) -> &mut Vec<Self::Chain>;
}

pub trait ChainRunner: HasChains
where
    <Self::Chain as MarkovChain>::Output: Send,
{
    /// Runs every chain to completion in parallel.
    fn run(&mut self) -> Result<Vec<<Self::Chain as MarkovChain>::Output>> {
        self.chains_mut().par_iter_mut().map(run_chain).collect()
    }

    /// Like [`ChainRunner::run`], with one progress bar per chain.
    fn run_progress(&mut self) -> Result<Vec<<Self::Chain as MarkovChain>::Output>> {
        let multi = MultiProgress::new();
        let pb_style = ProgressStyle::default_bar()
            .template("{prefix} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-");

        self.chains_mut()
            .par_iter_mut()
            .enumerate()
            .map(|(i, chain)| {
                let pb = multi.add(ProgressBar::new(chain.remaining() as u64));
                pb.set_prefix(format!("Chain {i}"));
                pb.set_style(pb_style.clone());

                let output = run_chain_with_progress(chain, &pb);
                match &output {
                    Ok(_) => pb.finish_with_message("Done!"),
                    Err(e) => pb.abandon_with_message(e.to_string()),
                }
                output
            })
            .collect()
    }
}

impl<T: HasChains> ChainRunner for T where <T::Chain as MarkovChain>::Output: Send {}
