/*!
Acceptance probabilities for Metropolis and delayed rejection moves.

All functions work on log densities and return a probability in `[0, 1]`. A candidate or
starting point without a usable target value (out of support or non-finite) always gets
acceptance probability 0.
*/

use rand::Rng;

use crate::error::{DramError, Result};
use crate::kernel::TransitionKernel;
use crate::position::PositionRecord;

/// Result of a single stage acceptance test.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlphaOutcome {
    /// `min(1, quotient)`.
    pub alpha: f64,
    /// Raw Metropolis–Hastings quotient before clamping.
    pub quotient: f64,
}

impl AlphaOutcome {
    const REJECT: AlphaOutcome = AlphaOutcome {
        alpha: 0.0,
        quotient: 0.0,
    };
}

/**
Metropolis–Hastings acceptance probability of moving from `x` to `y`.

`x_stage` and `y_stage` are the kernel anchors holding `x` and `y`. They are only used
when the kernel is not symmetric, in which case the quotient is

\[
\frac{\pi(y)\, q(y \to x)}{\pi(x)\, q(x \to y)}
\]
*/
pub fn alpha<K: TransitionKernel>(
    kernel: &K,
    x: &PositionRecord,
    y: &PositionRecord,
    x_stage: usize,
    y_stage: usize,
) -> Result<AlphaOutcome> {
    if !x.has_usable_target() || !y.has_usable_target() {
        return Ok(AlphaOutcome::REJECT);
    }

    let mut log_quotient = y.log_target() - x.log_target();
    if !kernel.is_symmetric() {
        log_quotient += kernel.log_proposal_density(&[y_stage, x_stage])?
            - kernel.log_proposal_density(&[x_stage, y_stage])?;
    }

    let quotient = log_quotient.exp();
    let alpha = if quotient.is_nan() {
        0.0
    } else {
        quotient.min(1.0)
    };
    Ok(AlphaOutcome { alpha, quotient })
}

/**
Delayed rejection acceptance probability of the last record in a cascade.

`records[0]` is the current position and `records[k]` the candidate drawn at stage
`k - 1`. `stage_ids[k]` is the kernel anchor holding `records[k]`. The probability follows
the Tierney–Mira recursion: the forward path `x_0 → … → x_k` is weighed against the
reversed path, each including the rejection probabilities of its own earlier stages.
*/
pub fn alpha_dr<K: TransitionKernel>(
    kernel: &K,
    records: &[&PositionRecord],
    stage_ids: &[usize],
) -> Result<f64> {
    let size = records.len();
    if size < 2 {
        return Err(DramError::MalformedCascade(format!(
            "at least 2 positions are needed, got {size}"
        )));
    }
    if stage_ids.len() != size {
        return Err(DramError::MalformedCascade(format!(
            "{size} positions but {} stage ids",
            stage_ids.len()
        )));
    }

    let (first, last) = (records[0], records[size - 1]);
    if !first.has_usable_target() || !last.has_usable_target() {
        return Ok(0.0);
    }
    if size == 2 {
        return Ok(alpha(kernel, first, last, stage_ids[0], stage_ids[1])?.alpha);
    }

    let mut fwd_records = records.to_vec();
    let mut bwd_records: Vec<&PositionRecord> = records.iter().rev().copied().collect();
    let mut fwd_ids = stage_ids.to_vec();
    let mut bwd_ids: Vec<usize> = stage_ids.iter().rev().copied().collect();

    let mut log_num = kernel.log_proposal_density(&bwd_ids)?;
    let mut log_den = kernel.log_proposal_density(&fwd_ids)?;
    let mut alphas_num = 1.0;
    let mut alphas_den = 1.0;

    for _ in 0..size - 2 {
        fwd_records.pop();
        bwd_records.pop();
        fwd_ids.pop();
        bwd_ids.pop();

        log_num += kernel.log_proposal_density(&bwd_ids)?;
        log_den += kernel.log_proposal_density(&fwd_ids)?;

        alphas_num *= 1.0 - alpha_dr(kernel, &bwd_records, &bwd_ids)?;
        alphas_den *= 1.0 - alpha_dr(kernel, &fwd_records, &fwd_ids)?;
    }

    log_num += last.log_target();
    log_den += first.log_target();

    let ratio = (alphas_num / alphas_den) * (log_num - log_den).exp();
    Ok(if ratio.is_nan() { 0.0 } else { ratio.min(1.0) })
}

/// Draws the accept/reject decision for acceptance probability `alpha`.
///
/// Certain acceptance (`alpha >= 1`) consumes no random number.
pub fn accept<R: Rng + ?Sized>(alpha: f64, rng: &mut R) -> bool {
    if alpha >= 1.0 {
        return true;
    }
    let u: f64 = rng.gen();
    u < alpha
}
