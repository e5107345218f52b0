//! Counters, run times and acceptance tracking of generated chains.

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

/// Time spent in each phase of one chain generation.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunTimes {
    /// Drawing candidates, redraws included.
    pub candidate: Duration,
    /// Target density evaluations.
    pub target_density: Duration,
    pub mh_alpha: Duration,
    pub dr_alpha: Duration,
    /// Whole delayed rejection cascades.
    pub dr_total: Duration,
    /// Adaptation checks and covariance updates.
    pub am_total: Duration,
    pub chain_total: Duration,
}

impl fmt::Display for RunTimes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pct = |d: Duration| {
            if self.chain_total.is_zero() {
                0.0
            } else {
                100.0 * d.as_secs_f64() / self.chain_total.as_secs_f64()
            }
        };
        write!(
            f,
            "chain {:.3?}: candidates {:.3?} ({:.1}%), target density {:.3?} ({:.1}%), \
             mh alpha {:.3?} ({:.1}%), dr alpha {:.3?} ({:.1}%), dr {:.3?} ({:.1}%), am {:.3?} ({:.1}%)",
            self.chain_total,
            self.candidate,
            pct(self.candidate),
            self.target_density,
            pct(self.target_density),
            self.mh_alpha,
            pct(self.mh_alpha),
            self.dr_alpha,
            pct(self.dr_alpha),
            self.dr_total,
            pct(self.dr_total),
            self.am_total,
            pct(self.am_total),
        )
    }
}

/// Diagnostics of a completed chain.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChainSummary {
    pub chain_size: usize,
    /// Positions where the current point was kept.
    pub num_rejections: usize,
    /// First stage candidates that fell outside the target support.
    pub num_out_of_support: usize,
    /// Covariance updates that reached the kernel.
    pub num_adaptations: usize,
    /// Adaptation cycles skipped because no positive definite covariance was found.
    pub num_skipped_adaptations: usize,
    pub run_times: Option<RunTimes>,
}

impl ChainSummary {
    pub fn rejection_percent(&self) -> f64 {
        self.percent(self.num_rejections)
    }

    pub fn out_of_support_percent(&self) -> f64 {
        self.percent(self.num_out_of_support)
    }

    pub fn acceptance_rate(&self) -> f64 {
        if self.chain_size < 2 {
            return 0.0;
        }
        1.0 - self.num_rejections as f64 / (self.chain_size - 1) as f64
    }

    fn percent(&self, count: usize) -> f64 {
        if self.chain_size == 0 {
            0.0
        } else {
            100.0 * count as f64 / self.chain_size as f64
        }
    }
}

/// Acceptance rate over the most recent steps of a running chain.
#[derive(Debug, Clone, PartialEq)]
pub struct AcceptanceTracker {
    window: usize,
    n_accepted: usize,
    p_accept: f64,
    last_state: Vec<f64>,
    accept_queue: VecDeque<bool>,
}

impl AcceptanceTracker {
    pub fn new(window: usize, initial_state: &[f64]) -> Self {
        Self {
            window: window.max(1),
            n_accepted: 0,
            p_accept: 0.0,
            last_state: initial_state.to_vec(),
            accept_queue: VecDeque::with_capacity(window + 1),
        }
    }

    /// Records the state after one step. A step counts as accepted when the state moved.
    pub fn step(&mut self, x: &[f64]) {
        let accepted = self.last_state.as_slice() != x;
        self.accept_queue.push_back(accepted);
        self.n_accepted += accepted as usize;
        if self.accept_queue.len() > self.window && self.accept_queue.pop_front() == Some(true) {
            self.n_accepted -= 1;
        }
        self.p_accept = self.n_accepted as f64 / self.accept_queue.len() as f64;
        self.last_state.clear();
        self.last_state.extend_from_slice(x);
    }

    pub fn p_accept(&self) -> f64 {
        self.p_accept
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn percentages_follow_chain_size() {
        let summary = ChainSummary {
            chain_size: 200,
            num_rejections: 50,
            num_out_of_support: 10,
            ..Default::default()
        };
        assert_abs_diff_eq!(summary.rejection_percent(), 25.0);
        assert_abs_diff_eq!(summary.out_of_support_percent(), 5.0);
        assert_abs_diff_eq!(summary.acceptance_rate(), 1.0 - 50.0 / 199.0);
    }

    #[test]
    fn empty_summary_has_no_rates() {
        let summary = ChainSummary::default();
        assert_eq!(summary.rejection_percent(), 0.0);
        assert_eq!(summary.acceptance_rate(), 0.0);
    }

    #[test]
    fn tracker_counts_moves() {
        let mut tracker = AcceptanceTracker::new(4, &[0.0]);
        tracker.step(&[1.0]);
        tracker.step(&[1.0]);
        assert_abs_diff_eq!(tracker.p_accept(), 0.5);
        tracker.step(&[2.0]);
        tracker.step(&[3.0]);
        assert_abs_diff_eq!(tracker.p_accept(), 0.75);
        // window of 4: the first move drops out
        tracker.step(&[3.0]);
        assert_abs_diff_eq!(tracker.p_accept(), 0.5);
    }

    #[test]
    fn run_times_display_handles_zero_total() {
        let times = RunTimes::default();
        assert!(times.to_string().contains("(0.0%)"));
    }
}
