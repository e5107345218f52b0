//! Snapshot of one chain point together with its density values.

use nalgebra::DVector;

/// A proposed or current point of the chain.
///
/// Records are plain values: the driver clones the accepted one into the chain and the
/// delayed rejection cascade owns its own copies, which are dropped when the cascade for
/// a position is resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionRecord {
    coordinates: DVector<f64>,
    out_of_support: bool,
    log_likelihood: f64,
    log_target: f64,
}

impl PositionRecord {
    /// A point inside the target support with its evaluated density values.
    pub fn in_support(coordinates: DVector<f64>, log_likelihood: f64, log_target: f64) -> Self {
        Self {
            coordinates,
            out_of_support: false,
            log_likelihood,
            log_target,
        }
    }

    /// A point outside the target support. Both log values are `-inf`.
    pub fn out_of_support(coordinates: DVector<f64>) -> Self {
        Self {
            coordinates,
            out_of_support: true,
            log_likelihood: f64::NEG_INFINITY,
            log_target: f64::NEG_INFINITY,
        }
    }

    pub fn coordinates(&self) -> &DVector<f64> {
        &self.coordinates
    }

    pub fn out_of_target_support(&self) -> bool {
        self.out_of_support
    }

    pub fn log_likelihood(&self) -> f64 {
        self.log_likelihood
    }

    pub fn log_target(&self) -> f64 {
        self.log_target
    }

    pub fn dim(&self) -> usize {
        self.coordinates.len()
    }

    /// True when the record can take part in an acceptance ratio.
    pub(crate) fn has_usable_target(&self) -> bool {
        !self.out_of_support && self.log_target.is_finite()
    }
}
