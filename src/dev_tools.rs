use std::time::{Duration, Instant};

/// Stopwatch that only reads the clock when run times are measured.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Timer {
    start: Option<Instant>,
}

impl Timer {
    pub(crate) fn start(enabled: bool) -> Self {
        Self {
            start: enabled.then(Instant::now),
        }
    }

    /// Adds the time since `start` to `slot`.
    pub(crate) fn stop(self, slot: &mut Duration) {
        if let Some(start) = self.start {
            *slot += start.elapsed();
        }
    }
}
