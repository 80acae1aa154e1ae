//! # ABR Controller
//!
//! Picks a ladder level per segment from the segment ledger:
//!
//! - `basic` uses the throughput of the immediately preceding segment;
//! - `basic2` smooths the last `window` measurable segments with an EWMA.
//!
//! The result is always a valid ladder index. Segment 1, and any segment
//! without usable history, gets level 0.

use panocast_common::{AbrAlgorithm, AbrConfig, BitrateLadder, SegmentId};

use crate::ledger::{SegmentLedger, SegmentStat};

/// Exponentially Weighted Moving Average filter.
///
/// The first sample initializes the value. NaN or infinite samples are
/// ignored.
#[derive(Debug, Clone)]
pub struct Ewma {
    value: f64,
    alpha: f64,
    initialized: bool,
}

impl Ewma {
    pub fn new(alpha: f64) -> Self {
        Self {
            value: 0.0,
            alpha,
            initialized: false,
        }
    }

    pub fn update(&mut self, measurement: f64) {
        if !measurement.is_finite() {
            return;
        }
        if !self.initialized {
            self.value = measurement;
            self.initialized = true;
        } else {
            self.value = self.value * (1.0 - self.alpha) + measurement * self.alpha;
        }
    }

    /// Smoothed value, or `None` before the first valid sample.
    pub fn value(&self) -> Option<f64> {
        self.initialized.then_some(self.value)
    }
}

#[derive(Debug, Clone)]
pub struct AbrController {
    algorithm: AbrAlgorithm,
    window: usize,
    alpha: f64,
}

impl AbrController {
    pub fn new(config: &AbrConfig) -> Self {
        Self {
            algorithm: config.algorithm,
            window: config.window.max(1),
            alpha: config.alpha,
        }
    }

    pub fn choose_bitrate(
        &self,
        segment: SegmentId,
        ladder: &BitrateLadder,
        history: &SegmentLedger,
    ) -> usize {
        if segment <= 1 {
            return 0;
        }
        match self.estimate_kbps(segment, history) {
            Some(kbps) => ladder.highest_within(kbps),
            None => 0,
        }
    }

    /// Throughput estimate the next choice is based on, in kbps.
    pub fn estimate_kbps(&self, segment: SegmentId, history: &SegmentLedger) -> Option<f64> {
        match self.algorithm {
            AbrAlgorithm::Basic => history
                .get(segment.checked_sub(1)?)
                .and_then(SegmentStat::throughput_kbps),
            AbrAlgorithm::Basic2 => {
                let mut samples: Vec<f64> = history
                    .recent_before(segment)
                    .filter_map(SegmentStat::throughput_kbps)
                    .take(self.window)
                    .collect();
                samples.reverse();
                let mut ewma = Ewma::new(self.alpha);
                for sample in samples {
                    ewma.update(sample);
                }
                ewma.value()
            }
        }
    }
}
