/*
Copyright 2021 Chengyuan Ma

Permission is hereby granted, free of charge, to any person obtaining a copy of this software and
associated documentation files (the "Software"), to deal in the Software without restriction,
including without limitation the rights to use, copy, modify, merge, publish, distribute, sub-
-license, and/or sell copies of the Software, and to permit persons to whom the Software is
furnished to do so, subject to the following conditions:

The above copyright notice and this permission notice shall be included in all copies or substantial
portions of the Software.

THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR IMPLIED, INCLUDING BUT
NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY, FITNESS FOR A PARTICULAR PURPOSE AND NON-
-INFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES
OR OTHER LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN
CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE SOFTWARE.
*/

//! Retransmission timeout estimation (Jacobson/Karels, as in RFC 6298 but with KCP's bounds).

use std::cmp::{max, min};

/// The default retransmission time out. This is used until an ACK is received, after which RTO
/// will be calculated based on RTT.
pub(super) const RTO_DEFAULT: u32 = 200;
/// Minimum RTO in normal mode.
pub(super) const RTO_MIN: u32 = 100;
/// Minimum RTO in nodelay mode.
pub(super) const RTO_NODELAY: u32 = 30;
/// The upper bound for RTO.
pub(super) const RTO_MAX: u32 = 60000;

#[derive(Debug)]
pub(super) struct RtoEstimator {
    /// Smooth RTT estimation, zero until the first sample.
    srtt: u32,
    /// Variance of RTT.
    rtt_var: u32,
    /// Base retransmission timeout.
    rto: u32,
    /// Minimum retransmission timeout.
    rto_min: u32,
    /// Update interval of the owning control block, the smallest meaningful timer granularity.
    interval: u32,
}

impl RtoEstimator {
    pub fn new(interval: u32) -> Self {
        Self {
            srtt: 0,
            rtt_var: 0,
            rto: RTO_DEFAULT,
            rto_min: RTO_MIN,
            interval,
        }
    }

    /// Feeds an RTT sample (ms). Callers must only pass samples of segments transmitted once.
    pub fn sample(&mut self, rtt: u32) {
        // Keeps the filter arithmetic in range for absurd echoed timestamps.
        let rtt = min(rtt, RTO_MAX);
        if self.srtt == 0 {
            self.srtt = max(rtt, 1);
            self.rtt_var = rtt / 2;
        } else {
            let delta = if rtt > self.srtt {
                rtt - self.srtt
            } else {
                self.srtt - rtt
            };
            self.rtt_var = (3 * self.rtt_var + delta) / 4;
            self.srtt = max(1, (7 * self.srtt + rtt) / 8);
        }
        let rto = self.srtt + max(self.interval, 4 * self.rtt_var);
        self.rto = max(self.rto_min, min(rto, RTO_MAX));
    }

    pub fn rto(&self) -> u32 {
        self.rto
    }

    pub fn srtt(&self) -> u32 {
        self.srtt
    }

    pub fn rtt_var(&self) -> u32 {
        self.rtt_var
    }

    pub fn rto_min(&self) -> u32 {
        self.rto_min
    }

    pub fn set_rto_min(&mut self, rto_min: u32) {
        self.rto_min = min(rto_min, RTO_MAX);
    }

    pub fn set_interval(&mut self, interval: u32) {
        self.interval = interval;
    }
}

/// Backs off the RTO of a segment that has just timed out. Never returns less than `rto`.
///
/// In normal mode the timeout at least doubles; nodelay mode grows it by 1.5x instead.
pub(super) fn backoff(rto: u32, base: u32, nodelay: bool) -> u32 {
    let grown = if nodelay {
        rto.saturating_add(rto / 2)
    } else {
        rto.saturating_add(max(rto, base))
    };
    max(rto, min(grown, RTO_MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sample_initializes_filters() {
        let mut est = RtoEstimator::new(10);
        assert_eq!(est.rto(), RTO_DEFAULT);
        est.sample(100);
        assert_eq!(est.srtt(), 100);
        assert_eq!(est.rtt_var(), 50);
        assert_eq!(est.rto(), 100 + 200);
    }

    #[test]
    fn converges_on_stable_rtt() {
        let mut est = RtoEstimator::new(10);
        for _ in 0..64 {
            est.sample(100);
        }
        assert_eq!(est.srtt(), 100);
        assert!(est.rtt_var() <= 1);
        // Variance vanished, so the interval dominates.
        assert_eq!(est.rto(), 110);
    }

    #[test]
    fn rto_is_clamped() {
        let mut est = RtoEstimator::new(10);
        est.sample(1);
        assert_eq!(est.rto(), RTO_MIN);
        est.set_rto_min(RTO_NODELAY);
        est.sample(1);
        assert!(est.rto() >= RTO_NODELAY);

        let mut est = RtoEstimator::new(10);
        est.sample(100_000);
        assert_eq!(est.rto(), RTO_MAX);
    }

    #[test]
    fn backoff_never_shrinks() {
        assert_eq!(backoff(200, 150, false), 400);
        assert_eq!(backoff(100, 300, false), 400);
        assert_eq!(backoff(200, 150, true), 300);
        assert_eq!(backoff(RTO_MAX, RTO_MAX, false), RTO_MAX);
        assert_eq!(backoff(RTO_MAX + 5, 0, true), RTO_MAX + 5);
    }
}
