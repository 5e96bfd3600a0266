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

//! Loss-based congestion control: slow start, additive increase and loss reactions.

use std::cmp::{max, min};
use tracing::debug;

/// Initial slow start threshold.
const THRESH_INIT: u32 = 2;
/// Lower bound of the slow start threshold after a loss.
const THRESH_MIN: u32 = 2;

#[derive(Debug)]
pub(super) struct CongestionControl {
    /// Whether the congestion window limits admission at all.
    enabled: bool,
    /// Congestion window (packet).
    cwnd: u32,
    /// Slow start threshold (packet).
    ssthresh: u32,
    /// Byte counter driving congestion avoidance growth.
    incr: u64,
    /// Maximum segment size of the owning control block.
    mss: u32,
}

impl CongestionControl {
    pub fn new(mss: u32) -> Self {
        Self {
            enabled: true,
            cwnd: 1,
            ssthresh: THRESH_INIT,
            incr: mss as u64,
            mss,
        }
    }

    /// Returns the number of segments allowed in flight given the local send window and the
    /// window advertised by the peer.
    pub fn window(&self, snd_wnd: u16, rmt_wnd: u16) -> u32 {
        let wnd = min(snd_wnd, rmt_wnd) as u32;
        if self.enabled {
            min(wnd, self.cwnd)
        } else {
            wnd
        }
    }

    /// Grows the window for `acked` newly acknowledged segments.
    pub fn on_ack(&mut self, acked: u32, rmt_wnd: u16) {
        let rmt_wnd = rmt_wnd as u32;
        let mss = self.mss as u64;
        for _ in 0..acked {
            if self.cwnd >= rmt_wnd {
                break;
            }
            if self.cwnd < self.ssthresh {
                self.cwnd += 1;
                self.incr += mss;
            } else {
                self.incr = max(self.incr, mss);
                self.incr += (mss * mss) / self.incr + mss / 16;
                if (self.cwnd as u64 + 1) * mss <= self.incr {
                    self.cwnd = ((self.incr + mss - 1) / mss) as u32;
                }
            }
            if self.cwnd > rmt_wnd {
                self.cwnd = rmt_wnd;
                self.incr = rmt_wnd as u64 * mss;
            }
        }
    }

    /// Reacts to fast retransmissions during the last flush. `inflight` is the number of
    /// segments in the send window and `threshold` the fast resend threshold.
    pub fn on_fast_resend(&mut self, inflight: u32, threshold: u32) {
        self.ssthresh = max(inflight / 2, THRESH_MIN);
        self.cwnd = self.ssthresh.saturating_add(threshold);
        self.incr = self.cwnd as u64 * self.mss as u64;
        debug!(cwnd = self.cwnd, ssthresh = self.ssthresh, "fast resend");
    }

    /// Reacts to a retransmission timeout: halve the threshold and restart slow start.
    pub fn on_timeout(&mut self) {
        self.ssthresh = max(self.cwnd / 2, THRESH_MIN);
        self.cwnd = 1;
        self.incr = self.mss as u64;
        debug!(cwnd = self.cwnd, ssthresh = self.ssthresh, "timeout");
    }

    pub fn cwnd(&self) -> u32 {
        self.cwnd
    }

    pub fn ssthresh(&self) -> u32 {
        self.ssthresh
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn set_mss(&mut self, mss: u32) {
        self.mss = mss;
        self.incr = max(self.incr, mss as u64);
    }
}
