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

//! The echo benchmark: one peer sends a timestamped message every 20 ms, the other sends every
//! message straight back, and the round trip time of each echo is recorded.

use super::{LatencySimulator, SimConfig, SimEndpoint, SimStats};
use crate::config::KcpConfig;
use crate::kcp::{ControlBlock, Stats};
use anyhow::{bail, Result};
use bytes::{Buf, BufMut};
use serde::Serialize;
use std::cmp::max;
use tracing::trace;

const CONV: u32 = 0x1122_3344;
/// Time between two messages (ms).
const SEND_INTERVAL: u32 = 20;
/// How long the last message may take to come back before the run is abandoned (ms).
const DRAIN_LIMIT: u32 = 600_000;

#[derive(Debug, Clone, Serialize)]
pub struct EchoReport {
    pub echoes: u32,
    /// Virtual time until the last echo came back (ms).
    pub elapsed: u32,
    pub avg_rtt: u32,
    pub max_rtt: u32,
    /// Counters of the sending peer.
    pub stats: Stats,
    pub net: SimStats,
}

/// Runs `messages` echoes between two control blocks configured by `kcp` over a network
/// configured by `sim`, advancing virtual time one millisecond per step.
///
/// Fails if an echo comes back out of order or the run does not finish in time.
pub fn run_echo(kcp: &KcpConfig, sim: &SimConfig, messages: u32) -> Result<EchoReport> {
    let net = LatencySimulator::shared(sim.clone());
    let (left, right) = SimEndpoint::pair(&net);
    let mut a = ControlBlock::with_config(CONV, kcp, left)?;
    let mut b = ControlBlock::with_config(CONV, kcp, right)?;

    let deadline = messages
        .saturating_mul(SEND_INTERVAL)
        .saturating_add(DRAIN_LIMIT);
    let mut sent = 0;
    let mut next = 0;
    let mut sum_rtt = 0u64;
    let mut max_rtt = 0;
    let mut elapsed = 0;
    let mut now = 0;
    while next < messages {
        if now > deadline {
            bail!("only {} of {} echoes came back in {} ms", next, messages, deadline);
        }
        net.borrow_mut().set_current(now);

        if sent < messages && now % SEND_INTERVAL == 0 {
            let mut msg = Vec::with_capacity(8);
            msg.put_u32_le(sent);
            msg.put_u32_le(now);
            a.send(&msg)?;
            sent += 1;
        }

        while let Some(datagram) = b.user().recv() {
            b.input(&datagram)?;
        }
        while let Some(datagram) = a.user().recv() {
            a.input(&datagram)?;
        }
        while let Ok(msg) = b.recv_vec() {
            b.send(&msg)?;
        }
        while let Ok(msg) = a.recv_vec() {
            let mut msg = &msg[..];
            if msg.len() < 8 {
                bail!("echo of {} bytes is too short", msg.len());
            }
            let sn = msg.get_u32_le();
            let ts = msg.get_u32_le();
            if sn != next {
                bail!("echo {} arrived while expecting {}", sn, next);
            }
            let rtt = now.wrapping_sub(ts);
            trace!(sn, rtt, "echo");
            next += 1;
            elapsed = now;
            sum_rtt += rtt as u64;
            max_rtt = max(max_rtt, rtt);
        }

        a.update(now);
        b.update(now);
        now += 1;
    }

    let report = EchoReport {
        echoes: next,
        elapsed,
        avg_rtt: if next > 0 { (sum_rtt / next as u64) as u32 } else { 0 },
        max_rtt,
        stats: a.stats(),
        net: net.borrow().stats(),
    };
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lossless_round_trip_is_exact() {
        let sim = SimConfig {
            lost_rate: 0,
            rtt_min: 100,
            rtt_max: 100,
            ..Default::default()
        };
        let kcp = KcpConfig {
            interval: 10,
            no_congestion_control: true,
            ..Default::default()
        };
        let report = run_echo(&kcp, &sim, 50).unwrap();
        assert_eq!(report.echoes, 50);
        assert_eq!(report.avg_rtt, 100);
        assert_eq!(report.max_rtt, 100);
        assert_eq!(report.stats.timeout_resends, 0);
        assert_eq!(report.net.lost, 0);
    }

    #[test]
    fn zero_messages() {
        let report = run_echo(&KcpConfig::default(), &SimConfig::default(), 0).unwrap();
        assert_eq!(report.echoes, 0);
        assert_eq!(report.avg_rtt, 0);
    }
}
