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

//! A two-peer virtual network with configurable loss, latency jitter and duplication.
//!
//! Time is whatever the caller says it is: the simulator only moves forward on
//! [`set_current`](LatencySimulator::set_current), which makes runs reproducible for a given seed.

mod delay;
mod echo;

pub use echo::{run_echo, EchoReport};

use crate::kcp::Output;
use delay::DelayQueue;
use derivative::Derivative;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::cmp::{max, min};
use std::io;
use std::rc::Rc;
use tracing::trace;

#[derive(Clone, Debug, Serialize, Deserialize, Derivative)]
#[derivative(Default)]
#[serde(default)]
pub struct SimConfig {
    /// Loss rate in percent.
    #[derivative(Default(value = "20"))]
    pub lost_rate: u32,
    /// The one-way delay of every datagram is drawn from `rtt_min / 2 ..= rtt_max / 2`.
    #[derivative(Default(value = "60"))]
    pub rtt_min: u32,
    #[derivative(Default(value = "225"))]
    pub rtt_max: u32,
    /// Duplication rate in percent.
    pub dup_rate: u32,
    /// Maximum number of datagrams in flight per direction.
    #[derivative(Default(value = "1000"))]
    pub capacity: usize,
    pub seed: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Peer {
    A,
    B,
}

impl Peer {
    pub fn other(self) -> Peer {
        match self {
            Peer::A => Peer::B,
            Peer::B => Peer::A,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SimStats {
    /// Datagrams handed to the network.
    pub transmitted: u64,
    /// Datagrams dropped by random loss.
    pub lost: u64,
    /// Datagrams dropped because the link was full.
    pub overflowed: u64,
    /// Extra copies injected by duplication.
    pub duplicated: u64,
    pub delivered: u64,
}

pub struct LatencySimulator {
    config: SimConfig,
    rng: StdRng,
    current: u32,
    to_a: DelayQueue,
    to_b: DelayQueue,
    stats: SimStats,
}

impl LatencySimulator {
    pub fn new(config: SimConfig) -> Self {
        let mut config = config;
        config.lost_rate = min(config.lost_rate, 100);
        config.dup_rate = min(config.dup_rate, 100);
        config.rtt_max = max(config.rtt_min, config.rtt_max);
        LatencySimulator {
            rng: StdRng::seed_from_u64(config.seed),
            config,
            current: 0,
            to_a: Default::default(),
            to_b: Default::default(),
            stats: Default::default(),
        }
    }

    /// Wraps the simulator for sharing between the two endpoints.
    pub fn shared(config: SimConfig) -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self::new(config)))
    }

    pub fn set_current(&mut self, current: u32) {
        self.current = current;
    }

    pub fn current(&self) -> u32 {
        self.current
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn stats(&self) -> SimStats {
        self.stats
    }

    fn queue(&mut self, to: Peer) -> &mut DelayQueue {
        match to {
            Peer::A => &mut self.to_a,
            Peer::B => &mut self.to_b,
        }
    }

    fn delay(&mut self) -> u32 {
        self.rng
            .gen_range(self.config.rtt_min / 2..=self.config.rtt_max / 2)
    }

    /// Sends a datagram from `from` to the other peer.
    ///
    /// Random loss is silent, like on a real network. Only a full link is reported as an error.
    pub fn send(&mut self, from: Peer, datagram: &[u8]) -> io::Result<()> {
        self.stats.transmitted += 1;
        if self.rng.gen_range(0..100) < self.config.lost_rate {
            self.stats.lost += 1;
            trace!(?from, len = datagram.len(), "datagram lost");
            return Ok(());
        }
        let to = from.other();
        if self.queue(to).len() >= self.config.capacity {
            self.stats.overflowed += 1;
            return Err(io::Error::new(
                io::ErrorKind::WouldBlock,
                "simulated link is full",
            ));
        }
        let due = self.current.wrapping_add(self.delay());
        self.queue(to).schedule(due, datagram.to_vec());
        if self.config.dup_rate > 0 && self.rng.gen_range(0..100) < self.config.dup_rate {
            self.stats.duplicated += 1;
            let due = self.current.wrapping_add(self.delay());
            self.queue(to).schedule(due, datagram.to_vec());
        }
        Ok(())
    }

    /// Takes the next datagram addressed to `to` that has arrived by now.
    pub fn recv(&mut self, to: Peer) -> Option<Vec<u8>> {
        let now = self.current;
        let datagram = self.queue(to).pop_due(now)?;
        self.stats.delivered += 1;
        Some(datagram)
    }

    /// Number of datagrams still travelling towards `to`.
    pub fn pending(&self, to: Peer) -> usize {
        match to {
            Peer::A => self.to_a.len(),
            Peer::B => self.to_b.len(),
        }
    }

    /// Arrival time of the next datagram towards `to`, if any.
    pub fn next_arrival(&self, to: Peer) -> Option<u32> {
        match to {
            Peer::A => self.to_a.imminent(),
            Peer::B => self.to_b.imminent(),
        }
    }
}

/// One side of a [`LatencySimulator`], usable as the output of a control block.
#[derive(Clone)]
pub struct SimEndpoint {
    net: Rc<RefCell<LatencySimulator>>,
    peer: Peer,
}

impl SimEndpoint {
    pub fn new(net: Rc<RefCell<LatencySimulator>>, peer: Peer) -> Self {
        SimEndpoint { net, peer }
    }

    /// Creates both endpoints of `net`.
    pub fn pair(net: &Rc<RefCell<LatencySimulator>>) -> (Self, Self) {
        (
            SimEndpoint::new(net.clone(), Peer::A),
            SimEndpoint::new(net.clone(), Peer::B),
        )
    }

    pub fn peer(&self) -> Peer {
        self.peer
    }

    /// Takes the next datagram that has arrived at this endpoint.
    pub fn recv(&self) -> Option<Vec<u8>> {
        self.net.borrow_mut().recv(self.peer)
    }
}

impl Output for SimEndpoint {
    fn output(&mut self, datagram: &[u8]) -> io::Result<()> {
        self.net.borrow_mut().send(self.peer, datagram)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lossless(rtt: u32) -> SimConfig {
        SimConfig {
            lost_rate: 0,
            rtt_min: rtt,
            rtt_max: rtt,
            ..Default::default()
        }
    }

    #[test]
    fn delivers_after_one_way_delay() {
        let mut net = LatencySimulator::new(lossless(100));
        net.send(Peer::A, b"ping").unwrap();
        assert_eq!(net.pending(Peer::B), 1);
        assert_eq!(net.next_arrival(Peer::B), Some(50));
        net.set_current(49);
        assert!(net.recv(Peer::B).is_none());
        assert!(net.recv(Peer::A).is_none());
        net.set_current(50);
        assert_eq!(net.recv(Peer::B).unwrap(), b"ping");
        assert_eq!(net.stats().delivered, 1);
    }

    #[test]
    fn loss_rate_is_roughly_honored() {
        let mut net = LatencySimulator::new(SimConfig {
            lost_rate: 30,
            capacity: 100_000,
            seed: 42,
            ..lossless(10)
        });
        for _ in 0..10_000 {
            net.send(Peer::B, &[0]).unwrap();
        }
        let stats = net.stats();
        assert_eq!(stats.transmitted, 10_000);
        assert!((2500..3500).contains(&stats.lost), "lost {}", stats.lost);
        assert_eq!(net.pending(Peer::A) as u64, 10_000 - stats.lost);
    }

    #[test]
    fn same_seed_same_run() {
        let run = || {
            let mut net = LatencySimulator::new(SimConfig {
                seed: 7,
                ..Default::default()
            });
            for i in 0..100u8 {
                net.send(Peer::A, &[i]).unwrap();
            }
            net.set_current(1000);
            let received: Vec<_> = std::iter::from_fn(|| net.recv(Peer::B)).collect();
            received
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn full_link_rejects() {
        let mut net = LatencySimulator::new(SimConfig {
            capacity: 2,
            ..lossless(10)
        });
        net.send(Peer::A, &[1]).unwrap();
        net.send(Peer::A, &[2]).unwrap();
        assert_eq!(
            net.send(Peer::A, &[3]).unwrap_err().kind(),
            io::ErrorKind::WouldBlock
        );
        assert_eq!(net.stats().overflowed, 1);
        net.send(Peer::B, &[4]).unwrap();
    }

    #[test]
    fn duplicates_datagrams() {
        let mut net = LatencySimulator::new(SimConfig {
            dup_rate: 100,
            ..lossless(20)
        });
        net.send(Peer::A, b"twice").unwrap();
        net.set_current(10);
        assert_eq!(net.recv(Peer::B).unwrap(), b"twice");
        assert_eq!(net.recv(Peer::B).unwrap(), b"twice");
        assert_eq!(net.stats().duplicated, 1);
    }

    #[test]
    fn endpoints_cross_over() {
        let net = LatencySimulator::shared(lossless(0));
        let (mut a, b) = SimEndpoint::pair(&net);
        a.output(b"hello").unwrap();
        assert_eq!(b.recv().unwrap(), b"hello");
        assert!(a.recv().is_none());
    }
}
