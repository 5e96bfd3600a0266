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

//! The control block: send and receive pipelines of one KCP conversation.
//!
//! Data flows through four containers. [`send`](ControlBlock::send) fragments messages into the
//! send queue; each flush admits as many of them into the send buffer as the windows allow and
//! (re)transmits whatever is due. Incoming PUSH segments land in the receive buffer, sorted by
//! sequence number, and contiguous runs are moved on to the receive queue, where
//! [`recv`](ControlBlock::recv) reassembles them into messages.

use super::congestion::CongestionControl;
use super::redundancy::Redundancy;
use super::rto::{self, RtoEstimator, RTO_MIN, RTO_NODELAY};
use super::segment::{Command, Segment, OVERHEAD};
use super::{diff, output_datagram, KcpError, Output, Result};
use crate::config::KcpConfig;
use bytes::Bytes;
use serde::Serialize;
use std::cmp::{max, min};
use std::collections::VecDeque;
use tracing::{debug, trace};

/// Default send window size.
const WND_SND_DEFAULT: u16 = 32;
/// Default receive window size.
const WND_RCV_DEFAULT: u16 = 128;
/// The upper bound for fragmentation of a long message. The receive window never goes below this,
/// so that the peer is always able to reassemble any message it is sent.
pub const MAX_FRAGMENTS: usize = 128;

/// MTU for a default KCP control block.
const MTU_DEFAULT: u32 = 1400;
/// Update interval for a default KCP control block.
const INTERVAL_DEFAULT: u32 = 100;
const INTERVAL_MIN: u32 = 10;
const INTERVAL_MAX: u32 = 5000;

/// Initial window probing timeout.
const PROBE_INIT: u32 = 7000;
/// The upper bound for window probing timeout.
const PROBE_LIMIT: u32 = 120000;

/// Maximum number of transmissions that still qualify for fast resend by default.
const FAST_RESEND_LIMIT: u32 = 5;
/// If the difference between the current time and the time of next flush is greater than this
/// value, KCP considers the clock to have been changed.
const CLOCK_CHANGED: i32 = 10000;

/// Diagnostic counters of a control block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Stats {
    /// Retransmissions triggered by skip-ACKs.
    pub fast_resends: u64,
    /// Retransmissions triggered by RTO expiry.
    pub timeout_resends: u64,
    /// Extra copies emitted by redundancy mode.
    pub redundant_sends: u64,
}

/// State of the fragment group at the front of the receive queue.
enum FrontGroup {
    /// No message is ready yet, but the fragments so far are consistent.
    Incomplete,
    Complete { segments: usize, len: usize },
    /// The first this many segments can never form a message.
    Broken(usize),
}

/// KCP control block.
///
/// This control block is **NOT** safe for concurrent access -- to do so please wrap it in a Mutex.
pub struct ControlBlock<O> {
    /// Conversation ID.
    conv: u32,
    /// Maximum transmission unit.
    mtu: u32,
    /// Maximum segment size.
    mss: u32,
    /// Oldest unacknowledged segment in the send window.
    snd_una: u32,
    /// Sequence number of the next segment to be sent.
    snd_nxt: u32,
    /// Sequence number of the next segment to be put in the receive queue.
    rcv_nxt: u32,
    /// Send window size (packet).
    snd_wnd: u16,
    /// Receive window size (packet).
    rcv_wnd: u16,
    /// Remote window size (packet).
    rmt_wnd: u16,
    /// Current timestamp (ms).
    current: u32,
    /// Update interval (ms).
    interval: u32,
    /// Nodelay mode.
    nodelay: bool,
    /// Whether the control block is updated at least once.
    updated: bool,
    /// Timestamp for next flush.
    ts_flush: u32,
    /// Timestamp for next probe.
    ts_probe: u32,
    /// Probing timeout.
    probe_timeout: u32,
    /// Whether we should ask the other side to tell us its window size.
    probe_should_ask: bool,
    /// Whether we should tell the other side our window size.
    probe_should_tell: bool,
    /// Timestamp of the last valid input.
    ts_last_input: Option<u32>,
    /// Send queue, which stores segments that are enqueued but not in the send window.
    snd_queue: VecDeque<Segment>,
    /// Receive queue, which stores segments that are received but not consumed by the application.
    rcv_queue: VecDeque<Segment>,
    /// Send buffer, which stores segments sent but not yet acknowledged.
    snd_buf: VecDeque<Segment>,
    /// Receive buffer, which stores segments that arrive but cannot be used because a preceding
    /// segment hasn't arrived yet. Sorted by sequence number.
    rcv_buf: VecDeque<Segment>,
    /// ACKs to be sent in the next flush.
    ack_list: Vec<(/* sn */ u32, /* ts */ u32)>,
    /// Fast resend threshold. If set to a non-zero value, a segment will be resent immediately if
    /// it is skip-ACKed this many time, regardless of RTO.
    fast_resend_threshold: u32,
    /// Fast resend limit. If set to a non-zero value, a segment will be fast resent only while it
    /// has been transmitted at most this many times.
    fast_resend_limit: u32,
    fast_resends: u64,
    timeout_resends: u64,
    rto: RtoEstimator,
    cc: CongestionControl,
    redundancy: Redundancy,
    /// Buffer used to merge small segments into a datagram.
    buffer: Vec<u8>,
    /// The lower layer, which is also the user data of this session.
    output: O,
}

impl<O: Output> ControlBlock<O> {
    /// Creates a new KCP control block with the given conversation ID and default parameters.
    pub fn new(conv: u32, output: O) -> Self {
        let mss = MTU_DEFAULT - OVERHEAD as u32;
        ControlBlock {
            conv,
            mtu: MTU_DEFAULT,
            mss,
            snd_una: 0,
            snd_nxt: 0,
            rcv_nxt: 0,
            snd_wnd: WND_SND_DEFAULT,
            rcv_wnd: WND_RCV_DEFAULT,
            rmt_wnd: WND_RCV_DEFAULT,
            current: 0,
            interval: INTERVAL_DEFAULT,
            nodelay: false,
            updated: false,
            ts_flush: INTERVAL_DEFAULT,
            ts_probe: 0,
            probe_timeout: 0,
            probe_should_ask: false,
            probe_should_tell: false,
            ts_last_input: None,
            snd_queue: Default::default(),
            rcv_queue: Default::default(),
            snd_buf: Default::default(),
            rcv_buf: Default::default(),
            ack_list: Default::default(),
            fast_resend_threshold: 0,
            fast_resend_limit: FAST_RESEND_LIMIT,
            fast_resends: 0,
            timeout_resends: 0,
            rto: RtoEstimator::new(INTERVAL_DEFAULT),
            cc: CongestionControl::new(mss),
            redundancy: Default::default(),
            buffer: Vec::with_capacity(MTU_DEFAULT as usize),
            output,
        }
    }

    /// Creates a new KCP control block configured by `config`.
    pub fn with_config(conv: u32, config: &KcpConfig, output: O) -> Result<Self> {
        let mut kcp = Self::new(conv, output);
        kcp.set_mtu(config.mtu)?;
        kcp.set_window_size(config.send_window, config.recv_window);
        kcp.set_nodelay(
            config.nodelay,
            config.interval,
            config.fast_resend,
            config.no_congestion_control,
        );
        kcp.set_fast_resend_limit(config.fast_resend_limit);
        if let Some(rto_min) = config.rto_min {
            kcp.set_rto_min(rto_min);
        }
        kcp.set_redundancy(config.redundancy);
        Ok(kcp)
    }

    /// Releases the control block and everything it buffers, handing back the user data.
    pub fn release(self) -> O {
        self.output
    }

    /// Inspects the fragment group at the front of the receive queue.
    ///
    /// A group is an unbroken run of fragment indices counting down to zero, and must fit in the
    /// receive window to ever complete.
    fn front_group(&self) -> FrontGroup {
        let first = match self.rcv_queue.front() {
            Some(seg) => seg.frg as usize,
            None => return FrontGroup::Incomplete,
        };
        if first >= self.rcv_wnd as usize {
            return FrontGroup::Broken(1);
        }
        let mut len = 0;
        for (i, seg) in self.rcv_queue.iter().enumerate() {
            if seg.frg as usize + i != first {
                return FrontGroup::Broken(i);
            }
            len += seg.payload.len();
            if seg.frg == 0 {
                return FrontGroup::Complete { segments: i + 1, len };
            }
        }
        FrontGroup::Incomplete
    }

    /// Peeks the size of the next message.
    ///
    /// Returns [`KcpError::WouldBlock`] if no complete message is in the receive queue.
    pub fn peek_size(&self) -> Result<usize> {
        match self.front_group() {
            FrontGroup::Complete { len, .. } => Ok(len),
            _ => Err(KcpError::WouldBlock),
        }
    }

    /// Receives a message into `buf`, returning its length.
    ///
    /// One receive corresponds to one [send](#method.send) on the other side. If `buf` is too
    /// small the message stays queued and [`KcpError::BufferTooSmall`] is returned.
    pub fn recv(&mut self, buf: &mut [u8]) -> Result<usize> {
        let (segments, size) = match self.front_group() {
            FrontGroup::Complete { segments, len } => (segments, len),
            _ => return Err(KcpError::WouldBlock),
        };
        if size > buf.len() {
            return Err(KcpError::BufferTooSmall {
                needed: size,
                available: buf.len(),
            });
        }
        let recover = self.rcv_queue.len() >= self.rcv_wnd as usize;
        let mut len = 0;
        for seg in self.rcv_queue.drain(..segments) {
            buf[len..len + seg.payload.len()].copy_from_slice(&seg.payload);
            len += seg.payload.len();
        }
        debug_assert_eq!(size, len);
        self.move_to_queue();
        // The queue was full, so the peer thinks our window is closed. Tell it otherwise.
        if recover && self.rcv_queue.len() < self.rcv_wnd as usize {
            self.probe_should_tell = true;
        }
        Ok(len)
    }

    /// Receives a message as an owned buffer.
    pub fn recv_vec(&mut self) -> Result<Vec<u8>> {
        let mut buf = vec![0; self.peek_size()?];
        let len = self.recv(&mut buf)?;
        buf.truncate(len);
        Ok(buf)
    }

    /// Sends a message using this KCP control block, returning the number of bytes accepted.
    ///
    /// The message is only queued here; it leaves through the output on a later
    /// [update](#method.update). Empty messages are allowed.
    pub fn send(&mut self, data: &[u8]) -> Result<usize> {
        let mss = self.mss as usize;
        let count = if data.len() <= mss {
            1
        } else {
            (data.len() + mss - 1) / mss
        };
        if count > MAX_FRAGMENTS {
            return Err(KcpError::InvalidInput {
                len: data.len(),
                max: MAX_FRAGMENTS * mss,
            });
        }
        let payload = Bytes::copy_from_slice(data);
        for i in 0..count {
            let start = i * mss;
            let end = min(start + mss, data.len());
            self.snd_queue.push_back(Segment {
                frg: (count - i - 1) as u8,
                payload: payload.slice(start..end),
                ..Default::default()
            });
        }
        Ok(data.len())
    }

    /// Recalculates UNA based on the current [send buffer](#structfield.snd_buf).
    fn update_una(&mut self) {
        self.snd_una = self.snd_buf.front().map_or(self.snd_nxt, |seg| seg.sn);
    }

    /// Removes the segment whose sequence number is `sn` from the send buffer, returning how many
    /// times it was transmitted, or `None` if it was not outstanding.
    fn ack_packet_with_sn(&mut self, sn: u32) -> Option<u32> {
        if diff(sn, self.snd_una) < 0 || diff(sn, self.snd_nxt) >= 0 {
            return None;
        }
        let index = self
            .snd_buf
            .binary_search_by(|seg| diff(seg.sn, sn).cmp(&0))
            .ok()?;
        self.snd_buf.remove(index).map(|seg| seg.xmits)
    }

    /// Removes segments whose sequence number is less than `una` from the send buffer, returning
    /// how many were removed.
    fn ack_packets_before_una(&mut self, una: u32) -> u32 {
        let mut acked = 0;
        while self
            .snd_buf
            .front()
            .map_or(false, |seg| diff(seg.sn, una) < 0)
        {
            self.snd_buf.pop_front();
            acked += 1;
        }
        acked
    }

    /// Increases the skip-ACK count of segments with sequence number less than `sn` that were
    /// last transmitted no later than the acknowledged one (useful in KCP fast retransmission).
    fn increase_fast_acks(&mut self, sn: u32, ts: u32) {
        if diff(sn, self.snd_una) < 0 || diff(sn, self.snd_nxt) >= 0 {
            return;
        }
        // seg.sn increasing
        for seg in self.snd_buf.iter_mut() {
            if diff(seg.sn, sn) >= 0 {
                break;
            }
            if diff(ts, seg.ts) >= 0 {
                seg.fast_acks += 1;
            }
        }
    }

    /// Pushes a segment onto the [receive buffer](#structfield.rcv_buf), and if possible, moves
    /// segments from the receiver buffer to the [receive queue](#structfield.rcv_queue).
    fn push_segment(&mut self, seg: Segment) {
        match self
            .rcv_buf
            .binary_search_by(|buffered| diff(buffered.sn, seg.sn).cmp(&0))
        {
            Ok(_) => trace!(sn = seg.sn, "duplicate segment"),
            Err(index) => self.rcv_buf.insert(index, seg),
        }
        self.move_to_queue();
    }

    /// Moves the contiguous run at the front of the receive buffer to the receive queue.
    ///
    /// A front fragment group that can never complete is dropped, and the segment that broke the
    /// run starts the next group.
    fn move_to_queue(&mut self) {
        loop {
            while self.rcv_queue.len() < self.rcv_wnd as usize
                && self
                    .rcv_buf
                    .front()
                    .map_or(false, |seg| seg.sn == self.rcv_nxt)
            {
                if let Some(seg) = self.rcv_buf.pop_front() {
                    self.rcv_queue.push_back(seg);
                    self.rcv_nxt = self.rcv_nxt.wrapping_add(1);
                }
            }
            let broken = match self.front_group() {
                FrontGroup::Broken(segments) => segments,
                _ => break,
            };
            debug!(conv = self.conv, segments = broken, "dropping broken fragment group");
            self.rcv_queue.drain(..broken);
        }
    }

    /// Feeds a raw datagram from the underlying protocol stack into the control block.
    ///
    /// Returns the total number of bytes that is actually considered valid by KCP. Segments
    /// preceding a malformed one are still processed, but a datagram containing any segment of a
    /// foreign conversation is dropped as a whole.
    ///
    /// **Note**: After calling this do remember to call [check](#method.check), as
    /// an input datagram may invalidate previous time estimations of the next update.
    pub fn input(&mut self, data: &[u8]) -> Result<usize> {
        let mut raw = Bytes::copy_from_slice(data);
        let mut segments = Vec::new();
        let mut offset = 0;
        let malformed = loop {
            match Segment::decode(&mut raw, offset) {
                Ok(seg) => {
                    offset += seg.encoded_len();
                    segments.push(seg);
                    if raw.is_empty() {
                        break None;
                    }
                }
                Err(err) => break Some(err),
            }
        };
        if let Some(seg) = segments.iter().find(|seg| seg.conv != self.conv) {
            return Err(KcpError::SessionMismatch {
                expected: self.conv,
                found: seg.conv,
            });
        }

        let mut acked = 0;
        let mut max_ack: Option<(u32, u32)> = None;
        for seg in segments {
            trace!(conv = self.conv, "input {}", seg);
            self.ts_last_input = Some(self.current);
            self.rmt_wnd = seg.wnd;
            acked += self.ack_packets_before_una(seg.una);
            self.update_una();
            match seg.cmd {
                Command::Ack => {
                    if let Some(xmits) = self.ack_packet_with_sn(seg.sn) {
                        self.update_una();
                        acked += 1;
                        // xmits == 1 is necessary. If a segment is transmitted multiple times,
                        // there is no way to know which transmission this ACK answers.
                        if xmits == 1 && diff(self.current, seg.ts) >= 0 {
                            self.rto.sample(max(diff(self.current, seg.ts) as u32, 1));
                        }
                        if max_ack.map_or(true, |(sn, _)| diff(seg.sn, sn) > 0) {
                            max_ack = Some((seg.sn, seg.ts));
                        }
                    }
                }
                Command::Push => {
                    if diff(seg.sn, self.rcv_nxt.wrapping_add(self.rcv_wnd as u32)) < 0 {
                        self.ack_list.push((seg.sn, seg.ts));
                        if diff(seg.sn, self.rcv_nxt) >= 0 {
                            self.push_segment(seg);
                        }
                    }
                }
                Command::WindowProbe => self.probe_should_tell = true,
                Command::WindowResponse => {}
            }
        }
        if let Some((sn, ts)) = max_ack {
            self.increase_fast_acks(sn, ts);
        }
        if acked > 0 {
            self.cc.on_ack(acked, self.rmt_wnd);
        }
        if self.nodelay
            && self.updated
            && (acked > 0 || !self.ack_list.is_empty() || self.probe_should_tell)
        {
            self.flush();
        }
        match malformed {
            Some(err) => Err(err),
            None => Ok(offset),
        }
    }

    /// Returns the number of free slots in the receive queue, as advertised to the peer.
    fn unused_window(&self) -> u16 {
        (self.rcv_wnd as usize).saturating_sub(self.rcv_queue.len()) as u16
    }

    /// Updates the probing state, recalculating the probing timeout if necessary.
    fn update_probe(&mut self) {
        if self.rmt_wnd == 0 {
            if self.probe_timeout == 0 {
                // If we are not probing, start probing window size
                self.probe_timeout = PROBE_INIT;
                self.ts_probe = self.current.wrapping_add(self.probe_timeout);
            } else if diff(self.current, self.ts_probe) >= 0 {
                // Increase probe timeout by 1.5x until we know the window size
                self.probe_timeout = max(self.probe_timeout, PROBE_INIT);
                self.probe_timeout += self.probe_timeout / 2;
                self.probe_timeout = min(self.probe_timeout, PROBE_LIMIT);
                self.ts_probe = self.current.wrapping_add(self.probe_timeout);
                self.probe_should_ask = true;
            }
        } else {
            self.probe_timeout = 0;
            self.ts_probe = 0;
        }
    }

    /// Flushes pending ACKs and probes, moves segments from the
    /// [send queue](#structfield.snd_queue) to the [send buffer](#structfield.snd_buf), and
    /// (re)transmits the segments in the send buffer if necessary.
    fn flush(&mut self) {
        if !self.updated {
            return;
        }
        let current = self.current;
        let mtu = self.mtu as usize;
        let wnd = self.unused_window();
        let mut seg = Segment {
            conv: self.conv,
            cmd: Command::Ack,
            wnd,
            una: self.rcv_nxt,
            ..Default::default()
        };

        for (sn, ts) in std::mem::take(&mut self.ack_list) {
            seg.sn = sn;
            seg.ts = ts;
            flush_segment(&mut self.buffer, &mut self.output, mtu, &seg);
        }
        seg.sn = 0;
        seg.ts = 0;

        self.update_probe();

        if self.probe_should_ask {
            seg.cmd = Command::WindowProbe;
            flush_segment(&mut self.buffer, &mut self.output, mtu, &seg);
            self.probe_should_ask = false;
        }
        if self.probe_should_tell {
            seg.cmd = Command::WindowResponse;
            flush_segment(&mut self.buffer, &mut self.output, mtu, &seg);
            self.probe_should_tell = false;
        }

        // Move segments from the send queue to the send buffer
        let cwnd = self.cc.window(self.snd_wnd, self.rmt_wnd);
        while diff(self.snd_nxt, self.snd_una.wrapping_add(cwnd)) < 0 {
            let mut seg = match self.snd_queue.pop_front() {
                Some(seg) => seg,
                None => break,
            };
            seg.conv = self.conv;
            seg.cmd = Command::Push;
            seg.sn = self.snd_nxt;
            self.snd_nxt = self.snd_nxt.wrapping_add(1);
            self.snd_buf.push_back(seg);
        }

        let rx_rto = self.rto.rto();
        let slack = if self.nodelay { 0 } else { rx_rto >> 3 };
        let threshold = self.fast_resend_threshold;
        let mut fast = false;
        let mut lost = false;

        // (Re)transmit segments in the send buffer
        for seg in self.snd_buf.iter_mut() {
            let xmit = if seg.xmits == 0 {
                seg.rto = rx_rto;
                seg.resend_ts = current.wrapping_add(seg.rto + slack);
                true
            } else if diff(current, seg.resend_ts) >= 0 {
                // Regular retransmission
                seg.rto = rto::backoff(seg.rto, rx_rto, self.nodelay);
                seg.resend_ts = current.wrapping_add(seg.rto);
                self.timeout_resends += 1;
                lost = true;
                trace!(sn = seg.sn, xmits = seg.xmits, rto = seg.rto, "timeout resend");
                true
            } else if threshold != 0
                && seg.fast_acks >= threshold
                && (seg.xmits <= self.fast_resend_limit || self.fast_resend_limit == 0)
            {
                // Fast retransmission
                seg.fast_acks = 0;
                seg.resend_ts = current.wrapping_add(seg.rto);
                self.fast_resends += 1;
                fast = true;
                trace!(sn = seg.sn, xmits = seg.xmits, "fast resend");
                true
            } else {
                false
            };

            if xmit {
                seg.xmits += 1;
                seg.ts = current;
                seg.wnd = wnd;
                seg.una = self.rcv_nxt;
                flush_segment(&mut self.buffer, &mut self.output, mtu, seg);
                if self.redundancy.copies() > 0 {
                    // Copies follow the datagram carrying the original.
                    output_datagram(&mut self.output, &self.buffer);
                    self.buffer.clear();
                    self.redundancy.replicate(seg, &mut self.output);
                }
            }
        }

        if !self.buffer.is_empty() {
            output_datagram(&mut self.output, &self.buffer);
            self.buffer.clear();
        }

        if fast {
            let inflight = self.snd_nxt.wrapping_sub(self.snd_una);
            self.cc.on_fast_resend(inflight, threshold);
        }
        if lost {
            self.cc.on_timeout();
        }

        fn flush_segment<W: Output>(buf: &mut Vec<u8>, output: &mut W, mtu: usize, seg: &Segment) {
            if !buf.is_empty() && buf.len() + seg.encoded_len() > mtu {
                output_datagram(output, buf);
                buf.clear();
            }
            seg.encode(buf);
        }
    }

    /// Sets the internal time to `current` and then updates the whole control block.
    ///
    /// Call this every [interval](#method.interval) ms, or at the time returned by
    /// [check](#method.check). Calling it more often does no harm.
    pub fn update(&mut self, current: u32) {
        self.current = current;
        if !self.updated {
            self.updated = true;
            self.ts_flush = current;
        }
        let mut slap = diff(current, self.ts_flush);
        if !(-CLOCK_CHANGED..CLOCK_CHANGED).contains(&slap) {
            debug!(current, ts_flush = self.ts_flush, "clock changed");
            self.ts_flush = current;
            slap = 0;
        }
        if slap >= 0 {
            self.ts_flush = self.ts_flush.wrapping_add(self.interval);
            if diff(current, self.ts_flush) >= 0 {
                self.ts_flush = current.wrapping_add(self.interval);
            }
            self.flush();
        }
    }

    /// Checks the next time you should call [update](#method.update) assuming current time is
    /// `current`.
    pub fn check(&self, current: u32) -> u32 {
        if !self.updated {
            return current;
        }
        let mut ts_flush = self.ts_flush;
        if !(-CLOCK_CHANGED..CLOCK_CHANGED).contains(&diff(current, ts_flush)) {
            ts_flush = current;
        }
        if diff(current, ts_flush) >= 0 {
            return current;
        }
        let mut next = diff(ts_flush, current) as u32;
        for seg in &self.snd_buf {
            let until = diff(seg.resend_ts, current);
            if until <= 0 {
                return current;
            }
            next = min(next, until as u32);
        }
        current.wrapping_add(min(next, self.interval))
    }

    /// Gets the number of segments waiting to be sent. This includes both unsent segments and
    /// segments that have been sent but not acknowledged by the other side.
    pub fn wait_send(&self) -> usize {
        self.snd_buf.len() + self.snd_queue.len()
    }

    /// Checks if everything is flushed, including unsent data segments and ACKs.
    ///
    /// You may want to call this when you are about to drop this control block, to check if KCP has
    /// finished everything up.
    pub fn all_flushed(&self) -> bool {
        self.snd_buf.is_empty() && self.snd_queue.is_empty() && self.ack_list.is_empty()
    }

    /// Gets the number of segments in flight (sent but not yet acknowledged).
    pub fn inflight(&self) -> usize {
        self.snd_buf.len()
    }

    pub fn stats(&self) -> Stats {
        Stats {
            fast_resends: self.fast_resends,
            timeout_resends: self.timeout_resends,
            redundant_sends: self.redundancy.sent(),
        }
    }

    pub fn set_mtu(&mut self, mtu: u32) -> Result<()> {
        if mtu as usize <= OVERHEAD {
            return Err(KcpError::InvalidMtu(mtu));
        }
        self.mtu = mtu;
        self.mss = mtu - OVERHEAD as u32;
        self.cc.set_mss(self.mss);
        Ok(())
    }

    pub fn mtu(&self) -> u32 {
        self.mtu
    }

    pub fn mss(&self) -> u32 {
        self.mss
    }

    /// Configures the timing mode in one go.
    ///
    /// `nodelay` lowers the minimum RTO, backs off more gently on timeouts and flushes right
    /// away when input produces something to send. `resend` is the fast resend threshold (zero
    /// disables fast resend), and `no_congestion_control` leaves admission to the windows only.
    pub fn set_nodelay(
        &mut self,
        nodelay: bool,
        interval: u32,
        resend: u32,
        no_congestion_control: bool,
    ) {
        self.nodelay = nodelay;
        self.rto
            .set_rto_min(if nodelay { RTO_NODELAY } else { RTO_MIN });
        self.set_interval(interval);
        self.fast_resend_threshold = resend;
        self.cc.set_enabled(!no_congestion_control);
    }

    pub fn nodelay(&self) -> bool {
        self.nodelay
    }

    pub fn set_interval(&mut self, interval: u32) {
        self.interval = min(max(interval, INTERVAL_MIN), INTERVAL_MAX);
        self.rto.set_interval(self.interval);
    }

    pub fn interval(&self) -> u32 {
        self.interval
    }

    pub fn set_fast_resend(&mut self, fast_resend: u32) {
        self.fast_resend_threshold = fast_resend;
    }

    pub fn fast_resend(&self) -> u32 {
        self.fast_resend_threshold
    }

    pub fn set_fast_resend_limit(&mut self, limit: u32) {
        self.fast_resend_limit = limit;
    }

    pub fn fast_resend_limit(&self) -> u32 {
        self.fast_resend_limit
    }

    pub fn set_congestion_control(&mut self, enabled: bool) {
        self.cc.set_enabled(enabled);
    }

    pub fn congestion_control(&self) -> bool {
        self.cc.enabled()
    }

    /// Sets how many extra copies of every data segment are transmitted (0 disables redundancy).
    pub fn set_redundancy(&mut self, copies: u32) {
        self.redundancy.set_copies(copies);
    }

    pub fn redundancy(&self) -> u32 {
        self.redundancy.copies()
    }

    pub fn set_rto_min(&mut self, rto_min: u32) {
        self.rto.set_rto_min(rto_min);
    }

    pub fn rto_min(&self) -> u32 {
        self.rto.rto_min()
    }

    /// Sets the send and receive window sizes; zero leaves the corresponding window unchanged.
    pub fn set_window_size(&mut self, send: u16, recv: u16) {
        if send > 0 {
            self.snd_wnd = send;
        }
        if recv > 0 {
            self.rcv_wnd = max(recv, MAX_FRAGMENTS as u16);
        }
    }

    pub fn snd_wnd(&self) -> u16 {
        self.snd_wnd
    }

    pub fn rcv_wnd(&self) -> u16 {
        self.rcv_wnd
    }

    /// Window size last advertised by the peer.
    pub fn rmt_wnd(&self) -> u16 {
        self.rmt_wnd
    }

    pub fn cwnd(&self) -> u32 {
        self.cc.cwnd()
    }

    pub fn ssthresh(&self) -> u32 {
        self.cc.ssthresh()
    }

    pub fn rto(&self) -> u32 {
        self.rto.rto()
    }

    pub fn srtt(&self) -> u32 {
        self.rto.srtt()
    }

    pub fn rttvar(&self) -> u32 {
        self.rto.rtt_var()
    }

    pub fn snd_una(&self) -> u32 {
        self.snd_una
    }

    pub fn snd_nxt(&self) -> u32 {
        self.snd_nxt
    }

    pub fn rcv_nxt(&self) -> u32 {
        self.rcv_nxt
    }

    /// Time of the last [update](#method.update) at which valid input was seen, if any. The
    /// engine never declares a link dead by itself; this is what callers build such policies on.
    pub fn ts_last_input(&self) -> Option<u32> {
        self.ts_last_input
    }

    pub fn conv(&self) -> u32 {
        self.conv
    }

    pub fn user(&self) -> &O {
        &self.output
    }

    pub fn user_mut(&mut self) -> &mut O {
        &mut self.output
    }
}
