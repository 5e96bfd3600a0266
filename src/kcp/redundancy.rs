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

//! Proactive redundancy: every data transmission is followed by extra copies of the segment, so a
//! lost datagram rarely has to wait for a retransmission.

use super::segment::Segment;
use super::{output_datagram, Output};
use tracing::trace;

#[derive(Debug, Default)]
pub(super) struct Redundancy {
    /// Extra copies per transmission, zero when disabled.
    copies: u32,
    /// Number of redundant copies emitted so far.
    sent: u64,
    /// Scratch space for the encoded segment.
    scratch: Vec<u8>,
}

impl Redundancy {
    pub fn copies(&self) -> u32 {
        self.copies
    }

    pub fn set_copies(&mut self, copies: u32) {
        self.copies = copies;
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }

    /// Emits the configured number of copies of `seg`, each as a datagram of its own.
    ///
    /// The copies share the sequence number of the original, so the receiver discards all but
    /// the first arrival and merely acknowledges the rest.
    pub fn replicate<O: Output>(&mut self, seg: &Segment, output: &mut O) {
        if self.copies == 0 {
            return;
        }
        self.scratch.clear();
        seg.encode(&mut self.scratch);
        for _ in 0..self.copies {
            output_datagram(output, &self.scratch);
        }
        self.sent += self.copies as u64;
        trace!(sn = seg.sn, copies = self.copies, "sent redundant copies");
    }
}
