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

use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// Datagrams in flight on one direction of a simulated link, released by arrival time.
///
/// Keys pack the arrival time into the upper half and an insertion counter into the lower half, so
/// datagrams due at the same millisecond come out in the order they were sent.
#[derive(Debug, Default)]
pub(super) struct DelayQueue {
    heap: BinaryHeap<Reverse<(u64, Vec<u8>)>>,
    seq: u32,
}

impl DelayQueue {
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn schedule(&mut self, due: u32, datagram: Vec<u8>) {
        let key = ((due as u64) << 32) | self.seq as u64;
        self.seq = self.seq.wrapping_add(1);
        self.heap.push(Reverse((key, datagram)));
    }

    /// Arrival time of the earliest datagram, if any.
    pub fn imminent(&self) -> Option<u32> {
        self.heap.peek().map(|Reverse((key, _))| (key >> 32) as u32)
    }

    /// Pops the earliest datagram if it has arrived by `now`.
    pub fn pop_due(&mut self, now: u32) -> Option<Vec<u8>> {
        let limit = (now as u64 + 1) << 32;
        match self.heap.peek() {
            Some(Reverse((key, _))) if *key < limit => self.heap.pop().map(|Reverse((_, d))| d),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn releases_by_due_time() {
        let mut queue = DelayQueue::default();
        queue.schedule(30, vec![3]);
        queue.schedule(10, vec![1]);
        queue.schedule(10, vec![2]);
        assert_eq!(queue.imminent(), Some(10));
        assert_eq!(queue.pop_due(9), None);
        assert_eq!(queue.pop_due(10), Some(vec![1]));
        assert_eq!(queue.pop_due(10), Some(vec![2]));
        assert_eq!(queue.pop_due(29), None);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pop_due(100), Some(vec![3]));
        assert_eq!(queue.imminent(), None);
    }
}
