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

//! The KCP protocol engine (pure algorithmic implementation).
//!
//! A [`ControlBlock`] turns an unreliable, unordered datagram channel into a reliable, ordered
//! message channel. It performs no I/O by itself: datagrams leave through the [`Output`] supplied
//! at construction, arrive through [`ControlBlock::input`], and time only advances when the
//! caller invokes [`ControlBlock::update`].

mod congestion;
mod protocol;
mod redundancy;
mod rto;
mod segment;

pub use protocol::{ControlBlock, Stats, MAX_FRAGMENTS};
pub use segment::{Command, OVERHEAD};

use bytes::Buf;
use std::io;
use thiserror::Error;
use tracing::debug;

/// KCP error type.
#[derive(Debug, Error)]
pub enum KcpError {
    #[error("message of {len} bytes exceeds the {max}-byte limit")]
    InvalidInput { len: usize, max: usize },
    #[error("buffer of {available} bytes cannot hold the next {needed}-byte message")]
    BufferTooSmall { needed: usize, available: usize },
    #[error("no complete message available (try again later)")]
    WouldBlock,
    #[error("malformed segment at byte {offset}: {reason}")]
    MalformedSegment { offset: usize, reason: &'static str },
    #[error("wrong conv. (expected {expected}, found {found})")]
    SessionMismatch { expected: u32, found: u32 },
    #[error("invalid MTU {0} (should be more than {})", OVERHEAD)]
    InvalidMtu(u32),
}

/// The result type for KCP operations.
pub type Result<T> = std::result::Result<T, KcpError>;

/// The lower layer a control block writes its datagrams to.
///
/// Whatever implements this is also the user data of the session: it is owned by the control
/// block and can be reached through [`ControlBlock::user`].
pub trait Output {
    /// Hands one datagram to the transport. Failures are not retried, as lost datagrams are
    /// recovered by retransmission anyway.
    fn output(&mut self, datagram: &[u8]) -> io::Result<()>;
}

impl<F> Output for F
where
    F: FnMut(&[u8]) -> io::Result<()>,
{
    fn output(&mut self, datagram: &[u8]) -> io::Result<()> {
        self(datagram)
    }
}

fn output_datagram<O: Output>(output: &mut O, datagram: &[u8]) {
    if let Err(err) = output.output(datagram) {
        debug!(%err, len = datagram.len(), "error writing datagram");
    }
}

/// Signed distance from `b` to `a` in serial number arithmetic, used for both sequence numbers
/// and timestamps so that wrapping around `u32::MAX` is harmless.
#[inline]
fn diff(a: u32, b: u32) -> i32 {
    a.wrapping_sub(b) as i32
}

/// Gets the conversation id from a raw datagram, if it is long enough to carry one.
pub fn conv_from_raw(buf: &[u8]) -> Option<u32> {
    let mut buf = buf.get(..4)?;
    Some(buf.get_u32_le())
}
