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

//! Wire format of a KCP segment.
//!
//! Every segment starts with a fixed 24-byte little-endian header, followed by the payload:
//!
//! ```text
//! | conv u32 | cmd u8 | frg u8 | wnd u16 | ts u32 | sn u32 | una u32 | len u32 | payload ... |
//! ```
//!
//! Several segments may be packed back to back into one datagram.

use super::{KcpError, Result};
use bytes::{Buf, BufMut, Bytes};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::convert::TryFrom;
use std::fmt;

/// The overhead imposed by KCP per segment (aka. segment header length).
pub const OVERHEAD: usize = 24;

/// KCP commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Command {
    /// Pushes a data segment onto the receive buffer.
    Push = 81,
    /// Acknowledges a single data segment.
    Ack = 82,
    /// Asks the receiver to tell us its window size.
    WindowProbe = 83,
    /// Tells the receiver our window size.
    WindowResponse = 84,
}

impl Default for Command {
    fn default() -> Self {
        Command::Push
    }
}

/// KCP segment, the header fields plus the bookkeeping needed while it sits in the send buffer.
#[derive(Debug, Default, Clone)]
#[rustfmt::skip]
pub(crate) struct Segment {
    // Header
    #[doc = "Conversation ID."]     pub conv: u32,  #[doc = "KCP command."]         pub cmd: Command,
    #[doc = "Fragment index."]      pub frg: u8,    #[doc = "Remote window size."]  pub wnd: u16,
    #[doc = "Timestamp when sent."] pub ts: u32,    #[doc = "Sequence number."]     pub sn: u32,
    #[doc = "UNA when sent."]       pub una: u32,
    /// Timestamp for next retransmission.
    pub resend_ts: u32,
    /// Retransmission timeout of this very segment.
    pub rto: u32,
    /// Number of times the segment is skip-ACKed.
    pub fast_acks: u32,
    /// Number of transmission attempts.
    pub xmits: u32,
    /// The payload.
    pub payload: Bytes,
}

impl Segment {
    /// Number of bytes this segment occupies on the wire.
    pub fn encoded_len(&self) -> usize {
        OVERHEAD + self.payload.len()
    }

    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u32_le(self.conv);
        buf.put_u8(self.cmd.into());
        buf.put_u8(self.frg);
        buf.put_u16_le(self.wnd);
        buf.put_u32_le(self.ts);
        buf.put_u32_le(self.sn);
        buf.put_u32_le(self.una);
        buf.put_u32_le(self.payload.len() as u32);
        buf.put_slice(&self.payload);
    }

    /// Decodes the segment at the front of `raw`, advancing it past the segment.
    ///
    /// `offset` is only used to locate the failure in the returned error. The payload is a
    /// zero-copy slice of `raw`.
    pub fn decode(raw: &mut Bytes, offset: usize) -> Result<Segment> {
        if raw.remaining() < OVERHEAD {
            return Err(KcpError::MalformedSegment {
                offset,
                reason: "truncated header",
            });
        }
        let conv = raw.get_u32_le();
        let cmd = raw.get_u8();
        let frg = raw.get_u8();
        let wnd = raw.get_u16_le();
        let ts = raw.get_u32_le();
        let sn = raw.get_u32_le();
        let una = raw.get_u32_le();
        let len = raw.get_u32_le() as usize;
        let cmd = Command::try_from(cmd).map_err(|_| KcpError::MalformedSegment {
            offset,
            reason: "unknown command",
        })?;
        if raw.remaining() < len {
            return Err(KcpError::MalformedSegment {
                offset,
                reason: "truncated payload",
            });
        }
        Ok(Segment {
            conv,
            cmd,
            frg,
            wnd,
            ts,
            sn,
            una,
            payload: raw.split_to(len),
            ..Default::default()
        })
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\tfrg\t{}\twnd\t{}\tts\t{}\tsn\t{}\tuna\t{}\tlen\t{}",
            match self.cmd {
                Command::Push => "PUSH ",
                Command::Ack => "ACK  ",
                Command::WindowProbe => "WASK ",
                Command::WindowResponse => "WTELL",
            },
            self.frg,
            self.wnd,
            self.ts,
            self.sn,
            self.una,
            self.payload.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Segment {
        Segment {
            conv: 0x1122_3344,
            cmd: Command::Push,
            frg: 2,
            wnd: 128,
            ts: 0xdead_beef,
            sn: 7,
            una: 5,
            payload: Bytes::from_static(b"hello"),
            ..Default::default()
        }
    }

    #[test]
    fn header_layout_is_little_endian() {
        let mut buf: Vec<u8> = Vec::new();
        sample().encode(&mut buf);
        assert_eq!(buf.len(), OVERHEAD + 5);
        assert_eq!(&buf[..4], &[0x44, 0x33, 0x22, 0x11]);
        assert_eq!(buf[4], 81);
        assert_eq!(buf[5], 2);
        assert_eq!(&buf[6..8], &[128, 0]);
        assert_eq!(&buf[8..12], &[0xef, 0xbe, 0xad, 0xde]);
        assert_eq!(&buf[20..24], &[5, 0, 0, 0]);
        assert_eq!(&buf[24..], b"hello");
    }

    #[test]
    fn decodes_back_to_back_segments() {
        let mut buf: Vec<u8> = Vec::new();
        sample().encode(&mut buf);
        let mut ack = sample();
        ack.cmd = Command::Ack;
        ack.payload = Bytes::new();
        ack.encode(&mut buf);

        let mut raw = Bytes::from(buf);
        let first = Segment::decode(&mut raw, 0).unwrap();
        assert_eq!(first.cmd, Command::Push);
        assert_eq!(first.sn, 7);
        assert_eq!(&first.payload[..], b"hello");
        let second = Segment::decode(&mut raw, first.encoded_len()).unwrap();
        assert_eq!(second.cmd, Command::Ack);
        assert!(second.payload.is_empty());
        assert!(raw.is_empty());
    }

    #[test]
    fn rejects_truncated_header() {
        let mut raw = Bytes::from_static(&[0u8; OVERHEAD - 1]);
        match Segment::decode(&mut raw, 3) {
            Err(KcpError::MalformedSegment { offset, reason }) => {
                assert_eq!(offset, 3);
                assert_eq!(reason, "truncated header");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn rejects_truncated_payload() {
        let mut buf: Vec<u8> = Vec::new();
        sample().encode(&mut buf);
        buf.truncate(buf.len() - 1);
        let mut raw = Bytes::from(buf);
        assert!(matches!(
            Segment::decode(&mut raw, 0),
            Err(KcpError::MalformedSegment {
                reason: "truncated payload",
                ..
            })
        ));
    }

    #[test]
    fn rejects_unknown_command() {
        let mut buf: Vec<u8> = Vec::new();
        sample().encode(&mut buf);
        buf[4] = 99;
        let mut raw = Bytes::from(buf);
        assert!(matches!(
            Segment::decode(&mut raw, 0),
            Err(KcpError::MalformedSegment {
                reason: "unknown command",
                ..
            })
        ));
    }
}
