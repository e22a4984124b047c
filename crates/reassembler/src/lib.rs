//! Stream reassembly for the framed-TCP transport (L1).
//!
//! TCP gives no message boundaries: a single `read()` can return part of a
//! packet, several packets stuck together, or a packet split across reads.
//! [`Reassembler`] buffers raw bytes and peels off complete
//! [`Packet`](wire_protocol::Packet)s as they become available.
//!
//! Policy is fail-fast, not resync: a single corrupted header clears the
//! buffer and returns a fatal fault. Attempting to byte-by-byte rescan for
//! the next magic sequence risks silently skipping a packet whose magic
//! bytes happen to collide with body content; the transport is expected to
//! close and reconnect instead (see the reconnect crate).

use thiserror::Error;
use tracing::warn;
use wire_protocol::packet::{decode_header, DEFAULT_MAX_PACKET_SIZE, HEADER_SIZE};
use wire_protocol::{FrameError, Packet};

/// Default cap on buffered-but-not-yet-framed bytes: 2 MiB.
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 2 * 1024 * 1024;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ReassemblerError {
    #[error("frame decode fault: {0}")]
    Frame(#[from] FrameError),
    #[error("buffered bytes exceeded max_buffer_size before a complete frame arrived")]
    BufferOverflow,
}

pub struct Reassembler {
    buf: Vec<u8>,
    max_packet_size: u32,
    max_buffer_size: usize,
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PACKET_SIZE, DEFAULT_MAX_BUFFER_SIZE)
    }
}

impl Reassembler {
    pub fn new(max_packet_size: u32, max_buffer_size: usize) -> Self {
        Reassembler {
            buf: Vec::new(),
            max_packet_size,
            max_buffer_size,
        }
    }

    /// Append newly-read bytes and peel off every complete packet now
    /// available. On the first decode fault the internal buffer is cleared
    /// and the fault is returned; callers must treat this as fatal for the
    /// connection (see spec §9 on fail-fast vs silent resync).
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<Packet>, ReassemblerError> {
        self.buf.extend_from_slice(bytes);
        let mut out = Vec::new();

        loop {
            if self.buf.len() < HEADER_SIZE {
                break;
            }
            let header = match decode_header(&self.buf[..HEADER_SIZE], self.max_packet_size) {
                Ok(h) => h,
                Err(e) => {
                    warn!(error = %e, buffered = self.buf.len(), "reassembler: corrupt header, clearing buffer");
                    self.buf.clear();
                    return Err(e.into());
                }
            };
            let total = HEADER_SIZE + header.body_length as usize;
            if self.buf.len() < total {
                break;
            }
            let packet = match Packet::decode(&self.buf[..total], self.max_packet_size) {
                Ok(p) => p,
                Err(e) => {
                    warn!(error = %e, buffered = self.buf.len(), "reassembler: corrupt frame, clearing buffer");
                    self.buf.clear();
                    return Err(e.into());
                }
            };
            self.buf.drain(0..total);
            out.push(packet);
        }

        if self.buf.len() > self.max_buffer_size {
            warn!(buffered = self.buf.len(), max = self.max_buffer_size, "reassembler: buffer overflow, no complete frame");
            self.buf.clear();
            return Err(ReassemblerError::BufferOverflow);
        }

        Ok(out)
    }

    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wire_protocol::Command;

    #[test]
    fn single_complete_packet_in_one_read() {
        let mut r = Reassembler::default();
        let p = Packet::new(Command::SendMsg, 1, b"hi".to_vec());
        let out = r.feed(&p.encode()).unwrap();
        assert_eq!(out, vec![p]);
        assert_eq!(r.buffered_len(), 0);
    }

    #[test]
    fn split_packet_across_two_reads() {
        let mut r = Reassembler::default();
        let p = Packet::new(Command::SendMsg, 1, b"hello world".to_vec());
        let bytes = p.encode();
        let (first, second) = bytes.split_at(5);
        assert!(r.feed(first).unwrap().is_empty());
        let out = r.feed(second).unwrap();
        assert_eq!(out, vec![p]);
    }

    #[test]
    fn stuck_together_packets_in_one_read() {
        let mut r = Reassembler::default();
        let p1 = Packet::new(Command::SendMsg, 1, b"a".to_vec());
        let p2 = Packet::new(Command::PushMsg, 2, b"bb".to_vec());
        let mut bytes = p1.encode();
        bytes.extend_from_slice(&p2.encode());
        let out = r.feed(&bytes).unwrap();
        assert_eq!(out, vec![p1, p2]);
    }

    #[test]
    fn corrupted_header_clears_buffer_and_is_fatal() {
        let mut r = Reassembler::default();
        let p = Packet::new(Command::SendMsg, 1, b"x".to_vec());
        let mut bytes = p.encode();
        bytes[0] ^= 0xFF;
        let err = r.feed(&bytes).unwrap_err();
        assert_eq!(err, ReassemblerError::Frame(FrameError::MagicMismatch));
        assert_eq!(r.buffered_len(), 0);
    }

    #[test]
    fn oversized_unframed_backlog_is_rejected() {
        let mut r = Reassembler::new(DEFAULT_MAX_PACKET_SIZE, 16);
        let junk = vec![0u8; 32];
        let err = r.feed(&junk).unwrap_err();
        assert_eq!(err, ReassemblerError::BufferOverflow);
        assert_eq!(r.buffered_len(), 0);
    }

    #[test]
    fn partial_header_waits_for_more_bytes() {
        let mut r = Reassembler::default();
        let out = r.feed(&[0xEF, 0x89, 0x01]).unwrap();
        assert!(out.is_empty());
        assert_eq!(r.buffered_len(), 3);
    }
}
