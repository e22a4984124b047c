//! The WebSocket envelope variant: no magic, no CRC — the WS frame already
//! supplies boundaries and integrity, so only the logical fields remain.
//!
//! ```text
//! offset  size   field
//! 0       2      command
//! 2       4      sequence
//! 6       8      timestamp (unix millis)
//! 14      4      body_length
//! 18      N      body
//! ```
//!
//! Interchangeable with [`crate::packet::Packet`] at the dispatcher: both
//! carry the same command set and bodies, just framed differently.

use crate::command::Command;
use crate::error::FrameError;

pub const HEADER_SIZE: usize = 18;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub command: Command,
    pub sequence: u32,
    pub timestamp: u64,
    pub body: Vec<u8>,
}

impl Envelope {
    pub fn new(command: Command, sequence: u32, timestamp: u64, body: Vec<u8>) -> Self {
        Envelope {
            command,
            sequence,
            timestamp,
            body,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let body_length = self.body.len() as u32;
        let mut out = Vec::with_capacity(HEADER_SIZE + self.body.len());
        out.extend_from_slice(&self.command.to_u16().to_be_bytes());
        out.extend_from_slice(&self.sequence.to_be_bytes());
        out.extend_from_slice(&self.timestamp.to_be_bytes());
        out.extend_from_slice(&body_length.to_be_bytes());
        out.extend_from_slice(&self.body);
        out
    }

    /// Decode a complete WebSocket binary frame (the frame boundary is
    /// exactly one logical envelope; no split/stick handling is needed here).
    pub fn decode(bytes: &[u8], max_packet_size: u32) -> Result<Self, FrameError> {
        if bytes.len() < HEADER_SIZE {
            return Err(FrameError::BodyTooLarge);
        }
        let command = Command::from_u16(u16::from_be_bytes([bytes[0], bytes[1]]));
        let sequence = u32::from_be_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]);
        let timestamp = u64::from_be_bytes([
            bytes[6], bytes[7], bytes[8], bytes[9], bytes[10], bytes[11], bytes[12], bytes[13],
        ]);
        let body_length = u32::from_be_bytes([bytes[14], bytes[15], bytes[16], bytes[17]]);
        if body_length > max_packet_size {
            return Err(FrameError::BodyTooLarge);
        }
        let expected_total = HEADER_SIZE + body_length as usize;
        if bytes.len() != expected_total {
            return Err(FrameError::BodyTooLarge);
        }
        let body = bytes[HEADER_SIZE..expected_total].to_vec();
        Ok(Envelope {
            command,
            sequence,
            timestamp,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_preserves_logical_fields() {
        let e = Envelope::new(Command::PushMsg, 7, 1_700_000_000_000, b"payload".to_vec());
        let bytes = e.encode();
        let decoded = Envelope::decode(&bytes, 1024 * 1024).unwrap();
        assert_eq!(decoded, e);
    }

    #[test]
    fn empty_body_round_trips() {
        let e = Envelope::new(Command::HeartbeatReq, 0, 0, vec![]);
        let bytes = e.encode();
        assert_eq!(bytes.len(), HEADER_SIZE);
        assert_eq!(Envelope::decode(&bytes, 1024).unwrap(), e);
    }

    #[test]
    fn truncated_frame_is_rejected() {
        let e = Envelope::new(Command::PushMsg, 1, 0, b"abc".to_vec());
        let mut bytes = e.encode();
        bytes.truncate(bytes.len() - 1);
        assert!(Envelope::decode(&bytes, 1024).is_err());
    }
}
