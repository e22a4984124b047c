//! The framed-TCP wire unit: a 16-byte big-endian header plus an opaque body.
//!
//! ```text
//! offset  size   field
//! 0       2      magic       = 0xEF89
//! 2       1      version     = 0x01
//! 3       1      flags       (reserved, must be 0)
//! 4       2      command
//! 6       4      sequence
//! 10      4      body_length
//! 14      2      crc16 (CCITT over bytes 0..13)
//! 16      N      body
//! ```

use crate::command::Command;
use crate::crc::crc16_ccitt;
use crate::error::FrameError;

pub const MAGIC: u16 = 0xEF89;
pub const VERSION: u8 = 0x01;
pub const HEADER_SIZE: usize = 16;
pub const DEFAULT_MAX_PACKET_SIZE: u32 = 1024 * 1024;

/// A fully decoded framed-TCP packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub flags: u8,
    pub command: Command,
    pub sequence: u32,
    pub body: Vec<u8>,
}

impl Packet {
    pub fn new(command: Command, sequence: u32, body: Vec<u8>) -> Self {
        Packet {
            flags: 0,
            command,
            sequence,
            body,
        }
    }

    /// Encode to wire bytes: header fields big-endian, CRC16 over bytes 0..13,
    /// then the body appended verbatim.
    pub fn encode(&self) -> Vec<u8> {
        let body_length = self.body.len() as u32;
        let mut header = [0u8; HEADER_SIZE];
        header[0..2].copy_from_slice(&MAGIC.to_be_bytes());
        header[2] = VERSION;
        header[3] = self.flags;
        header[4..6].copy_from_slice(&self.command.to_u16().to_be_bytes());
        header[6..10].copy_from_slice(&self.sequence.to_be_bytes());
        header[10..14].copy_from_slice(&body_length.to_be_bytes());
        let crc = crc16_ccitt(&header[0..14]);
        header[14..16].copy_from_slice(&crc.to_be_bytes());

        let mut out = Vec::with_capacity(HEADER_SIZE + self.body.len());
        out.extend_from_slice(&header);
        out.extend_from_slice(&self.body);
        out
    }

    /// Decode a complete packet from exactly `HEADER_SIZE + body_length` bytes.
    ///
    /// Callers that don't yet know `body_length` should use [`decode_header`]
    /// first (see the stream reassembler).
    pub fn decode(bytes: &[u8], max_packet_size: u32) -> Result<Self, FrameError> {
        let header = decode_header(bytes, max_packet_size)?;
        let body = bytes[HEADER_SIZE..HEADER_SIZE + header.body_length as usize].to_vec();
        Ok(Packet {
            flags: header.flags,
            command: header.command,
            sequence: header.sequence,
            body,
        })
    }
}

/// The parsed, validated header — used by the reassembler to learn
/// `body_length` before the body bytes have necessarily all arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub flags: u8,
    pub command: Command,
    pub sequence: u32,
    pub body_length: u32,
}

/// Validate and parse the fixed 16-byte header.
///
/// Validation order is magic, then version, then body size, then CRC —
/// matching the priority with which a single corrupted header should be
/// attributed (see module docs on [`FrameError`]).
pub fn decode_header(bytes: &[u8], max_packet_size: u32) -> Result<Header, FrameError> {
    debug_assert!(bytes.len() >= HEADER_SIZE);

    let magic = u16::from_be_bytes([bytes[0], bytes[1]]);
    if magic != MAGIC {
        return Err(FrameError::MagicMismatch);
    }

    let version = bytes[2];
    if version != VERSION {
        return Err(FrameError::VersionMismatch);
    }

    let flags = bytes[3];
    let command = Command::from_u16(u16::from_be_bytes([bytes[4], bytes[5]]));
    let sequence = u32::from_be_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]);
    let body_length = u32::from_be_bytes([bytes[10], bytes[11], bytes[12], bytes[13]]);

    if body_length > max_packet_size {
        return Err(FrameError::BodyTooLarge);
    }

    let stored_crc = u16::from_be_bytes([bytes[14], bytes[15]]);
    let computed_crc = crc16_ccitt(&bytes[0..14]);
    if stored_crc != computed_crc {
        return Err(FrameError::CrcFailed);
    }

    Ok(Header {
        flags,
        command,
        sequence,
        body_length,
    })
}
