use thiserror::Error;

/// Distinct, classifiable reasons a framed-TCP header failed to decode.
///
/// Reported in this priority order when more than one condition is true:
/// magic, then version, then body size, then CRC. A CRC failure is only
/// ever attributed once magic and version have already passed — otherwise
/// garbage bytes masquerading as a valid-CRC header would be misclassified.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    #[error("magic mismatch")]
    MagicMismatch,
    #[error("unsupported version")]
    VersionMismatch,
    #[error("body_length exceeds max_packet_size")]
    BodyTooLarge,
    #[error("CRC16 check failed")]
    CrcFailed,
}

impl FrameError {
    /// Stable tag used for telemetry counters (one counter per cause).
    pub fn as_str(self) -> &'static str {
        match self {
            FrameError::MagicMismatch => "magic_mismatch",
            FrameError::VersionMismatch => "version_mismatch",
            FrameError::BodyTooLarge => "body_too_large",
            FrameError::CrcFailed => "crc_failed",
        }
    }
}
