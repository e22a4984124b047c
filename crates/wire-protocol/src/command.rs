//! The closed set of wire-protocol command tags.
//!
//! Carried as the `command` field in both envelope variants (framed TCP and
//! WebSocket). Unknown values decode to [`Command::Unknown`] rather than
//! failing — forward compatibility is a framing-layer property, not
//! something the codec enforces by rejecting unrecognized tags.

/// A command tag identifying the kind of a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Connect,
    Disconnect,
    HeartbeatReq,
    HeartbeatRsp,
    AuthReq,
    AuthRsp,
    SendMsg,
    SendMsgRsp,
    PushMsg,
    MsgAck,
    BatchMsg,
    RevokeReq,
    RevokeRsp,
    RevokePush,
    SyncReq,
    SyncRsp,
    ReadReceiptReq,
    ReadReceiptRsp,
    ReadReceiptPush,
    TypingStatusReq,
    TypingStatusPush,
    KickOut,
    /// A tag outside the frozen enumeration. Decoded, not rejected, so a
    /// newer server can add commands an older client simply ignores.
    Unknown(u16),
}

impl Command {
    pub fn to_u16(self) -> u16 {
        match self {
            Command::Connect => 1,
            Command::Disconnect => 2,
            Command::HeartbeatReq => 3,
            Command::HeartbeatRsp => 4,
            Command::AuthReq => 5,
            Command::AuthRsp => 6,
            Command::SendMsg => 7,
            Command::SendMsgRsp => 8,
            Command::PushMsg => 9,
            Command::MsgAck => 10,
            Command::BatchMsg => 11,
            Command::RevokeReq => 12,
            Command::RevokeRsp => 13,
            Command::RevokePush => 14,
            Command::SyncReq => 15,
            Command::SyncRsp => 16,
            Command::ReadReceiptReq => 17,
            Command::ReadReceiptRsp => 18,
            Command::ReadReceiptPush => 19,
            Command::TypingStatusReq => 20,
            Command::TypingStatusPush => 21,
            Command::KickOut => 22,
            Command::Unknown(tag) => tag,
        }
    }

    pub fn from_u16(tag: u16) -> Self {
        match tag {
            1 => Command::Connect,
            2 => Command::Disconnect,
            3 => Command::HeartbeatReq,
            4 => Command::HeartbeatRsp,
            5 => Command::AuthReq,
            6 => Command::AuthRsp,
            7 => Command::SendMsg,
            8 => Command::SendMsgRsp,
            9 => Command::PushMsg,
            10 => Command::MsgAck,
            11 => Command::BatchMsg,
            12 => Command::RevokeReq,
            13 => Command::RevokeRsp,
            14 => Command::RevokePush,
            15 => Command::SyncReq,
            16 => Command::SyncRsp,
            17 => Command::ReadReceiptReq,
            18 => Command::ReadReceiptRsp,
            19 => Command::ReadReceiptPush,
            20 => Command::TypingStatusReq,
            21 => Command::TypingStatusPush,
            22 => Command::KickOut,
            other => Command::Unknown(other),
        }
    }

    /// True for commands that are themselves acknowledgements or control
    /// frames and therefore do not themselves require a delivery ack.
    pub fn is_ack_or_control(self) -> bool {
        matches!(
            self,
            Command::HeartbeatReq
                | Command::HeartbeatRsp
                | Command::MsgAck
                | Command::SendMsgRsp
                | Command::RevokeRsp
                | Command::SyncRsp
                | Command::ReadReceiptRsp
                | Command::Connect
                | Command::Disconnect
                | Command::KickOut
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_known_command() {
        let known = [
            Command::Connect,
            Command::Disconnect,
            Command::HeartbeatReq,
            Command::HeartbeatRsp,
            Command::AuthReq,
            Command::AuthRsp,
            Command::SendMsg,
            Command::SendMsgRsp,
            Command::PushMsg,
            Command::MsgAck,
            Command::BatchMsg,
            Command::RevokeReq,
            Command::RevokeRsp,
            Command::RevokePush,
            Command::SyncReq,
            Command::SyncRsp,
            Command::ReadReceiptReq,
            Command::ReadReceiptRsp,
            Command::ReadReceiptPush,
            Command::TypingStatusReq,
            Command::TypingStatusPush,
            Command::KickOut,
        ];
        for cmd in known {
            assert_eq!(Command::from_u16(cmd.to_u16()), cmd);
        }
    }

    #[test]
    fn unknown_tag_round_trips_without_panicking() {
        assert_eq!(Command::from_u16(9999).to_u16(), 9999);
    }
}
