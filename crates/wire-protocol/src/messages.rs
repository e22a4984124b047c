//! Body payload types carried inside a [`crate::packet::Packet`] or
//! [`crate::envelope::Envelope`].
//!
//! Serialized as JSON (acceptable per the wire spec; Protobuf is the
//! preferred alternative for a production deployment but out of scope here).
//! Unknown fields are ignored on decode for forward compatibility — every
//! struct below derives `Deserialize` with serde's default "ignore unknown
//! fields" behavior.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Text,
    Image,
    Audio,
    Video,
    File,
    Location,
    Card,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Sending,
    Sent,
    Delivered,
    Read,
    Failed,
    Revoked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Send,
    Receive,
}

/// The wire representation of a chat message; see the local store's richer
/// persisted row for the full entity including local-only bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    pub message_id: String,
    pub conversation_id: String,
    pub sender_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    pub message_type: MessageType,
    pub content: String,
    pub client_send_time: i64,
    #[serde(default)]
    pub server_time: i64,
    #[serde(default)]
    pub seq: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthRequest {
    pub user_id: String,
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMsgRequest {
    pub message: WireMessage,
    /// Client-assigned correlation id, echoed back in the response so the
    /// outbound queue can match it even before the server assigns seq/time.
    pub client_seq: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMsgResponse {
    pub client_seq: u64,
    pub message_id: String,
    pub server_time: i64,
    pub seq: u64,
}

/// Server push of a newly received message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushMsg {
    pub message: WireMessage,
}

/// Client -> server delivery ack for a pushed message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MsgAck {
    pub message_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchMsg {
    pub messages: Vec<WireMessage>,
    pub has_more: bool,
    pub current_seq: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevokeRequest {
    pub message_id: String,
    pub operator_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevokeResponse {
    pub message_id: String,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevokePush {
    pub message_id: String,
    pub conversation_id: String,
    pub revoked_by: String,
    pub revoked_time: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRequest {
    pub user_id: String,
    pub from_seq: u64,
    pub batch_size: u32,
    /// Present only for a conversation-scoped range sync; absent for a
    /// full account-level sync from `from_seq`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    /// Upper bound for a range sync; ignored (unbounded) for a full sync.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_seq: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncResponse {
    pub messages: Vec<WireMessage>,
    pub has_more: bool,
    pub current_seq: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadReceiptRequest {
    pub conversation_id: String,
    pub message_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadReceiptResponse {
    pub conversation_id: String,
    pub ok: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadReceiptPush {
    pub conversation_id: String,
    pub reader_id: String,
    pub message_ids: Vec<String>,
    pub read_time: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypingStatusRequest {
    pub conversation_id: String,
    pub is_typing: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypingStatusPush {
    pub conversation_id: String,
    pub user_id: String,
    pub is_typing: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatReq {
    pub client_time: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRsp {
    pub server_time: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KickOut {
    pub reason: String,
}

pub fn encode_body<T: Serialize>(value: &T) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec(value)
}

pub fn decode_body<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> serde_json::Result<T> {
    serde_json::from_slice(bytes)
}
