//! Row types mirrored from the on-disk schema (see `schema/schema.sql`).

#[derive(Debug, Clone, PartialEq)]
pub struct MessageRow {
    pub message_id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub receiver_id: Option<String>,
    pub group_id: Option<String>,
    pub message_type: String,
    pub content: String,
    pub direction: String,
    pub status: String,
    pub client_send_time: i64,
    pub server_time: i64,
    pub seq: i64,
    pub created_at: i64,
    pub is_read: bool,
    pub is_deleted: bool,
    pub is_revoked: bool,
    pub revoked_by: Option<String>,
    pub revoked_time: i64,
    /// Reader ids that have acknowledged this message — only meaningful
    /// for a group conversation; a single conversation uses `is_read`.
    pub read_by: Vec<String>,
    pub read_time: i64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConversationRow {
    pub conversation_id: String,
    pub peer_id: Option<String>,
    pub is_group: bool,
    pub last_message_id: Option<String>,
    pub last_message_time: i64,
    pub unread_count: i64,
    pub is_muted: bool,
}

/// Result of a batch upsert: how many rows were freshly inserted, how many
/// existing rows were overwritten by a newer record, and how many incoming
/// records lost the newer-wins comparison and were dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UpsertCounts {
    pub inserted: u64,
    pub updated: u64,
    pub skipped: u64,
}

impl UpsertCounts {
    pub fn merge(&mut self, other: UpsertCounts) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.skipped += other.skipped;
    }
}

#[derive(Debug, Clone)]
pub struct PendingSend {
    pub client_seq: u64,
    pub message_id: String,
    pub conversation_id: String,
    pub payload: Vec<u8>,
    pub attempts: u32,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct UserRow {
    pub user_id: String,
    pub nickname: String,
    pub avatar_url: Option<String>,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct GroupRow {
    pub group_id: String,
    pub name: String,
    pub owner_id: Option<String>,
    pub member_count: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupMemberRow {
    pub group_id: String,
    pub user_id: String,
    pub role: String,
    pub joined_at: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FriendRow {
    pub user_id: String,
    pub friend_id: String,
    pub remark: Option<String>,
    pub updated_at: i64,
}
