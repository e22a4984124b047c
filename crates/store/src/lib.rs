//! WAL-mode local message store (L8).
//!
//! One `rusqlite` connection per [`Store`], guarded by a coarse write mutex
//! — every write path (message upsert, conversation upsert, cursor save,
//! pending-send bookkeeping) takes the same lock, so callers never have to
//! reason about SQLite's own locking semantics. Reads also go through the
//! lock for simplicity; this store is sized for a single chat client's
//! local history, not a high-concurrency server workload.

pub mod error;
pub mod model;

use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{info, warn};

pub use error::StoreError;
pub use model::{
    ConversationRow, FriendRow, GroupMemberRow, GroupRow, MessageRow, PendingSend, UpsertCounts,
    UserRow,
};

const SCHEMA_SQL: &str = include_str!("schema/schema.sql");

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        apply_pragmas(&conn)?;
        apply_schema(&conn)?;
        run_integrity_check(&conn)?;
        Ok(Store {
            conn: Mutex::new(conn),
        })
    }

    // ---- messages ----------------------------------------------------

    pub fn upsert_message(&self, row: &MessageRow) -> Result<UpsertCounts, StoreError> {
        let mut conn = self.conn.lock().expect("store mutex poisoned");
        let tx = conn.transaction()?;
        let counts = upsert_message_tx(&tx, row)?;
        tx.commit()?;
        Ok(counts)
    }

    /// Upsert a batch of messages in a single transaction, applying the
    /// newer-wins merge rule per row. Used by full/range sync (L7) to land
    /// an entire server batch atomically.
    pub fn batch_upsert_messages(&self, rows: &[MessageRow]) -> Result<UpsertCounts, StoreError> {
        let mut conn = self.conn.lock().expect("store mutex poisoned");
        let tx = conn.transaction()?;
        let mut total = UpsertCounts::default();
        for row in rows {
            total.merge(upsert_message_tx(&tx, row)?);
        }
        tx.commit()?;
        Ok(total)
    }

    pub fn get_messages(
        &self,
        conversation_id: &str,
        before_seq: Option<i64>,
        limit: u32,
    ) -> Result<Vec<MessageRow>, StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let before_seq = before_seq.unwrap_or(i64::MAX);
        let mut stmt = conn.prepare(
            "SELECT message_id, conversation_id, sender_id, receiver_id, group_id, \
             message_type, content, direction, status, client_send_time, server_time, seq, created_at, \
             is_read, is_deleted, is_revoked, revoked_by, revoked_time, read_by, read_time \
             FROM messages WHERE conversation_id = ?1 AND seq < ?2 \
             ORDER BY seq DESC LIMIT ?3",
        )?;
        let rows = stmt
            .query_map(params![conversation_id, before_seq, limit], row_to_message)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn get_message(&self, message_id: &str) -> Result<Option<MessageRow>, StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT message_id, conversation_id, sender_id, receiver_id, group_id, \
             message_type, content, direction, status, client_send_time, server_time, seq, created_at, \
             is_read, is_deleted, is_revoked, revoked_by, revoked_time, read_by, read_time \
             FROM messages WHERE message_id = ?1",
        )?;
        Ok(stmt
            .query_row(params![message_id], row_to_message)
            .optional()?)
    }

    // ---- conversations -------------------------------------------------

    pub fn upsert_conversation(&self, row: &ConversationRow) -> Result<(), StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute(
            "INSERT INTO conversations \
             (conversation_id, peer_id, is_group, last_message_id, last_message_time, unread_count, is_muted) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
             ON CONFLICT(conversation_id) DO UPDATE SET \
               peer_id = excluded.peer_id, \
               is_group = excluded.is_group, \
               last_message_id = excluded.last_message_id, \
               last_message_time = excluded.last_message_time, \
               unread_count = excluded.unread_count, \
               is_muted = excluded.is_muted \
             WHERE excluded.last_message_time >= conversations.last_message_time",
            params![
                row.conversation_id,
                row.peer_id,
                row.is_group as i64,
                row.last_message_id,
                row.last_message_time,
                row.unread_count,
                row.is_muted as i64,
            ],
        )?;
        Ok(())
    }

    pub fn get_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<Option<ConversationRow>, StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT conversation_id, peer_id, is_group, last_message_id, last_message_time, \
             unread_count, is_muted FROM conversations WHERE conversation_id = ?1",
        )?;
        Ok(stmt
            .query_row(params![conversation_id], row_to_conversation)
            .optional()?)
    }

    pub fn list_conversations(&self) -> Result<Vec<ConversationRow>, StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT conversation_id, peer_id, is_group, last_message_id, last_message_time, \
             unread_count, is_muted FROM conversations ORDER BY last_message_time DESC",
        )?;
        let rows = stmt
            .query_map([], row_to_conversation)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn set_unread_count(&self, conversation_id: &str, count: i64) -> Result<(), StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute(
            "UPDATE conversations SET unread_count = ?1 WHERE conversation_id = ?2",
            params![count, conversation_id],
        )?;
        Ok(())
    }

    // ---- sync cursor ---------------------------------------------------

    pub fn save_cursor(&self, user_id: &str, seq: i64) -> Result<(), StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute(
            "INSERT INTO sync_config (user_id, last_synced_seq, updated_at) VALUES (?1, ?2, ?3) \
             ON CONFLICT(user_id) DO UPDATE SET last_synced_seq = excluded.last_synced_seq, \
             updated_at = excluded.updated_at WHERE excluded.last_synced_seq >= sync_config.last_synced_seq",
            params![user_id, seq, Utc::now().timestamp_millis()],
        )?;
        Ok(())
    }

    pub fn load_cursor(&self, user_id: &str) -> Result<i64, StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.query_row(
            "SELECT last_synced_seq FROM sync_config WHERE user_id = ?1",
            params![user_id],
            |r| r.get(0),
        )
        .optional()
        .map(|v| v.unwrap_or(0))
        .map_err(StoreError::from)
    }

    // ---- pending sends (L5 restart-rebuild support) --------------------

    pub fn insert_pending(&self, pending: &PendingSend) -> Result<(), StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute(
            "INSERT OR REPLACE INTO pending_sends \
             (client_seq, message_id, conversation_id, payload, attempts, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                pending.client_seq as i64,
                pending.message_id,
                pending.conversation_id,
                pending.payload,
                pending.attempts,
                pending.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn remove_pending(&self, client_seq: u64) -> Result<(), StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute(
            "DELETE FROM pending_sends WHERE client_seq = ?1",
            params![client_seq as i64],
        )?;
        Ok(())
    }

    /// All not-yet-acked sends, oldest first — used to rebuild the outbound
    /// queue (L5) after a process restart.
    pub fn list_pending(&self) -> Result<Vec<PendingSend>, StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT client_seq, message_id, conversation_id, payload, attempts, created_at \
             FROM pending_sends ORDER BY client_seq ASC",
        )?;
        let rows = stmt
            .query_map([], |r| {
                Ok(PendingSend {
                    client_seq: r.get::<_, i64>(0)? as u64,
                    message_id: r.get(1)?,
                    conversation_id: r.get(2)?,
                    payload: r.get(3)?,
                    attempts: r.get::<_, i64>(4)? as u32,
                    created_at: r.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ---- profile/roster storage (users, groups, friends) ---------------
    //
    // Feature-level friend/group management is out of scope for this crate;
    // these are just the storage operations those managers persist through.

    pub fn upsert_user(&self, row: &UserRow) -> Result<(), StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute(
            "INSERT INTO users (user_id, nickname, avatar_url, updated_at) VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(user_id) DO UPDATE SET nickname = excluded.nickname, \
             avatar_url = excluded.avatar_url, updated_at = excluded.updated_at \
             WHERE excluded.updated_at >= users.updated_at",
            params![row.user_id, row.nickname, row.avatar_url, row.updated_at],
        )?;
        Ok(())
    }

    pub fn get_user(&self, user_id: &str) -> Result<Option<UserRow>, StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.query_row(
            "SELECT user_id, nickname, avatar_url, updated_at FROM users WHERE user_id = ?1",
            params![user_id],
            |r| {
                Ok(UserRow {
                    user_id: r.get(0)?,
                    nickname: r.get(1)?,
                    avatar_url: r.get(2)?,
                    updated_at: r.get(3)?,
                })
            },
        )
        .optional()
        .map_err(StoreError::from)
    }

    pub fn upsert_group(&self, row: &GroupRow) -> Result<(), StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute(
            "INSERT INTO groups (group_id, name, owner_id, member_count, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5) \
             ON CONFLICT(group_id) DO UPDATE SET name = excluded.name, \
             owner_id = excluded.owner_id, member_count = excluded.member_count, \
             updated_at = excluded.updated_at WHERE excluded.updated_at >= groups.updated_at",
            params![
                row.group_id,
                row.name,
                row.owner_id,
                row.member_count,
                row.updated_at
            ],
        )?;
        Ok(())
    }

    pub fn get_group(&self, group_id: &str) -> Result<Option<GroupRow>, StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.query_row(
            "SELECT group_id, name, owner_id, member_count, updated_at FROM groups WHERE group_id = ?1",
            params![group_id],
            |r| {
                Ok(GroupRow {
                    group_id: r.get(0)?,
                    name: r.get(1)?,
                    owner_id: r.get(2)?,
                    member_count: r.get(3)?,
                    updated_at: r.get(4)?,
                })
            },
        )
        .optional()
        .map_err(StoreError::from)
    }

    pub fn upsert_group_member(&self, row: &GroupMemberRow) -> Result<(), StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute(
            "INSERT INTO group_members (group_id, user_id, role, joined_at) VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(group_id, user_id) DO UPDATE SET role = excluded.role",
            params![row.group_id, row.user_id, row.role, row.joined_at],
        )?;
        Ok(())
    }

    pub fn remove_group_member(&self, group_id: &str, user_id: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute(
            "DELETE FROM group_members WHERE group_id = ?1 AND user_id = ?2",
            params![group_id, user_id],
        )?;
        Ok(())
    }

    pub fn list_group_members(&self, group_id: &str) -> Result<Vec<GroupMemberRow>, StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT group_id, user_id, role, joined_at FROM group_members \
             WHERE group_id = ?1 ORDER BY joined_at ASC",
        )?;
        let rows = stmt
            .query_map(params![group_id], |r| {
                Ok(GroupMemberRow {
                    group_id: r.get(0)?,
                    user_id: r.get(1)?,
                    role: r.get(2)?,
                    joined_at: r.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn upsert_friend(&self, row: &FriendRow) -> Result<(), StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute(
            "INSERT INTO friends (user_id, friend_id, remark, updated_at) VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(user_id, friend_id) DO UPDATE SET remark = excluded.remark, \
             updated_at = excluded.updated_at WHERE excluded.updated_at >= friends.updated_at",
            params![row.user_id, row.friend_id, row.remark, row.updated_at],
        )?;
        Ok(())
    }

    pub fn remove_friend(&self, user_id: &str, friend_id: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute(
            "DELETE FROM friends WHERE user_id = ?1 AND friend_id = ?2",
            params![user_id, friend_id],
        )?;
        Ok(())
    }

    pub fn list_friends(&self, user_id: &str) -> Result<Vec<FriendRow>, StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT user_id, friend_id, remark, updated_at FROM friends \
             WHERE user_id = ?1 ORDER BY friend_id ASC",
        )?;
        let rows = stmt
            .query_map(params![user_id], |r| {
                Ok(FriendRow {
                    user_id: r.get(0)?,
                    friend_id: r.get(1)?,
                    remark: r.get(2)?,
                    updated_at: r.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

fn upsert_message_tx(
    tx: &rusqlite::Transaction<'_>,
    row: &MessageRow,
) -> Result<UpsertCounts, StoreError> {
    let mut stmt = tx.prepare(
        "SELECT message_id, conversation_id, sender_id, receiver_id, group_id, \
         message_type, content, direction, status, client_send_time, server_time, seq, created_at, \
         is_read, is_deleted, is_revoked, revoked_by, revoked_time, read_by, read_time \
         FROM messages WHERE message_id = ?1",
    )?;
    let existing = stmt
        .query_row(params![row.message_id], row_to_message)
        .optional()?;
    drop(stmt);

    match existing {
        None => {
            tx.execute(
                "INSERT INTO messages \
                 (message_id, conversation_id, sender_id, receiver_id, group_id, message_type, \
                  content, direction, status, client_send_time, server_time, seq, created_at, \
                  is_read, is_deleted, is_revoked, revoked_by, revoked_time, read_by, read_time) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)",
                params![
                    row.message_id,
                    row.conversation_id,
                    row.sender_id,
                    row.receiver_id,
                    row.group_id,
                    row.message_type,
                    row.content,
                    row.direction,
                    row.status,
                    row.client_send_time,
                    row.server_time,
                    row.seq,
                    row.created_at,
                    row.is_read as i64,
                    row.is_deleted as i64,
                    row.is_revoked as i64,
                    row.revoked_by,
                    row.revoked_time,
                    encode_read_by(&row.read_by),
                    row.read_time,
                ],
            )?;
            Ok(UpsertCounts {
                inserted: 1,
                ..Default::default()
            })
        }
        Some(existing) => {
            let is_newer = (row.server_time, row.seq) > (existing.server_time, existing.seq);
            let status_advanced = status_rank(&row.status) > status_rank(&existing.status);
            let newly_flagged = (row.is_read && !existing.is_read)
                || (row.is_deleted && !existing.is_deleted)
                || (row.is_revoked && !existing.is_revoked)
                || row.read_by.iter().any(|reader| !existing.read_by.contains(reader));
            let content_changed = row.content != existing.content;

            if !is_newer && !status_advanced && !newly_flagged && !content_changed {
                return Ok(UpsertCounts {
                    skipped: 1,
                    ..Default::default()
                });
            }

            let status = if is_newer || status_advanced || newly_flagged {
                row.status.clone()
            } else {
                existing.status.clone()
            };
            let server_time = row.server_time.max(existing.server_time);
            let seq = row.seq.max(existing.seq);
            let revoked_by = row.revoked_by.clone().or_else(|| existing.revoked_by.clone());
            let revoked_time = row.revoked_time.max(existing.revoked_time);
            let read_time = row.read_time.max(existing.read_time);
            let mut read_by = existing.read_by.clone();
            for reader in &row.read_by {
                if !read_by.contains(reader) {
                    read_by.push(reader.clone());
                }
            }

            tx.execute(
                "UPDATE messages SET status = ?1, server_time = ?2, seq = ?3, content = ?4, \
                 direction = ?5, is_read = ?6, is_deleted = ?7, is_revoked = ?8, revoked_by = ?9, \
                 revoked_time = ?10, read_by = ?11, read_time = ?12 WHERE message_id = ?13",
                params![
                    status,
                    server_time,
                    seq,
                    row.content,
                    row.direction,
                    (existing.is_read || row.is_read) as i64,
                    (existing.is_deleted || row.is_deleted) as i64,
                    (existing.is_revoked || row.is_revoked) as i64,
                    revoked_by,
                    revoked_time,
                    encode_read_by(&read_by),
                    read_time,
                    row.message_id,
                ],
            )?;
            Ok(UpsertCounts {
                updated: 1,
                ..Default::default()
            })
        }
    }
}

/// Forward-progress order for the statuses a message advances through on
/// its own; `failed`/`revoked` are terminal transitions set directly by the
/// orchestrator and never compared against this order.
fn status_rank(status: &str) -> i32 {
    match status {
        "sending" => 0,
        "sent" => 1,
        "delivered" => 2,
        "read" => 3,
        _ => -1,
    }
}

fn encode_read_by(ids: &[String]) -> String {
    ids.join(",")
}

fn decode_read_by(raw: &str) -> Vec<String> {
    if raw.is_empty() {
        Vec::new()
    } else {
        raw.split(',').map(str::to_string).collect()
    }
}

fn row_to_message(r: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        message_id: r.get(0)?,
        conversation_id: r.get(1)?,
        sender_id: r.get(2)?,
        receiver_id: r.get(3)?,
        group_id: r.get(4)?,
        message_type: r.get(5)?,
        content: r.get(6)?,
        direction: r.get(7)?,
        status: r.get(8)?,
        client_send_time: r.get(9)?,
        server_time: r.get(10)?,
        seq: r.get(11)?,
        created_at: r.get(12)?,
        is_read: r.get::<_, i64>(13)? != 0,
        is_deleted: r.get::<_, i64>(14)? != 0,
        is_revoked: r.get::<_, i64>(15)? != 0,
        revoked_by: r.get(16)?,
        revoked_time: r.get(17)?,
        read_by: decode_read_by(&r.get::<_, String>(18)?),
        read_time: r.get(19)?,
    })
}

fn row_to_conversation(r: &rusqlite::Row<'_>) -> rusqlite::Result<ConversationRow> {
    Ok(ConversationRow {
        conversation_id: r.get(0)?,
        peer_id: r.get(1)?,
        is_group: r.get::<_, i64>(2)? != 0,
        last_message_id: r.get(3)?,
        last_message_time: r.get(4)?,
        unread_count: r.get(5)?,
        is_muted: r.get::<_, i64>(6)? != 0,
    })
}

fn apply_pragmas(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL; \
         PRAGMA synchronous = NORMAL; \
         PRAGMA wal_autocheckpoint = 1000; \
         PRAGMA foreign_keys = ON;",
    )?;
    Ok(())
}

fn apply_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

fn run_integrity_check(conn: &Connection) -> Result<(), StoreError> {
    let result: String = conn.query_row("PRAGMA integrity_check", [], |r| r.get(0))?;
    if result != "ok" {
        warn!(result = %result, "store integrity check failed");
        return Err(StoreError::IntegrityCheck(result));
    }
    info!("store integrity check passed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_message(message_id: &str, server_time: i64, seq: i64, status: &str) -> MessageRow {
        MessageRow {
            message_id: message_id.to_string(),
            conversation_id: "conv-1".to_string(),
            sender_id: "user-a".to_string(),
            receiver_id: Some("user-b".to_string()),
            group_id: None,
            message_type: "text".to_string(),
            content: "hello".to_string(),
            direction: "send".to_string(),
            status: status.to_string(),
            client_send_time: 1000,
            server_time,
            seq,
            created_at: 1000,
            is_read: false,
            is_deleted: false,
            is_revoked: false,
            revoked_by: None,
            revoked_time: 0,
            read_by: Vec::new(),
            read_time: 0,
        }
    }

    #[test]
    fn fresh_message_is_inserted() {
        let store = Store::open_in_memory().unwrap();
        let counts = store.upsert_message(&sample_message("m1", 10, 1, "sent")).unwrap();
        assert_eq!(counts.inserted, 1);
        assert!(store.get_message("m1").unwrap().is_some());
    }

    #[test]
    fn newer_server_time_overwrites_older_row() {
        let store = Store::open_in_memory().unwrap();
        store.upsert_message(&sample_message("m1", 10, 1, "sent")).unwrap();
        let counts = store
            .upsert_message(&sample_message("m1", 20, 2, "delivered"))
            .unwrap();
        assert_eq!(counts.updated, 1);
        assert_eq!(store.get_message("m1").unwrap().unwrap().status, "delivered");
    }

    #[test]
    fn stale_update_is_skipped_not_overwritten() {
        let store = Store::open_in_memory().unwrap();
        store.upsert_message(&sample_message("m1", 20, 2, "delivered")).unwrap();
        let counts = store
            .upsert_message(&sample_message("m1", 10, 1, "sent"))
            .unwrap();
        assert_eq!(counts.skipped, 1);
        assert_eq!(store.get_message("m1").unwrap().unwrap().status, "delivered");
    }

    #[test]
    fn batch_upsert_reports_combined_counts() {
        let store = Store::open_in_memory().unwrap();
        store.upsert_message(&sample_message("m1", 10, 1, "sent")).unwrap();
        let batch = vec![
            sample_message("m1", 20, 2, "delivered"),
            sample_message("m2", 5, 1, "sent"),
        ];
        let counts = store.batch_upsert_messages(&batch).unwrap();
        assert_eq!(counts.updated, 1);
        assert_eq!(counts.inserted, 1);
    }

    #[test]
    fn get_messages_orders_by_seq_descending_and_respects_limit() {
        let store = Store::open_in_memory().unwrap();
        for i in 1..=5 {
            store
                .upsert_message(&sample_message(&format!("m{i}"), i, i, "sent"))
                .unwrap();
        }
        let page = store.get_messages("conv-1", None, 2).unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].seq, 5);
        assert_eq!(page[1].seq, 4);
    }

    #[test]
    fn cursor_round_trips_and_only_advances_forward() {
        let store = Store::open_in_memory().unwrap();
        store.save_cursor("user-a", 10).unwrap();
        assert_eq!(store.load_cursor("user-a").unwrap(), 10);
        store.save_cursor("user-a", 5).unwrap();
        assert_eq!(store.load_cursor("user-a").unwrap(), 10);
        store.save_cursor("user-a", 15).unwrap();
        assert_eq!(store.load_cursor("user-a").unwrap(), 15);
    }

    #[test]
    fn pending_sends_round_trip_and_rebuild_in_order() {
        let store = Store::open_in_memory().unwrap();
        store
            .insert_pending(&PendingSend {
                client_seq: 2,
                message_id: "m2".into(),
                conversation_id: "conv-1".into(),
                payload: vec![1, 2, 3],
                attempts: 0,
                created_at: 100,
            })
            .unwrap();
        store
            .insert_pending(&PendingSend {
                client_seq: 1,
                message_id: "m1".into(),
                conversation_id: "conv-1".into(),
                payload: vec![4, 5],
                attempts: 1,
                created_at: 90,
            })
            .unwrap();
        let pending = store.list_pending().unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].client_seq, 1);
        store.remove_pending(1).unwrap();
        assert_eq!(store.list_pending().unwrap().len(), 1);
    }

    #[test]
    fn user_upsert_is_newer_wins() {
        let store = Store::open_in_memory().unwrap();
        store
            .upsert_user(&UserRow {
                user_id: "u1".into(),
                nickname: "Alice".into(),
                avatar_url: None,
                updated_at: 10,
            })
            .unwrap();
        store
            .upsert_user(&UserRow {
                user_id: "u1".into(),
                nickname: "stale".into(),
                avatar_url: None,
                updated_at: 5,
            })
            .unwrap();
        assert_eq!(store.get_user("u1").unwrap().unwrap().nickname, "Alice");
    }

    #[test]
    fn group_membership_round_trips() {
        let store = Store::open_in_memory().unwrap();
        store
            .upsert_group(&GroupRow {
                group_id: "g1".into(),
                name: "Team".into(),
                owner_id: Some("u1".into()),
                member_count: 2,
                updated_at: 10,
            })
            .unwrap();
        store
            .upsert_group_member(&GroupMemberRow {
                group_id: "g1".into(),
                user_id: "u1".into(),
                role: "owner".into(),
                joined_at: 1,
            })
            .unwrap();
        store
            .upsert_group_member(&GroupMemberRow {
                group_id: "g1".into(),
                user_id: "u2".into(),
                role: "member".into(),
                joined_at: 2,
            })
            .unwrap();
        assert_eq!(store.list_group_members("g1").unwrap().len(), 2);
        store.remove_group_member("g1", "u2").unwrap();
        assert_eq!(store.list_group_members("g1").unwrap().len(), 1);
    }

    #[test]
    fn friend_list_round_trips() {
        let store = Store::open_in_memory().unwrap();
        store
            .upsert_friend(&FriendRow {
                user_id: "u1".into(),
                friend_id: "u2".into(),
                remark: Some("buddy".into()),
                updated_at: 1,
            })
            .unwrap();
        assert_eq!(store.list_friends("u1").unwrap().len(), 1);
        store.remove_friend("u1", "u2").unwrap();
        assert!(store.list_friends("u1").unwrap().is_empty());
    }
}
