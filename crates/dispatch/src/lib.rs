//! Inbound dispatcher (L6): routes decoded frames by command, persists
//! them, updates the unread ledger, and notifies listeners.
//!
//! Every inbound chat message — whether pushed live or replayed during
//! sync — goes through the same unified path: set direction, upsert into
//! the store, update the ledger, notify listeners, then (for a live push
//! only) emit exactly one delivery ACK. A message already fully persisted
//! from a prior delivery still gets ACKed again here — the ACK tells the
//! server to stop retransmitting, which is true whether or not this
//! particular delivery was the first — but it is never double-counted
//! toward the unread ledger, since [`store::Store::upsert_message`] reports
//! `skipped` for anything that didn't actually change a row.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use ledger::Ledger;
use store::{MessageRow, Store};
use wire_protocol::messages::{self, PushMsg, ReadReceiptPush, RevokePush, TypingStatusPush};
use wire_protocol::Command;

pub const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("store error: {0}")]
    Store(#[from] store::StoreError),
    #[error("malformed body for command {command:?}: {source}")]
    Malformed {
        command: Command,
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone)]
pub enum DispatchEvent {
    MessageReceived(MessageRow),
    MessageRevoked {
        message_id: String,
        conversation_id: String,
        revoked_by: String,
    },
    ReadReceipt {
        conversation_id: String,
        reader_id: String,
        message_ids: Vec<String>,
    },
    TypingStatus {
        conversation_id: String,
        user_id: String,
        is_typing: bool,
    },
    KickedOut {
        reason: String,
    },
}

/// An outbound frame the dispatcher wants sent — ACKs it generates in
/// response to inbound traffic. The orchestrator drains this and hands the
/// frames to the active transport.
pub struct OutgoingAck {
    pub command: Command,
    pub sequence: u32,
    pub body: Vec<u8>,
}

pub struct Dispatcher {
    store: Arc<Store>,
    ledger: Ledger,
    events: broadcast::Sender<DispatchEvent>,
    acks: mpsc::UnboundedSender<OutgoingAck>,
}

impl Dispatcher {
    pub fn new(
        store: Arc<Store>,
        ledger: Ledger,
    ) -> (Self, mpsc::UnboundedReceiver<OutgoingAck>) {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (acks, ack_rx) = mpsc::unbounded_channel();
        (
            Dispatcher {
                store,
                ledger,
                events,
                acks,
            },
            ack_rx,
        )
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DispatchEvent> {
        self.events.subscribe()
    }

    pub fn handle_frame(
        &self,
        command: Command,
        sequence: u32,
        body: &[u8],
    ) -> Result<(), DispatchError> {
        match command {
            Command::PushMsg => self.handle_push_msg(body),
            Command::RevokePush => self.handle_revoke_push(body),
            Command::ReadReceiptPush => self.handle_read_receipt_push(body),
            Command::TypingStatusPush => self.handle_typing_status_push(body),
            Command::KickOut => self.handle_kick_out(body),
            other => {
                debug!(?other, sequence, "dispatch: ignoring non-push command at dispatcher");
                Ok(())
            }
        }
    }

    fn handle_push_msg(&self, body: &[u8]) -> Result<(), DispatchError> {
        let push: PushMsg = decode(Command::PushMsg, body)?;
        let row = self.persist_inbound(&push.message)?;
        self.ack(
            Command::MsgAck,
            &messages::MsgAck {
                message_id: row.message_id.clone(),
            },
        );
        Ok(())
    }

    /// Shared landing path for a single inbound message, whether from a
    /// live push or a sync batch: upsert, ledger update, listener notify.
    pub fn persist_inbound(
        &self,
        wire_msg: &messages::WireMessage,
    ) -> Result<MessageRow, DispatchError> {
        let row = MessageRow {
            message_id: wire_msg.message_id.clone(),
            conversation_id: wire_msg.conversation_id.clone(),
            sender_id: wire_msg.sender_id.clone(),
            receiver_id: wire_msg.receiver_id.clone(),
            group_id: wire_msg.group_id.clone(),
            message_type: format!("{:?}", wire_msg.message_type).to_lowercase(),
            content: wire_msg.content.clone(),
            direction: "receive".to_string(),
            status: "delivered".to_string(),
            client_send_time: wire_msg.client_send_time,
            server_time: wire_msg.server_time,
            seq: wire_msg.seq as i64,
            created_at: wire_msg.server_time,
            is_read: false,
            is_deleted: false,
            is_revoked: false,
            revoked_by: None,
            revoked_time: 0,
            read_by: Vec::new(),
            read_time: 0,
        };
        let counts = self.store.upsert_message(&row)?;
        if counts.inserted > 0 || counts.updated > 0 {
            let existing = self.store.get_conversation(&row.conversation_id)?;
            let is_muted = existing.as_ref().map(|c| c.is_muted).unwrap_or(false);
            let unread_count =
                self.ledger
                    .record_incoming(&row.conversation_id, is_muted, &row.content, row.server_time);
            let mut conversation = existing.unwrap_or_default();
            conversation.conversation_id = row.conversation_id.clone();
            conversation.is_group = row.group_id.is_some();
            conversation.peer_id = if conversation.is_group {
                row.group_id.clone()
            } else {
                Some(row.sender_id.clone())
            };
            conversation.last_message_id = Some(row.message_id.clone());
            conversation.last_message_time = row.server_time;
            conversation.unread_count = unread_count;
            self.store.upsert_conversation(&conversation)?;
            let _ = self.events.send(DispatchEvent::MessageReceived(row.clone()));
        }
        Ok(row)
    }

    fn handle_revoke_push(&self, body: &[u8]) -> Result<(), DispatchError> {
        let push: RevokePush = decode(Command::RevokePush, body)?;
        if let Some(mut row) = self.store.get_message(&push.message_id)? {
            row.status = "revoked".to_string();
            row.is_revoked = true;
            row.revoked_by = Some(push.revoked_by.clone());
            row.revoked_time = push.revoked_time;
            row.content.clear();
            self.store.upsert_message(&row)?;
        }
        let _ = self.events.send(DispatchEvent::MessageRevoked {
            message_id: push.message_id,
            conversation_id: push.conversation_id,
            revoked_by: push.revoked_by,
        });
        Ok(())
    }

    fn handle_read_receipt_push(&self, body: &[u8]) -> Result<(), DispatchError> {
        let push: ReadReceiptPush = decode(Command::ReadReceiptPush, body)?;
        for message_id in &push.message_ids {
            if let Some(mut row) = self.store.get_message(message_id)? {
                if row.group_id.is_some() {
                    if !row.read_by.contains(&push.reader_id) {
                        row.read_by.push(push.reader_id.clone());
                    }
                } else {
                    row.is_read = true;
                }
                row.read_time = row.read_time.max(push.read_time);
                self.store.upsert_message(&row)?;
            }
        }
        let _ = self.events.send(DispatchEvent::ReadReceipt {
            conversation_id: push.conversation_id,
            reader_id: push.reader_id,
            message_ids: push.message_ids,
        });
        Ok(())
    }

    fn handle_typing_status_push(&self, body: &[u8]) -> Result<(), DispatchError> {
        let push: TypingStatusPush = decode(Command::TypingStatusPush, body)?;
        let _ = self.events.send(DispatchEvent::TypingStatus {
            conversation_id: push.conversation_id,
            user_id: push.user_id,
            is_typing: push.is_typing,
        });
        Ok(())
    }

    fn handle_kick_out(&self, body: &[u8]) -> Result<(), DispatchError> {
        let push: messages::KickOut = decode(Command::KickOut, body)?;
        warn!(reason = %push.reason, "dispatch: session kicked out by server");
        let _ = self.events.send(DispatchEvent::KickedOut { reason: push.reason });
        Ok(())
    }

    fn ack<T: serde::Serialize>(&self, command: Command, body: &T) {
        match messages::encode_body(body) {
            Ok(bytes) => {
                let _ = self.acks.send(OutgoingAck {
                    command,
                    sequence: 0,
                    body: bytes,
                });
            }
            Err(e) => warn!(error = %e, "dispatch: failed to encode ack body"),
        }
    }
}

fn decode<T: for<'de> serde::Deserialize<'de>>(
    command: Command,
    body: &[u8],
) -> Result<T, DispatchError> {
    messages::decode_body(body).map_err(|source| DispatchError::Malformed { command, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wire_protocol::messages::{MessageType, WireMessage};

    fn wire_message(id: &str) -> WireMessage {
        WireMessage {
            message_id: id.to_string(),
            conversation_id: "conv-1".to_string(),
            sender_id: "user-b".to_string(),
            receiver_id: Some("user-a".to_string()),
            group_id: None,
            message_type: MessageType::Text,
            content: "hello".to_string(),
            client_send_time: 1000,
            server_time: 1000,
            seq: 1,
        }
    }

    #[test]
    fn push_msg_persists_updates_ledger_and_emits_one_ack() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let ledger = Ledger::new();
        let (dispatcher, mut acks) = Dispatcher::new(store.clone(), ledger.clone());

        let push = PushMsg {
            message: wire_message("m1"),
        };
        let body = messages::encode_body(&push).unwrap();
        dispatcher.handle_frame(Command::PushMsg, 1, &body).unwrap();

        assert!(store.get_message("m1").unwrap().is_some());
        assert_eq!(ledger.unread_for("conv-1"), 1);
        let ack = acks.try_recv().unwrap();
        assert_eq!(ack.command, Command::MsgAck);
        assert!(acks.try_recv().is_err());
    }

    #[test]
    fn duplicate_push_does_not_double_count_unread() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let ledger = Ledger::new();
        let (dispatcher, _acks) = Dispatcher::new(store, ledger.clone());

        let push = PushMsg {
            message: wire_message("m1"),
        };
        let body = messages::encode_body(&push).unwrap();
        dispatcher.handle_frame(Command::PushMsg, 1, &body).unwrap();
        dispatcher.handle_frame(Command::PushMsg, 1, &body).unwrap();

        assert_eq!(ledger.unread_for("conv-1"), 1);
    }

    #[test]
    fn revoke_push_marks_message_revoked() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let ledger = Ledger::new();
        let (dispatcher, _acks) = Dispatcher::new(store.clone(), ledger);

        let push = PushMsg {
            message: wire_message("m1"),
        };
        dispatcher
            .handle_frame(Command::PushMsg, 1, &messages::encode_body(&push).unwrap())
            .unwrap();

        let revoke = RevokePush {
            message_id: "m1".to_string(),
            conversation_id: "conv-1".to_string(),
            revoked_by: "user-b".to_string(),
            revoked_time: 2000,
        };
        dispatcher
            .handle_frame(Command::RevokePush, 2, &messages::encode_body(&revoke).unwrap())
            .unwrap();

        assert_eq!(store.get_message("m1").unwrap().unwrap().status, "revoked");
    }
}
