//! Sequence-gap sync coordinator (L7).
//!
//! Computes the requests needed to close a gap and applies the responses.
//! Deliberately has no knowledge of the transport: the orchestrator sends
//! the [`wire_protocol::messages::SyncRequest`] this produces and feeds the
//! matching [`wire_protocol::messages::SyncResponse`] back into
//! [`SyncCoordinator::apply_batch`]. Landing is idempotent by construction
//! since it goes through [`dispatch::Dispatcher::persist_inbound`], which
//! upserts with the newer-wins rule — replaying an already-synced batch is
//! always safe.

use std::sync::Arc;

use store::Store;
use wire_protocol::messages::{SyncRequest, SyncResponse};

pub const DEFAULT_BATCH_SIZE: u32 = 200;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub inserted: u64,
    pub updated: u64,
    pub skipped: u64,
    pub has_more: bool,
}

pub struct SyncCoordinator {
    store: Arc<Store>,
    dispatcher: Arc<dispatch::Dispatcher>,
    batch_size: u32,
}

impl SyncCoordinator {
    pub fn new(store: Arc<Store>, dispatcher: Arc<dispatch::Dispatcher>, batch_size: u32) -> Self {
        SyncCoordinator {
            store,
            dispatcher,
            batch_size,
        }
    }

    /// Build the request to catch up a user's whole account from its last
    /// saved cursor. `from_seq` is exclusive: the server returns messages
    /// with `seq > from_seq`.
    pub fn full_sync_request(&self, user_id: &str) -> Result<SyncRequest, store::StoreError> {
        let from_seq = self.store.load_cursor(user_id)? as u64;
        Ok(SyncRequest {
            user_id: user_id.to_string(),
            from_seq,
            batch_size: self.batch_size,
            conversation_id: None,
            to_seq: None,
        })
    }

    /// Build the request to fill a specific conversation-scoped gap, e.g.
    /// one surfaced by [`seqtrack::GapSeverity::Moderate`] or worse.
    pub fn range_sync_request(
        &self,
        user_id: &str,
        conversation_id: &str,
        min_seq: u64,
        max_seq: u64,
    ) -> SyncRequest {
        SyncRequest {
            user_id: user_id.to_string(),
            from_seq: min_seq,
            batch_size: self.batch_size,
            conversation_id: Some(conversation_id.to_string()),
            to_seq: Some(max_seq),
        }
    }

    /// Land a sync batch: persist every message through the same path a
    /// live push would use, then advance the cursor (full sync only — a
    /// range sync never moves the account-wide cursor, since it's filling a
    /// gap in one conversation, not advancing the overall stream position).
    pub fn apply_batch(
        &self,
        user_id: &str,
        request: &SyncRequest,
        response: &SyncResponse,
    ) -> Result<ApplyOutcome, dispatch::DispatchError> {
        let mut outcome = ApplyOutcome {
            has_more: response.has_more,
            ..Default::default()
        };
        for message in &response.messages {
            let before = self.store.get_message(&message.message_id)?;
            self.dispatcher.persist_inbound(message)?;
            match before {
                None => outcome.inserted += 1,
                Some(existing) if (existing.server_time, existing.seq) < (message.server_time, message.seq as i64) => {
                    outcome.updated += 1
                }
                Some(_) => outcome.skipped += 1,
            }
        }
        if request.conversation_id.is_none() {
            self.store.save_cursor(user_id, response.current_seq as i64)?;
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger::Ledger;
    use wire_protocol::messages::{MessageType, WireMessage};

    fn coordinator() -> (Arc<Store>, SyncCoordinator) {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let ledger = Ledger::new();
        let (dispatcher, _acks) = dispatch::Dispatcher::new(store.clone(), ledger);
        (
            store.clone(),
            SyncCoordinator::new(store, Arc::new(dispatcher), DEFAULT_BATCH_SIZE),
        )
    }

    fn wire_message(id: &str, seq: u64) -> WireMessage {
        WireMessage {
            message_id: id.to_string(),
            conversation_id: "conv-1".to_string(),
            sender_id: "user-b".to_string(),
            receiver_id: Some("user-a".to_string()),
            group_id: None,
            message_type: MessageType::Text,
            content: "hi".to_string(),
            client_send_time: 1000,
            server_time: seq as i64 * 10,
            seq,
        }
    }

    #[test]
    fn full_sync_request_starts_from_saved_cursor() {
        let (store, coordinator) = coordinator();
        store.save_cursor("user-a", 42).unwrap();
        let req = coordinator.full_sync_request("user-a").unwrap();
        assert_eq!(req.from_seq, 42);
        assert!(req.conversation_id.is_none());
    }

    #[test]
    fn applying_a_full_sync_batch_advances_the_cursor() {
        let (store, coordinator) = coordinator();
        let request = coordinator.full_sync_request("user-a").unwrap();
        let response = SyncResponse {
            messages: vec![wire_message("m1", 1), wire_message("m2", 2)],
            has_more: false,
            current_seq: 2,
        };
        let outcome = coordinator.apply_batch("user-a", &request, &response).unwrap();
        assert_eq!(outcome.inserted, 2);
        assert_eq!(store.load_cursor("user-a").unwrap(), 2);
    }

    #[test]
    fn range_sync_does_not_move_the_account_cursor() {
        let (store, coordinator) = coordinator();
        store.save_cursor("user-a", 5).unwrap();
        let request = coordinator.range_sync_request("user-a", "conv-1", 1, 3);
        let response = SyncResponse {
            messages: vec![wire_message("m1", 2)],
            has_more: false,
            current_seq: 2,
        };
        coordinator.apply_batch("user-a", &request, &response).unwrap();
        assert_eq!(store.load_cursor("user-a").unwrap(), 5);
    }

    #[test]
    fn replaying_an_already_synced_batch_is_idempotent() {
        let (store, coordinator) = coordinator();
        let request = coordinator.full_sync_request("user-a").unwrap();
        let response = SyncResponse {
            messages: vec![wire_message("m1", 1)],
            has_more: false,
            current_seq: 1,
        };
        coordinator.apply_batch("user-a", &request, &response).unwrap();
        let outcome = coordinator.apply_batch("user-a", &request, &response).unwrap();
        assert_eq!(outcome.skipped, 1);
        assert_eq!(store.get_messages("conv-1", None, 10).unwrap().len(), 1);
    }
}
