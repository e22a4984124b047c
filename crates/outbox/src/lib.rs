//! Outbound message queue with ACK tracking and retry (L5).
//!
//! Every client-originated send is tracked here from the moment it's handed
//! to the transport until the server ACKs it (or it's given up on). Entries
//! survive a process restart by being persisted to the store's
//! `pending_sends` table and rebuilt into memory on [`Outbox::rebuild_from_store`].

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use tracing::{debug, warn};
use wire_protocol::Command;

#[derive(Debug, Clone)]
pub struct OutboxConfig {
    pub ack_timeout: Duration,
    pub ack_max_attempts: u32,
    pub ack_check_interval: Duration,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        OutboxConfig {
            ack_timeout: Duration::from_secs(5),
            ack_max_attempts: 3,
            ack_check_interval: Duration::from_millis(1000),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PendingEntry {
    pub client_seq: u64,
    pub message_id: String,
    pub conversation_id: String,
    pub command: Command,
    pub body: Vec<u8>,
    pub attempts: u32,
    sent_at: Instant,
}

pub enum TimeoutOutcome {
    Retry(PendingEntry),
    GivenUp(PendingEntry),
}

/// Tracks in-flight sends. Not responsible for actually writing to the
/// transport or the store — callers own both; this just decides what's due
/// and what's been ACKed.
pub struct Outbox {
    config: OutboxConfig,
    entries: HashMap<u64, PendingEntry>,
    message_ids: HashSet<String>,
}

impl Outbox {
    pub fn new(config: OutboxConfig) -> Self {
        Outbox {
            config,
            entries: HashMap::new(),
            message_ids: HashSet::new(),
        }
    }

    /// Enqueue a new send. Returns `false` without enqueueing if a send for
    /// the same `message_id` is already outstanding (de-duplication — a
    /// double-tap on "send" in the UI must not produce two wire sends).
    pub fn enqueue(
        &mut self,
        client_seq: u64,
        message_id: String,
        conversation_id: String,
        command: Command,
        body: Vec<u8>,
    ) -> bool {
        if self.message_ids.contains(&message_id) {
            debug!(%message_id, "outbox: duplicate send suppressed");
            return false;
        }
        self.message_ids.insert(message_id.clone());
        self.entries.insert(
            client_seq,
            PendingEntry {
                client_seq,
                message_id,
                conversation_id,
                command,
                body,
                attempts: 1,
                sent_at: Instant::now(),
            },
        );
        true
    }

    /// Re-insert an entry recovered from the store at startup. Does not
    /// count as a fresh send attempt; `sent_at` is set to now so the first
    /// timeout check gives the transport a chance to come up.
    pub fn rebuild_from_store(&mut self, pending: Vec<store::PendingSend>) {
        for p in pending {
            self.message_ids.insert(p.message_id.clone());
            self.entries.insert(
                p.client_seq,
                PendingEntry {
                    client_seq: p.client_seq,
                    message_id: p.message_id,
                    conversation_id: p.conversation_id,
                    command: Command::SendMsg,
                    body: p.payload,
                    attempts: p.attempts,
                    sent_at: Instant::now(),
                },
            );
        }
    }

    /// The server ACKed this send; remove it from tracking.
    pub fn on_ack(&mut self, client_seq: u64) -> Option<PendingEntry> {
        let entry = self.entries.remove(&client_seq);
        if let Some(e) = &entry {
            self.message_ids.remove(&e.message_id);
        }
        entry
    }

    /// Scan for entries whose ack_timeout has elapsed. Entries under
    /// `ack_max_attempts` are returned as [`TimeoutOutcome::Retry`] (and have
    /// their attempt counter bumped and `sent_at` reset); entries at the
    /// ceiling are returned as [`TimeoutOutcome::GivenUp`] and removed from
    /// tracking — the caller is expected to mark the message Failed in the
    /// store.
    pub fn check_timeouts(&mut self, now: Instant) -> Vec<TimeoutOutcome> {
        let mut due = Vec::new();
        for (client_seq, entry) in self.entries.iter() {
            if now.duration_since(entry.sent_at) >= self.config.ack_timeout {
                due.push(*client_seq);
            }
        }

        let mut out = Vec::with_capacity(due.len());
        for client_seq in due {
            let mut entry = self.entries.get(&client_seq).unwrap().clone();
            if entry.attempts >= self.config.ack_max_attempts {
                warn!(message_id = %entry.message_id, attempts = entry.attempts, "outbox: giving up on send");
                self.entries.remove(&client_seq);
                self.message_ids.remove(&entry.message_id);
                out.push(TimeoutOutcome::GivenUp(entry));
            } else {
                entry.attempts += 1;
                entry.sent_at = now;
                self.entries.insert(client_seq, entry.clone());
                out.push(TimeoutOutcome::Retry(entry));
            }
        }
        out
    }

    /// All outstanding entries, to be resent once a fresh connection is
    /// authenticated. Does not touch attempt counters or `sent_at` directly
    /// — resetting `sent_at` so the ack_timeout window restarts cleanly is
    /// the caller's job via [`Outbox::mark_resent`], kept separate so a
    /// flush that never actually reaches the wire doesn't silently reset
    /// timers.
    pub fn flush_for_reconnect(&self) -> Vec<PendingEntry> {
        self.entries.values().cloned().collect()
    }

    pub fn mark_resent(&mut self, client_seq: u64, now: Instant) {
        if let Some(e) = self.entries.get_mut(&client_seq) {
            e.sent_at = now;
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ack_check_interval(&self) -> Duration {
        self.config.ack_check_interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(seq: u64, msg_id: &str) -> (u64, String, String, Command, Vec<u8>) {
        (seq, msg_id.to_string(), "conv-1".to_string(), Command::SendMsg, vec![1, 2, 3])
    }

    #[test]
    fn duplicate_message_id_is_suppressed() {
        let mut ob = Outbox::new(OutboxConfig::default());
        let (seq, msg, conv, cmd, body) = sample(1, "m1");
        assert!(ob.enqueue(seq, msg.clone(), conv.clone(), cmd, body.clone()));
        assert!(!ob.enqueue(2, msg, conv, cmd, body));
        assert_eq!(ob.len(), 1);
    }

    #[test]
    fn ack_removes_entry_and_frees_dedup_slot() {
        let mut ob = Outbox::new(OutboxConfig::default());
        let (seq, msg, conv, cmd, body) = sample(1, "m1");
        ob.enqueue(seq, msg.clone(), conv.clone(), cmd, body.clone());
        assert!(ob.on_ack(1).is_some());
        assert!(ob.is_empty());
        assert!(ob.enqueue(2, msg, conv, cmd, body));
    }

    #[test]
    fn timeout_before_ceiling_produces_retry_and_bumps_attempts() {
        let config = OutboxConfig {
            ack_timeout: Duration::from_millis(0),
            ack_max_attempts: 3,
            ..OutboxConfig::default()
        };
        let mut ob = Outbox::new(config);
        let (seq, msg, conv, cmd, body) = sample(1, "m1");
        ob.enqueue(seq, msg, conv, cmd, body);
        let outcomes = ob.check_timeouts(Instant::now() + Duration::from_secs(1));
        assert_eq!(outcomes.len(), 1);
        match &outcomes[0] {
            TimeoutOutcome::Retry(e) => assert_eq!(e.attempts, 2),
            TimeoutOutcome::GivenUp(_) => panic!("expected retry"),
        }
    }

    #[test]
    fn exceeding_max_attempts_gives_up_and_removes_entry() {
        let config = OutboxConfig {
            ack_timeout: Duration::from_millis(0),
            ack_max_attempts: 1,
            ..OutboxConfig::default()
        };
        let mut ob = Outbox::new(config);
        let (seq, msg, conv, cmd, body) = sample(1, "m1");
        ob.enqueue(seq, msg, conv, cmd, body);
        let outcomes = ob.check_timeouts(Instant::now() + Duration::from_secs(1));
        assert_eq!(outcomes.len(), 1);
        assert!(matches!(outcomes[0], TimeoutOutcome::GivenUp(_)));
        assert!(ob.is_empty());
    }

    #[test]
    fn flush_for_reconnect_returns_all_without_mutating_state() {
        let mut ob = Outbox::new(OutboxConfig::default());
        let (seq, msg, conv, cmd, body) = sample(1, "m1");
        ob.enqueue(seq, msg, conv, cmd, body);
        let before = ob.entries.get(&1).unwrap().attempts;
        let flushed = ob.flush_for_reconnect();
        assert_eq!(flushed.len(), 1);
        assert_eq!(ob.entries.get(&1).unwrap().attempts, before);
    }

    #[test]
    fn rebuild_from_store_restores_dedup_tracking() {
        let mut ob = Outbox::new(OutboxConfig::default());
        ob.rebuild_from_store(vec![store::PendingSend {
            client_seq: 5,
            message_id: "m5".into(),
            conversation_id: "conv-1".into(),
            payload: vec![9],
            attempts: 2,
            created_at: 0,
        }]);
        assert_eq!(ob.len(), 1);
        assert!(!ob.enqueue(6, "m5".into(), "conv-1".into(), Command::SendMsg, vec![]));
    }
}
