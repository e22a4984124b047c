//! In-memory conversation/unread ledger (L10).
//!
//! Fast accessors over conversation summaries, kept in sync with the store
//! but never hitting disk on the read path — the UI layer polls this on
//! every frame redraw. Changes are also broadcast on [`Ledger::subscribe`]
//! so listeners can react without polling.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::sync::broadcast;
use tracing::debug;

pub const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationSummary {
    pub conversation_id: String,
    pub unread_count: i64,
    pub is_muted: bool,
    pub last_message_preview: String,
    pub last_message_time: i64,
}

#[derive(Debug, Clone)]
pub enum LedgerEvent {
    UnreadChanged {
        conversation_id: String,
        unread_count: i64,
    },
    ConversationUpdated(ConversationSummary),
}

struct Inner {
    summaries: RwLock<HashMap<String, ConversationSummary>>,
    current_conversation: RwLock<Option<String>>,
    events: broadcast::Sender<LedgerEvent>,
}

/// Cheap to clone; all state is behind an `Arc`.
#[derive(Clone)]
pub struct Ledger {
    inner: Arc<Inner>,
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new()
    }
}

impl Ledger {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Ledger {
            inner: Arc::new(Inner {
                summaries: RwLock::new(HashMap::new()),
                current_conversation: RwLock::new(None),
                events,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.inner.events.subscribe()
    }

    /// The conversation currently open in the foreground UI. Incoming
    /// messages for this conversation don't bump its unread count — the
    /// user is already looking at them.
    pub fn set_current_conversation(&self, conversation_id: Option<String>) {
        *self.inner.current_conversation.write().unwrap() = conversation_id;
    }

    pub fn current_conversation(&self) -> Option<String> {
        self.inner.current_conversation.read().unwrap().clone()
    }

    pub fn load_summary(&self, summary: ConversationSummary) {
        self.inner
            .summaries
            .write()
            .unwrap()
            .insert(summary.conversation_id.clone(), summary.clone());
        let _ = self
            .inner
            .events
            .send(LedgerEvent::ConversationUpdated(summary));
    }

    /// Record an inbound message landing in `conversation_id`. Suppressed
    /// (no unread bump) if this is the currently-open conversation.
    pub fn record_incoming(
        &self,
        conversation_id: &str,
        is_muted: bool,
        preview: &str,
        time: i64,
    ) -> i64 {
        let suppressed = self.current_conversation().as_deref() == Some(conversation_id);
        let mut summaries = self.inner.summaries.write().unwrap();
        let entry = summaries
            .entry(conversation_id.to_string())
            .or_insert_with(|| ConversationSummary {
                conversation_id: conversation_id.to_string(),
                is_muted,
                ..Default::default()
            });
        entry.is_muted = is_muted;
        entry.last_message_preview = preview.to_string();
        entry.last_message_time = time;
        if !suppressed {
            entry.unread_count += 1;
        }
        let count = entry.unread_count;
        drop(summaries);
        debug!(conversation_id, suppressed, unread_count = count, "ledger: recorded incoming message");
        let _ = self.inner.events.send(LedgerEvent::UnreadChanged {
            conversation_id: conversation_id.to_string(),
            unread_count: count,
        });
        count
    }

    pub fn mark_read(&self, conversation_id: &str) {
        let mut summaries = self.inner.summaries.write().unwrap();
        if let Some(entry) = summaries.get_mut(conversation_id) {
            entry.unread_count = 0;
        }
        drop(summaries);
        debug!(conversation_id, "ledger: marked read");
        let _ = self.inner.events.send(LedgerEvent::UnreadChanged {
            conversation_id: conversation_id.to_string(),
            unread_count: 0,
        });
    }

    pub fn unread_for(&self, conversation_id: &str) -> i64 {
        self.inner
            .summaries
            .read()
            .unwrap()
            .get(conversation_id)
            .map(|s| s.unread_count)
            .unwrap_or(0)
    }

    /// Sum of unread counts across all non-muted conversations — what a
    /// launcher-icon badge or tab-bar dot would display.
    pub fn total_unread(&self) -> i64 {
        self.inner
            .summaries
            .read()
            .unwrap()
            .values()
            .filter(|s| !s.is_muted)
            .map(|s| s.unread_count)
            .sum()
    }

    pub fn snapshot(&self) -> Vec<ConversationSummary> {
        let mut v: Vec<_> = self.inner.summaries.read().unwrap().values().cloned().collect();
        v.sort_by(|a, b| b.last_message_time.cmp(&a.last_message_time));
        v
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incoming_message_bumps_unread_count() {
        let ledger = Ledger::new();
        let count = ledger.record_incoming("conv-1", false, "hi", 100);
        assert_eq!(count, 1);
        assert_eq!(ledger.unread_for("conv-1"), 1);
    }

    #[test]
    fn current_conversation_suppresses_unread_bump() {
        let ledger = Ledger::new();
        ledger.set_current_conversation(Some("conv-1".to_string()));
        let count = ledger.record_incoming("conv-1", false, "hi", 100);
        assert_eq!(count, 0);
    }

    #[test]
    fn mark_read_resets_unread_to_zero() {
        let ledger = Ledger::new();
        ledger.record_incoming("conv-1", false, "hi", 100);
        ledger.record_incoming("conv-1", false, "hi again", 101);
        assert_eq!(ledger.unread_for("conv-1"), 2);
        ledger.mark_read("conv-1");
        assert_eq!(ledger.unread_for("conv-1"), 0);
    }

    #[test]
    fn muted_conversations_are_excluded_from_total_unread() {
        let ledger = Ledger::new();
        ledger.record_incoming("conv-1", false, "hi", 100);
        ledger.record_incoming("conv-2", true, "muted convo", 100);
        assert_eq!(ledger.total_unread(), 1);
    }

    #[test]
    fn snapshot_orders_by_recency() {
        let ledger = Ledger::new();
        ledger.record_incoming("conv-1", false, "old", 10);
        ledger.record_incoming("conv-2", false, "new", 20);
        let snap = ledger.snapshot();
        assert_eq!(snap[0].conversation_id, "conv-2");
        assert_eq!(snap[1].conversation_id, "conv-1");
    }
}
