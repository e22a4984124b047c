//! Session orchestrator (L9): the single object an application embeds.
//! Wires the transport, outbox, dispatcher, sync coordinator, and ledger
//! together behind `initialize`/`login`/`logout`/`send_message`/
//! `revoke_message`/`mark_read`/`get_messages` and listener registration.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::Utc;
use tokio::sync::{broadcast, Mutex as AsyncMutex, Notify};
use tokio::time::interval;
use tracing::{info, warn};
use uuid::Uuid;

use dispatch::{DispatchEvent, Dispatcher};
use ledger::Ledger;
use outbox::{Outbox, OutboxConfig, TimeoutOutcome};
use reconnect::ReconnectController;
use seqtrack::{GapSeverity, GapThresholds, SequenceTracker};
use store::{MessageRow, Store};
use transport::AnyTransport;
use wire_protocol::messages::{
    self, AuthRequest, AuthResponse, HeartbeatReq, MessageType, ReadReceiptRequest, RevokeRequest,
    RevokeResponse, SendMsgRequest, WireMessage,
};
use wire_protocol::Command;

use crate::config::Config;
use crate::error::{Error, Result};

/// Connection-lifecycle events surfaced to the embedding application. These
/// are distinct from [`DispatchEvent`], which carries chat content.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    Connected,
    Reconnecting { attempt: u32 },
    MaxReconnectAttemptsReached { attempts: u32 },
    AuthFailed(String),
}

const CONNECTION_EVENT_CHANNEL_CAPACITY: usize = 64;

pub struct Session {
    config: Config,
    store: Arc<Store>,
    ledger: Ledger,
    dispatcher: Arc<Dispatcher>,
    transport: AsyncMutex<Option<AnyTransport>>,
    outbox: Mutex<Outbox>,
    reconnect: Mutex<ReconnectController>,
    seq_tracker: Mutex<SequenceTracker>,
    user_id: Mutex<Option<String>>,
    token: Mutex<Option<String>>,
    connection_events: broadcast::Sender<ConnectionEvent>,
    shutting_down: AtomicBool,
    next_client_seq: AtomicU64,
    heartbeat_rsp: Notify,
    /// Bumped on every successful `connect_and_resume`; the heartbeat loop
    /// started by an earlier connection reads its own snapshot and exits
    /// once a newer connection has taken over, instead of fighting it.
    connection_epoch: AtomicU64,
}

impl Session {
    /// Open the local store and wire the in-process components together.
    /// Does not touch the network — call [`Session::login`] for that.
    pub fn new(config: Config) -> Result<Arc<Self>> {
        let store = Arc::new(Store::open(&config.db_path)?);
        let ledger = Ledger::new();
        let (dispatcher, ack_rx) = Dispatcher::new(store.clone(), ledger.clone());
        let dispatcher = Arc::new(dispatcher);

        let outbox_config = OutboxConfig {
            ack_timeout: config.ack_timeout,
            ack_max_attempts: config.ack_max_attempts,
            ..OutboxConfig::default()
        };
        let reconnect = ReconnectController::new(config.backoff);
        let gap_thresholds = GapThresholds {
            max_sequence_gap: config.max_sequence_gap,
            ..GapThresholds::default()
        };
        let (connection_events, _) = broadcast::channel(CONNECTION_EVENT_CHANNEL_CAPACITY);

        let session = Arc::new(Session {
            config,
            store,
            ledger,
            dispatcher,
            transport: AsyncMutex::new(None),
            outbox: Mutex::new(Outbox::new(outbox_config)),
            reconnect: Mutex::new(reconnect),
            seq_tracker: Mutex::new(SequenceTracker::new(gap_thresholds)),
            user_id: Mutex::new(None),
            token: Mutex::new(None),
            connection_events,
            shutting_down: AtomicBool::new(false),
            next_client_seq: AtomicU64::new(1),
            heartbeat_rsp: Notify::new(),
            connection_epoch: AtomicU64::new(0),
        });

        session.rebuild_outbox_from_store();
        session.spawn_ack_forwarder(ack_rx);
        session.spawn_outbox_timeout_loop();
        Ok(session)
    }

    fn rebuild_outbox_from_store(self: &Arc<Self>) {
        match self.store.list_pending() {
            Ok(pending) => self.outbox.lock().unwrap().rebuild_from_store(pending),
            Err(e) => warn!(error = %e, "session: failed to rebuild outbox from store"),
        }
    }

    /// The dispatcher emits ACKs it wants sent; forward them onto whatever
    /// transport is currently connected.
    fn spawn_ack_forwarder(
        self: &Arc<Self>,
        mut ack_rx: tokio::sync::mpsc::UnboundedReceiver<dispatch::OutgoingAck>,
    ) {
        let this = self.clone();
        tokio::spawn(async move {
            while let Some(ack) = ack_rx.recv().await {
                // Best-effort: a failed ACK send will be implicitly retried
                // since the server re-delivers unacked pushes.
                let _ = this.send_raw(ack.command, ack.sequence, ack.body).await;
            }
        });
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<DispatchEvent> {
        self.dispatcher.subscribe()
    }

    pub fn subscribe_connection_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.connection_events.subscribe()
    }

    pub fn set_current_conversation(&self, conversation_id: Option<String>) {
        self.ledger.set_current_conversation(conversation_id);
    }

    /// Connect, authenticate, flush any pending sends, and catch up via
    /// full sync from the last saved cursor. Subsequent drops are recovered
    /// automatically by the reconnect loop without a fresh call to `login`.
    pub async fn login(self: &Arc<Self>, user_id: &str, token: &str) -> Result<()> {
        *self.user_id.lock().unwrap() = Some(user_id.to_string());
        *self.token.lock().unwrap() = Some(token.to_string());
        self.shutting_down.store(false, Ordering::SeqCst);
        self.connect_and_resume(user_id, token).await?;
        info!(user_id, "session: login complete");
        Ok(())
    }

    /// Connect, authenticate, and catch up — shared between the initial
    /// `login` call and every automatic reconnect attempt.
    async fn connect_and_resume(self: &Arc<Self>, user_id: &str, token: &str) -> Result<()> {
        let mut transport = self.build_transport()?;
        transport.connect().await?;

        let auth = AuthRequest {
            user_id: user_id.to_string(),
            token: token.to_string(),
        };
        let body = messages::encode_body(&auth)
            .map_err(|e| Error::Config(format!("failed to encode auth request: {e}")))?;
        transport.send(Command::AuthReq, 0, body).await?;

        let mut inbound = transport.subscribe();
        let resp = tokio::time::timeout(self.config.transport.connect_timeout, inbound.recv())
            .await
            .map_err(|_| Error::NotConnected)?
            .map_err(|_| Error::NotConnected)?;
        let auth_response: AuthResponse = messages::decode_body(&resp.body)
            .map_err(|e| Error::AuthFailed(e.to_string()))?;
        if !auth_response.ok {
            let reason = auth_response.error.unwrap_or_else(|| "rejected".to_string());
            let _ = self
                .connection_events
                .send(ConnectionEvent::AuthFailed(reason.clone()));
            return Err(Error::AuthFailed(reason));
        }

        match &mut transport {
            AnyTransport::Tcp(t) => t.mark_authenticated(),
            AnyTransport::Ws(t) => t.mark_authenticated(),
        }
        self.reconnect.lock().unwrap().on_connected();
        self.seq_tracker.lock().unwrap().reset();
        let heartbeat_interval = transport.heartbeat_interval();
        let heartbeat_timeout = transport.heartbeat_timeout();
        *self.transport.lock().await = Some(transport);

        let epoch = self.connection_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.spawn_inbound_loop(inbound);
        self.spawn_heartbeat_loop(epoch, heartbeat_interval, heartbeat_timeout);
        let _ = self.connection_events.send(ConnectionEvent::Connected);
        self.flush_pending_sends().await;
        self.full_sync().await?;
        Ok(())
    }

    /// Periodically sends `HeartbeatReq` and waits for the matching
    /// `HeartbeatRsp`. A response that never arrives within
    /// `heartbeat_timeout` means the socket is black-holed (scenario
    /// S2) even though the TCP/WS layer hasn't noticed yet — disconnect
    /// and let the usual reconnect loop take over. Exits quietly once a
    /// later connection has replaced this one.
    fn spawn_heartbeat_loop(
        self: &Arc<Self>,
        epoch: u64,
        heartbeat_interval: std::time::Duration,
        heartbeat_timeout: std::time::Duration,
    ) {
        let this = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval(heartbeat_interval);
            loop {
                ticker.tick().await;
                if this.connection_epoch.load(Ordering::SeqCst) != epoch {
                    return;
                }
                let req = HeartbeatReq {
                    client_time: now_millis(),
                };
                let body = match messages::encode_body(&req) {
                    Ok(b) => b,
                    Err(e) => {
                        warn!(error = %e, "session: failed to encode heartbeat request");
                        continue;
                    }
                };
                if this.send_raw(Command::HeartbeatReq, 0, body).await.is_err() {
                    continue;
                }
                let waited = tokio::time::timeout(heartbeat_timeout, this.heartbeat_rsp.notified()).await;
                if this.connection_epoch.load(Ordering::SeqCst) != epoch {
                    return;
                }
                if waited.is_err() {
                    warn!("session: heartbeat timed out, disconnecting");
                    let mut guard = this.transport.lock().await;
                    if let Some(mut t) = guard.take() {
                        t.disconnect().await;
                    }
                    drop(guard);
                    if !this.shutting_down.load(Ordering::SeqCst) {
                        this.spawn_reconnect_loop();
                    }
                    return;
                }
            }
        });
    }

    /// Entered when the inbound loop observes the transport's broadcast
    /// channel close — the reader task hit a fatal fault (CRC error,
    /// oversized frame, heartbeat timeout, socket error) and tore the
    /// connection down. Retries with the configured backoff until either a
    /// connection succeeds or `max_attempts` is exhausted, honoring
    /// `auto_reconnect`.
    fn spawn_reconnect_loop(self: &Arc<Self>) {
        if !self.config.auto_reconnect {
            return;
        }
        if !self.reconnect.lock().unwrap().trigger() {
            return;
        }
        let this = self.clone();
        tokio::spawn(async move {
            *this.transport.lock().await = None;
            let (Some(user_id), Some(token)) = (
                this.user_id.lock().unwrap().clone(),
                this.token.lock().unwrap().clone(),
            ) else {
                return;
            };
            loop {
                let delay = match this.reconnect.lock().unwrap().next_delay() {
                    Ok(d) => d,
                    Err(e) => {
                        warn!(attempts = e.attempts, "session: reconnect attempts exhausted");
                        let _ = this.connection_events.send(
                            ConnectionEvent::MaxReconnectAttemptsReached { attempts: e.attempts },
                        );
                        return;
                    }
                };
                let attempt = this.reconnect.lock().unwrap().attempts();
                let _ = this
                    .connection_events
                    .send(ConnectionEvent::Reconnecting { attempt });
                tokio::time::sleep(delay).await;
                match this.connect_and_resume(&user_id, &token).await {
                    Ok(()) => return,
                    Err(e) => warn!(error = %e, attempt, "session: reconnect attempt failed"),
                }
            }
        });
    }

    fn build_transport(&self) -> Result<AnyTransport> {
        if self.config.use_websocket {
            Ok(AnyTransport::Ws(transport::ws::WsTransport::new(
                self.config.server_addr.clone(),
                self.config.transport.clone(),
            )))
        } else {
            let addr: SocketAddr = self
                .config
                .server_addr
                .parse()
                .map_err(|e| Error::Config(format!("invalid server_addr: {e}")))?;
            Ok(AnyTransport::Tcp(transport::tcp::TcpTransport::new(
                addr,
                self.config.transport.clone(),
            )))
        }
    }

    fn spawn_inbound_loop(
        self: &Arc<Self>,
        mut inbound: broadcast::Receiver<transport::InboundFrame>,
    ) {
        let this = self.clone();
        tokio::spawn(async move {
            loop {
                match inbound.recv().await {
                    Ok(frame) => {
                        if frame.command == Command::MsgAck {
                            this.handle_ack(&frame.body);
                            continue;
                        }
                        if frame.command == Command::HeartbeatRsp {
                            this.heartbeat_rsp.notify_one();
                            continue;
                        }
                        if matches!(frame.command, Command::PushMsg | Command::BatchMsg) {
                            this.observe_inbound_sequence(frame.sequence);
                        }
                        if let Err(e) =
                            this.dispatcher.handle_frame(frame.command, frame.sequence, &frame.body)
                        {
                            warn!(error = %e, "session: dispatch failed for inbound frame");
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "session: inbound receiver lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        if !this.shutting_down.load(Ordering::SeqCst) {
                            this.spawn_reconnect_loop();
                        }
                        return;
                    }
                }
            }
        });
    }

    /// Feed a server-assigned sequence number from the push stream into the
    /// per-direction gap tracker. A debounced Moderate/Severe gap kicks off a
    /// full resync from the last saved cursor rather than trusting the push
    /// stream to have delivered everything in order.
    fn observe_inbound_sequence(self: &Arc<Self>, sequence: u32) {
        let severity = self.seq_tracker.lock().unwrap().observe(sequence);
        if matches!(severity, GapSeverity::None | GapSeverity::Minor) {
            return;
        }
        let should_signal = self
            .seq_tracker
            .lock()
            .unwrap()
            .should_signal(severity, Instant::now());
        if !should_signal {
            return;
        }
        warn!(?severity, sequence, "session: sequence gap detected, triggering resync");
        let this = self.clone();
        tokio::spawn(async move {
            if let Err(e) = this.full_sync().await {
                warn!(error = %e, "session: gap-triggered resync failed");
            }
        });
    }

    fn handle_ack(&self, body: &[u8]) {
        let Ok(ack) = messages::decode_body::<messages::MsgAck>(body) else {
            return;
        };
        let removed = {
            let mut outbox = self.outbox.lock().unwrap();
            let client_seq = outbox
                .flush_for_reconnect()
                .into_iter()
                .find(|e| e.message_id == ack.message_id)
                .map(|e| e.client_seq);
            client_seq.and_then(|seq| outbox.on_ack(seq))
        };
        if let Some(entry) = removed {
            if let Err(e) = self.store.remove_pending(entry.client_seq) {
                warn!(error = %e, "session: failed to clear acked pending send from store");
            }
            if let Ok(Some(mut row)) = self.store.get_message(&entry.message_id) {
                row.status = "delivered".to_string();
                let _ = self.store.upsert_message(&row);
            }
        }
    }

    fn spawn_outbox_timeout_loop(self: &Arc<Self>) {
        let this = self.clone();
        let check_interval = this.outbox.lock().unwrap().ack_check_interval();
        tokio::spawn(async move {
            let mut ticker = interval(check_interval);
            loop {
                ticker.tick().await;
                let outcomes = this.outbox.lock().unwrap().check_timeouts(Instant::now());
                for outcome in outcomes {
                    match outcome {
                        TimeoutOutcome::Retry(entry) => {
                            let _ = this.send_raw(entry.command, entry.client_seq as u32, entry.body).await;
                        }
                        TimeoutOutcome::GivenUp(entry) => {
                            if let Ok(Some(mut row)) = this.store.get_message(&entry.message_id) {
                                row.status = "failed".to_string();
                                let _ = this.store.upsert_message(&row);
                            }
                            let _ = this.store.remove_pending(entry.client_seq);
                        }
                    }
                }
            }
        });
    }

    async fn flush_pending_sends(self: &Arc<Self>) {
        let entries = self.outbox.lock().unwrap().flush_for_reconnect();
        for entry in entries {
            let _ = self.send_raw(entry.command, entry.client_seq as u32, entry.body).await;
        }
    }

    async fn send_raw(&self, command: Command, sequence: u32, body: Vec<u8>) -> Result<()> {
        let mut guard = self.transport.lock().await;
        let transport = guard.as_mut().ok_or(Error::NotConnected)?;
        transport.send(command, sequence, body).await?;
        Ok(())
    }

    pub async fn logout(&self) -> Result<()> {
        self.shutting_down.store(true, Ordering::SeqCst);
        *self.user_id.lock().unwrap() = None;
        *self.token.lock().unwrap() = None;
        let mut guard = self.transport.lock().await;
        if let Some(mut t) = guard.take() {
            t.disconnect().await;
        }
        Ok(())
    }

    /// Queue a new outgoing message. Enqueues into both the in-memory
    /// outbox and the store's pending-sends table (so it survives a
    /// restart before being ACKed), then sends immediately if connected.
    pub async fn send_message(
        self: &Arc<Self>,
        conversation_id: &str,
        receiver_id: Option<&str>,
        group_id: Option<&str>,
        message_type: MessageType,
        content: &str,
    ) -> Result<String> {
        let user_id = self
            .user_id
            .lock()
            .unwrap()
            .clone()
            .ok_or(Error::NotConnected)?;
        let message_id = Uuid::new_v4().to_string();
        let client_seq = self.next_client_seq.fetch_add(1, Ordering::SeqCst);
        let now_ms = now_millis();

        let wire_message = WireMessage {
            message_id: message_id.clone(),
            conversation_id: conversation_id.to_string(),
            sender_id: user_id,
            receiver_id: receiver_id.map(str::to_string),
            group_id: group_id.map(str::to_string),
            message_type,
            content: content.to_string(),
            client_send_time: now_ms,
            server_time: 0,
            seq: 0,
        };

        let row = MessageRow {
            message_id: message_id.clone(),
            conversation_id: conversation_id.to_string(),
            sender_id: wire_message.sender_id.clone(),
            receiver_id: wire_message.receiver_id.clone(),
            group_id: wire_message.group_id.clone(),
            message_type: format!("{message_type:?}").to_lowercase(),
            content: content.to_string(),
            direction: "send".to_string(),
            status: "sending".to_string(),
            client_send_time: now_ms,
            server_time: 0,
            seq: 0,
            created_at: now_ms,
            is_read: false,
            is_deleted: false,
            is_revoked: false,
            revoked_by: None,
            revoked_time: 0,
            read_by: Vec::new(),
            read_time: 0,
        };
        self.store.upsert_message(&row)?;
        self.upsert_conversation_for_send(&row)?;

        let request = SendMsgRequest {
            message: wire_message,
            client_seq,
        };
        let body = messages::encode_body(&request)
            .map_err(|e| Error::Config(format!("failed to encode send request: {e}")))?;

        self.store.insert_pending(&store::PendingSend {
            client_seq,
            message_id: message_id.clone(),
            conversation_id: conversation_id.to_string(),
            payload: body.clone(),
            attempts: 1,
            created_at: now_ms,
        })?;

        let enqueued = self.outbox.lock().unwrap().enqueue(
            client_seq,
            message_id.clone(),
            conversation_id.to_string(),
            Command::SendMsg,
            body.clone(),
        );
        if enqueued {
            let _ = self.send_raw(Command::SendMsg, client_seq as u32, body).await;
        }
        Ok(message_id)
    }

    /// Revoke a previously-sent message. Only the original sender may
    /// revoke, and only within `config.revoke_window` of the original send.
    /// Waits for the server's `RevokeRsp` and, on success, updates the
    /// local row in place before returning.
    pub async fn revoke_message(self: &Arc<Self>, message_id: &str) -> Result<()> {
        let user_id = self.user_id.lock().unwrap().clone().ok_or(Error::NotConnected)?;
        let row = self
            .store
            .get_message(message_id)?
            .ok_or_else(|| Error::MessageNotFound(message_id.to_string()))?;

        if row.sender_id != user_id {
            return Err(Error::RevokePermissionDenied);
        }
        let elapsed = now_millis() - row.client_send_time;
        if elapsed > self.config.revoke_window.as_millis() as i64 {
            return Err(Error::RevokeWindowExpired {
                window_secs: self.config.revoke_window.as_secs(),
            });
        }

        let request = RevokeRequest {
            message_id: message_id.to_string(),
            operator_id: user_id.clone(),
        };
        let body = messages::encode_body(&request)
            .map_err(|e| Error::Config(format!("failed to encode revoke request: {e}")))?;

        let mut inbound = {
            let guard = self.transport.lock().await;
            guard.as_ref().ok_or(Error::NotConnected)?.subscribe()
        };
        self.send_raw(Command::RevokeReq, 0, body).await?;

        let response: RevokeResponse = loop {
            let frame = tokio::time::timeout(self.config.transport.connect_timeout, inbound.recv())
                .await
                .map_err(|_| Error::NotConnected)?
                .map_err(|_| Error::NotConnected)?;
            if frame.command != Command::RevokeRsp {
                continue;
            }
            break messages::decode_body(&frame.body)
                .map_err(|e| Error::Config(format!("malformed revoke response: {e}")))?;
        };

        if response.message_id != message_id {
            return Err(Error::Config("revoke response for wrong message".to_string()));
        }
        if !response.ok {
            return Err(Error::RevokeRejected(
                response.error.unwrap_or_else(|| "rejected".to_string()),
            ));
        }

        let mut updated = row;
        updated.is_revoked = true;
        updated.revoked_by = Some(user_id);
        updated.revoked_time = now_millis();
        updated.content.clear();
        updated.status = "revoked".to_string();
        self.store.upsert_message(&updated)?;
        Ok(())
    }

    pub async fn mark_read(&self, conversation_id: &str, message_ids: Vec<String>) -> Result<()> {
        self.ledger.mark_read(conversation_id);
        let read_time = now_millis();
        for message_id in &message_ids {
            if let Ok(Some(mut row)) = self.store.get_message(message_id) {
                row.is_read = true;
                row.read_time = read_time;
                let _ = self.store.upsert_message(&row);
            }
        }
        let request = ReadReceiptRequest {
            conversation_id: conversation_id.to_string(),
            message_ids,
        };
        let body = messages::encode_body(&request)
            .map_err(|e| Error::Config(format!("failed to encode read receipt: {e}")))?;
        self.send_raw(Command::ReadReceiptReq, 0, body).await
    }

    fn upsert_conversation_for_send(&self, row: &MessageRow) -> Result<()> {
        let existing = self.store.get_conversation(&row.conversation_id)?;
        let mut conversation = existing.unwrap_or_default();
        conversation.conversation_id = row.conversation_id.clone();
        conversation.is_group = row.group_id.is_some();
        conversation.peer_id = if conversation.is_group {
            row.group_id.clone()
        } else {
            row.receiver_id.clone()
        };
        conversation.last_message_id = Some(row.message_id.clone());
        conversation.last_message_time = row.server_time.max(row.client_send_time);
        self.store.upsert_conversation(&conversation)?;
        Ok(())
    }

    pub fn get_messages(
        &self,
        conversation_id: &str,
        before_seq: Option<i64>,
        limit: u32,
    ) -> Result<Vec<MessageRow>> {
        Ok(self.store.get_messages(conversation_id, before_seq, limit)?)
    }

    async fn full_sync(self: &Arc<Self>) -> Result<()> {
        let user_id = self.user_id.lock().unwrap().clone().ok_or(Error::NotConnected)?;
        let coordinator = resync::SyncCoordinator::new(
            self.store.clone(),
            self.dispatcher.clone(),
            self.config.sync_batch_size,
        );
        let request = coordinator.full_sync_request(&user_id)?;
        let body = messages::encode_body(&request)
            .map_err(|e| Error::Config(format!("failed to encode sync request: {e}")))?;

        let mut inbound = {
            let guard = self.transport.lock().await;
            guard.as_ref().ok_or(Error::NotConnected)?.subscribe()
        };
        self.send_raw(Command::SyncReq, 0, body).await?;

        loop {
            let frame = tokio::time::timeout(self.config.transport.connect_timeout, inbound.recv())
                .await
                .map_err(|_| Error::NotConnected)?
                .map_err(|_| Error::NotConnected)?;
            if frame.command != Command::SyncRsp {
                continue;
            }
            let response: messages::SyncResponse = messages::decode_body(&frame.body)
                .map_err(|e| Error::Config(format!("malformed sync response: {e}")))?;
            let has_more = response.has_more;
            coordinator.apply_batch(&user_id, &request, &response)?;
            if !has_more {
                return Ok(());
            }
        }
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
