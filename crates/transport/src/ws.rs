//! WebSocket transport: `tokio-tungstenite` binary frames carrying
//! [`wire_protocol::Envelope`] (no magic/CRC — the WS frame already supplies
//! the boundary and TLS/WS supply integrity).

use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures_util::{SinkExt, Stream, StreamExt};
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use wire_protocol::{Command, Envelope};

use crate::config::TransportConfig;
use crate::error::TransportError;
use crate::state::ConnectionState;
use crate::{InboundFrame, INBOUND_CHANNEL_CAPACITY};

pub struct WsTransport {
    url: String,
    config: TransportConfig,
    state: ConnectionState,
    outbound_tx: Option<mpsc::UnboundedSender<Message>>,
    // `None` whenever no reader task is alive, so its clone dropping on
    // fault is what actually closes the channel for every subscriber.
    inbound_tx: Arc<StdMutex<Option<broadcast::Sender<InboundFrame>>>>,
}

impl WsTransport {
    pub fn new(url: String, config: TransportConfig) -> Self {
        WsTransport {
            url,
            config,
            state: ConnectionState::Disconnected,
            outbound_tx: None,
            inbound_tx: Arc::new(StdMutex::new(None)),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// A receiver on the current connection's inbound channel, or one that
    /// is already closed if nothing is connected right now.
    pub fn subscribe(&self) -> broadcast::Receiver<InboundFrame> {
        match self.inbound_tx.lock().unwrap().as_ref() {
            Some(tx) => tx.subscribe(),
            None => broadcast::channel(1).1,
        }
    }

    pub async fn connect(&mut self) -> Result<(), TransportError> {
        self.state = ConnectionState::Connecting;
        let (ws_stream, _response) = timeout(
            self.config.connect_timeout,
            tokio_tungstenite::connect_async(&self.url),
        )
        .await
        .map_err(|_| TransportError::ConnectTimeout)??;

        self.state = ConnectionState::Authenticating;
        let (mut write, mut read) = ws_stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
        self.outbound_tx = Some(outbound_tx);

        tokio::spawn(async move {
            while let Some(msg) = outbound_rx.recv().await {
                if write.send(msg).await.is_err() {
                    break;
                }
            }
        });

        let (inbound_tx, _) = broadcast::channel(INBOUND_CHANNEL_CAPACITY);
        *self.inbound_tx.lock().unwrap() = Some(inbound_tx.clone());
        let inbound_tx_cell = self.inbound_tx.clone();
        let max_packet_size = self.config.max_packet_size;
        tokio::spawn(async move {
            read_loop(read, inbound_tx, max_packet_size).await;
            // The read loop's own sender clone just dropped; drop the
            // transport's clone too so the channel actually closes.
            *inbound_tx_cell.lock().unwrap() = None;
        });

        Ok(())
    }

    pub fn mark_authenticated(&mut self) {
        self.state = ConnectionState::Connected;
    }

    pub async fn disconnect(&mut self) {
        self.state = ConnectionState::Disconnecting;
        if let Some(tx) = self.outbound_tx.take() {
            let _ = tx.send(Message::Close(None));
        }
        self.state = ConnectionState::Disconnected;
    }

    pub async fn send(
        &mut self,
        command: Command,
        sequence: u32,
        body: Vec<u8>,
    ) -> Result<(), TransportError> {
        let tx = self.outbound_tx.as_ref().ok_or(TransportError::NotConnected)?;
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        let envelope = Envelope::new(command, sequence, timestamp, body);
        tx.send(Message::Binary(envelope.encode()))
            .map_err(|_| TransportError::NotConnected)?;
        Ok(())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        self.config.heartbeat_interval
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        self.config.heartbeat_timeout
    }
}

async fn read_loop<S>(mut read: S, inbound_tx: broadcast::Sender<InboundFrame>, max_packet_size: usize)
where
    S: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    while let Some(next) = read.next().await {
        match next {
            Ok(Message::Binary(bytes)) => match Envelope::decode(&bytes, max_packet_size) {
                Ok(env) => {
                    let _ = inbound_tx.send(InboundFrame {
                        command: env.command,
                        sequence: env.sequence,
                        body: env.body,
                    });
                }
                Err(e) => {
                    warn!(error = %e, "ws transport: fatal envelope fault, closing");
                    return;
                }
            },
            Ok(Message::Close(_)) => {
                debug!("ws transport: peer sent close frame");
                return;
            }
            Ok(_) => continue,
            Err(e) => {
                warn!(error = %e, "ws transport: read failed");
                return;
            }
        }
    }
}
