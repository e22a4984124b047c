//! Framed-TCP transport: raw `TcpStream`, length-prefixed+CRC framing via
//! [`wire_protocol::Packet`], reassembled with [`reassembler::Reassembler`].

use std::net::SocketAddr;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, Mutex};
use tokio::time::timeout;
use tracing::{debug, warn};

use reassembler::Reassembler;
use wire_protocol::{Command, Packet};

use crate::config::TransportConfig;
use crate::error::TransportError;
use crate::state::ConnectionState;
use crate::{InboundFrame, INBOUND_CHANNEL_CAPACITY};

pub struct TcpTransport {
    addr: SocketAddr,
    config: TransportConfig,
    state: ConnectionState,
    writer: Option<Arc<Mutex<TcpStream>>>,
    // `None` whenever no reader task is alive. Holding the transport's own
    // clone behind this cell (rather than as a bare `Sender` field) lets the
    // reader task drop it the moment it faults, so the broadcast channel's
    // last sender actually goes away and `subscribe()`rs see `Closed`.
    inbound_tx: Arc<StdMutex<Option<broadcast::Sender<InboundFrame>>>>,
}

impl TcpTransport {
    pub fn new(addr: SocketAddr, config: TransportConfig) -> Self {
        TcpTransport {
            addr,
            config,
            state: ConnectionState::Disconnected,
            writer: None,
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
        let stream = timeout(self.config.connect_timeout, TcpStream::connect(self.addr))
            .await
            .map_err(|_| TransportError::ConnectTimeout)??;
        stream.set_nodelay(true).ok();

        self.state = ConnectionState::Authenticating;
        // The caller drives the auth handshake over `send`; once it observes
        // an AuthResponse on the inbound stream it calls `mark_authenticated`.
        let (tx, _) = broadcast::channel(INBOUND_CHANNEL_CAPACITY);
        *self.inbound_tx.lock().unwrap() = Some(tx.clone());
        let shared = Arc::new(Mutex::new(stream));
        self.writer = Some(shared.clone());
        self.spawn_reader(shared, tx);
        Ok(())
    }

    /// Called by the orchestrator once AuthResponse{ok: true} is observed.
    pub fn mark_authenticated(&mut self) {
        self.state = ConnectionState::Connected;
    }

    pub async fn disconnect(&mut self) {
        self.state = ConnectionState::Disconnecting;
        if let Some(stream) = self.writer.take() {
            let mut guard = stream.lock().await;
            let _ = guard.shutdown().await;
        }
        self.state = ConnectionState::Disconnected;
    }

    pub async fn send(
        &mut self,
        command: Command,
        sequence: u32,
        body: Vec<u8>,
    ) -> Result<(), TransportError> {
        let stream = self.writer.as_ref().ok_or(TransportError::NotConnected)?;
        let packet = Packet::new(command, sequence, body);
        let bytes = packet.encode();
        let mut guard = stream.lock().await;
        guard.write_all(&bytes).await?;
        Ok(())
    }

    fn spawn_reader(&self, stream: Arc<Mutex<TcpStream>>, inbound_tx: broadcast::Sender<InboundFrame>) {
        let inbound_tx_cell = self.inbound_tx.clone();
        let max_packet_size = self.config.max_packet_size;
        tokio::spawn(async move {
            read_loop(stream, inbound_tx, max_packet_size).await;
            // The read loop's own sender clone just dropped; drop the
            // transport's clone too so the channel actually closes.
            *inbound_tx_cell.lock().unwrap() = None;
        });
    }

    pub fn heartbeat_interval(&self) -> Duration {
        self.config.heartbeat_interval
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        self.config.heartbeat_timeout
    }
}

async fn read_loop(
    stream: Arc<Mutex<TcpStream>>,
    inbound_tx: broadcast::Sender<InboundFrame>,
    max_packet_size: usize,
) {
    let mut reassembler = Reassembler::new(max_packet_size, reassembler::DEFAULT_MAX_BUFFER_SIZE);
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = {
            let mut guard = stream.lock().await;
            match guard.read(&mut buf).await {
                Ok(0) => {
                    debug!("tcp transport: peer closed connection");
                    return;
                }
                Ok(n) => n,
                Err(e) => {
                    warn!(error = %e, "tcp transport: read failed");
                    return;
                }
            }
        };
        match reassembler.feed(&buf[..n]) {
            Ok(packets) => {
                for p in packets {
                    let _ = inbound_tx.send(InboundFrame {
                        command: p.command,
                        sequence: p.sequence,
                        body: p.body,
                    });
                }
            }
            Err(e) => {
                warn!(error = %e, "tcp transport: fatal frame fault, closing");
                return;
            }
        }
    }
}
