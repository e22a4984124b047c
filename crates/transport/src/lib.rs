//! Polymorphic transport abstraction over framed TCP and WebSocket (L3).
//!
//! Both concrete transports expose the same shape — connect, disconnect,
//! send, subscribe — and drive the same [`state::ConnectionState`] machine,
//! so the orchestrator above never has to special-case which one is in use.
//! [`AnyTransport`] is the enum callers actually hold; it dispatches to
//! whichever concrete transport was configured.

pub mod config;
pub mod error;
pub mod state;
pub mod tcp;
pub mod ws;

pub use config::TransportConfig;
pub use error::TransportError;
pub use state::ConnectionState;

use tokio::sync::broadcast;
use wire_protocol::Command;

/// A decoded inbound frame, stripped of its wire-specific framing details
/// (CRC, magic, WS boundary) — the two transports normalize to this shape
/// before handing frames to subscribers.
#[derive(Debug, Clone)]
pub struct InboundFrame {
    pub command: Command,
    pub sequence: u32,
    pub body: Vec<u8>,
}

pub const INBOUND_CHANNEL_CAPACITY: usize = 256;

pub enum AnyTransport {
    Tcp(tcp::TcpTransport),
    Ws(ws::WsTransport),
}

impl AnyTransport {
    pub async fn connect(&mut self) -> Result<(), TransportError> {
        match self {
            AnyTransport::Tcp(t) => t.connect().await,
            AnyTransport::Ws(t) => t.connect().await,
        }
    }

    pub async fn disconnect(&mut self) {
        match self {
            AnyTransport::Tcp(t) => t.disconnect().await,
            AnyTransport::Ws(t) => t.disconnect().await,
        }
    }

    pub async fn send(
        &mut self,
        command: Command,
        sequence: u32,
        body: Vec<u8>,
    ) -> Result<(), TransportError> {
        match self {
            AnyTransport::Tcp(t) => t.send(command, sequence, body).await,
            AnyTransport::Ws(t) => t.send(command, sequence, body).await,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<InboundFrame> {
        match self {
            AnyTransport::Tcp(t) => t.subscribe(),
            AnyTransport::Ws(t) => t.subscribe(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        match self {
            AnyTransport::Tcp(t) => t.state(),
            AnyTransport::Ws(t) => t.state(),
        }
    }

    pub fn heartbeat_interval(&self) -> std::time::Duration {
        match self {
            AnyTransport::Tcp(t) => t.heartbeat_interval(),
            AnyTransport::Ws(t) => t.heartbeat_interval(),
        }
    }

    pub fn heartbeat_timeout(&self) -> std::time::Duration {
        match self {
            AnyTransport::Tcp(t) => t.heartbeat_timeout(),
            AnyTransport::Ws(t) => t.heartbeat_timeout(),
        }
    }
}
