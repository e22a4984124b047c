use thiserror::Error;
use wire_protocol::FrameError;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("websocket error: {0}")]
    Ws(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("frame decode fault: {0}")]
    Frame(#[from] FrameError),
    #[error("reassembler fault: {0}")]
    Reassembler(#[from] reassembler::ReassemblerError),
    #[error("connect attempt timed out")]
    ConnectTimeout,
    #[error("heartbeat timed out, peer presumed dead")]
    HeartbeatTimeout,
    #[error("authentication rejected: {0}")]
    AuthRejected(String),
    #[error("send attempted while not connected")]
    NotConnected,
    #[error("connection closed by peer")]
    ClosedByPeer,
}
