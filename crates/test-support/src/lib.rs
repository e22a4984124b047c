//! Mock framed-TCP server for exercising the transport/outbox/dispatch
//! stack without a real chat server. One connection at a time: accepts,
//! hands back whatever [`Packet`]s the test script queues for a given
//! inbound command, and records everything it received so assertions can
//! inspect it afterward. [`MockServer::push`] additionally lets a test send
//! unsolicited packets (a live `push_msg`, say) outside the reply script.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use reassembler::Reassembler;
use wire_protocol::packet::DEFAULT_MAX_PACKET_SIZE;
use wire_protocol::{Command, Packet};

/// Scripted replies, keyed by the command of the inbound packet they answer
/// and consumed FIFO within that command. Keying by command (rather than
/// just "the next packet received") keeps a test's expected round trips
/// deterministic even when unrelated traffic — e.g. a delivery ACK for an
/// unsolicited push — is interleaved with the request this reply answers.
#[derive(Default)]
struct Script {
    replies: HashMap<Command, VecDeque<Vec<Packet>>>,
}

pub struct MockServer {
    pub addr: SocketAddr,
    received: Arc<Mutex<Vec<Packet>>>,
    script: Arc<Mutex<Script>>,
    push_tx: mpsc::UnboundedSender<Vec<Packet>>,
    _accept_task: JoinHandle<()>,
}

impl MockServer {
    pub async fn start() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let received = Arc::new(Mutex::new(Vec::new()));
        let script = Arc::new(Mutex::new(Script::default()));
        let (push_tx, push_rx) = mpsc::unbounded_channel();

        let received_clone = received.clone();
        let script_clone = script.clone();
        let accept_task = tokio::spawn(async move {
            if let Ok((stream, _)) = listener.accept().await {
                handle_connection(stream, received_clone, script_clone, push_rx).await;
            }
        });

        Ok(MockServer {
            addr,
            received,
            script,
            push_tx,
            _accept_task: accept_task,
        })
    }

    /// Queue the packets to send back the next time the mock server
    /// receives a packet with the given `command`.
    pub fn queue_reply_for(&self, command: Command, packets: Vec<Packet>) {
        self.script
            .lock()
            .unwrap()
            .replies
            .entry(command)
            .or_default()
            .push_back(packets);
    }

    /// Send packets to the client unprompted, independent of the
    /// request/reply script — for simulating server-initiated pushes
    /// (`push_msg`, `batch_msg`, `kick_out`) rather than request replies.
    pub fn push(&self, packets: Vec<Packet>) {
        let _ = self.push_tx.send(packets);
    }

    pub fn received(&self) -> Vec<Packet> {
        self.received.lock().unwrap().clone()
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    received: Arc<Mutex<Vec<Packet>>>,
    script: Arc<Mutex<Script>>,
    mut push_rx: mpsc::UnboundedReceiver<Vec<Packet>>,
) {
    let mut reassembler = Reassembler::default();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        tokio::select! {
            result = stream.read(&mut buf) => {
                let n = match result {
                    Ok(0) => return,
                    Ok(n) => n,
                    Err(e) => {
                        debug!(error = %e, "mock server: read failed");
                        return;
                    }
                };
                let packets = match reassembler.feed(&buf[..n]) {
                    Ok(p) => p,
                    Err(e) => {
                        debug!(error = %e, "mock server: fatal frame fault");
                        return;
                    }
                };
                for packet in packets {
                    let command = packet.command;
                    received.lock().unwrap().push(packet);
                    let reply = script
                        .lock()
                        .unwrap()
                        .replies
                        .get_mut(&command)
                        .and_then(VecDeque::pop_front);
                    if let Some(reply_packets) = reply {
                        for reply_packet in reply_packets {
                            if stream.write_all(&reply_packet.encode()).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            }
            Some(packets) = push_rx.recv() => {
                for packet in packets {
                    if stream.write_all(&packet.encode()).await.is_err() {
                        return;
                    }
                }
            }
        }
    }
}

/// A direct client for poking a [`MockServer`] (or a real server under
/// test) without going through the full transport/reconnect stack.
pub struct MockClient {
    stream: TcpStream,
    reassembler: Reassembler,
}

impl MockClient {
    pub async fn connect(addr: SocketAddr) -> std::io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        Ok(MockClient {
            stream,
            reassembler: Reassembler::new(DEFAULT_MAX_PACKET_SIZE, reassembler::DEFAULT_MAX_BUFFER_SIZE),
        })
    }

    pub async fn send(&mut self, packet: &Packet) -> std::io::Result<()> {
        self.stream.write_all(&packet.encode()).await
    }

    pub async fn recv_one(&mut self) -> std::io::Result<Packet> {
        let mut buf = [0u8; 4096];
        loop {
            let n = self.stream.read(&mut buf).await?;
            if n == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "mock client: connection closed",
                ));
            }
            if let Ok(packets) = self.reassembler.feed(&buf[..n]) {
                if let Some(p) = packets.into_iter().next() {
                    return Ok(p);
                }
            }
        }
    }
}
