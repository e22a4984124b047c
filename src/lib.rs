//! Transport and messaging engine for a mobile IM client SDK: framing,
//! liveness/reconnect, ACK-tracked delivery, sequence-gap sync, and
//! WAL-backed local storage.
//!
//! [`session::Session`] is the single object an embedding application
//! constructs; everything else in this workspace (`wire-protocol`,
//! `reassembler`, `seqtrack`, `reconnect`, `transport`, `store`, `outbox`,
//! `dispatch`, `resync`, `ledger`) is wired together behind it.

pub mod config;
pub mod error;
pub mod session;

pub use config::Config;
pub use error::{Error, Result};
pub use session::{ConnectionEvent, Session};

pub use dispatch::DispatchEvent;
pub use ledger::ConversationSummary;
pub use store::MessageRow;
pub use wire_protocol::messages::MessageType;

/// Install a `tracing` subscriber reading its filter from `RUST_LOG`,
/// defaulting to `info` when unset. Applications embedding this SDK are
/// free to install their own subscriber instead; this is a convenience for
/// the common case (and for the test suite).
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init();
}
