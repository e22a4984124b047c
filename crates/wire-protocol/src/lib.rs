//! Wire framing and message types shared by every transport (L0).
//!
//! Two interchangeable frame shapes carry the same [`command::Command`] set
//! and [`messages`] bodies:
//!
//! - [`packet::Packet`]: the framed-TCP shape, magic + CRC16 guarded, used
//!   when the transport gives no inherent message boundary.
//! - [`envelope::Envelope`]: the WebSocket shape, boundary supplied by the
//!   underlying WS frame so no magic/CRC is needed.

pub mod command;
pub mod crc;
pub mod envelope;
pub mod error;
pub mod messages;
pub mod packet;

pub use command::Command;
pub use envelope::Envelope;
pub use error::FrameError;
pub use packet::{Header, Packet};
