//! Broadcaster media ingestion
//!
//! The broadcaster opens a session-scoped WebSocket, negotiates its audio
//! format with an `offer`/`answer` exchange and then streams PCM. The
//! session key is checked (and the single broadcaster slot taken) before
//! the connection is upgraded.

mod adapter;
pub mod protocol;

pub use adapter::MediaIngest;
pub use protocol::{ClientMessage, ServerMessage, StreamFormat};
