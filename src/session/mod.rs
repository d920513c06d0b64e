//! Translation session management
//!
//! This module provides the session abstraction and everything that owns or
//! changes it:
//! - `SessionKey` and the `SessionState` machine
//! - `Session`: one session's pipeline, queues and counters
//! - `SessionRegistry`: the only structure shared between sessions
//! - `SessionController`: lifecycle operations (create, end, language
//!   changes, broadcaster attach/loss with grace window, idle eviction)

mod config;
mod key;
mod lifecycle;
mod registry;
mod session;
mod state;
mod stats;

pub use config::{Languages, PipelineSettings};
pub use key::SessionKey;
pub use lifecycle::{BroadcasterLease, SessionController};
pub use registry::SessionRegistry;
pub use session::Session;
pub use state::SessionState;
pub use stats::{CounterSnapshot, SessionCounters, SessionStats};
