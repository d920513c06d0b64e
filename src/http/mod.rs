//! HTTP API server: session control plus the media and viewer WebSockets
//!
//! - POST /sessions - Create a session
//! - GET /sessions - List live sessions
//! - GET /sessions/:key - Session status and counters
//! - POST /sessions/:key/end - End a session
//! - PATCH /sessions/:key/languages - Change languages
//! - GET /sessions/:key/media - Broadcaster media channel (WebSocket)
//! - GET /ws?session=:key - Viewer subscription (WebSocket)
//! - GET /health, GET /api - Health check and service banner

mod handlers;
mod routes;
mod state;
mod ws;

pub use handlers::{CreateSessionRequest, ErrorResponse, UpdateLanguagesRequest};
pub use routes::create_router;
pub use state::AppState;
pub use ws::{parse_lang_selection, ViewerMessage, ViewerRequest, SLOW_CONSUMER_CLOSE_CODE};
