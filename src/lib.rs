pub mod audio;
pub mod broadcast;
pub mod config;
pub mod engine;
pub mod error;
pub mod http;
pub mod ingest;
pub mod nats;
pub mod session;
pub mod transcribe;
pub mod translate;

pub use audio::{AudioFrame, FrameQueue, Framer, IncomingAudio};
pub use broadcast::{Broadcaster, EventKind, SegmentEvent, Subscription, SubscriptionOptions};
pub use config::Config;
pub use engine::{Engines, RetryPolicy, SpeechEngine, TranslationEngine};
pub use error::{EngineError, SessionError};
pub use http::{create_router, AppState};
pub use nats::{NatsClient, SegmentMessage, StatsMessage};
pub use session::{
    BroadcasterLease, Languages, PipelineSettings, Session, SessionController, SessionKey,
    SessionState, SessionStats,
};
pub use transcribe::{SegmentMarker, TranscriptSegment};
pub use translate::TranslationSegment;
