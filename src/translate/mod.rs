//! Translation stage
//!
//! One lane per target language. Each lane translates transcript segments
//! concurrently but releases them strictly in index order, so subscribers of
//! a language see indices that only ever increase.

mod lane;
mod pipeline;
mod sequencer;

use crate::session::SessionKey;
use crate::transcribe::SegmentMarker;

pub use lane::TranslationLane;
pub use pipeline::TranslationRouter;
pub use sequencer::LaneSequencer;

/// A transcript segment rendered into one target language
#[derive(Debug, Clone, PartialEq)]
pub struct TranslationSegment {
    pub session_key: SessionKey,
    /// Index of the transcript segment this translates
    pub index: u64,
    /// Target language
    pub lang: String,
    pub text: String,
    /// Inherited from the transcript segment
    pub is_final: bool,
    pub marker: Option<SegmentMarker>,
    pub start_ms: u64,
    pub end_ms: u64,
}
