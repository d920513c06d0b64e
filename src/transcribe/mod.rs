//! Transcription stage
//!
//! Consumes the session's frame queue, endpoints utterances and turns each
//! one into a `TranscriptSegment`:
//! - partial segments while the utterance is still open (best effort)
//! - exactly one final segment per index once the utterance closes

mod endpoint;
mod pipeline;

use serde::{Deserialize, Serialize};

use crate::session::SessionKey;

pub use endpoint::{EndpointEvent, Endpointer};
pub use pipeline::TranscriptionStage;

/// Text carried by a final segment whose audio could not be recognised
pub const UNRECOGNIZED_TEXT: &str = "[unrecognized]";

/// Why a final segment does not carry real engine output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentMarker {
    /// Recognition retries exhausted
    Unrecognized,
    /// Translation retries exhausted; text is the untranslated source
    Untranslated,
}

/// A recognised span of speech
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptSegment {
    pub session_key: SessionKey,
    /// Monotonic per session; a partial may be revised by later segments with the same index
    pub index: u64,
    pub text: String,
    /// Capture time of the first sample
    pub start_ms: u64,
    /// Capture time just after the last sample
    pub end_ms: u64,
    pub is_final: bool,
    pub marker: Option<SegmentMarker>,
}
