use serde::{Deserialize, Serialize};

use crate::transcribe::{SegmentMarker, TranscriptSegment};
use crate::translate::TranslationSegment;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Transcript,
    Translation,
}

/// Message delivered to subscribers, serialised as-is onto the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,

    pub session_key: String,

    pub index: u64,

    /// Source language for transcripts, target language for translations
    pub lang: String,

    pub text: String,

    #[serde(rename = "final")]
    pub is_final: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marker: Option<SegmentMarker>,

    pub start_ms: u64,

    pub end_ms: u64,
}

impl SegmentEvent {
    pub fn transcript(segment: &TranscriptSegment, source_lang: &str) -> Self {
        Self {
            kind: EventKind::Transcript,
            session_key: segment.session_key.to_string(),
            index: segment.index,
            lang: source_lang.to_string(),
            text: segment.text.clone(),
            is_final: segment.is_final,
            marker: segment.marker,
            start_ms: segment.start_ms,
            end_ms: segment.end_ms,
        }
    }

    /// Ordering stream this event belongs to
    pub fn stream(&self) -> (EventKind, &str) {
        (self.kind, self.lang.as_str())
    }
}

impl From<TranslationSegment> for SegmentEvent {
    fn from(segment: TranslationSegment) -> Self {
        Self {
            kind: EventKind::Translation,
            session_key: segment.session_key.to_string(),
            index: segment.index,
            lang: segment.lang,
            text: segment.text,
            is_final: segment.is_final,
            marker: segment.marker,
            start_ms: segment.start_ms,
            end_ms: segment.end_ms,
        }
    }
}
