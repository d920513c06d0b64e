use serde::{Deserialize, Serialize};

use crate::broadcast::SegmentEvent;
use crate::session::SessionStats;

/// Final segment exported to NATS
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentMessage {
    #[serde(flatten)]
    pub event: SegmentEvent,
    pub timestamp: String, // RFC3339 timestamp
}

/// Session statistics snapshot, published on every lifecycle transition
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsMessage {
    #[serde(flatten)]
    pub stats: SessionStats,
    pub timestamp: String,
}

/// `<prefix>.<key>.segments`
pub fn segments_subject(prefix: &str, session_key: &str) -> String {
    format!("{}.{}.segments", prefix, session_key)
}

/// `<prefix>.<key>.stats`
pub fn stats_subject(prefix: &str, session_key: &str) -> String {
    format!("{}.{}.stats", prefix, session_key)
}
