use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

use super::state::SessionState;

/// Live per-session counters, shared by every pipeline stage
#[derive(Debug, Default)]
pub struct SessionCounters {
    pub frames_received: AtomicU64,
    pub frames_dropped: AtomicU64,
    pub transcription_retries: AtomicU64,
    pub unrecognized_segments: AtomicU64,
    pub translation_retries: AtomicU64,
    pub untranslated_segments: AtomicU64,
    pub transcript_segments: AtomicU64,
    pub translation_segments: AtomicU64,
    pub partials_dropped: AtomicU64,
    pub slow_consumer_disconnects: AtomicU64,
}

impl SessionCounters {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        CounterSnapshot {
            frames_received: load(&self.frames_received),
            frames_dropped: load(&self.frames_dropped),
            transcription_retries: load(&self.transcription_retries),
            unrecognized_segments: load(&self.unrecognized_segments),
            translation_retries: load(&self.translation_retries),
            untranslated_segments: load(&self.untranslated_segments),
            transcript_segments: load(&self.transcript_segments),
            translation_segments: load(&self.translation_segments),
            partials_dropped: load(&self.partials_dropped),
            slow_consumer_disconnects: load(&self.slow_consumer_disconnects),
        }
    }
}

/// Point-in-time copy of [`SessionCounters`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CounterSnapshot {
    pub frames_received: u64,
    pub frames_dropped: u64,
    pub transcription_retries: u64,
    pub unrecognized_segments: u64,
    pub translation_retries: u64,
    pub untranslated_segments: u64,
    pub transcript_segments: u64,
    pub translation_segments: u64,
    pub partials_dropped: u64,
    pub slow_consumer_disconnects: u64,
}

/// Statistics about a translation session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub session_key: String,

    pub state: SessionState,

    pub source_lang: String,

    pub target_langs: Vec<String>,

    /// When the session was created
    pub created_at: DateTime<Utc>,

    /// Seconds since creation
    pub duration_secs: f64,

    /// Whether a broadcaster connection is currently attached
    pub broadcaster_connected: bool,

    /// Number of connected subscribers
    pub subscribers: usize,

    pub counters: CounterSnapshot,
}
