//! Media channel wire format
//!
//! Text frames carry JSON control messages tagged by `type`. Audio travels
//! either as binary frames (8-byte little-endian capture timestamp in ms,
//! then interleaved i16 little-endian PCM) or as JSON `audio` messages with
//! base64 PCM.

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::audio::IncomingAudio;
use crate::error::SessionError;
use crate::session::SessionState;

pub const PCM_S16LE: &str = "pcm_s16le";

const TIMESTAMP_BYTES: usize = 8;

fn default_encoding() -> String {
    PCM_S16LE.to_string()
}

/// Messages sent by the broadcaster
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    /// Opens negotiation; describes the audio that will follow
    #[serde(rename_all = "camelCase")]
    Offer {
        sample_rate: u32,
        channels: u16,
        #[serde(default = "default_encoding")]
        encoding: String,
        /// Accepted for compatibility with SDP-carrying clients; not interpreted
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sdp: Option<String>,
    },

    #[serde(rename_all = "camelCase")]
    Audio {
        #[serde(default)]
        timestamp_ms: Option<u64>,
        /// Base64 interleaved i16 LE PCM
        data: String,
    },

    #[serde(rename_all = "camelCase")]
    LanguageChange {
        #[serde(default)]
        source_lang: Option<String>,
        #[serde(default)]
        target_langs: Option<Vec<String>>,
    },

    /// Broadcaster ends the session
    End,
}

/// Messages sent to the broadcaster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    #[serde(rename_all = "camelCase")]
    Answer {
        session_key: String,
        /// Rate frames are normalised to
        sample_rate: u32,
        channels: u16,
        frame_ms: u32,
        state: SessionState,
    },

    #[serde(rename_all = "camelCase")]
    LanguagesUpdated {
        source_lang: String,
        target_langs: Vec<String>,
    },

    Ended,

    Error {
        error: String,
        message: String,
    },
}

impl ServerMessage {
    pub fn error(err: &SessionError) -> Self {
        ServerMessage::Error {
            error: error_name(err).to_string(),
            message: err.to_string(),
        }
    }

    pub fn to_json(&self) -> String {
        // Serialising these plain enums cannot fail
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Stable name of an error variant for the wire
pub fn error_name(err: &SessionError) -> &'static str {
    match err {
        SessionError::SessionNotFound(_) => "SessionNotFound",
        SessionError::SessionConflict(_) => "SessionConflict",
        SessionError::EngineTimeout(_) => "EngineTimeout",
        SessionError::EngineFailure { .. } => "EngineFailure",
        SessionError::SlowConsumer { .. } => "SlowConsumer",
        SessionError::InvalidState { .. } => "InvalidState",
        SessionError::InvalidRequest(_) => "InvalidRequest",
    }
}

/// Negotiated format of the broadcaster's audio
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl StreamFormat {
    pub fn from_offer(sample_rate: u32, channels: u16, encoding: &str) -> Result<Self, SessionError> {
        if encoding != PCM_S16LE {
            return Err(SessionError::InvalidRequest(format!(
                "unsupported encoding {:?}, expected {}",
                encoding, PCM_S16LE
            )));
        }
        if !(8_000..=192_000).contains(&sample_rate) {
            return Err(SessionError::InvalidRequest(format!(
                "unsupported sample rate {}",
                sample_rate
            )));
        }
        if !(1..=8).contains(&channels) {
            return Err(SessionError::InvalidRequest(format!(
                "unsupported channel count {}",
                channels
            )));
        }
        Ok(Self {
            sample_rate,
            channels,
        })
    }

    fn chunk(&self, pcm: &[u8], timestamp_ms: Option<u64>) -> Result<IncomingAudio, SessionError> {
        let frame_bytes = 2 * self.channels as usize;
        if pcm.len() % frame_bytes != 0 {
            return Err(SessionError::InvalidRequest(format!(
                "{} PCM bytes is not a whole number of {}-channel samples",
                pcm.len(),
                self.channels
            )));
        }

        let samples = pcm
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();

        Ok(IncomingAudio {
            samples,
            sample_rate: self.sample_rate,
            channels: self.channels,
            timestamp_ms,
        })
    }

    /// Parse a binary audio message
    pub fn parse_binary(&self, data: &[u8]) -> Result<IncomingAudio, SessionError> {
        if data.len() < TIMESTAMP_BYTES {
            return Err(SessionError::InvalidRequest(
                "binary audio message shorter than its timestamp".to_string(),
            ));
        }
        let (ts, pcm) = data.split_at(TIMESTAMP_BYTES);
        let mut ts_bytes = [0u8; TIMESTAMP_BYTES];
        ts_bytes.copy_from_slice(ts);
        self.chunk(pcm, Some(u64::from_le_bytes(ts_bytes)))
    }

    /// Decode the payload of a JSON `audio` message
    pub fn parse_base64(&self, data: &str, timestamp_ms: Option<u64>) -> Result<IncomingAudio, SessionError> {
        let pcm = base64::engine::general_purpose::STANDARD
            .decode(data)
            .map_err(|e| SessionError::InvalidRequest(format!("invalid base64 audio: {}", e)))?;
        self.chunk(&pcm, timestamp_ms)
    }
}

/// Build a binary audio message; the inverse of [`StreamFormat::parse_binary`]
pub fn encode_binary(timestamp_ms: u64, samples: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(TIMESTAMP_BYTES + samples.len() * 2);
    out.extend_from_slice(&timestamp_ms.to_le_bytes());
    for sample in samples {
        out.extend_from_slice(&sample.to_le_bytes());
    }
    out
}
