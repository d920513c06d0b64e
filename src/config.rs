use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;

/// Environment variable prefix, e.g. `LOQA_LIVE__SERVICE__HTTP__PORT=8080`
pub const ENV_PREFIX: &str = "LOQA_LIVE";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub audio: AudioConfig,
    pub transcription: TranscriptionConfig,
    pub session: SessionSettings,
    pub engine: EngineConfig,
    pub nats: NatsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
    /// Origin allowed by CORS (the viewer/admin frontend)
    pub frontend_url: String,
    /// Seconds to wait for in-flight work before forcing exit
    pub shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Rate every broadcaster stream is normalised to
    pub sample_rate: u32,
    /// Duration of one AudioFrame (20-100ms)
    pub frame_ms: u32,
    /// Frames buffered between ingestion and transcription before the oldest is dropped
    pub ingest_queue_frames: usize,
    /// How long a broadcaster may take to send its offer
    pub negotiation_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TranscriptionConfig {
    /// RMS level (0.0 to 1.0) above which a frame counts as speech
    pub speech_threshold: f32,
    /// Trailing silence that closes an utterance
    pub silence_ms: u32,
    /// Minimum speech before an utterance is worth recognising
    pub min_speech_ms: u32,
    /// How often a partial hypothesis is requested while speaking
    pub partial_interval_ms: u32,
    /// Utterances longer than this are force-finalised
    pub max_utterance_ms: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Time a disconnected broadcaster has to resume the session
    pub grace_window_secs: u64,
    /// Sessions without media or control activity for this long are evicted
    pub idle_timeout_secs: u64,
    pub sweep_interval_secs: u64,
    /// How long an ended key still answers `end` with `ended`
    pub tombstone_ttl_secs: u64,
    /// Per-subscriber delivery queue depth
    pub subscriber_queue: usize,
    /// Number of recent final segments kept for subscribers that ask for replay
    pub replay_buffer: usize,
    /// Capacity of the queues joining pipeline stages
    pub stage_queue: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Mock,
    OpenAi,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub kind: EngineKind,
    /// Hard timeout of a single transcribe/translate call
    pub timeout_ms: u64,
    /// Retries after the first attempt
    pub max_retries: u32,
    pub backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Concurrent translation calls per language lane
    pub max_in_flight: usize,
    pub openai: OpenAiConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub transcription_model: String,
    pub translation_model: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NatsConfig {
    /// Empty disables the NATS export
    pub url: String,
    pub subject_prefix: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "loqa-live".to_string(),
            http: HttpConfig::default(),
            frontend_url: "http://localhost:3000".to_string(),
            shutdown_timeout_secs: 10,
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 5000,
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000, // Speech engines expect 16kHz mono
            frame_ms: 20,
            ingest_queue_frames: 500, // 10 seconds at 20ms
            negotiation_timeout_ms: 10_000,
        }
    }
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            speech_threshold: 0.02,
            silence_ms: 600,
            min_speech_ms: 200,
            partial_interval_ms: 1000,
            max_utterance_ms: 15_000,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            grace_window_secs: 60,
            idle_timeout_secs: 30 * 60,
            sweep_interval_secs: 30,
            tombstone_ttl_secs: 10 * 60,
            subscriber_queue: 64,
            replay_buffer: 32,
            stage_queue: 256,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            kind: EngineKind::Mock,
            timeout_ms: 10_000,
            max_retries: 2,
            backoff_ms: 200,
            max_backoff_ms: 2_000,
            max_in_flight: 4,
            openai: OpenAiConfig::default(),
        }
    }
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.openai.com/v1".to_string(),
            transcription_model: "whisper-1".to_string(),
            translation_model: "gpt-4o-mini".to_string(),
        }
    }
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            subject_prefix: "live.session".to_string(),
        }
    }
}

impl Config {
    /// Load configuration: built-in defaults, then the optional file at `path`
    /// (any format the `config` crate understands), then `LOQA_LIVE__*` env vars.
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to read configuration from {}", path))?;

        let cfg: Self = settings
            .try_deserialize()
            .context("Failed to parse configuration")?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        if !(20..=100).contains(&self.audio.frame_ms) {
            anyhow::bail!(
                "audio.frame_ms must be between 20 and 100, got {}",
                self.audio.frame_ms
            );
        }
        if self.audio.sample_rate == 0 {
            anyhow::bail!("audio.sample_rate must be positive");
        }
        if self.session.subscriber_queue == 0 || self.session.stage_queue == 0 {
            anyhow::bail!("queue sizes must be positive");
        }
        if self.engine.kind == EngineKind::OpenAi && self.engine.openai.api_key.is_empty() {
            anyhow::bail!("engine.openai.api_key is required when engine.kind = \"openai\"");
        }
        Ok(())
    }
}

impl AudioConfig {
    pub fn negotiation_timeout(&self) -> Duration {
        Duration::from_millis(self.negotiation_timeout_ms)
    }
}

impl SessionSettings {
    pub fn grace_window(&self) -> Duration {
        Duration::from_secs(self.grace_window_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn tombstone_ttl(&self) -> Duration {
        Duration::from_secs(self.tombstone_ttl_secs)
    }
}
