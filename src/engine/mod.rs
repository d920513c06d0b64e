//! Speech-to-text and translation engines
//!
//! The pipeline talks to engines only through the two traits below:
//! - `SpeechEngine` turns one utterance of 16-bit mono PCM into text
//! - `TranslationEngine` turns source text into one target language
//!
//! Every call is wrapped by `retry::call_with_retry` (or `retry::call_once`
//! for best-effort partials), which applies the hard timeout and backoff.

mod mock;
mod openai;
pub mod retry;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use crate::config::{EngineConfig, EngineKind};
use crate::error::EngineError;

pub use mock::{MockSpeechEngine, MockTranslationEngine};
pub use openai::{OpenAiSpeechEngine, OpenAiTranslationEngine};
pub use retry::RetryPolicy;

/// One recognition call: the audio of a (possibly still open) utterance
#[derive(Debug, Clone)]
pub struct RecognitionRequest {
    /// Mono i16 PCM
    pub samples: Arc<[i16]>,
    pub sample_rate: u32,
    /// Source language code
    pub language: String,
    /// Partial hypotheses are best-effort and never retried
    pub partial: bool,
}

impl RecognitionRequest {
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate.max(1) as f64
    }
}

#[async_trait]
pub trait SpeechEngine: Send + Sync {
    async fn recognize(&self, request: &RecognitionRequest) -> Result<String, EngineError>;

    /// Engine name for logging
    fn name(&self) -> &str;
}

#[async_trait]
pub trait TranslationEngine: Send + Sync {
    async fn translate(&self, text: &str, source: &str, target: &str)
        -> Result<String, EngineError>;

    /// Engine name for logging
    fn name(&self) -> &str;
}

/// The engine pair shared by every session
#[derive(Clone)]
pub struct Engines {
    pub speech: Arc<dyn SpeechEngine>,
    pub translation: Arc<dyn TranslationEngine>,
}

impl Engines {
    pub fn new(speech: Arc<dyn SpeechEngine>, translation: Arc<dyn TranslationEngine>) -> Self {
        Self {
            speech,
            translation,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        let engines = match config.kind {
            EngineKind::Mock => Self::new(
                Arc::new(MockSpeechEngine),
                Arc::new(MockTranslationEngine),
            ),
            EngineKind::OpenAi => {
                let openai = &config.openai;
                Self::new(
                    Arc::new(OpenAiSpeechEngine::new(
                        openai.api_key.clone(),
                        openai.base_url.clone(),
                        openai.transcription_model.clone(),
                    )?),
                    Arc::new(OpenAiTranslationEngine::new(
                        openai.api_key.clone(),
                        openai.base_url.clone(),
                        openai.translation_model.clone(),
                    )?),
                )
            }
        };

        info!(
            "Engines ready: speech={}, translation={}",
            engines.speech.name(),
            engines.translation.name()
        );

        Ok(engines)
    }
}
