// Development engines: no network, deterministic output

use async_trait::async_trait;

use super::{RecognitionRequest, SpeechEngine, TranslationEngine};
use crate::error::EngineError;

/// Describes the utterance instead of recognising it
pub struct MockSpeechEngine;

#[async_trait]
impl SpeechEngine for MockSpeechEngine {
    async fn recognize(&self, request: &RecognitionRequest) -> Result<String, EngineError> {
        Ok(format!(
            "({:.1}s of {} speech)",
            request.duration_secs(),
            request.language
        ))
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// Tags the source text with the target language
pub struct MockTranslationEngine;

#[async_trait]
impl TranslationEngine for MockTranslationEngine {
    async fn translate(
        &self,
        text: &str,
        _source: &str,
        target: &str,
    ) -> Result<String, EngineError> {
        Ok(format!("[{}] {}", target, text))
    }

    fn name(&self) -> &str {
        "mock"
    }
}
