use serde::{Deserialize, Serialize};

use crate::config::{AudioConfig, Config, SessionSettings, TranscriptionConfig};
use crate::engine::RetryPolicy;
use crate::error::SessionError;

/// Source language and ordered, de-duplicated target languages of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Languages {
    pub source_lang: String,
    pub target_langs: Vec<String>,
}

fn normalize_code(code: &str) -> Result<String, SessionError> {
    let code = code.trim();
    let valid = (2..=16).contains(&code.len())
        && code.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid {
        return Err(SessionError::InvalidRequest(format!(
            "invalid language code {:?}",
            code
        )));
    }
    Ok(code.to_ascii_lowercase())
}

impl Languages {
    pub fn new(source: &str, targets: &[String]) -> Result<Self, SessionError> {
        let source_lang = normalize_code(source)?;

        let mut target_langs: Vec<String> = Vec::with_capacity(targets.len());
        for target in targets {
            let target = normalize_code(target)?;
            if !target_langs.contains(&target) {
                target_langs.push(target);
            }
        }

        if target_langs.is_empty() {
            return Err(SessionError::InvalidRequest(
                "at least one target language is required".to_string(),
            ));
        }

        Ok(Self {
            source_lang,
            target_langs,
        })
    }

    /// Apply a partial update; unspecified fields keep their current value
    pub fn updated(
        &self,
        source: Option<&str>,
        targets: Option<&[String]>,
    ) -> Result<Self, SessionError> {
        Self::new(
            source.unwrap_or(self.source_lang.as_str()),
            targets.unwrap_or(self.target_langs.as_slice()),
        )
    }
}

/// Everything a session's pipeline needs from the service configuration
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub audio: AudioConfig,
    pub transcription: TranscriptionConfig,
    pub session: SessionSettings,
    pub retry: RetryPolicy,
    /// Concurrent translation calls per language lane
    pub max_in_flight: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            audio: config.audio.clone(),
            transcription: config.transcription.clone(),
            session: config.session.clone(),
            retry: RetryPolicy::from_config(&config.engine),
            max_in_flight: config.engine.max_in_flight.max(1),
        }
    }
}
