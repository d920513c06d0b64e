// OpenAI-compatible HTTP engines
//
// Speech: POST {base_url}/audio/transcriptions (multipart WAV upload)
// Translation: POST {base_url}/chat/completions
//
// Timeouts are applied by the caller (retry::call_once), not by the client.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::io::Cursor;
use tracing::debug;

use super::{RecognitionRequest, SpeechEngine, TranslationEngine};
use crate::error::EngineError;

fn normalize_base_url(base_url: String) -> String {
    let mut url = base_url.trim_end_matches('/').to_string();
    if url.ends_with("/models") {
        url = url.trim_end_matches("/models").to_string();
    }
    url
}

/// Map an HTTP error status to a retryable or terminal engine error
fn status_error(status: StatusCode, body: &str) -> EngineError {
    let message = format!("HTTP {}: {}", status, body.chars().take(200).collect::<String>());
    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        EngineError::Request(message)
    } else {
        EngineError::Unavailable(message)
    }
}

/// Encode mono i16 PCM as an in-memory WAV file
pub(crate) fn encode_wav(samples: &[i16], sample_rate: u32) -> Result<Vec<u8>, EngineError> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut buf = Vec::with_capacity(44 + samples.len() * 2);
    {
        let mut writer = hound::WavWriter::new(Cursor::new(&mut buf), spec)
            .map_err(|e| EngineError::Request(format!("WAV encoding failed: {}", e)))?;
        for &sample in samples {
            writer
                .write_sample(sample)
                .map_err(|e| EngineError::Request(format!("WAV encoding failed: {}", e)))?;
        }
        writer
            .finalize()
            .map_err(|e| EngineError::Request(format!("WAV encoding failed: {}", e)))?;
    }
    Ok(buf)
}

pub struct OpenAiSpeechEngine {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

impl OpenAiSpeechEngine {
    pub fn new(api_key: String, base_url: String, model: String) -> Result<Self> {
        let client = Client::builder()
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            api_key,
            base_url: normalize_base_url(base_url),
            model,
        })
    }
}

#[async_trait]
impl SpeechEngine for OpenAiSpeechEngine {
    async fn recognize(&self, request: &RecognitionRequest) -> Result<String, EngineError> {
        let wav = encode_wav(&request.samples, request.sample_rate)?;

        let part = reqwest::multipart::Part::bytes(wav)
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(EngineError::from)?;

        // The API takes ISO-639-1 codes; strip region suffixes such as "en-US"
        let language: String = request.language.chars().take(2).collect();

        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone())
            .text("language", language)
            .text("response_format", "json");

        let url = format!("{}/audio/transcriptions", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }

        let parsed: TranscriptionResponse = response.json().await?;
        debug!(
            "Transcribed {:.1}s (partial={}): {}",
            request.duration_secs(),
            request.partial,
            parsed.text
        );
        Ok(parsed.text.trim().to_string())
    }

    fn name(&self) -> &str {
        "openai"
    }
}

pub struct OpenAiTranslationEngine {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

impl OpenAiTranslationEngine {
    pub fn new(api_key: String, base_url: String, model: String) -> Result<Self> {
        let client = Client::builder()
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            api_key,
            base_url: normalize_base_url(base_url),
            model,
        })
    }
}

#[async_trait]
impl TranslationEngine for OpenAiTranslationEngine {
    async fn translate(
        &self,
        text: &str,
        source: &str,
        target: &str,
    ) -> Result<String, EngineError> {
        let body = json!({
            "model": self.model,
            "temperature": 0,
            "messages": [
                {
                    "role": "system",
                    "content": format!(
                        "Translate the user's text from {} to {}. Reply with the translation only.",
                        source, target
                    ),
                },
                { "role": "user", "content": text },
            ],
        });

        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }

        let parsed: ChatResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content.trim().to_string())
            .ok_or_else(|| EngineError::Request("empty completion".to_string()))
    }

    fn name(&self) -> &str {
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_wav_header_and_length() {
        let wav = encode_wav(&[0, 1, -1, 100], 16000).unwrap();
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(wav.len(), 44 + 8);

        let reader = hound::WavReader::new(Cursor::new(wav)).unwrap();
        assert_eq!(reader.spec().sample_rate, 16000);
        assert_eq!(reader.spec().channels, 1);
        let samples: Vec<i16> = reader.into_samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![0, 1, -1, 100]);
    }

    #[test]
    fn test_status_error_classification() {
        assert!(status_error(StatusCode::BAD_GATEWAY, "").is_retryable());
        assert!(status_error(StatusCode::TOO_MANY_REQUESTS, "").is_retryable());
        assert!(!status_error(StatusCode::UNAUTHORIZED, "bad key").is_retryable());
    }

    #[test]
    fn test_base_url_normalisation() {
        assert_eq!(
            normalize_base_url("https://api.openai.com/v1/".to_string()),
            "https://api.openai.com/v1"
        );
        assert_eq!(
            normalize_base_url("http://localhost:8000/v1/models".to_string()),
            "http://localhost:8000/v1"
        );
    }
}
