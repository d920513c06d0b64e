// Integration tests for the media and viewer WebSocket channels
//
// Each test serves the full router on a loopback port and talks to it with
// a real WebSocket client.

use anyhow::Result;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use loqa_live::audio::AudioFrame;
use loqa_live::config::ServiceConfig;
use loqa_live::engine::{
    Engines, MockSpeechEngine, MockTranslationEngine, RecognitionRequest, SpeechEngine,
    TranslationEngine,
};
use loqa_live::error::EngineError;
use loqa_live::ingest::protocol::encode_binary;
use loqa_live::session::{PipelineSettings, SessionController, SessionState};
use loqa_live::{create_router, AppState};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const FRAME_SAMPLES: usize = 320; // 20ms at 16kHz

/// Recognises utterances as the next line of a script
struct ScriptedSpeech {
    script: Vec<&'static str>,
    calls: AtomicUsize,
}

#[async_trait]
impl SpeechEngine for ScriptedSpeech {
    async fn recognize(&self, _request: &RecognitionRequest) -> Result<String, EngineError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.script[n % self.script.len()].to_string())
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Earlier lines of the script take longer to translate than later ones
struct SlowFirstTranslation {
    script: Vec<&'static str>,
}

#[async_trait]
impl TranslationEngine for SlowFirstTranslation {
    async fn translate(&self, text: &str, _source: &str, target: &str) -> Result<String, EngineError> {
        let position = self.script.iter().position(|line| *line == text).unwrap_or(0);
        let delay = (self.script.len() - position) as u64 * 100;
        tokio::time::sleep(Duration::from_millis(delay)).await;
        Ok(format!("[{}] {}", target, text))
    }

    fn name(&self) -> &str {
        "slow-first"
    }
}

fn settings(subscriber_queue: usize) -> PipelineSettings {
    let mut settings = PipelineSettings::default();
    settings.transcription.partial_interval_ms = 60_000;
    settings.session.subscriber_queue = subscriber_queue;
    settings.audio.negotiation_timeout_ms = 300;
    settings
}

fn mock_controller() -> SessionController {
    let engines = Engines::new(Arc::new(MockSpeechEngine), Arc::new(MockTranslationEngine));
    SessionController::new(engines, settings(64), None)
}

fn scripted_controller(subscriber_queue: usize) -> SessionController {
    let script = vec!["Hello.", "How are you?", "Goodbye."];
    let engines = Engines::new(
        Arc::new(ScriptedSpeech {
            script: script.clone(),
            calls: AtomicUsize::new(0),
        }),
        Arc::new(SlowFirstTranslation { script }),
    );
    SessionController::new(engines, settings(subscriber_queue), None)
}

async fn serve(controller: &SessionController) -> Result<SocketAddr> {
    let router = create_router(AppState::new(controller.clone(), ServiceConfig::default()));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    Ok(addr)
}

async fn connect(addr: SocketAddr, path: &str) -> Result<Client> {
    let (client, _) = connect_async(format!("ws://{}{}", addr, path)).await?;
    Ok(client)
}

async fn send_json(client: &mut Client, value: Value) -> Result<()> {
    client.send(Message::Text(value.to_string())).await?;
    Ok(())
}

async fn read_json(client: &mut Client) -> Result<Value> {
    loop {
        match client.next().await {
            Some(Ok(Message::Text(text))) => return Ok(serde_json::from_str(&text)?),
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            other => anyhow::bail!("expected a text message, got {:?}", other),
        }
    }
}

/// Next text message as JSON, skipping pings
async fn next_json(client: &mut Client) -> Result<Value> {
    tokio::time::timeout(Duration::from_secs(5), read_json(client)).await?
}

async fn offer(client: &mut Client) -> Result<Value> {
    send_json(client, json!({ "type": "offer", "sampleRate": 16000, "channels": 1 })).await?;
    next_json(client).await
}

/// 300ms of speech followed by 700ms of silence per utterance, as one binary message
fn speech_message(utterances: u64) -> Vec<u8> {
    let mut samples = Vec::new();
    for _ in 0..utterances {
        for loud in std::iter::repeat(true).take(15).chain(std::iter::repeat(false).take(35)) {
            samples.extend(std::iter::repeat(if loud { 8000i16 } else { 0 }).take(FRAME_SAMPLES));
        }
    }
    encode_binary(0, &samples)
}

fn speech_frames(utterances: u64) -> Vec<AudioFrame> {
    (0..utterances * 50)
        .map(|sequence| AudioFrame {
            sequence,
            samples: vec![if sequence % 50 < 15 { 8000 } else { 0 }; FRAME_SAMPLES],
            sample_rate: 16000,
            channels: 1,
            timestamp_ms: sequence * 20,
        })
        .collect()
}

async fn wait_for_state(
    controller: &SessionController,
    key: &loqa_live::SessionKey,
    state: SessionState,
) -> Result<()> {
    let wait = async {
        while controller.get(key).map(|s| s.state()).ok() != Some(state) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(5), wait).await?;
    Ok(())
}

// ============================================================================
// Broadcaster media channel
// ============================================================================

#[tokio::test]
async fn test_offer_answer_and_first_audio_activates_session() -> Result<()> {
    let controller = mock_controller();
    let addr = serve(&controller).await?;
    let session = controller.create_session("en", &["es".to_string()])?;
    let key = session.key().clone();

    let mut media = connect(addr, &format!("/sessions/{}/media", key)).await?;
    let answer = offer(&mut media).await?;
    assert_eq!(answer["type"], "answer");
    assert_eq!(answer["sessionKey"], key.to_string());
    assert_eq!(answer["sampleRate"], 16000);
    assert_eq!(answer["channels"], 1);
    assert_eq!(answer["frameMs"], 20);
    assert_eq!(answer["state"], "created");
    assert_eq!(session.state(), SessionState::Created);

    media
        .send(Message::Binary(encode_binary(0, &[8000; FRAME_SAMPLES])))
        .await?;
    wait_for_state(&controller, &key, SessionState::Active).await?;
    assert_eq!(session.stats().counters.frames_received, 1);

    // Leaving mid-session starts the grace window
    media.close(None).await?;
    wait_for_state(&controller, &key, SessionState::BroadcasterDisconnected).await?;
    Ok(())
}

#[tokio::test]
async fn test_audio_before_offer_is_rejected() -> Result<()> {
    let controller = mock_controller();
    let addr = serve(&controller).await?;
    let session = controller.create_session("en", &["es".to_string()])?;

    let mut media = connect(addr, &format!("/sessions/{}/media", session.key())).await?;
    send_json(&mut media, json!({ "type": "audio", "data": "AAAA" })).await?;
    let reply = next_json(&mut media).await?;
    assert_eq!(reply["type"], "error");
    assert_eq!(reply["error"], "InvalidRequest");

    // Binary audio before the offer never reaches the pipeline
    media
        .send(Message::Binary(encode_binary(0, &[8000; FRAME_SAMPLES])))
        .await?;
    let answer = offer(&mut media).await?;
    assert_eq!(answer["type"], "answer");
    assert_eq!(answer["state"], "created");
    assert_eq!(session.stats().counters.frames_received, 0);
    Ok(())
}

#[tokio::test]
async fn test_missing_offer_times_out() -> Result<()> {
    let controller = mock_controller();
    let addr = serve(&controller).await?;
    let session = controller.create_session("en", &["es".to_string()])?;

    let mut media = connect(addr, &format!("/sessions/{}/media", session.key())).await?;
    let reply = next_json(&mut media).await?;
    assert_eq!(reply["type"], "error");
    assert_eq!(reply["error"], "InvalidRequest");
    assert!(reply["message"].as_str().unwrap().contains("no offer"));

    // The lease was released, so the broadcaster can come back
    let wait = async {
        while session.has_broadcaster() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(5), wait).await?;
    assert_eq!(session.state(), SessionState::Created);
    let _lease = controller.attach_broadcaster(session.key())?;
    Ok(())
}

#[tokio::test]
async fn test_second_media_connection_conflicts() -> Result<()> {
    let controller = mock_controller();
    let addr = serve(&controller).await?;
    let session = controller.create_session("en", &["es".to_string()])?;
    let path = format!("/sessions/{}/media", session.key());

    let _first = connect(addr, &path).await?;
    match connect_async(format!("ws://{}{}", addr, path)).await {
        Err(tungstenite::Error::Http(response)) => assert_eq!(response.status().as_u16(), 409),
        other => panic!("expected a 409 rejection, got {:?}", other.map(|_| ())),
    }

    match connect_async(format!("ws://{}/sessions/unknown/media", addr)).await {
        Err(tungstenite::Error::Http(response)) => assert_eq!(response.status().as_u16(), 404),
        other => panic!("expected a 404 rejection, got {:?}", other.map(|_| ())),
    }
    Ok(())
}

#[tokio::test]
async fn test_end_message_ends_session() -> Result<()> {
    let controller = mock_controller();
    let addr = serve(&controller).await?;
    let session = controller.create_session("en", &["es".to_string()])?;
    let key = session.key().clone();

    let mut media = connect(addr, &format!("/sessions/{}/media", key)).await?;
    offer(&mut media).await?;
    media.send(Message::Binary(speech_message(1))).await?;

    send_json(&mut media, json!({ "type": "end" })).await?;
    let reply = next_json(&mut media).await?;
    assert_eq!(reply["type"], "ended");
    assert_eq!(session.state(), SessionState::Ended);
    assert!(controller.get(&key).is_err());
    assert_eq!(controller.end_session(&key)?, SessionState::Ended);
    Ok(())
}

#[tokio::test]
async fn test_media_to_viewer_end_to_end() -> Result<()> {
    let controller = mock_controller();
    let addr = serve(&controller).await?;
    let session = controller.create_session("en", &["es".to_string()])?;
    let key = session.key().clone();

    let mut viewer = connect(addr, &format!("/ws?session={}", key)).await?;
    let hello = next_json(&mut viewer).await?;
    assert_eq!(hello["type"], "session");
    assert_eq!(hello["sessionKey"], key.to_string());
    assert_eq!(hello["sourceLang"], "en");
    assert_eq!(hello["targetLangs"], json!(["es"]));

    let mut media = connect(addr, &format!("/sessions/{}/media", key)).await?;
    offer(&mut media).await?;
    media.send(Message::Binary(speech_message(1))).await?;

    let transcript = next_json(&mut viewer).await?;
    assert_eq!(transcript["type"], "transcript");
    assert_eq!(transcript["index"], 0);
    assert_eq!(transcript["final"], true);
    assert_eq!(transcript["text"], "(0.9s of en speech)");

    let translation = next_json(&mut viewer).await?;
    assert_eq!(translation["type"], "translation");
    assert_eq!(translation["lang"], "es");
    assert_eq!(translation["index"], 0);
    assert_eq!(translation["text"], "[es] (0.9s of en speech)");

    // Ending the session tells the viewer and closes its socket
    send_json(&mut media, json!({ "type": "end" })).await?;
    assert_eq!(next_json(&mut viewer).await?["type"], "ended");
    let closed = tokio::time::timeout(Duration::from_secs(5), viewer.next()).await?;
    assert!(matches!(closed, Some(Ok(Message::Close(_))) | None));
    Ok(())
}

// ============================================================================
// Viewer subscription channel
// ============================================================================

#[tokio::test]
async fn test_viewer_for_unknown_session_is_rejected() -> Result<()> {
    let controller = mock_controller();
    let addr = serve(&controller).await?;

    match connect_async(format!("ws://{}/ws?session=nope", addr)).await {
        Err(tungstenite::Error::Http(response)) => assert_eq!(response.status().as_u16(), 404),
        other => panic!("expected a 404 rejection, got {:?}", other.map(|_| ())),
    }
    Ok(())
}

#[tokio::test]
async fn test_viewer_language_change() -> Result<()> {
    let controller = mock_controller();
    let addr = serve(&controller).await?;
    let session = controller.create_session("en", &["es".to_string(), "fr".to_string()])?;
    let key = session.key().clone();

    let mut viewer = connect(addr, &format!("/ws?session={}&lang=all", key)).await?;
    assert_eq!(next_json(&mut viewer).await?["type"], "session");

    send_json(
        &mut viewer,
        json!({ "type": "languageChange", "targetLanguage": "fr", "includeSource": false }),
    )
    .await?;
    send_json(&mut viewer, json!({ "type": "shout" })).await?;
    let reply = next_json(&mut viewer).await?;
    assert_eq!(reply["type"], "error");
    assert_eq!(reply["error"], "InvalidRequest");

    let lease = controller.attach_broadcaster(&key)?;
    lease.push_frames(speech_frames(1))?;

    let segment = next_json(&mut viewer).await?;
    assert_eq!(segment["type"], "translation");
    assert_eq!(segment["lang"], "fr");
    assert_eq!(segment["final"], true);

    // Session-wide language changes reach every viewer
    controller.update_languages(&key, None, Some(&["de".to_string(), "es".to_string()][..]))?;
    let update = next_json(&mut viewer).await?;
    assert_eq!(update["type"], "languages");
    assert_eq!(update["targetLangs"], json!(["de", "es"]));
    Ok(())
}

#[tokio::test]
async fn test_slow_viewer_closed_with_4008() -> Result<()> {
    // Index 0 translates slowest, so the lane releases 0, 1 and 2 in one burst
    let controller = scripted_controller(1);
    let addr = serve(&controller).await?;
    let session = controller.create_session("en", &["es".to_string()])?;
    let key = session.key().clone();

    let path = format!("/ws?session={}&lang=es&includeSource=false", key);
    let mut viewer = connect(addr, &path).await?;
    assert_eq!(next_json(&mut viewer).await?["type"], "session");

    let lease = controller.attach_broadcaster(&key)?;
    lease.push_frames(speech_frames(3))?;

    let mut error = None;
    let close = loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), viewer.next()).await?;
        match msg {
            Some(Ok(Message::Text(text))) => {
                let value: Value = serde_json::from_str(&text)?;
                if value["type"] == "error" {
                    error = Some(value);
                }
            }
            Some(Ok(Message::Close(frame))) => break frame,
            other => panic!("viewer socket ended without a close frame: {:?}", other),
        }
    };

    let close = close.expect("close frame without a code");
    assert_eq!(u16::from(close.code), 4008);
    assert_eq!(error.expect("no error message")["error"], "SlowConsumer");

    let stats = session.stats();
    assert_eq!(stats.counters.slow_consumer_disconnects, 1);
    assert_eq!(stats.state, SessionState::Active);
    drop(lease);
    Ok(())
}
