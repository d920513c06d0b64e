use axum::extract::ws::{Message, WebSocket};
use tracing::{debug, info, warn};

use super::protocol::{ClientMessage, ServerMessage, StreamFormat};
use crate::audio::{Framer, IncomingAudio};
use crate::config::AudioConfig;
use crate::error::SessionError;
use crate::session::BroadcasterLease;

enum Flow {
    Continue,
    /// Session ended from this connection
    Ended,
    Disconnect,
}

/// Media ingestion for one broadcaster connection.
///
/// Owns the session's broadcaster lease for as long as the connection lives.
/// Chunks are normalised and cut into frames, which go straight into the
/// session's drop-oldest frame queue, so the socket is never blocked by a
/// slow pipeline.
pub struct MediaIngest {
    lease: BroadcasterLease,
    audio: AudioConfig,
    format: Option<StreamFormat>,
    framer: Framer,
}

impl MediaIngest {
    pub fn new(lease: BroadcasterLease, audio: AudioConfig) -> Self {
        let framer = Framer::new(audio.sample_rate, audio.frame_ms)
            .with_next_sequence(lease.next_sequence());
        Self {
            lease,
            audio,
            format: None,
            framer,
        }
    }

    /// Drive the connection until the broadcaster leaves or the session ends
    pub async fn run(mut self, mut socket: WebSocket) {
        let key = self.lease.key().clone();
        info!("Media channel opened for session {}", key);

        let mut ended = self.lease.session().ended();
        if *ended.borrow() {
            send(&mut socket, &ServerMessage::Ended).await;
            return;
        }

        let negotiation_timeout = self.audio.negotiation_timeout();
        match tokio::time::timeout(negotiation_timeout, self.negotiate(&mut socket)).await {
            Ok(true) => {}
            Ok(false) => return self.finish(),
            Err(_) => {
                warn!("Session {}: broadcaster sent no offer, closing", key);
                let err = SessionError::InvalidRequest("no offer received".to_string());
                send(&mut socket, &ServerMessage::error(&err)).await;
                return self.finish();
            }
        }

        loop {
            let flow = tokio::select! {
                _ = ended.changed() => {
                    send(&mut socket, &ServerMessage::Ended).await;
                    Flow::Ended
                }

                msg = socket.recv() => match msg {
                    Some(Ok(msg)) => self.on_message(msg, &mut socket).await,
                    Some(Err(e)) => {
                        debug!("Session {}: media socket error: {}", key, e);
                        Flow::Disconnect
                    }
                    None => Flow::Disconnect,
                },
            };

            match flow {
                Flow::Continue => {}
                Flow::Ended => {
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                }
                Flow::Disconnect => {
                    info!("Media channel for session {} lost", key);
                    break;
                }
            }
        }

        self.finish();
    }

    /// Wait for the offer and answer it. Returns false if the connection
    /// should be dropped.
    async fn negotiate(&mut self, socket: &mut WebSocket) -> bool {
        while let Some(Ok(msg)) = socket.recv().await {
            let text = match msg {
                Message::Text(text) => text,
                Message::Close(_) => return false,
                _ => continue,
            };
            match serde_json::from_str::<ClientMessage>(&text) {
                Ok(ClientMessage::Offer {
                    sample_rate,
                    channels,
                    encoding,
                    ..
                }) => {
                    return match self.accept_offer(sample_rate, channels, &encoding) {
                        Ok(answer) => send(socket, &answer).await,
                        Err(err) => {
                            send(socket, &ServerMessage::error(&err)).await;
                            false
                        }
                    };
                }
                Ok(_) => {
                    let err = SessionError::InvalidRequest("expected an offer first".to_string());
                    send(socket, &ServerMessage::error(&err)).await;
                }
                Err(e) => {
                    let err = SessionError::InvalidRequest(format!("malformed message: {}", e));
                    send(socket, &ServerMessage::error(&err)).await;
                }
            }
        }
        false
    }

    fn accept_offer(
        &mut self,
        sample_rate: u32,
        channels: u16,
        encoding: &str,
    ) -> Result<ServerMessage, SessionError> {
        let format = StreamFormat::from_offer(sample_rate, channels, encoding)?;
        if self.format.is_some() {
            // Renegotiation: close out audio in the old format first
            self.flush();
        }
        self.format = Some(format);

        info!(
            "Session {}: broadcaster offers {} Hz x{} PCM",
            self.lease.key(),
            sample_rate,
            channels
        );

        Ok(ServerMessage::Answer {
            session_key: self.lease.key().to_string(),
            sample_rate: self.audio.sample_rate,
            channels: 1,
            frame_ms: self.audio.frame_ms,
            state: self.lease.session().state(),
        })
    }

    async fn on_message(&mut self, msg: Message, socket: &mut WebSocket) -> Flow {
        let result = match msg {
            Message::Binary(data) => self.parse_binary(&data).and_then(|chunk| self.ingest(chunk)),
            Message::Text(text) => return self.on_text(&text, socket).await,
            Message::Close(_) => return Flow::Disconnect,
            _ => Ok(()),
        };

        match result {
            Ok(()) => Flow::Continue,
            Err(err) => self.reject(err, socket).await,
        }
    }

    async fn on_text(&mut self, text: &str, socket: &mut WebSocket) -> Flow {
        let msg = match serde_json::from_str::<ClientMessage>(text) {
            Ok(msg) => msg,
            Err(e) => {
                let err = SessionError::InvalidRequest(format!("malformed message: {}", e));
                return self.reject(err, socket).await;
            }
        };

        match msg {
            ClientMessage::Offer {
                sample_rate,
                channels,
                encoding,
                ..
            } => match self.accept_offer(sample_rate, channels, &encoding) {
                Ok(answer) => {
                    if send(socket, &answer).await {
                        Flow::Continue
                    } else {
                        Flow::Disconnect
                    }
                }
                Err(err) => self.reject(err, socket).await,
            },

            ClientMessage::Audio { timestamp_ms, data } => {
                let result = match self.format {
                    Some(format) => format
                        .parse_base64(&data, timestamp_ms)
                        .and_then(|chunk| self.ingest(chunk)),
                    None => Err(not_negotiated()),
                };
                match result {
                    Ok(()) => Flow::Continue,
                    Err(err) => self.reject(err, socket).await,
                }
            }

            ClientMessage::LanguageChange {
                source_lang,
                target_langs,
            } => {
                match self
                    .lease
                    .update_languages(source_lang.as_deref(), target_langs.as_deref())
                {
                    Ok(languages) => {
                        let reply = ServerMessage::LanguagesUpdated {
                            source_lang: languages.source_lang,
                            target_langs: languages.target_langs,
                        };
                        if send(socket, &reply).await {
                            Flow::Continue
                        } else {
                            Flow::Disconnect
                        }
                    }
                    Err(err) => self.reject(err, socket).await,
                }
            }

            ClientMessage::End => {
                self.flush();
                match self.lease.end_session() {
                    Ok(_) => {
                        send(socket, &ServerMessage::Ended).await;
                        Flow::Ended
                    }
                    Err(err) => self.reject(err, socket).await,
                }
            }
        }
    }

    /// Report a per-message error; the connection stays open unless the
    /// session can no longer take media from it
    async fn reject(&self, err: SessionError, socket: &mut WebSocket) -> Flow {
        debug!("Session {}: rejected media message: {}", self.lease.key(), err);
        let fatal = matches!(err, SessionError::InvalidState { .. });
        if !send(socket, &ServerMessage::error(&err)).await || fatal {
            Flow::Disconnect
        } else {
            Flow::Continue
        }
    }

    fn parse_binary(&self, data: &[u8]) -> Result<IncomingAudio, SessionError> {
        match self.format {
            Some(format) => format.parse_binary(data),
            None => Err(not_negotiated()),
        }
    }

    fn ingest(&mut self, chunk: IncomingAudio) -> Result<(), SessionError> {
        let frames = self.framer.push(chunk);
        let result = self.lease.push_frames(frames);
        self.lease.set_next_sequence(self.framer.next_sequence());
        result
    }

    /// Emit the partially filled frame, if any
    fn flush(&mut self) {
        if let Some(frame) = self.framer.flush() {
            if let Err(e) = self.lease.push_frames(vec![frame]) {
                debug!("Session {}: final frame dropped: {}", self.lease.key(), e);
            }
        }
        self.lease.set_next_sequence(self.framer.next_sequence());
    }

    /// Release the lease; an active session moves to `broadcaster_disconnected`
    fn finish(mut self) {
        self.flush();
        debug!("Media channel for session {} closed", self.lease.key());
    }
}

fn not_negotiated() -> SessionError {
    SessionError::InvalidRequest("audio before offer".to_string())
}

/// Send a control message; false once the socket is gone
async fn send(socket: &mut WebSocket, msg: &ServerMessage) -> bool {
    socket.send(Message::Text(msg.to_json())).await.is_ok()
}
