use super::state::AppState;
use crate::broadcast::{Subscription, SubscriptionOptions};
use crate::error::SessionError;
use crate::ingest::protocol::error_name;
use crate::ingest::MediaIngest;
use crate::session::{Languages, Session, SessionKey, SessionState};
use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    response::Response,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

/// Close code sent to a subscriber that fell too far behind
pub const SLOW_CONSUMER_CLOSE_CODE: u16 = 4008;

// ============================================================================
// Broadcaster media channel
// ============================================================================

/// GET /sessions/:key/media
/// Attach the broadcaster; conflicts are reported before the upgrade
pub async fn media_socket(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Response, SessionError> {
    let lease = state
        .controller
        .attach_broadcaster(&SessionKey::from_string(key))?;
    let audio = state.controller.settings().audio.clone();

    Ok(ws.on_upgrade(move |socket| MediaIngest::new(lease, audio).run(socket)))
}

// ============================================================================
// Viewer subscription channel
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewerQuery {
    pub session: String,
    /// Comma separated translation languages, or `all`
    pub lang: Option<String>,
    #[serde(default)]
    pub replay: bool,
    pub after: Option<u64>,
    pub include_source: Option<bool>,
}

impl ViewerQuery {
    fn options(&self) -> SubscriptionOptions {
        SubscriptionOptions {
            langs: self.lang.as_deref().and_then(parse_lang_selection),
            include_source: self.include_source.unwrap_or(true),
            replay: self.replay,
            after: self.after,
        }
    }
}

/// Messages sent by a viewer
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ViewerRequest {
    #[serde(rename_all = "camelCase")]
    Init {
        #[serde(default)]
        target_language: Option<String>,
        #[serde(default)]
        include_source: Option<bool>,
    },
    #[serde(rename_all = "camelCase")]
    LanguageChange {
        #[serde(default)]
        target_language: Option<String>,
        #[serde(default)]
        include_source: Option<bool>,
    },
}

/// Control messages sent to a viewer; segment events go out as-is
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ViewerMessage {
    #[serde(rename_all = "camelCase")]
    Session {
        session_key: String,
        state: SessionState,
        source_lang: String,
        target_langs: Vec<String>,
    },
    #[serde(rename_all = "camelCase")]
    Languages {
        source_lang: String,
        target_langs: Vec<String>,
    },
    Ended,
    Error {
        error: String,
        message: String,
    },
}

impl ViewerMessage {
    fn languages(languages: Languages) -> Self {
        ViewerMessage::Languages {
            source_lang: languages.source_lang,
            target_langs: languages.target_langs,
        }
    }

    fn error(err: &SessionError) -> Self {
        ViewerMessage::Error {
            error: error_name(err).to_string(),
            message: err.to_string(),
        }
    }
}

/// `None` selects every target language
pub fn parse_lang_selection(value: &str) -> Option<HashSet<String>> {
    let langs: HashSet<String> = value
        .split(',')
        .map(str::trim)
        .filter(|lang| !lang.is_empty())
        .map(str::to_ascii_lowercase)
        .collect();

    if langs.is_empty() || langs.contains("all") {
        None
    } else {
        Some(langs)
    }
}

/// GET /ws?session=<key>&lang=<langs>&replay=<bool>&after=<index>&includeSource=<bool>
/// Subscribe a viewer; the subscription exists before the upgrade completes
pub async fn viewer_socket(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<ViewerQuery>,
) -> Result<Response, SessionError> {
    let key = SessionKey::from_string(query.session.clone());
    let session = state.controller.get(&key)?;
    let subscription = session.subscribe(query.options());

    Ok(ws.on_upgrade(move |socket| run_viewer(socket, session, subscription)))
}

async fn run_viewer(mut socket: WebSocket, session: Arc<Session>, subscription: Subscription) {
    let key = session.key().clone();
    let mut languages = session.watch_languages();
    let current = languages.borrow_and_update().clone();
    info!("Viewer {} joined session {}", subscription.id(), key);

    let hello = ViewerMessage::Session {
        session_key: key.to_string(),
        state: session.state(),
        source_lang: current.source_lang,
        target_langs: current.target_langs,
    };
    if !send_json(&mut socket, &hello).await {
        return;
    }

    let mut languages_open = true;
    loop {
        tokio::select! {
            event = subscription.recv() => match event {
                Ok(Some(event)) => {
                    if !send_json(&mut socket, &*event).await {
                        break;
                    }
                }
                Ok(None) => {
                    send_json(&mut socket, &ViewerMessage::Ended).await;
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                }
                Err(err) => {
                    send_json(&mut socket, &ViewerMessage::error(&err)).await;
                    let _ = socket
                        .send(Message::Close(Some(CloseFrame {
                            code: SLOW_CONSUMER_CLOSE_CODE,
                            reason: "slow consumer".into(),
                        })))
                        .await;
                    break;
                }
            },

            changed = languages.changed(), if languages_open => match changed {
                Ok(()) => {
                    let update = ViewerMessage::languages(languages.borrow_and_update().clone());
                    if !send_json(&mut socket, &update).await {
                        break;
                    }
                }
                Err(_) => languages_open = false,
            },

            msg = socket.recv() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if let Err(err) = apply_request(&text, &subscription) {
                        if !send_json(&mut socket, &ViewerMessage::error(&err)).await {
                            break;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!("Viewer socket error on session {}: {}", key, e);
                    break;
                }
                Some(Ok(_)) => {}
            },
        }
    }

    info!("Viewer {} left session {}", subscription.id(), key);
}

/// Apply a viewer's control message to its subscription
fn apply_request(text: &str, subscription: &Subscription) -> Result<(), SessionError> {
    let request: ViewerRequest = serde_json::from_str(text)
        .map_err(|e| SessionError::InvalidRequest(format!("malformed message: {}", e)))?;

    let (ViewerRequest::Init {
        target_language,
        include_source,
    }
    | ViewerRequest::LanguageChange {
        target_language,
        include_source,
    }) = request;

    if let Some(lang) = target_language {
        subscription.set_languages(parse_lang_selection(&lang));
    }
    if let Some(include_source) = include_source {
        subscription.set_include_source(include_source);
    }
    Ok(())
}

/// Send a JSON message; false once the socket is gone
async fn send_json<T: Serialize>(socket: &mut WebSocket, msg: &T) -> bool {
    match serde_json::to_string(msg) {
        Ok(text) => socket.send(Message::Text(text)).await.is_ok(),
        Err(_) => true,
    }
}
