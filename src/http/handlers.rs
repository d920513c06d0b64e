use super::state::AppState;
use crate::error::SessionError;
use crate::ingest::protocol::error_name;
use crate::session::{Languages, SessionKey, SessionState, SessionStats};
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{Method, StatusCode, Uri},
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub source_lang: String,
    pub target_langs: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionResponse {
    pub session_key: String,
    pub state: SessionState,
    pub source_lang: String,
    pub target_langs: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndSessionResponse {
    pub session_key: String,
    pub state: SessionState,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateLanguagesRequest {
    pub source_lang: Option<String>,
    pub target_langs: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
pub struct ListSessionsResponse {
    pub sessions: Vec<SessionStats>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

// ============================================================================
// Error mapping
// ============================================================================

impl SessionError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            SessionError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            SessionError::SessionConflict(_) | SessionError::InvalidState { .. } => {
                StatusCode::CONFLICT
            }
            SessionError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            SessionError::EngineTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            SessionError::EngineFailure { .. } => StatusCode::BAD_GATEWAY,
            SessionError::SlowConsumer { .. } => StatusCode::TOO_MANY_REQUESTS,
        }
    }
}

impl IntoResponse for SessionError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            warn!("Request failed: {}", self);
        }
        (
            status,
            Json(ErrorResponse {
                error: error_name(&self).to_string(),
                message: self.to_string(),
            }),
        )
            .into_response()
    }
}

fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, SessionError> {
    body.map(|Json(value)| value)
        .map_err(|rejection| SessionError::InvalidRequest(rejection.body_text()))
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /sessions
/// Create a new translation session
pub async fn create_session(
    State(state): State<AppState>,
    body: Result<Json<CreateSessionRequest>, JsonRejection>,
) -> Result<impl IntoResponse, SessionError> {
    let req = json_body(body)?;
    let session = state
        .controller
        .create_session(&req.source_lang, &req.target_langs)?;
    let Languages {
        source_lang,
        target_langs,
    } = session.languages();

    Ok((
        StatusCode::CREATED,
        Json(CreateSessionResponse {
            session_key: session.key().to_string(),
            state: session.state(),
            source_lang,
            target_langs,
        }),
    ))
}

/// GET /sessions
/// List live sessions
pub async fn list_sessions(State(state): State<AppState>) -> impl IntoResponse {
    Json(ListSessionsResponse {
        sessions: state.controller.list(),
    })
}

/// GET /sessions/:key
/// Status and counters of one session
pub async fn get_session(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<SessionStats>, SessionError> {
    let session = state.controller.get(&SessionKey::from_string(key))?;
    Ok(Json(session.stats()))
}

/// POST /sessions/:key/end
/// End a session; repeating the call is harmless
pub async fn end_session(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<EndSessionResponse>, SessionError> {
    let key = SessionKey::from_string(key);
    let session_state = state.controller.end_session(&key)?;
    info!("End requested for session {}", key);

    Ok(Json(EndSessionResponse {
        session_key: key.to_string(),
        state: session_state,
    }))
}

/// PATCH /sessions/:key/languages
/// Change source and/or target languages
pub async fn update_languages(
    State(state): State<AppState>,
    Path(key): Path<String>,
    body: Result<Json<UpdateLanguagesRequest>, JsonRejection>,
) -> Result<Json<Languages>, SessionError> {
    let req = json_body(body)?;
    if req.source_lang.is_none() && req.target_langs.is_none() {
        return Err(SessionError::InvalidRequest(
            "nothing to update: give sourceLang and/or targetLangs".to_string(),
        ));
    }

    let languages = state.controller.update_languages(
        &SessionKey::from_string(key),
        req.source_lang.as_deref(),
        req.target_langs.as_deref(),
    )?;
    Ok(Json(languages))
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "OK",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

/// GET /api
/// Service banner
pub async fn api_info(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "message": format!("{} API", state.service.name),
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

/// Fallback for unknown routes
pub async fn not_found(method: Method, uri: Uri) -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: "Not Found".to_string(),
            message: format!("Route {} {} not found", method, uri.path()),
        }),
    )
}
